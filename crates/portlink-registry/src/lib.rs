//! Client registry for reverse tunnel routing
//!
//! Maps a proxy port to the remote IPv6 endpoint currently allowed to
//! receive traffic on that port. Entries are kept alive by reports and
//! heartbeats from the client and expire once `client_timeout` passes
//! without either. Expired entries are removed both lazily (a lookup that
//! finds a stale record deletes it) and eagerly (a periodic sweep), and
//! the two paths share the same check-then-remove under the write lock so
//! they can race safely.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Default liveness window for a registered client
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Period of the background expiry sweep
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One registered tunnel endpoint, keyed by proxy port
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// Proxy port this record routes (unique key)
    pub port: u16,
    /// Reachable IPv6 endpoint of the client
    pub remote_address: Ipv6Addr,
    /// Last successful report or heartbeat, used for liveness
    pub last_seen: Instant,
    /// Wall-clock counterpart of `last_seen`, for the control plane
    pub last_seen_at: DateTime<Utc>,
    /// Connections routed to this record (informational, monotonic)
    pub connection_count: u64,
}

impl ClientRecord {
    fn new(port: u16, remote_address: Ipv6Addr) -> Self {
        Self {
            port,
            remote_address,
            last_seen: Instant::now(),
            last_seen_at: Utc::now(),
            connection_count: 0,
        }
    }

    fn is_live(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() < timeout
    }
}

/// Registry of connected tunnel clients
///
/// Cheap to clone; all clones share the same table. Mutations and
/// consistency-sensitive reads take the write lock, `list_active` and the
/// counters take the read lock. No lock is ever held across an await
/// point.
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<u16, ClientRecord>>>,
    timeout: Duration,
}

impl ClientRegistry {
    /// Create a registry with the given client liveness timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    /// Register a client endpoint for a port, or overwrite the existing
    /// registration (last writer wins, no merge)
    ///
    /// Re-registration resets `last_seen`; the connection counter starts
    /// over because the record now describes a fresh endpoint.
    pub fn register(&self, port: u16, remote_address: Ipv6Addr) {
        let mut clients = self.clients.write().unwrap();
        let replaced = clients.insert(port, ClientRecord::new(port, remote_address));

        if let Some(old) = replaced {
            tracing::info!(
                port = port,
                remote_address = %remote_address,
                previous_address = %old.remote_address,
                "Re-registered client (replaced previous endpoint)"
            );
        } else {
            tracing::info!(
                port = port,
                remote_address = %remote_address,
                "Registered client"
            );
        }
    }

    /// Refresh the liveness timestamp for a registered port
    ///
    /// Succeeds for any record that still exists, even one past its
    /// timeout that no sweep has removed yet. Returns false if no record
    /// exists; a heartbeat never creates one.
    pub fn heartbeat(&self, port: u16) -> bool {
        let mut clients = self.clients.write().unwrap();
        match clients.get_mut(&port) {
            Some(record) => {
                record.last_seen = Instant::now();
                record.last_seen_at = Utc::now();
                tracing::debug!(port = port, "Heartbeat refreshed client");
                true
            }
            None => {
                tracing::debug!(port = port, "Heartbeat for unknown port");
                false
            }
        }
    }

    /// Look up the live record for a port
    ///
    /// A record found to be expired here is deleted on the spot, not just
    /// hidden, so a later heartbeat for the same port reports not-found.
    pub fn lookup(&self, port: u16) -> Option<ClientRecord> {
        let mut clients = self.clients.write().unwrap();
        match clients.get(&port) {
            Some(record) if record.is_live(self.timeout) => Some(record.clone()),
            Some(_) => {
                clients.remove(&port);
                tracing::info!(port = port, "Client expired, removed at lookup");
                None
            }
            None => None,
        }
    }

    /// Bump the connection counter for a port, if it is still registered
    pub fn count_connection(&self, port: u16) {
        let mut clients = self.clients.write().unwrap();
        if let Some(record) = clients.get_mut(&port) {
            record.connection_count += 1;
        }
    }

    /// Snapshot of all live records, keyed by port
    ///
    /// Pure read: expired records are filtered out but left in place for
    /// the sweep or a lookup to delete.
    pub fn list_active(&self) -> HashMap<u16, ClientRecord> {
        let clients = self.clients.read().unwrap();
        clients
            .iter()
            .filter(|(_, record)| record.is_live(self.timeout))
            .map(|(port, record)| (*port, record.clone()))
            .collect()
    }

    /// Number of live records
    pub fn active_count(&self) -> usize {
        let clients = self.clients.read().unwrap();
        clients
            .values()
            .filter(|record| record.is_live(self.timeout))
            .count()
    }

    /// Remove every expired record, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let mut clients = self.clients.write().unwrap();
        let before = clients.len();
        clients.retain(|port, record| {
            let live = record.is_live(self.timeout);
            if !live {
                tracing::info!(port = *port, "Swept expired client");
            }
            live
        });
        before - clients.len()
    }

    /// Spawn the background expiry sweep on the given period
    ///
    /// The task runs for the life of the process; callers keep the handle
    /// only if they want to abort it in tests.
    pub fn start_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it so a fresh
            // registry is not swept at startup.
            interval.tick().await;
            loop {
                interval.tick().await;
                let swept = registry.sweep_expired();
                if swept > 0 {
                    tracing::debug!(swept = swept, "Expiry sweep removed clients");
                }
            }
        })
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_A: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
    const ADDR_B: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2);

    #[test]
    fn register_and_lookup() {
        let registry = ClientRegistry::default();
        registry.register(9000, ADDR_A);

        let record = registry.lookup(9000).expect("record should be live");
        assert_eq!(record.port, 9000);
        assert_eq!(record.remote_address, ADDR_A);
        assert_eq!(record.connection_count, 0);
    }

    #[test]
    fn last_writer_wins() {
        let registry = ClientRegistry::default();
        registry.register(9000, ADDR_A);
        registry.register(9000, ADDR_B);

        let record = registry.lookup(9000).unwrap();
        assert_eq!(record.remote_address, ADDR_B);
        assert_eq!(registry.list_active().len(), 1);
    }

    #[test]
    fn lookup_evicts_expired_record() {
        let registry = ClientRegistry::new(Duration::from_millis(50));
        registry.register(9000, ADDR_A);
        std::thread::sleep(Duration::from_millis(80));

        assert!(registry.lookup(9000).is_none());
        // The expired record was deleted, not hidden: a heartbeat now
        // finds nothing to refresh.
        assert!(!registry.heartbeat(9000));
    }

    #[test]
    fn heartbeat_extends_liveness() {
        let registry = ClientRegistry::new(Duration::from_millis(100));
        registry.register(9000, ADDR_A);

        std::thread::sleep(Duration::from_millis(60));
        assert!(registry.heartbeat(9000));

        // Past the original deadline but within the refreshed one.
        std::thread::sleep(Duration::from_millis(60));
        assert!(registry.lookup(9000).is_some());
    }

    #[test]
    fn heartbeat_never_creates_a_record() {
        let registry = ClientRegistry::default();
        for _ in 0..3 {
            assert!(!registry.heartbeat(9000));
        }
        assert!(registry.lookup(9000).is_none());
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn list_active_filters_without_mutating() {
        let registry = ClientRegistry::new(Duration::from_millis(50));
        registry.register(9000, ADDR_A);
        registry.register(9001, ADDR_B);
        std::thread::sleep(Duration::from_millis(80));
        registry.heartbeat(9001);

        let active = registry.list_active();
        assert_eq!(active.len(), 1);
        assert!(active.contains_key(&9001));

        // The expired record is hidden but still present, so a heartbeat
        // can still revive it.
        assert!(registry.heartbeat(9000));
        assert_eq!(registry.list_active().len(), 2);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let registry = ClientRegistry::new(Duration::from_millis(50));
        registry.register(9000, ADDR_A);
        registry.register(9001, ADDR_B);
        std::thread::sleep(Duration::from_millis(80));
        registry.heartbeat(9001);

        assert_eq!(registry.sweep_expired(), 1);
        assert!(registry.lookup(9000).is_none());
        assert!(registry.lookup(9001).is_some());

        // After the sweep the heartbeat sees the deletion.
        assert!(!registry.heartbeat(9000));
    }

    #[test]
    fn count_connection_is_monotonic() {
        let registry = ClientRegistry::default();
        registry.register(9000, ADDR_A);
        registry.count_connection(9000);
        registry.count_connection(9000);
        assert_eq!(registry.lookup(9000).unwrap().connection_count, 2);

        // Counting an unknown port is a no-op, never a panic.
        registry.count_connection(9999);
    }

    #[test]
    fn reregistration_resets_counter() {
        let registry = ClientRegistry::default();
        registry.register(9000, ADDR_A);
        registry.count_connection(9000);
        registry.register(9000, ADDR_B);
        assert_eq!(registry.lookup(9000).unwrap().connection_count, 0);
    }

    #[tokio::test]
    async fn sweeper_task_removes_expired() {
        let registry = ClientRegistry::new(Duration::from_millis(50));
        registry.register(9000, ADDR_A);

        let handle = registry.start_sweeper(Duration::from_millis(40));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!registry.heartbeat(9000), "sweeper should have removed it");
        handle.abort();
    }

    #[test]
    fn concurrent_heartbeats_and_sweeps() {
        let registry = ClientRegistry::new(Duration::from_millis(30));
        for port in 9000..9010 {
            registry.register(port, ADDR_A);
        }

        let sweeper = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    registry.sweep_expired();
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };
        let beater = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    for port in 9000..9010 {
                        registry.heartbeat(port);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };

        sweeper.join().unwrap();
        beater.join().unwrap();

        // Heartbeats kept firing throughout, so everything is still live.
        assert_eq!(registry.active_count(), 10);
    }
}
