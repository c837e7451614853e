//! IPv6 address discovery
//!
//! The client announces the address the relay should forward to, so only
//! externally reachable candidates qualify: loopback and link-local
//! (fe80::/10) addresses are filtered out. An explicitly configured
//! interface is preferred; otherwise the first candidate wins.

use get_if_addrs::{get_if_addrs, IfAddr};
use std::net::Ipv6Addr;
use tracing::warn;

/// Whether an address can be announced to the relay
pub fn is_reachable_candidate(addr: &Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return false;
    }
    // Link-local: fe80::/10
    (addr.segments()[0] & 0xffc0) != 0xfe80
}

/// Pick the IPv6 address to announce, preferring `interface` if given
pub fn public_ipv6(interface: Option<&str>) -> Option<Ipv6Addr> {
    let interfaces = match get_if_addrs() {
        Ok(list) => list,
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {}", e);
            return None;
        }
    };

    if let Some(name) = interface {
        let preferred = interfaces
            .iter()
            .filter(|iface| iface.name == name)
            .find_map(|iface| match &iface.addr {
                IfAddr::V6(v6) if is_reachable_candidate(&v6.ip) => Some(v6.ip),
                _ => None,
            });
        if preferred.is_some() {
            return preferred;
        }
        warn!(interface = name, "No usable IPv6 address on the configured interface");
    }

    interfaces.iter().find_map(|iface| match &iface.addr {
        IfAddr::V6(v6) if is_reachable_candidate(&v6.ip) => Some(v6.ip),
        _ => None,
    })
}

/// Whether the client can still bind the port it wants to own
pub async fn port_is_free(port: u16) -> bool {
    tokio::net::TcpListener::bind(("::", port)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_loopback_and_link_local() {
        assert!(!is_reachable_candidate(&Ipv6Addr::LOCALHOST));
        assert!(!is_reachable_candidate(&Ipv6Addr::UNSPECIFIED));
        assert!(!is_reachable_candidate(&"fe80::1".parse().unwrap()));
        assert!(!is_reachable_candidate(&"febf::1234".parse().unwrap()));
    }

    #[test]
    fn accepts_global_and_unique_local() {
        assert!(is_reachable_candidate(&"2001:db8::1".parse().unwrap()));
        assert!(is_reachable_candidate(&"fd00::42".parse().unwrap()));
        // fec0::/10 is deprecated site-local, but it is not link-local
        // and stays announceable.
        assert!(is_reachable_candidate(&"fec0::1".parse().unwrap()));
    }

    #[tokio::test]
    async fn port_availability_follows_binds() {
        let listener = tokio::net::TcpListener::bind("[::]:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(!port_is_free(port).await);
        drop(listener);
        assert!(port_is_free(port).await);
    }
}
