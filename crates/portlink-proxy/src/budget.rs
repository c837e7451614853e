//! Global connection budget
//!
//! Every relayed connection holds exactly one unit of budget from
//! admission until both relay directions have finished. The unit is a
//! semaphore permit carried by the connection task, so it is released on
//! every exit path: rejection without a route, a failed upstream connect,
//! or normal relay teardown.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Fixed ceiling on simultaneously relayed connections
#[derive(Debug, Clone)]
pub struct ConnectionBudget {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// One unit of connection budget; dropping it releases the unit
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionBudget {
    /// Create a budget with the given ceiling
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Atomically check-and-take one unit, or None when at capacity
    pub fn try_acquire(&self) -> Option<ConnectionPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ConnectionPermit { _permit: permit })
    }

    /// Units currently held
    pub fn active(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// The configured ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_up_to_limit() {
        let budget = ConnectionBudget::new(2);
        let a = budget.try_acquire().expect("first unit");
        let b = budget.try_acquire().expect("second unit");
        assert!(budget.try_acquire().is_none(), "over budget");
        assert_eq!(budget.active(), 2);

        drop(a);
        assert_eq!(budget.active(), 1);
        let _c = budget.try_acquire().expect("unit freed by drop");
        drop(b);
    }

    #[test]
    fn returns_to_zero_after_release() {
        let budget = ConnectionBudget::new(5);
        {
            let _permits: Vec<_> = (0..5).filter_map(|_| budget.try_acquire()).collect();
            assert_eq!(budget.active(), 5);
        }
        assert_eq!(budget.active(), 0);
        assert_eq!(budget.limit(), 5);
    }

    #[test]
    fn zero_budget_rejects_everything() {
        let budget = ConnectionBudget::new(0);
        assert!(budget.try_acquire().is_none());
        assert_eq!(budget.active(), 0);
    }
}
