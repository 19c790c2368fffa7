use std::sync::atomic::{AtomicU64, Ordering};

/// A lock-free byte counter that supports concurrent withdrawals and deposits
/// without ever going negative.
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a counter holding `amount`.
    pub fn new(amount: u64) -> Counter {
        Counter(AtomicU64::new(amount))
    }

    /// Withdraws `amount` if the counter holds at least that much.
    ///
    /// Returns `false` and leaves the counter untouched otherwise. Concurrent
    /// withdrawals race through a compare-exchange loop, so the sum of all
    /// successful withdrawals never exceeds what was deposited.
    pub fn withdraw(&self, amount: u64) -> bool {
        let mut current = self.0.load(Ordering::Relaxed);
        while current >= amount {
            match self.0.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(updated) => current = updated,
            }
        }
        false
    }

    /// Returns `amount` to the counter, saturating at `u64::MAX`.
    pub fn deposit(&self, amount: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |current| {
                Some(current.saturating_add(amount))
            });
    }

    /// Current value; stale as soon as other threads touch the counter.
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Counter").field(&self.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_withdraw_within_balance() {
        let counter = Counter::new(100);
        assert!(counter.withdraw(40));
        assert!(counter.withdraw(60));
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn test_withdraw_over_balance_is_rejected() {
        let counter = Counter::new(100);
        assert!(!counter.withdraw(101));
        assert_eq!(counter.read(), 100);
    }

    #[test]
    fn test_deposit_saturates() {
        let counter = Counter::new(u64::MAX - 1);
        counter.deposit(10);
        assert_eq!(counter.read(), u64::MAX);
    }

    #[test]
    fn test_concurrent_withdraw_never_overdraws() {
        let counter = Arc::new(Counter::new(1000));
        let handles = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    let mut withdrawn = 0;
                    for _ in 0..50 {
                        if counter.withdraw(7) {
                            withdrawn += 7;
                        }
                    }
                    withdrawn
                })
            })
            .collect::<Vec<_>>();

        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total + counter.read(), 1000);
        assert!(counter.read() < 7);
    }
}
