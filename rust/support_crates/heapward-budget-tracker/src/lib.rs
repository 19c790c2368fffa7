//! Byte budgets for capping the memory a heap may reserve.
//!
//! A [`Budget`] is a cheaply cloneable handle to a shared limit. Every successful
//! [`Budget::charge`] yields a [`Charge`] that gives its bytes back to the budget
//! when dropped, so the budget always reflects the memory that is actually held.

use std::sync::Arc;

use counter::Counter;

pub mod counter;

/// A shared byte limit that charges can be drawn from.
#[derive(Clone)]
pub struct Budget(Arc<BudgetInner>);

struct BudgetInner {
    limit: u64,
    remaining: Counter,
}

impl Budget {
    /// Creates a budget that allows up to `limit` bytes to be charged at once.
    pub fn new(limit: u64) -> Budget {
        Budget(Arc::new(BudgetInner {
            limit,
            remaining: Counter::new(limit),
        }))
    }

    /// Creates a budget that never runs out.
    pub fn unlimited() -> Budget {
        Budget::new(u64::MAX)
    }

    /// The configured limit.
    pub fn limit(&self) -> u64 {
        self.0.limit
    }

    /// Bytes still available.
    ///
    /// **Note**: intended for diagnostics; the value may be outdated by the time
    /// the caller observes it.
    pub fn remaining(&self) -> u64 {
        self.0.remaining.read()
    }

    /// Bytes currently charged.
    pub fn used(&self) -> u64 {
        self.0.limit.saturating_sub(self.remaining())
    }

    /// Draws `amount` bytes from the budget.
    ///
    /// Fails without side effects when fewer than `amount` bytes remain.
    pub fn charge(&self, amount: u64) -> Result<Charge, BudgetExhausted> {
        if self.0.remaining.withdraw(amount) {
            Ok(Charge {
                budget: self.0.clone(),
                amount,
            })
        } else {
            Err(BudgetExhausted {
                requested: amount,
                remaining: self.remaining(),
            })
        }
    }
}

impl std::fmt::Debug for Budget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Budget")
            .field("limit", &self.limit())
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Bytes drawn from a [`Budget`]; returned to it on drop.
pub struct Charge {
    budget: Arc<BudgetInner>,
    amount: u64,
}

impl Charge {
    /// The charged amount.
    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl Drop for Charge {
    fn drop(&mut self) {
        if self.amount != 0 {
            self.budget.remaining.deposit(self.amount);
        }
    }
}

impl std::fmt::Debug for Charge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Charge")
            .field("amount", &self.amount)
            .finish_non_exhaustive()
    }
}

/// A charge could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BudgetExhausted {
    pub requested: u64,
    pub remaining: u64,
}

impl std::fmt::Display for BudgetExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "memory budget exhausted: requested {} bytes, {} remaining",
            self.requested, self.remaining
        )
    }
}

impl std::error::Error for BudgetExhausted {}
