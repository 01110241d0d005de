//! Credit-based flow-control budgets.
//!
//! A budget is a shared credit pool. The receiver side of a stream credits
//! it when it advertises window; the sender side debits it before putting
//! data in flight. A debit that would underflow is rejected and the sender
//! stalls until a later credit — the balance never goes negative and data
//! is never silently dropped.
//!
//! When several logical streams multiplex over one underlying transport,
//! their budgets are opened as children of the transport's budget. A child
//! debit is forwarded to the parent first, so the sum of all child debits
//! can never exceed what the parent itself was granted. That is the
//! backpressure-propagation invariant: no multiplexed child can over-consume
//! the shared transport's window.
//!
//! Credits become visible to stalled senders on their next poll iteration;
//! there is no separate wakeup channel on the data path.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::metrics;
use crate::utils::now_ms;
use crate::BudgetError;

struct BudgetEntry {
    balance: AtomicI64,
    /// Spendable floor: debits never take the balance below this threshold.
    padding: i64,
    parent: Option<u64>,
    children: AtomicUsize,
    /// Millisecond timestamp of the last child detach; 0 while attached.
    detached_at_ms: AtomicU64,
}

impl BudgetEntry {
    fn try_debit(&self, amount: i64) -> bool {
        let mut current = self.balance.load(Ordering::Acquire);
        loop {
            if current - amount < self.padding {
                return false;
            }
            match self.balance.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Process-wide budget table, shared by all workers. Balances are plain
/// atomics; per-budget serialization is the CAS loop, not a lock.
pub struct BudgetLedger {
    entries: DashMap<u64, Arc<BudgetEntry>>,
    next_id: AtomicU64,
}

impl Default for BudgetLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl BudgetLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh top-level budget with zero balance.
    pub fn supply_budget_id(&self) -> u64 {
        self.supply_budget(0)
    }

    /// Allocates a fresh top-level budget with a spendable floor.
    pub fn supply_budget(&self, padding: i64) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            id,
            Arc::new(BudgetEntry {
                balance: AtomicI64::new(0),
                padding,
                parent: None,
                children: AtomicUsize::new(1),
                detached_at_ms: AtomicU64::new(0),
            }),
        );
        trace!(budget_id = id, padding, "budget allocated");
        id
    }

    /// Allocates a budget drawing on `parent`: every debit against the child
    /// is first taken from the parent.
    pub fn supply_child_budget_id(&self, parent: u64) -> Result<u64, BudgetError> {
        let parent_entry = self
            .entries
            .get(&parent)
            .ok_or(BudgetError::UnknownBudget(parent))?;
        parent_entry.children.fetch_add(1, Ordering::AcqRel);
        parent_entry.detached_at_ms.store(0, Ordering::Release);
        drop(parent_entry);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            id,
            Arc::new(BudgetEntry {
                balance: AtomicI64::new(0),
                padding: 0,
                parent: Some(parent),
                children: AtomicUsize::new(1),
                detached_at_ms: AtomicU64::new(0),
            }),
        );
        Ok(id)
    }

    /// Raises the balance; called when a receiver advertises window. Safe
    /// from any worker owning a child of the budget.
    pub fn credit(&self, budget_id: u64, amount: u64) -> Result<i64, BudgetError> {
        let entry = self
            .entries
            .get(&budget_id)
            .ok_or(BudgetError::UnknownBudget(budget_id))?;
        let updated = entry.balance.fetch_add(amount as i64, Ordering::AcqRel) + amount as i64;
        trace!(budget_id, amount, balance = updated, "budget credited");
        Ok(updated)
    }

    /// Attempts to take `amount` of credit. Returns `false` leaving every
    /// balance untouched when the budget (or any ancestor) has insufficient
    /// credit; the caller must stall, not drop.
    pub fn debit(&self, budget_id: u64, amount: u64) -> bool {
        let Some(entry) = self.entries.get(&budget_id).map(|e| e.clone()) else {
            return false;
        };
        let amount = amount as i64;

        if let Some(parent) = entry.parent {
            if !self.debit(parent, amount as u64) {
                metrics::BUDGET_STALLS.inc();
                return false;
            }
            if !entry.try_debit(amount) {
                // Give the parent its credit back; nothing was consumed.
                let _ = self.credit(parent, amount as u64);
                metrics::BUDGET_STALLS.inc();
                return false;
            }
            return true;
        }

        let ok = entry.try_debit(amount);
        if !ok {
            metrics::BUDGET_STALLS.inc();
        }
        ok
    }

    /// Current balance, if the budget is still live.
    pub fn balance(&self, budget_id: u64) -> Option<i64> {
        self.entries
            .get(&budget_id)
            .map(|e| e.balance.load(Ordering::Acquire))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marks one child detached. The entry stays in the table until the
    /// linger delay elapses, absorbing credit/debit races during teardown.
    pub fn watch_close(&self, budget_id: u64) {
        if let Some(entry) = self.entries.get(&budget_id) {
            if entry.children.fetch_sub(1, Ordering::AcqRel) == 1 {
                entry.detached_at_ms.store(now_ms(), Ordering::Release);
            }
            if let Some(parent) = entry.parent {
                let parent = parent;
                drop(entry);
                self.watch_close(parent);
            }
        }
    }

    /// Reclaims budgets whose last child detached more than `linger_ms` ago.
    /// Driven by the dispatch agents' periodic sweep.
    pub fn sweep(&self, linger_ms: u64) -> usize {
        let now = now_ms();
        let mut reclaimed = 0;
        self.entries.retain(|id, entry| {
            let detached = entry.detached_at_ms.load(Ordering::Acquire);
            let expired = detached != 0 && now.saturating_sub(detached) >= linger_ms;
            if expired {
                debug!(budget_id = id, "budget reclaimed after linger");
                reclaimed += 1;
            }
            !expired
        });
        reclaimed
    }
}

/// Credit-granting half of a budget, handed to receiver-side handlers.
#[derive(Clone)]
pub struct Creditor {
    ledger: Arc<BudgetLedger>,
}

impl Creditor {
    pub fn new(ledger: Arc<BudgetLedger>) -> Self {
        Self { ledger }
    }

    pub fn credit(&self, budget_id: u64, amount: u64) -> Result<i64, BudgetError> {
        self.ledger.credit(budget_id, amount)
    }
}

/// Per-consumer debit view onto one budget.
#[derive(Clone)]
pub struct Debitor {
    ledger: Arc<BudgetLedger>,
    budget_id: u64,
}

impl Debitor {
    pub fn new(ledger: Arc<BudgetLedger>, budget_id: u64) -> Self {
        Self { ledger, budget_id }
    }

    pub fn budget_id(&self) -> u64 {
        self.budget_id
    }

    /// Attempts to take credit for `amount` bytes about to go in flight.
    pub fn debit(&self, amount: u64) -> bool {
        self.ledger.debit(self.budget_id, amount)
    }

    pub fn balance(&self) -> Option<i64> {
        self.ledger.balance(self.budget_id)
    }
}
