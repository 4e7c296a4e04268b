use crate::core::{Identifier, Role};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// How an unkeyed slave read picks a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaveBalance {
    #[default]
    RoundRobin,
    Random,
}

/// Engines and policy flags of one identifier.
///
/// The engine sequences never change after registration; only the two
/// flags are mutable, and they are atomics so readers never block.
pub struct EngineGroup<E> {
    identifier: Identifier,
    masters: Vec<Arc<E>>,
    slaves: Vec<Arc<E>>,
    read_only: AtomicBool,
    auto_transaction: AtomicBool,
    balance: SlaveBalance,
    next_slave: AtomicUsize,
}

impl<E> fmt::Debug for EngineGroup<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineGroup")
            .field("identifier", &self.identifier)
            .field("masters", &self.masters.len())
            .field("slaves", &self.slaves.len())
            .field("read_only", &self.is_read_only())
            .field("auto_transaction", &self.is_auto_transaction())
            .field("balance", &self.balance)
            .finish()
    }
}

impl<E> EngineGroup<E> {
    pub fn new(identifier: Identifier, masters: Vec<E>, slaves: Vec<E>) -> Self {
        Self {
            identifier,
            masters: masters.into_iter().map(Arc::new).collect(),
            slaves: slaves.into_iter().map(Arc::new).collect(),
            read_only: AtomicBool::new(false),
            auto_transaction: AtomicBool::new(false),
            balance: SlaveBalance::default(),
            next_slave: AtomicUsize::new(0),
        }
    }

    pub fn with_balance(mut self, balance: SlaveBalance) -> Self {
        self.balance = balance;
        self
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn masters(&self) -> &[Arc<E>] {
        &self.masters
    }

    pub fn slaves(&self) -> &[Arc<E>] {
        &self.slaves
    }

    pub fn engines(&self, role: Role) -> &[Arc<E>] {
        match role {
            Role::Master => &self.masters,
            Role::Slave => &self.slaves,
        }
    }

    pub fn master_count(&self) -> usize {
        self.masters.len()
    }

    pub fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    pub fn balance(&self) -> SlaveBalance {
        self.balance
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    pub fn is_auto_transaction(&self) -> bool {
        self.auto_transaction.load(Ordering::Acquire)
    }

    pub fn set_auto_transaction(&self, enabled: bool) {
        self.auto_transaction.store(enabled, Ordering::Release);
    }

    pub(crate) fn next_round_robin(&self) -> usize {
        self.next_slave.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_shows_counts_and_flags() {
        let group = EngineGroup::new(Identifier::new("orders"), vec!["m0", "m1"], vec!["s0"]);
        group.set_read_only(true);

        let text = format!("{:?}", group);
        assert!(text.starts_with("EngineGroup"));
        assert!(text.contains("masters: 2"));
        assert!(text.contains("slaves: 1"));
        assert!(text.contains("read_only: true"));
        assert!(text.contains("auto_transaction: false"));
    }

    #[test]
    fn test_flags_start_cleared() {
        let group = EngineGroup::new(Identifier::new("users"), vec!["m0"], Vec::new());
        assert!(!group.is_read_only());
        assert!(!group.is_auto_transaction());
        assert_eq!(group.balance(), SlaveBalance::RoundRobin);

        group.set_auto_transaction(true);
        assert!(group.is_auto_transaction());
    }
}
