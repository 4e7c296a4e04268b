use super::EngineGroup;
use crate::core::{Identified, Identifier, Result, RouterError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{Level, event};

/// Identifier → engine group lookup.
///
/// Groups are registered during setup and looked up on every routed call.
pub struct EngineRegistry<E> {
    groups: RwLock<HashMap<Identifier, Arc<EngineGroup<E>>>>,
}

impl<E> Default for EngineRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EngineRegistry<E> {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Registers masters (in shard order) and slaves for `identifier`.
    pub fn register_group(
        &self,
        identifier: impl Into<Identifier>,
        masters: Vec<E>,
        slaves: Vec<E>,
    ) -> Result<Arc<EngineGroup<E>>> {
        self.register(EngineGroup::new(identifier.into(), masters, slaves))
    }

    /// Registers a prepared group. Fails if the identifier is taken or the
    /// group has no master.
    pub fn register(&self, group: EngineGroup<E>) -> Result<Arc<EngineGroup<E>>> {
        if group.identifier().as_str().trim().is_empty() {
            return Err(RouterError::InvalidConfig(
                "identifier must not be empty".to_string(),
            ));
        }
        if group.master_count() == 0 {
            return Err(RouterError::InvalidConfig(format!(
                "identifier '{}' needs at least one master",
                group.identifier()
            )));
        }

        let mut groups = self.groups.write()?;
        if groups.contains_key(group.identifier()) {
            return Err(RouterError::DuplicateIdentifier(group.identifier().clone()));
        }

        event!(
            Level::INFO,
            identifier = %group.identifier(),
            masters = group.master_count(),
            slaves = group.slave_count(),
            "engine group registered"
        );
        let group = Arc::new(group);
        groups.insert(group.identifier().clone(), Arc::clone(&group));
        Ok(group)
    }

    pub fn group(&self, obj: impl Identified) -> Result<Arc<EngineGroup<E>>> {
        let identifier = obj.identifier();
        let groups = self.groups.read()?;
        groups
            .get(&identifier)
            .cloned()
            .ok_or(RouterError::UnknownIdentifier(identifier))
    }

    pub fn contains(&self, obj: impl Identified) -> bool {
        self.groups
            .read()
            .map(|groups| groups.contains_key(&obj.identifier()))
            .unwrap_or(false)
    }

    /// Registered identifiers, sorted.
    pub fn identifiers(&self) -> Result<Vec<Identifier>> {
        let groups = self.groups.read()?;
        let mut identifiers = groups.keys().cloned().collect::<Vec<_>>();
        identifiers.sort();
        Ok(identifiers)
    }

    pub fn set_read_only(&self, obj: impl Identified, read_only: bool) -> Result<()> {
        self.group(obj)?.set_read_only(read_only);
        Ok(())
    }

    pub fn is_read_only(&self, obj: impl Identified) -> Result<bool> {
        Ok(self.group(obj)?.is_read_only())
    }

    pub fn set_auto_transaction(&self, obj: impl Identified, enabled: bool) -> Result<()> {
        self.group(obj)?.set_auto_transaction(enabled);
        Ok(())
    }

    pub fn is_auto_transaction(&self, obj: impl Identified) -> Result<bool> {
        Ok(self.group(obj)?.is_auto_transaction())
    }

    /// Fails with `IdentifierReadOnly` when writes are disabled.
    pub fn ensure_writable(&self, obj: impl Identified) -> Result<Arc<EngineGroup<E>>> {
        let group = self.group(obj)?;
        if group.is_read_only() {
            return Err(RouterError::IdentifierReadOnly(group.identifier().clone()));
        }
        Ok(group)
    }
}
