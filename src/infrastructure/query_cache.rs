use crate::domain::models::{QueryGroup, QueryGroupSet};
use crate::infrastructure::error::InfraError;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupStatus {
    pub stale: bool,
    /// Bumped on every invalidation so a view can tell whether its data
    /// predates the latest mutation.
    pub generation: u64,
}

/// Process-wide staleness ledger for cached query groups.
pub trait QueryCache: Send + Sync {
    fn mark_stale(&self, group: QueryGroup) -> Result<(), InfraError>;
    /// Clears `stale` only if no invalidation landed since `generation` was
    /// read. Returns whether the group is now fresh.
    fn mark_fresh_if(&self, group: QueryGroup, generation: u64) -> Result<bool, InfraError>;
    fn status(&self, group: QueryGroup) -> Result<GroupStatus, InfraError>;
    fn stale_groups(&self) -> Result<QueryGroupSet, InfraError>;
}

#[derive(Debug, Default)]
pub struct InMemoryQueryCache {
    groups: Mutex<HashMap<QueryGroup, GroupStatus>>,
}

impl QueryCache for InMemoryQueryCache {
    fn mark_stale(&self, group: QueryGroup) -> Result<(), InfraError> {
        let mut groups = self
            .groups
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("query cache lock poisoned: {error}")))?;
        let status = groups.entry(group).or_default();
        status.stale = true;
        status.generation = status.generation.saturating_add(1);
        Ok(())
    }

    fn mark_fresh_if(&self, group: QueryGroup, generation: u64) -> Result<bool, InfraError> {
        let mut groups = self
            .groups
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("query cache lock poisoned: {error}")))?;
        let status = groups.entry(group).or_default();
        if status.generation != generation {
            return Ok(false);
        }
        status.stale = false;
        Ok(true)
    }

    fn status(&self, group: QueryGroup) -> Result<GroupStatus, InfraError> {
        let groups = self
            .groups
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("query cache lock poisoned: {error}")))?;
        Ok(groups.get(&group).copied().unwrap_or_default())
    }

    fn stale_groups(&self) -> Result<QueryGroupSet, InfraError> {
        let groups = self
            .groups
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("query cache lock poisoned: {error}")))?;
        Ok(groups
            .iter()
            .filter(|(_, status)| status.stale)
            .map(|(group, _)| *group)
            .collect())
    }
}
