//! Collection snapshots for difference-based removal.
//!
//! A snapshot records which instances a collection relation held when it was
//! last known to match storage. The planner compares the live collection
//! against it to find members that were removed in memory. Without a
//! snapshot nothing can be inferred, and removal-by-absence is skipped.

use crate::instance::InstanceId;
use std::collections::HashMap;

/// Members of one collection relation when it last matched storage.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot {
    members: Vec<InstanceId>,
}

impl CollectionSnapshot {
    pub fn new(members: Vec<InstanceId>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[InstanceId] {
        &self.members
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.members.contains(&id)
    }
}

/// Snapshots keyed by owning instance and relation property.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    snapshots: HashMap<(InstanceId, String), CollectionSnapshot>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current members of `owner.property`.
    #[tracing::instrument(level = "trace", skip(self, members))]
    pub fn snapshot(&mut self, owner: InstanceId, property: &str, members: Vec<InstanceId>) {
        tracing::trace!(
            owner = owner.index(),
            property,
            members = members.len(),
            "Taking collection snapshot"
        );
        self.snapshots
            .insert((owner, property.to_string()), CollectionSnapshot::new(members));
    }

    pub fn get(&self, owner: InstanceId, property: &str) -> Option<&CollectionSnapshot> {
        self.snapshots.get(&(owner, property.to_string()))
    }

    /// Members present in the snapshot but missing from `current`.
    ///
    /// Returns `None` if no snapshot exists.
    pub fn removed_members(
        &self,
        owner: InstanceId,
        property: &str,
        current: &[InstanceId],
    ) -> Option<Vec<InstanceId>> {
        self.get(owner, property).map(|snap| {
            snap.members
                .iter()
                .copied()
                .filter(|m| !current.contains(m))
                .collect()
        })
    }

    /// Drop every snapshot owned by `owner`.
    pub fn forget(&mut self, owner: InstanceId) {
        self.snapshots.retain(|(id, _), _| *id != owner);
    }
}
