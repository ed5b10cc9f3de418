//! Instance graphs, cascade planning and plan execution.
//!
//! `relmodel-session` turns a resolved [`RelationDescriptorStore`] and a live
//! [`InstanceGraph`] into writes:
//!
//! - [`CascadePlanner`] decides which instances a save or remove reaches and
//!   orders the resulting operations into a [`PersistencePlan`]
//! - [`CascadeExecutor`] applies a plan through a [`PersistenceClient`],
//!   writing generated keys back into the graph as it goes
//!
//! The graph also records collection snapshots ([`ChangeTracker`]) so that a
//! member dropped from a collection can be unlinked or deleted on the next save.
//!
//! [`RelationDescriptorStore`]: relmodel_core::RelationDescriptorStore

pub mod change_tracker;
pub mod client;
pub mod executor;
pub mod identity;
pub mod instance;
pub mod plan;
pub mod planner;

pub use change_tracker::{ChangeTracker, CollectionSnapshot};
pub use client::{Columns, PersistenceClient};
pub use executor::{CascadeExecutor, ExecutionProgress, ExecutorConfig, PersistenceResult};
pub use identity::{InstanceIdentity, describe, key_pairs, key_values};
pub use instance::{EntityInstance, InstanceGraph, InstanceId, RelationValue};
pub use plan::{ForeignKeyBinding, PersistencePlan, PlanOp, PlanOpKind};
pub use planner::{CascadePlanner, OrphanAction, PlanMode, PlannerConfig, plan};
