//! relmodel - relation-aware cascade persistence for entity graphs.
//!
//! relmodel takes per-entity relation declarations, resolves them into a
//! relation graph, and uses that graph to turn a save or remove of one
//! in-memory instance into an ordered list of row writes:
//!
//! - owning sides, join columns and junction tables inferred from declarations
//! - cascade inserts, updates and removes following each relation's flags
//! - referential actions (`RESTRICT`, `CASCADE`, `SET NULL`) honored on remove
//! - foreign key cycles split through nullable columns
//! - generated keys written back into the graph as the plan runs
//!
//! Row writes go through a [`PersistenceClient`] supplied by the caller.
//!
//! # Quick Start
//!
//! ```ignore
//! use relmodel::prelude::*;
//!
//! let schema = RawSchema::new()
//!     .entity(RawEntity::new("Category").generated_primary("id"))
//!     .entity(
//!         RawEntity::new("Question").generated_primary("id").relation(
//!             RawRelation::many_to_many("categories", "Category")
//!                 .join_table(RawJoinTable::default())
//!                 .cascade(CascadeOptions::insert()),
//!         ),
//!     );
//! let session = CascadeSession::new(Arc::new(resolve(&schema)?), client);
//!
//! let mut graph = InstanceGraph::new();
//! let q = graph.add("Question", [("title", "Why?")]);
//! let c = graph.add("Category", [("name", "philosophy")]);
//! graph.set_many(q, "categories", vec![c]);
//!
//! // insert Category, insert Question, link question_categories_category
//! session.save(&cx, &mut graph, q).await;
//! ```

pub use relmodel_core::{
    CascadeOptions, ColumnInfo, Cx, EntityId, EntityTypeDescriptor, Error, ExecutionError,
    JoinColumn, JunctionTable, NamingStrategy, OnDelete, Outcome, PersistenceError,
    PersistenceOperation, PlanningError, PlanningErrorKind, RawEntity, RawJoinColumn,
    RawJoinTable, RawRelation, RawSchema, RelationDescriptor, RelationDescriptorStore, RelationId,
    RelationKind, ResolutionError, ResolutionErrorKind, Resolver, ResolverConfig, Result, Value,
    resolve,
};
pub use relmodel_query::{EagerLoader, IncludePath, eager_relations};
pub use relmodel_session::{
    CascadeExecutor, CascadePlanner, ChangeTracker, Columns, EntityInstance, ExecutionProgress,
    ExecutorConfig, ForeignKeyBinding, InstanceGraph, InstanceId, OrphanAction, PersistenceClient,
    PersistencePlan, PersistenceResult, PlanMode, PlanOp, PlanOpKind, PlannerConfig,
    RelationValue, plan,
};

pub mod session;
pub use session::{CascadeSession, CascadeSessionBuilder};

/// Common imports.
///
/// ```ignore
/// use relmodel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CascadeOptions, CascadeSession, Cx, EagerLoader, Error, InstanceGraph, InstanceId,
        OnDelete, Outcome, PersistenceClient, PersistenceResult, PlannerConfig, RawEntity,
        RawJoinTable, RawRelation, RawSchema, RelationDescriptorStore, Result, Value, resolve,
    };
    pub use std::sync::Arc;
}
