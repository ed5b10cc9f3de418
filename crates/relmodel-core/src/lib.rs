//! Core types for relmodel.
//!
//! This crate provides relation metadata and its resolution:
//!
//! - `RawSchema` and friends: per-entity relation declarations
//! - `Resolver`: owning-side detection, join naming, inverse linking
//! - `RelationDescriptorStore`: the immutable resolved relation graph
//! - `Value` for dynamically-typed column values
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod declaration;
pub mod error;
pub mod metadata;
pub mod naming;
pub mod resolve;
pub mod store;
pub mod value;

pub use declaration::{RawEntity, RawJoinColumn, RawJoinTable, RawRelation, RawSchema};
pub use error::{
    Error, ExecutionError, PersistenceError, PersistenceOperation, PlanningError,
    PlanningErrorKind, ResolutionError, ResolutionErrorKind, Result,
};
pub use metadata::{
    CascadeOptions, ColumnInfo, EntityId, EntityTypeDescriptor, JoinColumn, JunctionTable,
    OnDelete, RelationDescriptor, RelationId, RelationKind,
};
pub use naming::{NamingStrategy, is_valid_identifier};
pub use resolve::{Resolver, ResolverConfig, resolve};
pub use store::RelationDescriptorStore;
pub use value::{Value, hash_values};
