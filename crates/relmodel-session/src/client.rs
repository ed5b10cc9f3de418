//! The storage collaborator that plans are executed against.
//!
//! The executor never builds statements itself. Each [`PlanOp`](crate::PlanOp)
//! becomes exactly one call on a [`PersistenceClient`], which may be a SQL
//! driver, a key-value store or an in-memory recorder.

use asupersync::{Cx, Outcome};
use relmodel_core::{EntityTypeDescriptor, JunctionTable, PersistenceError, Value};
use std::future::Future;

/// `(column, value)` pairs in column order.
pub type Columns = Vec<(String, Value)>;

/// Row-level writes used by the cascade executor.
///
/// Implementations must be `Send + Sync` for use across async boundaries.
/// All operations take a `Cx` so the caller's cancellation and budget apply.
pub trait PersistenceClient: Send + Sync {
    /// Insert one row of `entity`.
    ///
    /// Returns the key columns produced by the store (auto-increment ids,
    /// sequences). Columns the caller already supplied may be omitted.
    fn insert_row(
        &self,
        cx: &Cx,
        entity: &EntityTypeDescriptor,
        columns: &[(String, Value)],
    ) -> impl Future<Output = Outcome<Columns, PersistenceError>> + Send;

    /// Update the row identified by `key` with `columns`.
    fn update_row(
        &self,
        cx: &Cx,
        entity: &EntityTypeDescriptor,
        key: &[(String, Value)],
        columns: &[(String, Value)],
    ) -> impl Future<Output = Outcome<(), PersistenceError>> + Send;

    /// Delete the row identified by `key`.
    fn delete_row(
        &self,
        cx: &Cx,
        entity: &EntityTypeDescriptor,
        key: &[(String, Value)],
    ) -> impl Future<Output = Outcome<(), PersistenceError>> + Send;

    /// Insert a junction row linking two keys. Column names are the junction's.
    fn insert_junction_row(
        &self,
        cx: &Cx,
        junction: &JunctionTable,
        owner_key: &[(String, Value)],
        inverse_key: &[(String, Value)],
    ) -> impl Future<Output = Outcome<(), PersistenceError>> + Send;

    /// Delete the junction row linking two keys.
    fn delete_junction_row(
        &self,
        cx: &Cx,
        junction: &JunctionTable,
        owner_key: &[(String, Value)],
        inverse_key: &[(String, Value)],
    ) -> impl Future<Output = Outcome<(), PersistenceError>> + Send;
}
