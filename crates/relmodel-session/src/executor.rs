//! Plan execution.
//!
//! [`CascadeExecutor`] walks a [`PersistencePlan`] in order and issues one
//! [`PersistenceClient`] call per operation. Column values are read from the
//! instance graph when each operation runs: a key generated by an insert is
//! written back into the graph and is then visible to every later foreign key
//! and junction write in the same plan.
//!
//! Execution stops at the first failure. Nothing is rolled back here; the
//! error reports how many operations completed so the caller's transaction
//! boundary can decide what to do.

use crate::client::{Columns, PersistenceClient};
use crate::identity::{describe, key_pairs};
use crate::instance::{InstanceGraph, InstanceId};
use crate::plan::{ForeignKeyBinding, PersistencePlan, PlanOp, PlanOpKind};
use asupersync::{CancelKind, CancelReason, Cx, Outcome};
use relmodel_core::{
    EntityTypeDescriptor, Error, ExecutionError, JoinColumn, JunctionTable,
    PersistenceError, PersistenceOperation, RelationDescriptorStore, RelationId, Value,
};
use std::collections::BTreeSet;

/// Configuration for a [`CascadeExecutor`].
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Re-snapshot the collections of written instances after a successful run.
    pub refresh_snapshots: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            refresh_snapshots: true,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn refresh_snapshots(mut self, enabled: bool) -> Self {
        self.refresh_snapshots = enabled;
        self
    }
}

/// Counts of the writes a plan performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceResult {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub foreign_keys_updated: usize,
    pub junction_inserted: usize,
    pub junction_deleted: usize,
}

impl PersistenceResult {
    /// Total number of operations performed.
    pub fn total(&self) -> usize {
        self.inserted
            + self.updated
            + self.deleted
            + self.foreign_keys_updated
            + self.junction_inserted
            + self.junction_deleted
    }

    fn record(&mut self, kind: PlanOpKind) {
        match kind {
            PlanOpKind::Insert => self.inserted += 1,
            PlanOpKind::Update => self.updated += 1,
            PlanOpKind::Delete => self.deleted += 1,
            PlanOpKind::UpdateForeignKey => self.foreign_keys_updated += 1,
            PlanOpKind::InsertJunction => self.junction_inserted += 1,
            PlanOpKind::DeleteJunction => self.junction_deleted += 1,
        }
    }
}

/// How far the last run got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionProgress {
    /// Operations that completed, always a prefix of the plan.
    pub completed: usize,
    pub total: usize,
}

impl ExecutionProgress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// Applies persistence plans through a [`PersistenceClient`].
#[derive(Debug, Default)]
pub struct CascadeExecutor {
    config: ExecutorConfig,
    progress: ExecutionProgress,
    result: PersistenceResult,
}

impl CascadeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Progress of the most recent [`execute`](Self::execute) call.
    pub fn progress(&self) -> ExecutionProgress {
        self.progress
    }

    /// Counts of the most recent call, including a partial run.
    pub fn result(&self) -> &PersistenceResult {
        &self.result
    }

    /// Execute `plan` operation by operation.
    ///
    /// Operations run strictly in sequence. Cancellation is checked before
    /// each one; a cancelled run stops issuing writes and
    /// [`progress`](Self::progress) reports the completed prefix.
    #[tracing::instrument(level = "info", skip_all, fields(ops = plan.len()))]
    pub async fn execute<C: PersistenceClient>(
        &mut self,
        cx: &Cx,
        plan: &PersistencePlan,
        store: &RelationDescriptorStore,
        graph: &mut InstanceGraph,
        client: &C,
    ) -> Outcome<PersistenceResult, Error> {
        self.progress = ExecutionProgress {
            completed: 0,
            total: plan.len(),
        };
        self.result = PersistenceResult::default();

        for (index, op) in plan.iter().enumerate() {
            if let Some(reason) = cancel_reason(cx) {
                tracing::warn!(completed = index, total = plan.len(), "Plan execution cancelled");
                return Outcome::Cancelled(reason);
            }

            let call = match prepare(op, store, graph) {
                Ok(call) => call,
                Err(source) => return Outcome::Err(self.failure(index, op, store, graph, source)),
            };
            tracing::trace!(index, operation = %op.describe(store, graph), "Executing operation");

            let generated = match dispatch(cx, client, call).await {
                Outcome::Ok(generated) => generated,
                Outcome::Err(source) => {
                    return Outcome::Err(self.failure(index, op, store, graph, source));
                }
                Outcome::Cancelled(reason) => {
                    tracing::warn!(completed = index, "Persistence call cancelled");
                    return Outcome::Cancelled(reason);
                }
                Outcome::Panicked(payload) => return Outcome::Panicked(payload),
            };

            write_back(op, graph, generated);
            self.progress.completed = index + 1;
            self.result.record(op.kind());
        }

        if self.config.refresh_snapshots {
            refresh_snapshots(plan, graph);
        }

        tracing::info!(
            inserted = self.result.inserted,
            updated = self.result.updated,
            deleted = self.result.deleted,
            foreign_keys_updated = self.result.foreign_keys_updated,
            junction_inserted = self.result.junction_inserted,
            junction_deleted = self.result.junction_deleted,
            "Plan executed"
        );
        Outcome::Ok(self.result)
    }

    fn failure(
        &self,
        index: usize,
        op: &PlanOp,
        store: &RelationDescriptorStore,
        graph: &InstanceGraph,
        source: PersistenceError,
    ) -> Error {
        let operation = op.describe(store, graph);
        tracing::error!(
            completed = self.progress.completed,
            failed_index = index,
            %operation,
            error = %source,
            "Plan execution failed"
        );
        Error::Execution(ExecutionError {
            completed: self.progress.completed,
            failed_index: index,
            operation,
            source,
        })
    }
}

/// A collaborator call with all values resolved.
enum Call<'s> {
    Insert {
        entity: &'s EntityTypeDescriptor,
        columns: Columns,
    },
    Update {
        entity: &'s EntityTypeDescriptor,
        key: Columns,
        columns: Columns,
    },
    Delete {
        entity: &'s EntityTypeDescriptor,
        key: Columns,
    },
    Link {
        insert: bool,
        junction: &'s JunctionTable,
        owner: Columns,
        inverse: Columns,
    },
}

async fn dispatch<C: PersistenceClient>(
    cx: &Cx,
    client: &C,
    call: Call<'_>,
) -> Outcome<Columns, PersistenceError> {
    let unit = match call {
        Call::Insert { entity, columns } => return client.insert_row(cx, entity, &columns).await,
        Call::Update {
            entity,
            key,
            columns,
        } => client.update_row(cx, entity, &key, &columns).await,
        Call::Delete { entity, key } => client.delete_row(cx, entity, &key).await,
        Call::Link {
            insert: true,
            junction,
            owner,
            inverse,
        } => client.insert_junction_row(cx, junction, &owner, &inverse).await,
        Call::Link {
            insert: false,
            junction,
            owner,
            inverse,
        } => client.delete_junction_row(cx, junction, &owner, &inverse).await,
    };
    match unit {
        Outcome::Ok(()) => Outcome::Ok(Vec::new()),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

fn prepare<'s>(
    plan_op: &PlanOp,
    store: &'s RelationDescriptorStore,
    graph: &InstanceGraph,
) -> Result<Call<'s>, PersistenceError> {
    match plan_op {
        PlanOp::Insert {
            instance,
            entity,
            foreign_keys,
        } => {
            let entity = store.entity(*entity);
            let op = PersistenceOperation::InsertRow;
            let inst = graph
                .get(*instance)
                .ok_or_else(|| missing_instance(op, entity, *instance))?;
            // Generated key columns without a value are left to the store.
            let mut columns: Columns = inst
                .values()
                .iter()
                .filter(|(name, value)| {
                    !(value.is_null()
                        && entity
                            .primary_columns
                            .iter()
                            .any(|c| c.generated && c.name == **name))
                })
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            for binding in foreign_keys {
                merge(&mut columns, binding_columns(op, entity, store, graph, binding)?);
            }
            Ok(Call::Insert { entity, columns })
        }
        PlanOp::Update {
            instance,
            entity,
            foreign_keys,
        } => {
            let entity = store.entity(*entity);
            let op = PersistenceOperation::UpdateRow;
            let key = stored_key(op, entity, graph, *instance)?;
            let inst = graph
                .get(*instance)
                .ok_or_else(|| missing_instance(op, entity, *instance))?;
            let mut columns: Columns = inst
                .values()
                .iter()
                .filter(|(name, _)| !entity.is_primary_column(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            for binding in foreign_keys {
                merge(&mut columns, binding_columns(op, entity, store, graph, binding)?);
            }
            Ok(Call::Update {
                entity,
                key,
                columns,
            })
        }
        PlanOp::UpdateForeignKey {
            instance,
            entity,
            binding,
        } => {
            let entity = store.entity(*entity);
            let op = PersistenceOperation::UpdateRow;
            let key = stored_key(op, entity, graph, *instance)?;
            let columns = binding_columns(op, entity, store, graph, binding)?;
            Ok(Call::Update {
                entity,
                key,
                columns,
            })
        }
        PlanOp::Delete { instance, entity } => {
            let entity = store.entity(*entity);
            let key = stored_key(PersistenceOperation::DeleteRow, entity, graph, *instance)?;
            Ok(Call::Delete { entity, key })
        }
        PlanOp::InsertJunction {
            relation,
            owner,
            inverse,
        } => link_call(true, store, graph, *relation, *owner, *inverse),
        PlanOp::DeleteJunction {
            relation,
            owner,
            inverse,
        } => link_call(false, store, graph, *relation, *owner, *inverse),
    }
}

fn link_call<'s>(
    insert: bool,
    store: &'s RelationDescriptorStore,
    graph: &InstanceGraph,
    relation: RelationId,
    owner: InstanceId,
    inverse: InstanceId,
) -> Result<Call<'s>, PersistenceError> {
    let op = if insert {
        PersistenceOperation::InsertJunctionRow
    } else {
        PersistenceOperation::DeleteJunctionRow
    };
    let rel = store.relation(relation);
    let junction = rel.junction_table.as_ref().ok_or_else(|| {
        PersistenceError::new(
            op,
            &rel.property,
            "relation has no junction table",
        )
    })?;
    let owner = referenced_values(op, &junction.table_name, store, graph, owner, &junction.owner_join_columns)?;
    let inverse = referenced_values(
        op,
        &junction.table_name,
        store,
        graph,
        inverse,
        &junction.inverse_join_columns,
    )?;
    Ok(Call::Link {
        insert,
        junction,
        owner,
        inverse,
    })
}

/// Join column values for a foreign key binding; NULL for every column if unbound.
fn binding_columns(
    op: PersistenceOperation,
    entity: &EntityTypeDescriptor,
    store: &RelationDescriptorStore,
    graph: &InstanceGraph,
    binding: &ForeignKeyBinding,
) -> Result<Columns, PersistenceError> {
    let rel = store.relation(binding.relation);
    match binding.target {
        None => Ok(rel
            .join_columns
            .iter()
            .map(|jc| (jc.name.clone(), Value::Null))
            .collect()),
        Some(target) => referenced_values(op, &entity.name, store, graph, target, &rel.join_columns)
            .map_err(|e| PersistenceError {
                message: format!("foreign key '{}': {}", rel.property, e.message),
                ..e
            }),
    }
}

/// Read `referenced_column` of each join column from `target`.
fn referenced_values(
    op: PersistenceOperation,
    owner: &str,
    store: &RelationDescriptorStore,
    graph: &InstanceGraph,
    target: InstanceId,
    columns: &[JoinColumn],
) -> Result<Columns, PersistenceError> {
    let inst = graph.get(target).ok_or_else(|| {
        PersistenceError::new(op, owner, format!("instance #{} is not part of the graph", target.index()))
    })?;
    columns
        .iter()
        .map(|jc| match inst.value(&jc.referenced_column).filter(|v| !v.is_null()) {
            Some(value) => Ok((jc.name.clone(), value.clone())),
            None => Err(PersistenceError::new(
                op,
                owner,
                format!(
                    "{} has no value for '{}'",
                    render(store, graph, target),
                    jc.referenced_column
                ),
            )),
        })
        .collect()
}

fn stored_key(
    op: PersistenceOperation,
    entity: &EntityTypeDescriptor,
    graph: &InstanceGraph,
    instance: InstanceId,
) -> Result<Columns, PersistenceError> {
    let inst = graph
        .get(instance)
        .ok_or_else(|| missing_instance(op, entity, instance))?;
    key_pairs(entity, inst).ok_or_else(|| {
        PersistenceError::new(
            op,
            &entity.name,
            format!("{} has an incomplete primary key", describe(entity, inst, instance)),
        )
    })
}

fn missing_instance(
    op: PersistenceOperation,
    entity: &EntityTypeDescriptor,
    instance: InstanceId,
) -> PersistenceError {
    PersistenceError::new(
        op,
        &entity.name,
        format!("instance #{} is not part of the graph", instance.index()),
    )
}

fn render(store: &RelationDescriptorStore, graph: &InstanceGraph, id: InstanceId) -> String {
    match graph.get(id) {
        Some(inst) => match store.entity_by_name(inst.entity()) {
            Some(entity) => describe(entity, inst, id),
            None => format!("{}(#{})", inst.entity(), id.index()),
        },
        None => format!("#{}", id.index()),
    }
}

/// Foreign key columns replace same-named instance values.
fn merge(columns: &mut Columns, overrides: Columns) {
    for (name, value) in overrides {
        match columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => columns.push((name, value)),
        }
    }
}

fn write_back(op: &PlanOp, graph: &mut InstanceGraph, generated: Columns) {
    match op {
        PlanOp::Insert { instance, .. } => {
            for (column, value) in generated {
                graph.set_value(*instance, &column, value);
            }
            graph.mark_persisted(*instance, true);
        }
        PlanOp::Delete { instance, .. } => {
            graph.mark_persisted(*instance, false);
            graph.tracker_mut().forget(*instance);
        }
        _ => {}
    }
}

fn refresh_snapshots(plan: &PersistencePlan, graph: &mut InstanceGraph) {
    let mut touched = BTreeSet::new();
    for op in plan {
        match op {
            PlanOp::InsertJunction { owner, inverse, .. }
            | PlanOp::DeleteJunction { owner, inverse, .. } => {
                touched.insert(*owner);
                touched.insert(*inverse);
            }
            PlanOp::Delete { .. } => {}
            other => {
                if let Some(id) = other.instance() {
                    touched.insert(id);
                }
            }
        }
    }
    for id in touched {
        if graph.get(id).is_some_and(|inst| inst.is_persisted()) {
            graph.snapshot(id);
        }
    }
}

/// A context flagged without attribution still stops execution.
fn cancel_reason(cx: &Cx) -> Option<CancelReason> {
    if !cx.is_cancel_requested() {
        return None;
    }
    Some(cx.cancel_reason().unwrap_or_else(|| CancelReason::new(CancelKind::User)))
}
