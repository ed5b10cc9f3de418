//! Persistence plans: the ordered output of the cascade planner.
//!
//! Operations reference instances rather than carrying column values. Values
//! are read from the graph when each operation runs, so a key generated by an
//! earlier insert flows into later foreign key and junction writes.

use crate::instance::{InstanceGraph, InstanceId};
use crate::identity::describe;
use relmodel_core::{EntityId, RelationDescriptorStore, RelationId};

/// Foreign key of one owning relation, set to the key of `target` (or null).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKeyBinding {
    /// Owning single-valued relation whose join columns are written.
    pub relation: RelationId,
    /// Referenced instance; `None` writes NULL.
    pub target: Option<InstanceId>,
}

/// One step of a [`PersistencePlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOp {
    /// Insert a new row, then write the generated key back.
    Insert {
        instance: InstanceId,
        entity: EntityId,
        foreign_keys: Vec<ForeignKeyBinding>,
    },
    /// Rewrite every column of an existing row.
    Update {
        instance: InstanceId,
        entity: EntityId,
        foreign_keys: Vec<ForeignKeyBinding>,
    },
    /// Delete an existing row by key.
    Delete { instance: InstanceId, entity: EntityId },
    /// Rewrite only the join columns of one relation.
    UpdateForeignKey {
        instance: InstanceId,
        entity: EntityId,
        binding: ForeignKeyBinding,
    },
    /// Link two rows through a junction table.
    InsertJunction {
        /// Owning many-to-many relation that defines the junction table.
        relation: RelationId,
        owner: InstanceId,
        inverse: InstanceId,
    },
    /// Unlink two rows in a junction table.
    DeleteJunction {
        relation: RelationId,
        owner: InstanceId,
        inverse: InstanceId,
    },
}

/// Discriminant of a [`PlanOp`], for counting and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanOpKind {
    Insert,
    Update,
    Delete,
    UpdateForeignKey,
    InsertJunction,
    DeleteJunction,
}

impl PlanOp {
    pub fn kind(&self) -> PlanOpKind {
        match self {
            PlanOp::Insert { .. } => PlanOpKind::Insert,
            PlanOp::Update { .. } => PlanOpKind::Update,
            PlanOp::Delete { .. } => PlanOpKind::Delete,
            PlanOp::UpdateForeignKey { .. } => PlanOpKind::UpdateForeignKey,
            PlanOp::InsertJunction { .. } => PlanOpKind::InsertJunction,
            PlanOp::DeleteJunction { .. } => PlanOpKind::DeleteJunction,
        }
    }

    /// The row this operation writes; `None` for junction operations.
    pub fn instance(&self) -> Option<InstanceId> {
        match self {
            PlanOp::Insert { instance, .. }
            | PlanOp::Update { instance, .. }
            | PlanOp::Delete { instance, .. }
            | PlanOp::UpdateForeignKey { instance, .. } => Some(*instance),
            PlanOp::InsertJunction { .. } | PlanOp::DeleteJunction { .. } => None,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, PlanOp::Insert { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, PlanOp::Delete { .. })
    }

    pub fn is_junction(&self) -> bool {
        matches!(
            self,
            PlanOp::InsertJunction { .. } | PlanOp::DeleteJunction { .. }
        )
    }

    /// Human-readable form, e.g. `insert Question(new #0)`.
    pub fn describe(&self, store: &RelationDescriptorStore, graph: &InstanceGraph) -> String {
        let render = |entity: EntityId, id: InstanceId| match graph.get(id) {
            Some(inst) => describe(store.entity(entity), inst, id),
            None => format!("{}(#{})", store.entity(entity).name, id.index()),
        };
        let render_any = |id: InstanceId| match graph.get(id) {
            Some(inst) => match store.entity_by_name(inst.entity()) {
                Some(entity) => describe(entity, inst, id),
                None => format!("{}(#{})", inst.entity(), id.index()),
            },
            None => format!("#{}", id.index()),
        };
        let junction_name = |relation: RelationId| {
            store
                .relation(relation)
                .junction_table
                .as_ref()
                .map_or_else(|| store.relation(relation).property.clone(), |jt| jt.table_name.clone())
        };

        match self {
            PlanOp::Insert {
                instance, entity, ..
            } => format!("insert {}", render(*entity, *instance)),
            PlanOp::Update {
                instance, entity, ..
            } => format!("update {}", render(*entity, *instance)),
            PlanOp::Delete { instance, entity } => format!("delete {}", render(*entity, *instance)),
            PlanOp::UpdateForeignKey {
                instance,
                entity,
                binding,
            } => {
                let rel = &store.relation(binding.relation).property;
                match binding.target {
                    Some(target) => format!(
                        "set {}.{} -> {}",
                        render(*entity, *instance),
                        rel,
                        render_any(target)
                    ),
                    None => format!("set {}.{} -> NULL", render(*entity, *instance), rel),
                }
            }
            PlanOp::InsertJunction {
                relation,
                owner,
                inverse,
            } => format!(
                "link {} {} <-> {}",
                junction_name(*relation),
                render_any(*owner),
                render_any(*inverse)
            ),
            PlanOp::DeleteJunction {
                relation,
                owner,
                inverse,
            } => format!(
                "unlink {} {} <-> {}",
                junction_name(*relation),
                render_any(*owner),
                render_any(*inverse)
            ),
        }
    }
}

/// Ordered operations for one save or remove call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistencePlan {
    ops: Vec<PlanOp>,
}

impl PersistencePlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_ops(ops: Vec<PlanOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[PlanOp] {
        &self.ops
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations of the given kind.
    pub fn count(&self, kind: PlanOpKind) -> usize {
        self.ops.iter().filter(|op| op.kind() == kind).count()
    }

    /// Position of the first operation writing `instance`, if any.
    pub fn position_of(&self, instance: InstanceId) -> Option<usize> {
        self.ops.iter().position(|op| op.instance() == Some(instance))
    }

    /// One line per operation, in plan order.
    pub fn describe(&self, store: &RelationDescriptorStore, graph: &InstanceGraph) -> Vec<String> {
        self.ops.iter().map(|op| op.describe(store, graph)).collect()
    }
}

impl<'a> IntoIterator for &'a PersistencePlan {
    type Item = &'a PlanOp;
    type IntoIter = std::slice::Iter<'a, PlanOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}

impl IntoIterator for PersistencePlan {
    type Item = PlanOp;
    type IntoIter = std::vec::IntoIter<PlanOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}
