//! Instance identity for deduplicating plan entries.
//!
//! Persisted instances are identified by entity type plus primary key, so two
//! arena entries loaded for the same row collapse into one plan operation.
//! Unsaved instances have no key yet and are identified by their arena slot.

use crate::instance::{EntityInstance, InstanceGraph, InstanceId};
use relmodel_core::{
    EntityId, EntityTypeDescriptor, PlanningError, PlanningErrorKind, RelationDescriptorStore,
    Value, hash_values,
};

/// Stable identity of an instance for the duration of one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceIdentity {
    /// Row that exists in storage.
    Persisted { entity: EntityId, key_hash: u64 },
    /// Object that has not been written yet.
    Transient(InstanceId),
}

impl InstanceIdentity {
    /// Resolve the identity and entity type of `id`.
    pub fn of(
        store: &RelationDescriptorStore,
        graph: &InstanceGraph,
        id: InstanceId,
    ) -> Result<(Self, EntityId), PlanningError> {
        let inst = graph.get(id).ok_or_else(|| {
            PlanningError::new(
                PlanningErrorKind::UnknownInstance,
                "<unknown>",
                format!("instance #{} is not part of the graph", id.index()),
            )
        })?;
        let entity = store.entity_by_name(inst.entity()).ok_or_else(|| {
            PlanningError::new(
                PlanningErrorKind::UnknownEntityType,
                inst.entity(),
                "entity type is not registered",
            )
            .with_instance(format!("#{}", id.index()))
        })?;

        if !inst.is_persisted() {
            return Ok((InstanceIdentity::Transient(id), entity.id));
        }
        let Some(key) = key_values(entity, inst) else {
            return Err(PlanningError::new(
                PlanningErrorKind::CompositeKeyArityMismatch,
                &entity.name,
                format!(
                    "persisted instance is missing values for key columns ({})",
                    entity.primary_column_names().collect::<Vec<_>>().join(", ")
                ),
            )
            .with_instance(describe(entity, inst, id)));
        };
        Ok((
            InstanceIdentity::Persisted {
                entity: entity.id,
                key_hash: hash_values(&key),
            },
            entity.id,
        ))
    }
}

/// Primary key values in key order, or `None` if any is missing or null.
pub fn key_values(entity: &EntityTypeDescriptor, inst: &EntityInstance) -> Option<Vec<Value>> {
    entity
        .primary_columns
        .iter()
        .map(|col| inst.value(&col.name).filter(|v| !v.is_null()).cloned())
        .collect()
}

/// Primary key as `(column, value)` pairs, or `None` if incomplete.
pub fn key_pairs(
    entity: &EntityTypeDescriptor,
    inst: &EntityInstance,
) -> Option<Vec<(String, Value)>> {
    let values = key_values(entity, inst)?;
    Some(
        entity
            .primary_columns
            .iter()
            .map(|c| c.name.clone())
            .zip(values)
            .collect(),
    )
}

/// Render an instance for error messages and logs, e.g. `Question(id=1)`.
pub fn describe(entity: &EntityTypeDescriptor, inst: &EntityInstance, id: InstanceId) -> String {
    let parts: Vec<String> = entity
        .primary_columns
        .iter()
        .filter_map(|col| {
            inst.value(&col.name)
                .filter(|v| !v.is_null())
                .map(|v| format!("{}={}", col.name, v))
        })
        .collect();
    if parts.is_empty() {
        format!("{}(new #{})", entity.name, id.index())
    } else {
        format!("{}({})", entity.name, parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::{RawEntity, RawSchema, resolve};

    fn store() -> RelationDescriptorStore {
        resolve(
            &RawSchema::new()
                .entity(RawEntity::new("Tag").generated_primary("id"))
                .entity(RawEntity::new("Seat").primary("row").primary("number")),
        )
        .unwrap()
    }

    #[test]
    fn test_same_key_same_identity() {
        let store = store();
        let mut graph = InstanceGraph::new();
        let a = graph.add_persisted("Tag", [("id", 7_i64)]);
        let b = graph.add_persisted("Tag", [("id", 7_i64)]);
        let c = graph.add("Tag", Vec::<(&str, Value)>::new());
        let d = graph.add("Tag", Vec::<(&str, Value)>::new());

        let (ia, _) = InstanceIdentity::of(&store, &graph, a).unwrap();
        let (ib, _) = InstanceIdentity::of(&store, &graph, b).unwrap();
        let (ic, _) = InstanceIdentity::of(&store, &graph, c).unwrap();
        let (id, _) = InstanceIdentity::of(&store, &graph, d).unwrap();
        assert_eq!(ia, ib);
        assert_eq!(ic, InstanceIdentity::Transient(c));
        assert_ne!(ic, id);
    }

    #[test]
    fn test_incomplete_composite_key_is_rejected() {
        let store = store();
        let mut graph = InstanceGraph::new();
        let seat = graph.add_persisted("Seat", [("row", Value::from("A"))]);
        let err = InstanceIdentity::of(&store, &graph, seat).unwrap_err();
        assert_eq!(err.kind, PlanningErrorKind::CompositeKeyArityMismatch);
        assert_eq!(err.instance.as_deref(), Some("Seat(row='A')"));
    }

    #[test]
    fn test_unknown_entity_and_instance() {
        let store = store();
        let mut graph = InstanceGraph::new();
        let ghost = graph.add("Ghost", [("id", 1_i64)]);
        let err = InstanceIdentity::of(&store, &graph, ghost).unwrap_err();
        assert_eq!(err.kind, PlanningErrorKind::UnknownEntityType);

        let missing = InstanceId::from_index(99);
        let err = InstanceIdentity::of(&store, &graph, missing).unwrap_err();
        assert_eq!(err.kind, PlanningErrorKind::UnknownInstance);
    }

    #[test]
    fn test_describe_and_key_pairs() {
        let store = store();
        let mut graph = InstanceGraph::new();
        let seat = graph.add_persisted("Seat", [("row", Value::from("B")), ("number", Value::from(4_i64))]);
        let entity = store.entity_by_name("Seat").unwrap();
        let inst = graph.get(seat).unwrap();
        assert_eq!(describe(entity, inst, seat), "Seat(row='B', number=4)");
        assert_eq!(
            key_pairs(entity, inst),
            Some(vec![
                ("row".to_string(), Value::from("B")),
                ("number".to_string(), Value::BigInt(4)),
            ])
        );

        let tag = graph.add("Tag", Vec::<(&str, Value)>::new());
        let entity = store.entity_by_name("Tag").unwrap();
        assert_eq!(describe(entity, graph.get(tag).unwrap(), tag), "Tag(new #1)");
    }
}
