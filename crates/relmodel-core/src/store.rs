//! The immutable, queryable result of relation resolution.

use crate::metadata::{
    EntityId, EntityTypeDescriptor, JunctionTable, RelationDescriptor, RelationId,
};
use std::collections::HashMap;

/// Every entity type and relation known to the engine.
///
/// Built once by the [`Resolver`](crate::Resolver) and never mutated; share it
/// behind an `Arc` across planners and executors. Handles handed out by one
/// store index into its arenas and must not be used with another store.
#[derive(Debug, Clone, Default)]
pub struct RelationDescriptorStore {
    entities: Vec<EntityTypeDescriptor>,
    relations: Vec<RelationDescriptor>,
    by_name: HashMap<String, EntityId>,
}

impl RelationDescriptorStore {
    pub(crate) fn from_parts(
        entities: Vec<EntityTypeDescriptor>,
        relations: Vec<RelationDescriptor>,
    ) -> Self {
        let by_name = entities.iter().map(|e| (e.name.clone(), e.id)).collect();
        Self {
            entities,
            relations,
            by_name,
        }
    }

    /// Look up an entity type by handle.
    ///
    /// Panics if `id` was minted by a different store.
    pub fn entity(&self, id: EntityId) -> &EntityTypeDescriptor {
        &self.entities[id.0]
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&EntityTypeDescriptor> {
        self.by_name.get(name).map(|id| &self.entities[id.0])
    }

    pub fn entities(&self) -> &[EntityTypeDescriptor] {
        &self.entities
    }

    /// Look up a relation by handle.
    ///
    /// Panics if `id` was minted by a different store.
    pub fn relation(&self, id: RelationId) -> &RelationDescriptor {
        &self.relations[id.0]
    }

    pub fn relations(&self) -> &[RelationDescriptor] {
        &self.relations
    }

    /// Relations declared on `entity`, in declaration order.
    pub fn relations_of(&self, entity: EntityId) -> impl Iterator<Item = &RelationDescriptor> {
        self.entity(entity)
            .relations
            .iter()
            .map(|id| &self.relations[id.0])
    }

    /// Find the relation declared on `entity` under `property`.
    pub fn find_relation(&self, entity: EntityId, property: &str) -> Option<&RelationDescriptor> {
        self.relations_of(entity).find(|r| r.property == property)
    }

    pub fn inverse_of(&self, id: RelationId) -> Option<&RelationDescriptor> {
        self.relation(id).inverse.map(|inv| &self.relations[inv.0])
    }

    /// The side of the pair that owns the join construct.
    ///
    /// Returns `None` only for a non-owning side without an inverse, which
    /// resolution never produces.
    pub fn owning_side(&self, id: RelationId) -> Option<&RelationDescriptor> {
        let rel = self.relation(id);
        if rel.is_owning_side {
            return Some(rel);
        }
        self.inverse_of(id).filter(|inv| inv.is_owning_side)
    }

    /// Relations declared on any entity that point at `entity`.
    pub fn relations_targeting(
        &self,
        entity: EntityId,
    ) -> impl Iterator<Item = &RelationDescriptor> {
        self.relations.iter().filter(move |r| r.target == entity)
    }

    /// All junction tables, with the owning relation that defines each.
    pub fn junction_tables(&self) -> impl Iterator<Item = (&RelationDescriptor, &JunctionTable)> {
        self.relations
            .iter()
            .filter_map(|r| r.junction_table.as_ref().map(|jt| (r, jt)))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
