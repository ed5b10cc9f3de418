//! The live instance graph that save and remove calls operate on.
//!
//! Instances live in an arena and refer to each other through [`InstanceId`]
//! handles, so cyclic references (`answer.question` / `question.answers`)
//! need no shared ownership. A relation slot that was never set is "not
//! loaded" and is left alone by the planner.

use crate::change_tracker::ChangeTracker;
use relmodel_core::Value;
use std::collections::BTreeMap;

/// Handle to an [`EntityInstance`] inside an [`InstanceGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

impl InstanceId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Contents of a loaded relation slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationValue {
    /// Single-valued relation; `None` is an explicit null.
    One(Option<InstanceId>),
    /// Collection relation.
    Many(Vec<InstanceId>),
}

impl RelationValue {
    /// Every instance referenced by the slot.
    pub fn members(&self) -> &[InstanceId] {
        match self {
            RelationValue::One(Some(id)) => std::slice::from_ref(id),
            RelationValue::One(None) => &[],
            RelationValue::Many(ids) => ids,
        }
    }
}

/// One in-memory entity object.
#[derive(Debug, Clone)]
pub struct EntityInstance {
    entity: String,
    values: BTreeMap<String, Value>,
    relations: BTreeMap<String, RelationValue>,
    persisted: bool,
}

impl EntityInstance {
    /// Entity type name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Column value, treating a missing column as absent.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// `None` if the relation was never loaded or assigned.
    pub fn relation(&self, property: &str) -> Option<&RelationValue> {
        self.relations.get(property)
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationValue)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether the row exists in storage (loaded or saved earlier).
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }
}

/// Arena of entity instances plus their collection snapshots.
#[derive(Debug, Default)]
pub struct InstanceGraph {
    instances: Vec<EntityInstance>,
    tracker: ChangeTracker,
}

impl InstanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, entity: &str, values: BTreeMap<String, Value>, persisted: bool) -> InstanceId {
        let id = InstanceId(self.instances.len());
        self.instances.push(EntityInstance {
            entity: entity.to_string(),
            values,
            relations: BTreeMap::new(),
            persisted,
        });
        id
    }

    /// Add a new, unsaved instance.
    pub fn add<K, V>(&mut self, entity: &str, values: impl IntoIterator<Item = (K, V)>) -> InstanceId
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.push(entity, values, false)
    }

    /// Add an instance that was loaded from storage.
    pub fn add_persisted<K, V>(
        &mut self,
        entity: &str,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> InstanceId
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let id = self.add(entity, values);
        self.instances[id.0].persisted = true;
        id
    }

    pub fn get(&self, id: InstanceId) -> Option<&EntityInstance> {
        self.instances.get(id.0)
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        id.0 < self.instances.len()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstanceId, &EntityInstance)> {
        self.instances
            .iter()
            .enumerate()
            .map(|(i, inst)| (InstanceId(i), inst))
    }

    /// Set a column value. Ignored for unknown ids.
    pub fn set_value(&mut self, id: InstanceId, column: &str, value: impl Into<Value>) {
        if let Some(inst) = self.instances.get_mut(id.0) {
            inst.values.insert(column.to_string(), value.into());
        }
    }

    /// Assign a single-valued relation (`None` clears it to null).
    pub fn set_one(&mut self, id: InstanceId, property: &str, target: Option<InstanceId>) {
        self.set_relation(id, property, RelationValue::One(target));
    }

    /// Replace a collection relation.
    pub fn set_many(&mut self, id: InstanceId, property: &str, members: Vec<InstanceId>) {
        self.set_relation(id, property, RelationValue::Many(members));
    }

    fn set_relation(&mut self, id: InstanceId, property: &str, value: RelationValue) {
        if let Some(inst) = self.instances.get_mut(id.0) {
            inst.relations.insert(property.to_string(), value);
        }
    }

    /// Append to a collection relation, loading it as empty first if needed.
    pub fn push_member(&mut self, id: InstanceId, property: &str, member: InstanceId) {
        if let Some(inst) = self.instances.get_mut(id.0) {
            let slot = inst
                .relations
                .entry(property.to_string())
                .or_insert_with(|| RelationValue::Many(Vec::new()));
            if let RelationValue::Many(members) = slot {
                if !members.contains(&member) {
                    members.push(member);
                }
            }
        }
    }

    /// Remove `member` from a collection relation.
    pub fn remove_member(&mut self, id: InstanceId, property: &str, member: InstanceId) {
        if let Some(RelationValue::Many(members)) = self
            .instances
            .get_mut(id.0)
            .and_then(|inst| inst.relations.get_mut(property))
        {
            members.retain(|m| *m != member);
        }
    }

    /// Forget a relation slot so the planner treats it as not loaded.
    pub fn unload(&mut self, id: InstanceId, property: &str) {
        if let Some(inst) = self.instances.get_mut(id.0) {
            inst.relations.remove(property);
        }
    }

    pub fn mark_persisted(&mut self, id: InstanceId, persisted: bool) {
        if let Some(inst) = self.instances.get_mut(id.0) {
            inst.persisted = persisted;
        }
    }

    /// Record every loaded collection of `id` as its storage state.
    pub fn snapshot(&mut self, id: InstanceId) {
        let Some(inst) = self.instances.get(id.0) else {
            return;
        };
        for (property, value) in &inst.relations {
            if let RelationValue::Many(members) = value {
                self.tracker.snapshot(id, property, members.clone());
            }
        }
    }

    /// Record one collection of `id` as its storage state.
    pub fn snapshot_relation(&mut self, id: InstanceId, property: &str) {
        if let Some(RelationValue::Many(members)) =
            self.instances.get(id.0).and_then(|i| i.relations.get(property))
        {
            self.tracker.snapshot(id, property, members.clone());
        }
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    /// Instances whose single-valued slot points at `target`, with the slot name.
    pub fn referrers(&self, target: InstanceId) -> impl Iterator<Item = (InstanceId, &str)> {
        self.iter().flat_map(move |(id, inst)| {
            inst.relations.iter().filter_map(move |(prop, value)| {
                (*value == RelationValue::One(Some(target))).then_some((id, prop.as_str()))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_relations() {
        let mut graph = InstanceGraph::new();
        let q = graph.add_persisted("Question", [("id", 1_i64)]);
        let a = graph.add("Answer", [("text", "yes")]);
        graph.set_one(a, "question", Some(q));
        graph.push_member(q, "answers", a);
        graph.push_member(q, "answers", a);

        let question = graph.get(q).unwrap();
        assert!(question.is_persisted());
        assert_eq!(question.value("id"), Some(&Value::BigInt(1)));
        assert_eq!(question.relation("answers").unwrap().members(), &[a]);

        let answer = graph.get(a).unwrap();
        assert!(!answer.is_persisted());
        assert!(answer.relation("tags").is_none());

        let referrers: Vec<_> = graph.referrers(q).collect();
        assert_eq!(referrers, vec![(a, "question")]);
    }

    #[test]
    fn test_snapshot_captures_collections_only() {
        let mut graph = InstanceGraph::new();
        let q = graph.add_persisted("Question", [("id", 1_i64)]);
        let a1 = graph.add_persisted("Answer", [("id", 10_i64)]);
        let a2 = graph.add_persisted("Answer", [("id", 11_i64)]);
        graph.set_many(q, "answers", vec![a1, a2]);
        graph.set_one(a1, "question", Some(q));
        graph.snapshot(q);
        graph.snapshot(a1);

        graph.remove_member(q, "answers", a1);
        let current = graph.get(q).unwrap().relation("answers").unwrap().members().to_vec();
        assert_eq!(
            graph.tracker().removed_members(q, "answers", &current),
            Some(vec![a1])
        );
        assert!(graph.tracker().get(a1, "question").is_none());
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let mut graph = InstanceGraph::new();
        let ghost = InstanceId::from_index(42);
        graph.set_value(ghost, "id", 1_i64);
        graph.set_one(ghost, "x", None);
        graph.mark_persisted(ghost, true);
        assert!(graph.get(ghost).is_none());
        assert!(!graph.contains(ghost));
        assert!(graph.is_empty());
    }
}
