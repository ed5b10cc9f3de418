//! Eager-load policy.
//!
//! [`eager_relations`] answers which relations of an entity type are loaded
//! automatically. [`EagerLoader`] builds on it to describe a whole load plan:
//! the eager defaults plus explicitly requested, possibly nested, relations,
//! each checked against the descriptor store. Turning the plan into joins or
//! follow-up queries is left to the loading engine.

use relmodel_core::{EntityId, Error, RelationDescriptor, RelationDescriptorStore, RelationId, Result};
use serde::Serialize;

/// Relations of `entity` flagged `eager`, in declaration order.
///
/// Nested eager relations of the targets are not followed.
pub fn eager_relations(entity: EntityId, store: &RelationDescriptorStore) -> Vec<&RelationDescriptor> {
    store.relations_of(entity).filter(|r| r.eager).collect()
}

/// One relation to load, with the relations to load beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncludePath {
    #[serde(skip)]
    pub relation: RelationId,
    /// Property name on the parent entity.
    pub property: String,
    /// Requested through [`EagerLoader::include`] rather than the eager flag.
    pub explicit: bool,
    pub nested: Vec<IncludePath>,
}

impl IncludePath {
    fn new(rel: &RelationDescriptor, explicit: bool) -> Self {
        Self {
            relation: rel.id,
            property: rel.property.clone(),
            explicit,
            nested: Vec::new(),
        }
    }

    /// Find a direct child by property name.
    pub fn child(&self, property: &str) -> Option<&IncludePath> {
        self.nested.iter().find(|p| p.property == property)
    }

    /// Number of paths in this subtree, including itself.
    pub fn count(&self) -> usize {
        1 + self.nested.iter().map(IncludePath::count).sum::<usize>()
    }
}

/// Load plan for one entity type.
///
/// # Example
///
/// ```ignore
/// let loader = EagerLoader::by_name(&store, "Question")?
///     .with_eager()
///     .include_nested("answers.author")?;
/// ```
#[derive(Debug, Clone)]
pub struct EagerLoader<'s> {
    store: &'s RelationDescriptorStore,
    entity: EntityId,
    includes: Vec<IncludePath>,
}

impl<'s> EagerLoader<'s> {
    /// Start an empty load plan for `entity`.
    pub fn new(store: &'s RelationDescriptorStore, entity: EntityId) -> Self {
        Self {
            store,
            entity,
            includes: Vec::new(),
        }
    }

    /// Start an empty load plan for the entity type called `name`.
    pub fn by_name(store: &'s RelationDescriptorStore, name: &str) -> Result<Self> {
        let entity = store
            .entity_by_name(name)
            .ok_or_else(|| Error::Custom(format!("unknown entity type '{name}'")))?;
        Ok(Self::new(store, entity.id))
    }

    /// Add every eager relation of the root entity.
    #[must_use]
    pub fn with_eager(mut self) -> Self {
        for rel in eager_relations(self.entity, self.store) {
            if !self.includes.iter().any(|p| p.relation == rel.id) {
                self.includes.push(IncludePath::new(rel, false));
            }
        }
        tracing::trace!(
            entity = %self.store.entity(self.entity).name,
            eager = self.includes.len(),
            "Seeded load plan with eager relations"
        );
        self
    }

    /// Include one relation of the root entity.
    pub fn include(self, property: &str) -> Result<Self> {
        self.include_nested(property)
    }

    /// Include a dotted path such as `"answers.author"`.
    ///
    /// Each segment is looked up on the target of the previous one. Empty
    /// segments are ignored; an empty path is a no-op.
    pub fn include_nested(mut self, path: &str) -> Result<Self> {
        let parts: Vec<&str> = path.split('.').map(str::trim).filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return Ok(self);
        }

        let store = self.store;
        let mut entity = self.entity;
        let mut level = &mut self.includes;
        for part in parts {
            let rel = store.find_relation(entity, part).ok_or_else(|| {
                Error::Custom(format!(
                    "entity type '{}' has no relation '{part}' (in include path '{path}')",
                    store.entity(entity).name
                ))
            })?;
            let pos = match level.iter().position(|p| p.relation == rel.id) {
                Some(pos) => {
                    level[pos].explicit = true;
                    pos
                }
                None => {
                    level.push(IncludePath::new(rel, true));
                    level.len() - 1
                }
            };
            entity = rel.target;
            level = &mut level[pos].nested;
        }
        Ok(self)
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn includes(&self) -> &[IncludePath] {
        &self.includes
    }

    pub fn has_includes(&self) -> bool {
        !self.includes.is_empty()
    }

    /// Whether the dotted `path` is part of the plan.
    pub fn contains(&self, path: &str) -> bool {
        let mut level = self.includes.as_slice();
        let mut found = false;
        for part in path.split('.').map(str::trim).filter(|p| !p.is_empty()) {
            match level.iter().find(|p| p.property == part) {
                Some(p) => {
                    level = &p.nested;
                    found = true;
                }
                None => return false,
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::{RawEntity, RawRelation, RawSchema, resolve};

    fn store() -> RelationDescriptorStore {
        resolve(
            &RawSchema::new()
                .entity(RawEntity::new("Author").generated_primary("id"))
                .entity(
                    RawEntity::new("Question")
                        .generated_primary("id")
                        .relation(RawRelation::many_to_one("author", "Author").eager())
                        .relation(RawRelation::one_to_many("answers", "Answer").inverse("question")),
                )
                .entity(
                    RawEntity::new("Answer")
                        .generated_primary("id")
                        .relation(RawRelation::many_to_one("question", "Question"))
                        .relation(RawRelation::many_to_one("author", "Author").eager()),
                ),
        )
        .unwrap()
    }

    #[test]
    fn test_eager_relations_only_flagged() {
        let store = store();
        let question = store.entity_by_name("Question").unwrap().id;
        let eager: Vec<_> = eager_relations(question, &store)
            .into_iter()
            .map(|r| r.property.as_str())
            .collect();
        assert_eq!(eager, vec!["author"]);

        let author = store.entity_by_name("Author").unwrap().id;
        assert!(eager_relations(author, &store).is_empty());
    }

    #[test]
    fn test_loader_with_eager_does_not_recurse() {
        let store = store();
        let loader = EagerLoader::by_name(&store, "Question").unwrap().with_eager();
        assert_eq!(loader.includes().len(), 1);
        assert_eq!(loader.includes()[0].property, "author");
        assert!(!loader.includes()[0].explicit);
        assert!(loader.includes()[0].nested.is_empty());
    }

    #[test]
    fn test_include_nested_builds_tree() {
        let store = store();
        let loader = EagerLoader::by_name(&store, "Question")
            .unwrap()
            .include("answers")
            .unwrap()
            .include_nested("answers.author")
            .unwrap()
            .include_nested("answers.question.author")
            .unwrap();

        assert_eq!(loader.includes().len(), 1);
        let answers = &loader.includes()[0];
        assert_eq!(answers.property, "answers");
        assert_eq!(answers.nested.len(), 2);
        assert!(answers.child("author").is_some());
        assert_eq!(answers.count(), 4);
        assert!(loader.contains("answers.question.author"));
        assert!(!loader.contains("author"));
    }

    #[test]
    fn test_include_unknown_relation_is_error() {
        let store = store();
        let err = EagerLoader::by_name(&store, "Question")
            .unwrap()
            .include_nested("answers.votes")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'Answer'"));
        assert!(msg.contains("'votes'"));

        assert!(EagerLoader::by_name(&store, "Poll").is_err());
    }

    #[test]
    fn test_empty_paths_are_ignored() {
        let store = store();
        let loader = EagerLoader::by_name(&store, "Question")
            .unwrap()
            .include_nested("")
            .unwrap()
            .include_nested(" . ")
            .unwrap();
        assert!(!loader.has_includes());
    }

    #[test]
    fn test_include_path_serializes() {
        let store = store();
        let loader = EagerLoader::by_name(&store, "Question")
            .unwrap()
            .include_nested("answers.author")
            .unwrap();
        let json = serde_json::to_value(loader.includes()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "property": "answers",
                "explicit": true,
                "nested": [{ "property": "author", "explicit": true, "nested": [] }]
            }])
        );
    }
}
