//! Relation graph resolution.
//!
//! Turns ordered raw declarations into a [`RelationDescriptorStore`]:
//!
//! 1. register entity types and their primary keys
//! 2. create one descriptor per declared relation
//! 3. link inverse pairs
//! 4. pick the owning side of every pair
//! 5. synthesize join columns and junction tables, checking key arity
//!
//! Every step works on local arenas; nothing is returned unless all
//! declarations resolve.

use crate::declaration::{RawEntity, RawJoinColumn, RawJoinTable, RawRelation, RawSchema};
use crate::error::{Error, ResolutionError, ResolutionErrorKind, Result};
use crate::metadata::{
    EntityId, EntityTypeDescriptor, JoinColumn, JunctionTable, RelationDescriptor, RelationId,
    RelationKind,
};
use crate::naming::{NamingStrategy, deduplicated_column_name, is_valid_identifier};
use crate::store::RelationDescriptorStore;
use std::collections::{HashMap, HashSet};

/// Configuration for a [`Resolver`].
#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    /// Rules for naming unnamed join constructs.
    pub naming: NamingStrategy,
    /// Reject table, column and property names that are not plain identifiers.
    pub validate_identifiers: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            naming: NamingStrategy::default(),
            validate_identifiers: true,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn naming(mut self, naming: NamingStrategy) -> Self {
        self.naming = naming;
        self
    }

    #[must_use]
    pub fn validate_identifiers(mut self, enabled: bool) -> Self {
        self.validate_identifiers = enabled;
        self
    }
}

/// Builds a [`RelationDescriptorStore`] from raw declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    config: ResolverConfig,
}

/// Resolve declarations with the default configuration.
pub fn resolve(schema: &RawSchema) -> Result<RelationDescriptorStore> {
    Resolver::new().resolve(schema)
}

fn resolution_error(
    kind: ResolutionErrorKind,
    entity: &str,
    relation: Option<&str>,
    message: impl Into<String>,
) -> Error {
    Error::Resolution(ResolutionError::new(kind, entity, relation, message))
}

/// Working state for one `resolve` call.
struct Resolution<'a> {
    config: &'a ResolverConfig,
    entities: Vec<EntityTypeDescriptor>,
    relations: Vec<RelationDescriptor>,
    /// Raw declaration behind each relation, indexed like `relations`.
    raws: Vec<&'a RawRelation>,
    by_name: HashMap<&'a str, EntityId>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `schema` into a store, or fail without producing one.
    #[tracing::instrument(level = "debug", skip(self, schema), fields(entities = schema.entities.len()))]
    pub fn resolve(&self, schema: &RawSchema) -> Result<RelationDescriptorStore> {
        let mut res = Resolution {
            config: &self.config,
            entities: Vec::with_capacity(schema.entities.len()),
            relations: Vec::new(),
            raws: Vec::new(),
            by_name: HashMap::new(),
        };

        for raw in &schema.entities {
            res.register_entity(raw)?;
        }
        for (idx, raw) in schema.entities.iter().enumerate() {
            res.declare_relations(EntityId(idx), raw)?;
        }
        for idx in 0..res.relations.len() {
            res.link_inverse(RelationId(idx))?;
        }
        for idx in 0..res.relations.len() {
            res.assign_ownership(RelationId(idx))?;
        }
        for idx in 0..res.relations.len() {
            res.build_join_metadata(RelationId(idx))?;
        }

        tracing::info!(
            entities = res.entities.len(),
            relations = res.relations.len(),
            junction_tables = res
                .relations
                .iter()
                .filter(|r| r.junction_table.is_some())
                .count(),
            "Resolved relation graph"
        );

        Ok(RelationDescriptorStore::from_parts(
            res.entities,
            res.relations,
        ))
    }
}

impl<'a> Resolution<'a> {
    fn check_identifier(
        &self,
        name: &str,
        entity: &str,
        relation: Option<&str>,
        what: &str,
    ) -> Result<()> {
        if self.config.validate_identifiers && !is_valid_identifier(name) {
            return Err(resolution_error(
                ResolutionErrorKind::InvalidIdentifier,
                entity,
                relation,
                format!("{what} '{name}' is not a valid identifier"),
            ));
        }
        Ok(())
    }

    fn register_entity(&mut self, raw: &'a RawEntity) -> Result<()> {
        self.check_identifier(&raw.name, &raw.name, None, "entity name")?;
        if self.by_name.contains_key(raw.name.as_str()) {
            return Err(resolution_error(
                ResolutionErrorKind::DuplicateEntityType,
                &raw.name,
                None,
                "entity type is declared more than once",
            ));
        }
        if raw.primary_columns.is_empty() {
            return Err(resolution_error(
                ResolutionErrorKind::MissingPrimaryKey,
                &raw.name,
                None,
                "no primary columns declared",
            ));
        }

        let table_name = raw.table_name.clone().unwrap_or_else(|| raw.name.clone());
        self.check_identifier(&table_name, &raw.name, None, "table name")?;
        for col in &raw.primary_columns {
            self.check_identifier(&col.name, &raw.name, None, "primary column")?;
        }

        let id = EntityId(self.entities.len());
        self.by_name.insert(&raw.name, id);
        self.entities.push(EntityTypeDescriptor {
            id,
            name: raw.name.clone(),
            table_name,
            primary_columns: raw.primary_columns.clone(),
            relations: Vec::with_capacity(raw.relations.len()),
        });
        Ok(())
    }

    fn declare_relations(&mut self, source: EntityId, raw: &'a RawEntity) -> Result<()> {
        let mut seen = HashSet::new();
        for rel in &raw.relations {
            let prop = rel.property.as_str();
            self.check_identifier(prop, &raw.name, Some(prop), "property")?;
            if !seen.insert(prop) {
                return Err(resolution_error(
                    ResolutionErrorKind::DuplicateRelation,
                    &raw.name,
                    Some(prop),
                    "property declares more than one relation",
                ));
            }

            let Some(&target) = self.by_name.get(rel.target.as_str()) else {
                return Err(resolution_error(
                    ResolutionErrorKind::UnknownEntityType,
                    &raw.name,
                    Some(prop),
                    format!("target type '{}' is not registered", rel.target),
                ));
            };

            let nullable = match (rel.primary, rel.nullable) {
                (true, Some(true)) => {
                    return Err(resolution_error(
                        ResolutionErrorKind::InvalidPrimaryNullableCombination,
                        &raw.name,
                        Some(prop),
                        "a primary relation cannot be nullable",
                    ));
                }
                (true, _) => false,
                (false, nullable) => nullable.unwrap_or(true),
            };

            let id = RelationId(self.relations.len());
            self.relations.push(RelationDescriptor {
                id,
                property: rel.property.clone(),
                kind: rel.kind,
                source,
                target,
                inverse: None,
                is_owning_side: false,
                join_columns: Vec::new(),
                junction_table: None,
                cascade: rel.cascade,
                on_delete: rel.on_delete.unwrap_or_default(),
                nullable,
                primary: rel.primary,
                eager: rel.eager,
            });
            self.raws.push(rel);
            self.entities[source.0].relations.push(id);
        }
        Ok(())
    }

    fn source_name(&self, id: RelationId) -> &str {
        &self.entities[self.relations[id.0].source.0].name
    }

    fn link_inverse(&mut self, id: RelationId) -> Result<()> {
        let raw = self.raws[id.0];
        let Some(inverse_prop) = raw.inverse_property.as_deref() else {
            return Ok(());
        };
        let rel = &self.relations[id.0];
        let entity = self.source_name(id);
        let target = &self.entities[rel.target.0];

        let dangling = |message: String| {
            resolution_error(
                ResolutionErrorKind::DanglingInverseReference,
                entity,
                Some(rel.property.as_str()),
                message,
            )
        };

        let Some(&inv_id) = target
            .relations
            .iter()
            .find(|r| self.relations[r.0].property == inverse_prop)
        else {
            return Err(dangling(format!(
                "inverse property {}.{} is not declared",
                target.name, inverse_prop
            )));
        };
        if inv_id == id {
            return Err(dangling("a relation cannot be its own inverse".to_string()));
        }

        let inv = &self.relations[inv_id.0];
        if inv.target != rel.source {
            return Err(dangling(format!(
                "{}.{} targets '{}', not '{}'",
                target.name, inverse_prop, self.entities[inv.target.0].name, entity
            )));
        }
        if inv.kind != rel.kind.inverse_kind() {
            return Err(resolution_error(
                ResolutionErrorKind::InverseKindMismatch,
                entity,
                Some(rel.property.as_str()),
                format!(
                    "{} relation cannot be paired with {} relation {}.{}",
                    rel.kind, inv.kind, target.name, inverse_prop
                ),
            ));
        }
        if let Some(back) = self.raws[inv_id.0].inverse_property.as_deref() {
            if back != rel.property {
                return Err(dangling(format!(
                    "{}.{} names '{}' as its inverse",
                    target.name, inverse_prop, back
                )));
            }
        }
        for (side, other) in [(rel.inverse, inv_id), (inv.inverse, id)] {
            if side.is_some_and(|existing| existing != other) {
                return Err(dangling(format!(
                    "{}.{} is already paired with another relation",
                    target.name, inverse_prop
                )));
            }
        }

        self.relations[id.0].inverse = Some(inv_id);
        self.relations[inv_id.0].inverse = Some(id);
        Ok(())
    }

    /// Whether the raw declaration carries join configuration of the right shape.
    fn declares_join(&self, id: RelationId) -> Result<bool> {
        let rel = &self.relations[id.0];
        let raw = self.raws[id.0];
        let conflicting = |message: &str| {
            resolution_error(
                ResolutionErrorKind::ConflictingOwnership,
                self.source_name(id),
                Some(rel.property.as_str()),
                message,
            )
        };
        match rel.kind {
            RelationKind::ManyToMany if raw.join_columns.is_some() => Err(conflicting(
                "many-to-many relations use a join table, not join columns",
            )),
            RelationKind::ManyToMany => Ok(raw.join_table.is_some()),
            _ if raw.join_table.is_some() => Err(conflicting(
                "only many-to-many relations may declare a join table",
            )),
            RelationKind::OneToMany if raw.join_columns.is_some() => Err(conflicting(
                "one-to-many is never the owning side; declare join columns on the many-to-one",
            )),
            _ => Ok(raw.join_columns.is_some()),
        }
    }

    fn assign_ownership(&mut self, id: RelationId) -> Result<()> {
        let rel = &self.relations[id.0];
        let declares = self.declares_join(id)?;
        let owning = match rel.kind {
            RelationKind::ManyToOne => true,
            RelationKind::OneToMany => {
                if rel.inverse.is_none() {
                    return Err(resolution_error(
                        ResolutionErrorKind::DanglingInverseReference,
                        self.source_name(id),
                        Some(rel.property.as_str()),
                        "one-to-many requires an inverse many-to-one relation",
                    ));
                }
                false
            }
            RelationKind::OneToOne | RelationKind::ManyToMany => match rel.inverse {
                None => true,
                Some(inv_id) => {
                    let inv_declares = self.declares_join(inv_id)?;
                    match (declares, inv_declares) {
                        (true, false) => true,
                        (false, true) => false,
                        (true, true) if self.configured_identically(id, inv_id) => {
                            id.0 < inv_id.0
                        }
                        (true, true) => {
                            return Err(resolution_error(
                                ResolutionErrorKind::ConflictingOwnership,
                                self.source_name(id),
                                Some(rel.property.as_str()),
                                "both sides declare different join configurations",
                            ));
                        }
                        (false, false) => {
                            return Err(resolution_error(
                                ResolutionErrorKind::ConflictingOwnership,
                                self.source_name(id),
                                Some(rel.property.as_str()),
                                format!(
                                    "neither side of this {} pair declares its join {}",
                                    rel.kind,
                                    if rel.kind == RelationKind::ManyToMany {
                                        "table"
                                    } else {
                                        "columns"
                                    }
                                ),
                            ));
                        }
                    }
                }
            },
        };

        tracing::debug!(
            entity = %self.source_name(id),
            relation = %rel.property,
            kind = %rel.kind,
            owning,
            "Assigned relation ownership"
        );
        self.relations[id.0].is_owning_side = owning;
        Ok(())
    }

    /// Same configuration written from both sides, either verbatim or mirrored.
    fn configured_identically(&self, a: RelationId, b: RelationId) -> bool {
        let (ra, rb) = (self.raws[a.0], self.raws[b.0]);
        if ra.join_columns != rb.join_columns {
            return false;
        }
        match (&ra.join_table, &rb.join_table) {
            (Some(ta), Some(tb)) => {
                ta.name == tb.name
                    && ((ta.join_columns == tb.join_columns
                        && ta.inverse_join_columns == tb.inverse_join_columns)
                        || (ta.join_columns == tb.inverse_join_columns
                            && ta.inverse_join_columns == tb.join_columns))
            }
            (None, None) => true,
            _ => false,
        }
    }

    fn build_join_metadata(&mut self, id: RelationId) -> Result<()> {
        let rel = &self.relations[id.0];
        let raw = self.raws[id.0];
        if rel.is_owning_side {
            if rel.kind == RelationKind::ManyToMany {
                let junction = self.build_junction_table(id, raw.join_table.as_ref())?;
                self.relations[id.0].junction_table = Some(junction);
            } else {
                let naming = self.config.naming;
                let property = rel.property.clone();
                let columns = self.build_columns(
                    id,
                    rel.target,
                    raw.join_columns.as_deref().unwrap_or_default(),
                    |referenced| (naming.join_column)(&property, referenced),
                    "join column",
                )?;
                self.relations[id.0].join_columns = columns;
            }
        }

        let rel = &self.relations[id.0];
        if rel.primary && !rel.holds_foreign_key() {
            return Err(resolution_error(
                ResolutionErrorKind::InvalidPrimaryNullableCombination,
                self.source_name(id),
                Some(rel.property.as_str()),
                "only the owning side of a one-to-one or many-to-one relation can be primary",
            ));
        }
        Ok(())
    }

    fn build_junction_table(
        &self,
        id: RelationId,
        raw: Option<&RawJoinTable>,
    ) -> Result<JunctionTable> {
        let rel = &self.relations[id.0];
        let naming = self.config.naming;
        let source = &self.entities[rel.source.0];
        let target = &self.entities[rel.target.0];
        let empty = RawJoinTable::default();
        let raw = raw.unwrap_or(&empty);

        let table_name = raw.name.clone().unwrap_or_else(|| {
            (naming.junction_table)(&source.table_name, &rel.property, &target.table_name)
        });
        self.check_identifier(&table_name, &source.name, Some(rel.property.as_str()), "junction table")?;

        let owner_join_columns = self.build_columns(
            id,
            rel.source,
            raw.join_columns.as_deref().unwrap_or_default(),
            |referenced| (naming.junction_column)(&source.table_name, referenced),
            "junction owner column",
        )?;
        let mut inverse_join_columns = self.build_columns(
            id,
            rel.target,
            raw.inverse_join_columns.as_deref().unwrap_or_default(),
            |referenced| (naming.junction_column)(&target.table_name, referenced),
            "junction inverse column",
        )?;
        // Self-referencing junctions would otherwise reuse the owner column names.
        for col in &mut inverse_join_columns {
            if owner_join_columns.iter().any(|o| o.name == col.name) {
                col.name = deduplicated_column_name(&col.name, 2);
            }
        }

        Ok(JunctionTable {
            table_name,
            owner_join_columns,
            inverse_join_columns,
        })
    }

    /// Build key-ordered join columns referencing `referenced_entity`'s primary key.
    fn build_columns(
        &self,
        id: RelationId,
        referenced_entity: EntityId,
        raw: &[RawJoinColumn],
        default_name: impl Fn(&str) -> String,
        what: &str,
    ) -> Result<Vec<JoinColumn>> {
        let rel = &self.relations[id.0];
        let entity = self.source_name(id);
        let referenced = &self.entities[referenced_entity.0];
        let arity = referenced.key_arity();
        let arity_error = |message: String| {
            resolution_error(
                ResolutionErrorKind::CompositeKeyArityMismatch,
                entity,
                Some(rel.property.as_str()),
                message,
            )
        };

        let columns: Vec<JoinColumn> = if raw.is_empty() {
            if arity != 1 {
                return Err(arity_error(format!(
                    "'{}' has a composite key ({}); an explicit ordered list of {} referenced columns is required",
                    referenced.name,
                    referenced.primary_column_names().collect::<Vec<_>>().join(", "),
                    arity
                )));
            }
            let pk = &referenced.primary_columns[0].name;
            vec![JoinColumn::new(default_name(pk), pk.clone())]
        } else {
            if raw.len() != arity {
                return Err(arity_error(format!(
                    "{} {}s declared but '{}' has a {}-column primary key",
                    raw.len(),
                    what,
                    referenced.name,
                    arity
                )));
            }
            let mut columns: Vec<(usize, JoinColumn)> = Vec::with_capacity(raw.len());
            for col in raw {
                let referenced_column = match (&col.referenced_column, arity) {
                    (Some(name), _) => name.clone(),
                    (None, 1) => referenced.primary_columns[0].name.clone(),
                    (None, _) => {
                        return Err(arity_error(format!(
                            "{what} on composite key of '{}' must name its referenced column",
                            referenced.name
                        )));
                    }
                };
                let Some(position) = referenced
                    .primary_columns
                    .iter()
                    .position(|c| c.name == referenced_column)
                else {
                    return Err(arity_error(format!(
                        "{what} references '{}.{}', which is not part of its primary key",
                        referenced.name, referenced_column
                    )));
                };
                if columns.iter().any(|(p, _)| *p == position) {
                    return Err(arity_error(format!(
                        "'{}.{}' is referenced by more than one {what}",
                        referenced.name, referenced_column
                    )));
                }
                let name = col
                    .name
                    .clone()
                    .unwrap_or_else(|| default_name(&referenced_column));
                columns.push((position, JoinColumn::new(name, referenced_column)));
            }
            columns.sort_by_key(|(position, _)| *position);
            columns.into_iter().map(|(_, col)| col).collect()
        };

        for col in &columns {
            self.check_identifier(&col.name, entity, Some(rel.property.as_str()), what)?;
            self.check_identifier(&col.referenced_column, entity, Some(rel.property.as_str()), what)?;
        }
        Ok(columns)
    }
}
