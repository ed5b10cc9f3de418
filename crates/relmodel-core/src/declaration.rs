//! Raw relation declarations, the input to the [`Resolver`](crate::Resolver).
//!
//! Declarations come either from the builder API or from a JSON document
//! produced by an external annotation parser. Order matters: entities and
//! relations are resolved in the order they appear, which is what makes
//! owning-side tie-breaks deterministic.

use crate::error::{Error, Result};
use crate::metadata::{CascadeOptions, ColumnInfo, OnDelete, RelationKind};
use serde::{Deserialize, Serialize};

/// All declarations to register at once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSchema {
    pub entities: Vec<RawEntity>,
}

impl RawSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document of the form `{"entities": [...]}`.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::from)
    }

    /// Append an entity declaration.
    #[must_use]
    pub fn entity(mut self, entity: RawEntity) -> Self {
        self.entities.push(entity);
        self
    }
}

/// Declaration of one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    pub name: String,
    /// Defaults to the entity name.
    #[serde(default)]
    pub table_name: Option<String>,
    pub primary_columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub relations: Vec<RawRelation>,
}

impl RawEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            primary_columns: Vec::new(),
            relations: Vec::new(),
        }
    }

    #[must_use]
    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    /// Add a primary key column with a caller-supplied value.
    #[must_use]
    pub fn primary(mut self, column: impl Into<String>) -> Self {
        self.primary_columns.push(ColumnInfo::new(column));
        self
    }

    /// Add a primary key column whose value is generated on insert.
    #[must_use]
    pub fn generated_primary(mut self, column: impl Into<String>) -> Self {
        self.primary_columns.push(ColumnInfo::generated(column));
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RawRelation) -> Self {
        self.relations.push(relation);
        self
    }
}

/// Declaration of one relation property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelation {
    pub property: String,
    pub kind: RelationKind,
    /// Target entity type name.
    pub target: String,
    /// Property on the target that points back, if the relation is bidirectional.
    #[serde(default)]
    pub inverse_property: Option<String>,
    /// Explicit join column configuration (one-to-one / many-to-one).
    #[serde(default)]
    pub join_columns: Option<Vec<RawJoinColumn>>,
    /// Explicit junction table configuration (many-to-many).
    #[serde(default)]
    pub join_table: Option<RawJoinTable>,
    #[serde(default)]
    pub cascade: CascadeOptions,
    #[serde(default)]
    pub on_delete: Option<OnDelete>,
    /// `None` means "not specified": nullable unless the relation is primary.
    #[serde(default)]
    pub nullable: Option<bool>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub eager: bool,
}

impl RawRelation {
    pub fn new(property: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            kind,
            target: target.into(),
            inverse_property: None,
            join_columns: None,
            join_table: None,
            cascade: CascadeOptions::none(),
            on_delete: None,
            nullable: None,
            primary: false,
            eager: false,
        }
    }

    pub fn one_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, RelationKind::OneToOne, target)
    }

    pub fn many_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, RelationKind::ManyToOne, target)
    }

    pub fn one_to_many(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, RelationKind::OneToMany, target)
    }

    pub fn many_to_many(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, RelationKind::ManyToMany, target)
    }

    #[must_use]
    pub fn inverse(mut self, property: impl Into<String>) -> Self {
        self.inverse_property = Some(property.into());
        self
    }

    /// Declare join columns with default naming (marks this side as owner).
    #[must_use]
    pub fn join_column(mut self) -> Self {
        self.join_columns.get_or_insert_with(Vec::new);
        self
    }

    /// Declare an explicit join column.
    #[must_use]
    pub fn join_column_named(
        mut self,
        name: Option<&str>,
        referenced_column: Option<&str>,
    ) -> Self {
        self.join_columns
            .get_or_insert_with(Vec::new)
            .push(RawJoinColumn {
                name: name.map(str::to_string),
                referenced_column: referenced_column.map(str::to_string),
            });
        self
    }

    /// Declare a junction table (marks this side as owner).
    #[must_use]
    pub fn join_table(mut self, table: RawJoinTable) -> Self {
        self.join_table = Some(table);
        self
    }

    #[must_use]
    pub fn cascade(mut self, cascade: CascadeOptions) -> Self {
        self.cascade = cascade;
        self
    }

    #[must_use]
    pub fn on_delete(mut self, action: OnDelete) -> Self {
        self.on_delete = Some(action);
        self
    }

    #[must_use]
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    #[must_use]
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    /// Whether this side carries any join configuration.
    pub fn declares_join(&self) -> bool {
        self.join_columns.is_some() || self.join_table.is_some()
    }
}

/// A join column as declared; unspecified parts get defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawJoinColumn {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub referenced_column: Option<String>,
}

/// A junction table as declared; unspecified parts get defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawJoinTable {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub join_columns: Option<Vec<RawJoinColumn>>,
    #[serde(default)]
    pub inverse_join_columns: Option<Vec<RawJoinColumn>>,
}

impl RawJoinTable {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}
