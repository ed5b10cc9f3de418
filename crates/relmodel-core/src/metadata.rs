//! Resolved relation metadata.
//!
//! These types are produced once by the [`Resolver`](crate::Resolver) and
//! are read-only afterwards. Entity types and relations live in arenas inside
//! the [`RelationDescriptorStore`](crate::RelationDescriptorStore) and refer to
//! each other through [`EntityId`] and [`RelationId`] handles, so both sides of
//! a relation pair can point at one another without shared ownership.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Handle to an [`EntityTypeDescriptor`] inside a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) usize);

impl EntityId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a [`RelationDescriptor`] inside a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub(crate) usize);

impl RelationId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The type of relation between two entity types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// One-to-one: `User` has one `Profile`.
    OneToOne,
    /// Many-to-one: many `Answer`s belong to one `Question`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Question` has many `Answer`s.
    OneToMany,
    /// Many-to-many: `Question`s have many `Category`s via a junction table.
    ManyToMany,
}

impl RelationKind {
    /// Whether the relation property holds a collection.
    pub const fn is_collection(self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }

    /// The kind an inverse declaration must have.
    pub const fn inverse_kind(self) -> RelationKind {
        match self {
            RelationKind::OneToOne => RelationKind::OneToOne,
            RelationKind::ManyToOne => RelationKind::OneToMany,
            RelationKind::OneToMany => RelationKind::ManyToOne,
            RelationKind::ManyToMany => RelationKind::ManyToMany,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::OneToOne => "one-to-one",
            RelationKind::ManyToOne => "many-to-one",
            RelationKind::OneToMany => "one-to-many",
            RelationKind::ManyToMany => "many-to-many",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which operations propagate across a relation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CascadeOptions {
    pub insert: bool,
    pub update: bool,
    pub remove: bool,
}

impl CascadeOptions {
    /// No propagation.
    pub const fn none() -> Self {
        Self {
            insert: false,
            update: false,
            remove: false,
        }
    }

    /// Propagate inserts, updates and removes.
    pub const fn all() -> Self {
        Self {
            insert: true,
            update: true,
            remove: true,
        }
    }

    pub const fn insert() -> Self {
        Self {
            insert: true,
            update: false,
            remove: false,
        }
    }

    pub const fn remove() -> Self {
        Self {
            insert: false,
            update: false,
            remove: true,
        }
    }

    #[must_use]
    pub const fn with_insert(mut self, value: bool) -> Self {
        self.insert = value;
        self
    }

    #[must_use]
    pub const fn with_update(mut self, value: bool) -> Self {
        self.update = value;
        self
    }

    #[must_use]
    pub const fn with_remove(mut self, value: bool) -> Self {
        self.remove = value;
        self
    }

    /// Parse a list of cascade flags (`"insert"`, `"update"`, `"remove"`, `"all"`).
    ///
    /// Returns `None` on the first unrecognized flag.
    pub fn from_flags<I, S>(flags: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut opts = Self::none();
        for flag in flags {
            match flag.as_ref().trim().to_ascii_lowercase().as_str() {
                "insert" => opts.insert = true,
                "update" => opts.update = true,
                "remove" | "delete" => opts.remove = true,
                "all" => opts = Self::all(),
                _ => return None,
            }
        }
        Some(opts)
    }

    fn flags(self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.insert {
            flags.push("insert");
        }
        if self.update {
            flags.push("update");
        }
        if self.remove {
            flags.push("remove");
        }
        flags
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CascadeRepr {
    All(bool),
    Flags(Vec<String>),
    Explicit {
        #[serde(default)]
        insert: bool,
        #[serde(default)]
        update: bool,
        #[serde(default)]
        remove: bool,
    },
}

impl<'de> Deserialize<'de> for CascadeOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match CascadeRepr::deserialize(deserializer)? {
            CascadeRepr::All(true) => Ok(Self::all()),
            CascadeRepr::All(false) => Ok(Self::none()),
            CascadeRepr::Flags(flags) => Self::from_flags(&flags).ok_or_else(|| {
                serde::de::Error::custom(format!("unrecognized cascade flags: {flags:?}"))
            }),
            CascadeRepr::Explicit {
                insert,
                update,
                remove,
            } => Ok(Self {
                insert,
                update,
                remove,
            }),
        }
    }
}

impl Serialize for CascadeOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.flags().serialize(serializer)
    }
}

/// Referential action taken on dependents when the referenced row is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OnDelete {
    /// Refuse the delete while dependents exist.
    #[default]
    Restrict,
    /// Delete dependents along with the referenced row.
    Cascade,
    /// Null out the dependents' foreign key.
    SetNull,
}

impl OnDelete {
    /// Get the SQL representation of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
        }
    }

    /// Parse an action from a string (case-insensitive).
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "RESTRICT" | "NO ACTION" | "NO_ACTION" => Some(OnDelete::Restrict),
            "CASCADE" => Some(OnDelete::Cascade),
            "SET NULL" | "SETNULL" | "SET_NULL" => Some(OnDelete::SetNull),
            _ => None,
        }
    }
}

impl Serialize for OnDelete {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_sql())
    }
}

impl<'de> Deserialize<'de> for OnDelete {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        OnDelete::from_str(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown onDelete action '{s}'")))
    }
}

/// A primary key column of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Value is produced by the store on insert (auto-increment, sequence).
    #[serde(default)]
    pub generated: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generated: false,
        }
    }

    pub fn generated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            generated: true,
        }
    }
}

/// One foreign key column and the target column it references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinColumn {
    /// Column on the owning table (e.g. `"categoryId"`).
    pub name: String,
    /// Column on the referenced table (e.g. `"id"`).
    pub referenced_column: String,
}

impl JoinColumn {
    pub fn new(name: impl Into<String>, referenced_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced_column: referenced_column.into(),
        }
    }
}

/// Junction table of a many-to-many relation, described from its owning side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionTable {
    pub table_name: String,
    /// Columns referencing the owning entity's primary key.
    pub owner_join_columns: Vec<JoinColumn>,
    /// Columns referencing the inverse entity's primary key.
    pub inverse_join_columns: Vec<JoinColumn>,
}

/// Descriptor of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeDescriptor {
    pub id: EntityId,
    pub name: String,
    pub table_name: String,
    /// Ordered primary key columns; more than one means a composite key.
    pub primary_columns: Vec<ColumnInfo>,
    /// Relations declared on this type, in declaration order.
    pub relations: Vec<RelationId>,
}

impl EntityTypeDescriptor {
    pub fn key_arity(&self) -> usize {
        self.primary_columns.len()
    }

    pub fn primary_column_names(&self) -> impl Iterator<Item = &str> {
        self.primary_columns.iter().map(|c| c.name.as_str())
    }

    pub fn is_primary_column(&self, column: &str) -> bool {
        self.primary_columns.iter().any(|c| c.name == column)
    }
}

/// Descriptor of one side of a relation.
///
/// Join metadata (`join_columns`, `junction_table`) is only populated on the
/// owning side; the inverse side reaches it through [`inverse`](Self::inverse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub id: RelationId,
    /// Property name on the source entity.
    pub property: String,
    pub kind: RelationKind,
    pub source: EntityId,
    pub target: EntityId,
    pub inverse: Option<RelationId>,
    pub is_owning_side: bool,
    pub join_columns: Vec<JoinColumn>,
    pub junction_table: Option<JunctionTable>,
    pub cascade: CascadeOptions,
    pub on_delete: OnDelete,
    pub nullable: bool,
    pub primary: bool,
    pub eager: bool,
}

impl RelationDescriptor {
    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }

    /// Whether rows of the source table carry the foreign key columns.
    pub fn holds_foreign_key(&self) -> bool {
        self.is_owning_side && !self.join_columns.is_empty()
    }

    /// Foreign key column names on the source table, in key order.
    pub fn foreign_key_columns(&self) -> impl Iterator<Item = &str> {
        self.join_columns.iter().map(|c| c.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_delete_parses_sql_spellings() {
        assert_eq!(OnDelete::from_str("set null"), Some(OnDelete::SetNull));
        assert_eq!(OnDelete::from_str("SET_NULL"), Some(OnDelete::SetNull));
        assert_eq!(OnDelete::from_str("Cascade"), Some(OnDelete::Cascade));
        assert_eq!(OnDelete::from_str("no action"), Some(OnDelete::Restrict));
        assert_eq!(OnDelete::from_str("set default"), None);
        assert_eq!(OnDelete::SetNull.as_sql(), "SET NULL");
    }

    #[test]
    fn test_cascade_from_flags() {
        let opts = CascadeOptions::from_flags(["insert", "remove"]).unwrap();
        assert!(opts.insert && opts.remove && !opts.update);
        assert_eq!(CascadeOptions::from_flags(["all"]), Some(CascadeOptions::all()));
        assert_eq!(CascadeOptions::from_flags(["merge"]), None);
    }

    #[test]
    fn test_cascade_deserialize_forms() {
        let all: CascadeOptions = serde_json::from_str("true").unwrap();
        assert_eq!(all, CascadeOptions::all());

        let flags: CascadeOptions = serde_json::from_str(r#"["update"]"#).unwrap();
        assert_eq!(flags, CascadeOptions::none().with_update(true));

        let explicit: CascadeOptions = serde_json::from_str(r#"{"remove": true}"#).unwrap();
        assert_eq!(explicit, CascadeOptions::remove());

        assert!(serde_json::from_str::<CascadeOptions>(r#"["bogus"]"#).is_err());
    }

    #[test]
    fn test_relation_kind_inverse() {
        assert_eq!(RelationKind::ManyToOne.inverse_kind(), RelationKind::OneToMany);
        assert_eq!(RelationKind::OneToMany.inverse_kind(), RelationKind::ManyToOne);
        assert_eq!(RelationKind::OneToOne.inverse_kind(), RelationKind::OneToOne);
        assert!(RelationKind::ManyToMany.is_collection());
        assert!(!RelationKind::OneToOne.is_collection());
    }

    #[test]
    fn test_relation_kind_serde_snake_case() {
        let kind: RelationKind = serde_json::from_str(r#""many_to_many""#).unwrap();
        assert_eq!(kind, RelationKind::ManyToMany);
    }
}
