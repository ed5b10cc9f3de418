//! Error types for relation resolution, cascade planning and execution.

use std::fmt;

/// The primary error type for all relmodel operations.
#[derive(Debug)]
pub enum Error {
    /// Relation metadata could not be resolved into a descriptor store
    Resolution(ResolutionError),
    /// A save/remove call could not be planned
    Planning(PlanningError),
    /// A plan halted part way through execution
    Execution(ExecutionError),
    /// Raw declarations were malformed (e.g. invalid JSON)
    Declaration(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ResolutionError {
    pub kind: ResolutionErrorKind,
    /// Entity type the offending declaration belongs to.
    pub entity: String,
    /// Relation property name, when the error concerns one relation.
    pub relation: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    /// Both sides (or neither side) of a pair claim the join construct
    ConflictingOwnership,
    /// Declared inverse property does not exist or does not point back
    DanglingInverseReference,
    /// Join column count does not match the referenced primary key
    CompositeKeyArityMismatch,
    /// A primary relation was declared nullable
    InvalidPrimaryNullableCombination,
    /// Relation target names an unregistered entity type
    UnknownEntityType,
    /// Two entity types share a name
    DuplicateEntityType,
    /// Two relations on one entity share a property name
    DuplicateRelation,
    /// Inverse pair kinds are incompatible (e.g. many-to-many with many-to-one)
    InverseKindMismatch,
    /// Entity type has no primary key columns
    MissingPrimaryKey,
    /// Table, column or property name is not a valid identifier
    InvalidIdentifier,
}

#[derive(Debug)]
pub struct PlanningError {
    pub kind: PlanningErrorKind,
    pub entity: String,
    pub relation: Option<String>,
    /// Rendered identity of the instance being planned, if known.
    pub instance: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningErrorKind {
    /// Unsaved related instance reached through a non-nullable relation without cascade insert
    UnsavedRelationWithoutCascade,
    /// A dependent still references the instance and the relation restricts deletes
    RestrictedDeleteViolation,
    /// Instance key values are incomplete for its primary key
    CompositeKeyArityMismatch,
    /// SET NULL requested on a non-nullable foreign key
    SetNullOnNonNullable,
    /// New instances reference each other only through non-nullable foreign keys
    CyclicForeignKeyDependency,
    /// Instance names an entity type the store does not know
    UnknownEntityType,
    /// Relation slot references an instance missing from the graph
    UnknownInstance,
    /// A collection relation holds a single value or vice versa
    RelationShapeMismatch,
    /// Traversal exceeded the configured depth
    MaxDepthExceeded,
}

#[derive(Debug)]
pub struct ExecutionError {
    /// Number of plan operations that completed before the failure.
    pub completed: usize,
    /// Index of the failed operation within the plan.
    pub failed_index: usize,
    /// Human-readable rendering of the failed operation.
    pub operation: String,
    pub source: PersistenceError,
}

#[derive(Debug)]
pub struct PersistenceError {
    pub operation: PersistenceOperation,
    /// Entity type name or junction table name.
    pub target: String,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// The collaborator call a [`PersistenceError`] was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceOperation {
    InsertRow,
    UpdateRow,
    DeleteRow,
    InsertJunctionRow,
    DeleteJunctionRow,
}

impl PersistenceOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            PersistenceOperation::InsertRow => "insert_row",
            PersistenceOperation::UpdateRow => "update_row",
            PersistenceOperation::DeleteRow => "delete_row",
            PersistenceOperation::InsertJunctionRow => "insert_junction_row",
            PersistenceOperation::DeleteJunctionRow => "delete_junction_row",
        }
    }
}

impl ResolutionError {
    pub fn new(
        kind: ResolutionErrorKind,
        entity: impl Into<String>,
        relation: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            entity: entity.into(),
            relation: relation.map(str::to_string),
            message: message.into(),
        }
    }
}

impl PlanningError {
    pub fn new(kind: PlanningErrorKind, entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            entity: entity.into(),
            relation: None,
            instance: None,
            message: message.into(),
        }
    }

    /// Attach the relation property name.
    #[must_use]
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    /// Attach the rendered instance identity.
    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

impl PersistenceError {
    pub fn new(
        operation: PersistenceOperation,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying collaborator error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl Error {
    /// Kind of the resolution error, if this is one.
    pub fn resolution_kind(&self) -> Option<ResolutionErrorKind> {
        match self {
            Error::Resolution(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Kind of the planning error, if this is one.
    pub fn planning_kind(&self) -> Option<PlanningErrorKind> {
        match self {
            Error::Planning(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Entity type named by the error, if any.
    pub fn entity(&self) -> Option<&str> {
        match self {
            Error::Resolution(e) => Some(&e.entity),
            Error::Planning(e) => Some(&e.entity),
            Error::Execution(e) => Some(&e.source.target),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Resolution(e) => write!(f, "Resolution error: {}", e),
            Error::Planning(e) => write!(f, "Planning error: {}", e),
            Error::Execution(e) => write!(f, "Execution error: {}", e),
            Error::Declaration(msg) => write!(f, "Declaration error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Execution(e) => Some(&e.source),
            _ => None,
        }
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(rel) => write!(f, "{:?} on {}.{}: {}", self.kind, self.entity, rel, self.message),
            None => write!(f, "{:?} on {}: {}", self.kind, self.entity, self.message),
        }
    }
}

impl std::error::Error for ResolutionError {}

impl fmt::Display for PlanningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} on {}", self.kind, self.entity)?;
        if let Some(rel) = &self.relation {
            write!(f, ".{}", rel)?;
        }
        if let Some(instance) = &self.instance {
            write!(f, " (instance {})", instance)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for PlanningError {}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation #{} ({}) failed after {} completed: {}",
            self.failed_index, self.operation, self.completed, self.source
        )
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {}: {}",
            self.operation.as_str(),
            self.target,
            self.message
        )
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl From<ResolutionError> for Error {
    fn from(err: ResolutionError) -> Self {
        Error::Resolution(err)
    }
}

impl From<PlanningError> for Error {
    fn from(err: PlanningError) -> Self {
        Error::Planning(err)
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        Error::Execution(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Declaration(err.to_string())
    }
}

/// Result type alias for relmodel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn planning_error_display_includes_context() {
        let err = PlanningError::new(
            PlanningErrorKind::RestrictedDeleteViolation,
            "Question",
            "1 dependent row still references it",
        )
        .with_relation("answers")
        .with_instance("Question(id=1)");

        let text = err.to_string();
        assert!(text.contains("RestrictedDeleteViolation"));
        assert!(text.contains("Question.answers"));
        assert!(text.contains("Question(id=1)"));

        let err: Error = err.into();
        assert_eq!(
            err.planning_kind(),
            Some(PlanningErrorKind::RestrictedDeleteViolation)
        );
        assert_eq!(err.entity(), Some("Question"));
    }

    #[test]
    fn execution_error_chains_to_collaborator_source() {
        let io = std::io::Error::other("disk full");
        let err = Error::Execution(ExecutionError {
            completed: 2,
            failed_index: 2,
            operation: "insert Category".to_string(),
            source: PersistenceError::new(PersistenceOperation::InsertRow, "Category", "boom")
                .with_source(io),
        });

        assert_eq!(err.entity(), Some("Category"));
        let persistence = err.source().expect("execution error has a source");
        assert!(persistence.to_string().contains("insert_row on Category"));
        let root = persistence.source().expect("persistence error has a source");
        assert_eq!(root.to_string(), "disk full");
    }

    #[test]
    fn resolution_error_without_relation() {
        let err = ResolutionError::new(
            ResolutionErrorKind::MissingPrimaryKey,
            "Tag",
            None,
            "no primary columns declared",
        );
        assert_eq!(
            err.to_string(),
            "MissingPrimaryKey on Tag: no primary columns declared"
        );
    }
}
