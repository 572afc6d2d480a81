//! Error types for relation synchronization.

use std::fmt;

/// The primary error type for all crudview operations.
#[derive(Debug)]
pub enum Error {
    /// A related entity built from submitted attributes failed its rules
    Validation(ValidationError),
    /// A storage constraint rejected a write
    Integrity(IntegrityError),
    /// A relation is not declared or declared inconsistently
    Config(ConfigError),
    /// Query execution errors reported by a driver
    Query(QueryError),
    /// Transaction state errors
    Transaction(TransactionError),
    /// Type conversion errors
    Type(TypeError),
    /// Custom error with message
    Custom(String),
}

/// The kind of storage constraint that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityErrorKind {
    /// Unique or composite-key constraint (e.g. duplicate junction row)
    Unique,
    /// Foreign key points at a missing row, or a referenced row is in use
    ForeignKey,
    /// NULL written into a NOT NULL column
    NotNull,
    /// Table does not exist
    MissingTable,
}

#[derive(Debug, Clone)]
pub struct IntegrityError {
    pub kind: IntegrityErrorKind,
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
}

/// A statement rejected by the database driver.
#[derive(Debug)]
pub struct QueryError {
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// BEGIN issued while a transaction is open
    AlreadyActive,
    /// COMMIT/ROLLBACK without an open transaction
    NotActive,
}

#[derive(Debug, Clone)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

/// Validation error for field-level and entity-level rules.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The errors, in the order they were found
    pub errors: Vec<FieldValidationError>,
}

/// A single validation error for a field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValidationError {
    /// The field name that failed validation
    pub field: String,
    /// The kind of validation that failed
    pub kind: ValidationErrorKind,
    /// Human-readable error message
    pub message: String,
}

/// The type of validation constraint that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// String is shorter than minimum length
    MinLength,
    /// String is longer than maximum length
    MaxLength,
    /// Value doesn't match regex pattern
    Pattern,
    /// Value is not a well-formed email address
    Email,
    /// Value is not numeric
    Number,
    /// File name has an extension that is not allowed
    File,
    /// File name is not an image
    Image,
    /// Required field is missing/null
    Required,
    /// Submitted identifier matches no existing row
    UnknownKey,
    /// Custom validation failed
    Custom,
}

impl ValidationError {
    /// Create a new empty validation error container.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Check if there are any validation errors.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add a field validation error.
    pub fn add(
        &mut self,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(FieldValidationError {
            field: field.into(),
            kind,
            message: message.into(),
        });
    }

    /// Add a required field error.
    pub fn add_required(&mut self, field: impl Into<String>) {
        self.add(field, ValidationErrorKind::Required, "is required");
    }

    /// Add a min length error.
    pub fn add_min_length(&mut self, field: impl Into<String>, min: usize, actual: usize) {
        self.add(
            field,
            ValidationErrorKind::MinLength,
            format!("must be at least {min} characters, got {actual}"),
        );
    }

    /// Add a max length error.
    pub fn add_max_length(&mut self, field: impl Into<String>, max: usize, actual: usize) {
        self.add(
            field,
            ValidationErrorKind::MaxLength,
            format!("must be at most {max} characters, got {actual}"),
        );
    }

    /// Add a pattern match error.
    pub fn add_pattern(&mut self, field: impl Into<String>, pattern: &str) {
        self.add(
            field,
            ValidationErrorKind::Pattern,
            format!("must match pattern '{pattern}'"),
        );
    }

    /// Add an error for an identifier that refers to no existing row.
    pub fn add_unknown_key(&mut self, field: impl Into<String>, key: impl fmt::Display) {
        self.add(
            field,
            ValidationErrorKind::UnknownKey,
            format!("no related row with key {key}"),
        );
    }

    /// Move every error of `other` into this container, prefixing field names.
    ///
    /// Used to report errors of an inline related entity under the relation
    /// attribute, e.g. `tags[1].name`.
    pub fn absorb(&mut self, prefix: &str, other: ValidationError) {
        for err in other.errors {
            self.errors.push(FieldValidationError {
                field: format!("{prefix}.{}", err.field),
                kind: err.kind,
                message: err.message,
            });
        }
    }

    /// Convert to Result, returning Ok(()) if no errors, Err(self) otherwise.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
        })
    }

    /// Shorthand for an integrity error.
    pub fn integrity(
        kind: IntegrityErrorKind,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Integrity(IntegrityError {
            kind,
            table: table.into(),
            message: message.into(),
        })
    }

    /// Is this a rejected write (constraint violation)?
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }

    /// Is this a failed validation of submitted relation data?
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Is this a setup-time configuration problem?
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Shorthand for a driver error on `sql`.
    pub fn query(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            sql: Some(sql.into()),
            message: message.into(),
            source: None,
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Integrity(e) => write!(f, "Integrity error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn std::error::Error + 'static)),
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (table '{}')", self.message, self.table)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(sql) = &self.sql {
            write!(f, "\n  SQL: {}", sql)?;
        }
        Ok(())
    }
}

impl fmt::Display for TransactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "validation passed")
        } else if self.errors.len() == 1 {
            let err = &self.errors[0];
            write!(f, "validation error on '{}': {}", err.field, err.message)
        } else {
            writeln!(f, "validation errors:")?;
            for err in &self.errors {
                writeln!(f, "  - {}: {}", err.field, err.message)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<IntegrityError> for Error {
    fn from(err: IntegrityError) -> Self {
        Error::Integrity(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for crudview operations.
pub type Result<T> = std::result::Result<T, Error>;
