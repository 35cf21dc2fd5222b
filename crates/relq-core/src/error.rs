//! Error types for relq.

use thiserror::Error;

/// The main error type for relq operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A manual relation was defined against a table the registry does not know
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A manual relation references columns that do not exist
    #[error("invalid relation {table}.{relation}: {reason}")]
    InvalidRelation {
        table: String,
        relation: String,
        reason: String,
    },

    /// The SQL executor failed; the message is passed through unchanged
    #[error("executor error: {0}")]
    Executor(String),

    /// A catalog document could not be interpreted
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for relq operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::UnknownTable("Class".to_string());
        assert_eq!(err.to_string(), "unknown table: Class");

        let err = Error::InvalidRelation {
            table: "Class".to_string(),
            relation: "students".to_string(),
            reason: "missing column".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid relation Class.students: missing column"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
