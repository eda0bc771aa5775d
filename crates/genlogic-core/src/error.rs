//! # Error Types
//!
//! Defines `GenLogicError`, the unified error enum for every failure mode in
//! the compile pipeline. Every variant includes enough context (table name,
//! column name, path) to act on without re-reading the schema.

use thiserror::Error;

/// All errors that can occur while resolving, validating, or compiling a schema.
#[derive(Error, Debug)]
pub enum GenLogicError {
    #[error("tables.{table}.columns.{column}: unknown reference '{reference}'")]
    UnknownReference {
        table: String,
        column: String,
        reference: String,
    },

    #[error("{path}: '{name}' is not a valid identifier (expected ^[A-Za-z_][A-Za-z0-9_]*$)")]
    InvalidIdentifier { path: String, name: String },

    #[error("tables.{table}.columns.{column}: {rule}")]
    TypeSizeViolation {
        table: String,
        column: String,
        rule: String,
    },

    #[error("{path}: unknown table '{table}'")]
    UnknownTable { path: String, table: String },

    #[error("{path}: table '{table}' has no foreign key named '{fk}'")]
    UnknownForeignKey {
        path: String,
        table: String,
        fk: String,
    },

    #[error("tables.{table}.columns.{column}.automation: {detail}")]
    AutomationFkMismatch {
        table: String,
        column: String,
        detail: String,
    },

    #[error("foreign key cycle: {}", path.join(" -> "))]
    ForeignKeyCycle { path: Vec<String> },

    #[error("calculated column cycle in table '{table}': {}", columns.join(", "))]
    CalculatedColumnCycle { table: String, columns: Vec<String> },

    #[error("tables.{table}.columns.{column}: duplicate column")]
    DuplicateColumn { table: String, column: String },

    #[error("tables.{table}: duplicate table")]
    DuplicateTable { table: String },

    #[error("invalid compiler configuration: {message}")]
    Config { message: String },

    /// Aggregated batch of errors collected across the whole schema, so a
    /// caller sees every problem from one compile attempt rather than just
    /// the first one.
    #[error("{} error(s) found:\n{}", .0.len(), format_many(.0))]
    Many(Vec<GenLogicError>),
}

fn format_many(errors: &[GenLogicError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, GenLogicError>;

/// Collects errors from a fallible step without short-circuiting, then
/// folds them into a single `GenLogicError::Many` (or returns `Ok` if the
/// collection was empty). Used by the resolver and both graph validators so
/// a single compile attempt surfaces every problem it found.
pub(crate) fn aggregate<T>(ok: T, mut errors: Vec<GenLogicError>) -> Result<T> {
    if errors.is_empty() {
        Ok(ok)
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(GenLogicError::Many(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn many_with_single_error_unwraps() {
        let err = aggregate(
            (),
            vec![GenLogicError::DuplicateTable {
                table: "a".into(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, GenLogicError::DuplicateTable { .. }));
    }

    #[test]
    fn many_with_multiple_errors_wraps() {
        let err = aggregate(
            (),
            vec![
                GenLogicError::DuplicateTable { table: "a".into() },
                GenLogicError::DuplicateTable { table: "b".into() },
            ],
        )
        .unwrap_err();
        match err {
            GenLogicError::Many(errs) => assert_eq!(errs.len(), 2),
            other => panic!("expected Many, got {other:?}"),
        }
    }

    #[test]
    fn empty_errors_is_ok() {
        assert!(aggregate(42, Vec::new()).is_ok());
    }
}
