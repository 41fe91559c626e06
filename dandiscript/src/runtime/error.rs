// Error handling for DandiScript execution.

use thiserror::Error;

pub type ScriptResult<T> = Result<T, ScriptError>;

/// Errors raised while parsing or running a script.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("type error in {operation}: expected {expected}, got {actual}")]
    Type {
        expected: String,
        actual: String,
        operation: String,
    },

    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("unknown member `{member}` on {target}")]
    UnknownMember { target: String, member: String },

    #[error("{function} expects {expected} argument(s), got {actual}")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("value is not callable: {0}")]
    NotCallable(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("index {index} out of bounds for list of length {length}")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("`{0}` outside of a loop")]
    ControlOutsideLoop(&'static str),

    /// Failure reported by the embedding host (data access, remote calls).
    #[error("{0}")]
    Host(String),
}

impl ScriptError {
    pub fn type_error(operation: &str, expected: &str, actual: &str) -> Self {
        ScriptError::Type {
            expected: expected.to_string(),
            actual: actual.to_string(),
            operation: operation.to_string(),
        }
    }
}
