use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarshalError {
    #[error("values of type '{type_name}' cannot cross the script boundary")]
    Unsupported { type_name: String },
    #[error("non-finite number {0}")]
    NonFinite(f64),
    #[error("property '{name}' expects a {expected}, got a {found}")]
    PropertyType { name: String, expected: &'static str, found: &'static str },
    #[error("script state must be an object map, got '{type_name}'")]
    StateNotMap { type_name: String },
    #[error("script state entry '{key}': {source}")]
    State { key: String, source: Box<MarshalError> },
}

/// Every failure a script can cause. All but `Unresolved` are scoped to one invocation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    #[error("compile error in '{path}': {message}")]
    Compile { path: String, message: String },
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
    #[error("api misuse: {0}")]
    ApiMisuse(String),
    #[error("marshal error: {0}")]
    Marshal(#[from] MarshalError),
    #[error("unresolved script '{path}': {message}")]
    Unresolved { path: String, message: String },
}

impl ScriptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScriptError::Compile { .. } => ErrorKind::Compile,
            ScriptError::Runtime(_) => ErrorKind::Runtime,
            ScriptError::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
            ScriptError::ApiMisuse(_) => ErrorKind::ApiMisuse,
            ScriptError::Marshal(_) => ErrorKind::Marshal,
            ScriptError::Unresolved { .. } => ErrorKind::Unresolved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Compile,
    Runtime,
    BudgetExceeded,
    ApiMisuse,
    Marshal,
    Unresolved,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Compile => "compile",
            ErrorKind::Runtime => "runtime",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::ApiMisuse => "api_misuse",
            ErrorKind::Marshal => "marshal",
            ErrorKind::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failure while setting up the interpreter itself. Fatal to the process.
#[derive(Debug, Error)]
pub enum ApiRegistrationError {
    #[error("host api function '{0}' is declared twice")]
    Duplicate(&'static str),
}
