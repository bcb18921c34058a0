//! Error types for meldwork

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("policy conflict on '{property}': track {track} holds {existing}, cannot assign {requested}")]
    PolicyConflict {
        property: String,
        track: String,
        existing: String,
        requested: String,
    },

    #[error("type contract violation on '{property}': {op} rejected {found}")]
    TypeContractViolation {
        property: String,
        op: String,
        found: String,
    },

    #[error("unknown pattern: {0}")]
    UnknownPattern(String),

    #[error("unknown merge op: {0}")]
    UnknownMergeOp(String),

    #[error("unknown composition kind: {0}")]
    UnknownCompositionKind(String),

    #[error("'{0}' is not callable")]
    NotCallable(String),

    #[error("'{0}' is asynchronous and must be called with call_async")]
    AsyncRequired(String),

    #[error("invalid idea: {0}")]
    InvalidIdea(String),

    #[error("method {name} failed: {message}")]
    MethodFailed { name: String, message: String },

    #[error("observer queue for '{property}' is full (limit {limit})")]
    ObserverOverflow { property: String, limit: usize },

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn policy_conflict(
        property: impl Into<String>,
        track: impl Into<String>,
        existing: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::PolicyConflict {
            property: property.into(),
            track: track.into(),
            existing: existing.into(),
            requested: requested.into(),
        }
    }

    pub fn type_violation(
        property: impl Into<String>,
        op: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeContractViolation {
            property: property.into(),
            op: op.into(),
            found: found.into(),
        }
    }

    pub fn method_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MethodFailed {
            name: name.into(),
            message: message.into(),
        }
    }
}
