//! Error types for Flowbench

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using Flowbench Error
pub type Result<T> = std::result::Result<T, Error>;

/// Flowbench error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Project {0} has no active version")]
    NoActiveVersion(String),

    #[error("Failed to copy version {from} to {to}: {reason}")]
    VersionCopy {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Data model compilation failed:\n{}", .diagnostics.join("\n"))]
    Compilation { diagnostics: Vec<String> },

    #[error("Process file missing: {0}")]
    ProcessFileMissing(PathBuf),

    #[error("Unknown component type: {0}")]
    UnknownComponentType(String),

    #[error("Graph invariant violated: {0}")]
    GraphInvariant(String),

    #[error("Component {0} is protected and cannot be removed")]
    ProtectedComponent(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Actor {actor} failed: {message}")]
    ActorFailed { actor: String, message: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Run aborted")]
    Aborted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Stable name of the error kind, recorded as the failure type of a test result.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "IoError",
            Error::Database(_) => "DatabaseError",
            Error::Serialization(_) => "SerializationError",
            Error::NotFound { .. } => "NotFound",
            Error::AlreadyExists { .. } => "AlreadyExists",
            Error::InvalidConfig(_) => "InvalidConfig",
            Error::NoActiveVersion(_) => "NoActiveVersion",
            Error::VersionCopy { .. } => "VersionCopyError",
            Error::Compilation { .. } => "CompilationError",
            Error::ProcessFileMissing(_) => "ProcessFileMissing",
            Error::UnknownComponentType(_) => "UnknownComponentType",
            Error::GraphInvariant(_) => "GraphInvariant",
            Error::ProtectedComponent(_) => "ProtectedComponent",
            Error::Script(_) => "ScriptError",
            Error::ActorFailed { .. } => "ActorFailed",
            Error::AssertionFailed(_) => "AssertionFailed",
            Error::InvalidStateTransition { .. } => "InvalidStateTransition",
            Error::Integrity(_) => "IntegrityError",
            Error::Aborted => "Aborted",
            Error::Internal(_) => "InternalError",
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
