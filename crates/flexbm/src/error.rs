//! Error types for configuration loading and runtime reconfiguration.
//!
//! [`LoadError`] covers everything that can go wrong turning a JSON
//! configuration document into a generation. [`ReconfigError`] covers plan
//! application; every variant maps to exactly one [`ReconfigResult`].

use crate::hash::UnknownHashAlgorithm;
use flexbm_common::{ObjectId, ObjectKind, ReconfigResult};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for configuration loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type alias for reconfiguration.
pub type ReconfigResultT<T> = Result<T, ReconfigError>;

/// Errors raised while loading a configuration document.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration root must be a JSON object")]
    NotAnObject,

    #[error("Malformed {section}: {message}")]
    Malformed { section: String, message: String },

    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: ObjectKind, name: String },

    #[error("Duplicate {kind} id {id}")]
    DuplicateId { kind: ObjectKind, id: ObjectId },

    #[error(transparent)]
    UnknownHashAlgorithm(#[from] UnknownHashAlgorithm),

    #[error("Header '{header}' uses unknown header type '{header_type}'")]
    UnknownHeaderType { header: String, header_type: String },

    #[error("Field '{field}' used by {referrer} is not declared")]
    UnknownField { field: String, referrer: String },

    #[error("{kind} '{name}' referenced by {referrer} does not exist")]
    UnknownReference {
        kind: ObjectKind,
        name: String,
        referrer: String,
    },

    #[error("Unsupported primitive '{op}' in action '{action}'")]
    UnsupportedPrimitive { action: String, op: String },

    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Invalid register array '{name}': {message}")]
    InvalidRegisterArray { name: String, message: String },
}

impl LoadError {
    pub fn malformed(section: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            section: section.into(),
            message: message.into(),
        }
    }

    pub fn unknown_reference(
        kind: ObjectKind,
        name: impl Into<String>,
        referrer: impl Into<String>,
    ) -> Self {
        Self::UnknownReference {
            kind,
            name: name.into(),
            referrer: referrer.into(),
        }
    }
}

/// Errors raised while applying a reconfiguration plan.
#[derive(Debug, Error)]
pub enum ReconfigError {
    #[error("Failed to open configuration file {path}: {source}")]
    OpenJson {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open plan file {path}: {source}")]
    OpenPlan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read plan: {0}")]
    ReadPlan(#[source] io::Error),

    #[error("Failed to load new configuration: {0}")]
    Init(#[from] LoadError),

    #[error("Invalid command '{command}': {reason}")]
    InvalidCommand { command: String, reason: String },

    #[error("Token '{token}' must carry prefix {expected}")]
    Prefix {
        token: String,
        expected: &'static str,
    },

    #[error("{kind} '{name}' already exists")]
    Duplicate { kind: ObjectKind, name: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: ObjectKind, name: String },

    #[error("Unsupported rehash target '{0}'")]
    UnsupportedTarget(String),

    #[error("Invalid hash function name '{0}'")]
    InvalidHashFunction(String),

    #[error("Unknown context {0}")]
    UnknownContext(usize),
}

impl ReconfigError {
    pub fn invalid_command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn prefix(token: impl Into<String>, expected: &'static str) -> Self {
        Self::Prefix {
            token: token.into(),
            expected,
        }
    }

    pub fn duplicate(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind,
            name: name.into(),
        }
    }

    pub fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Result code reported at the control boundary.
    pub fn code(&self) -> ReconfigResult {
        match self {
            Self::OpenJson { .. } => ReconfigResult::OpenJsonFileFail,
            Self::OpenPlan { .. } | Self::ReadPlan(_) => ReconfigResult::OpenPlanFileFail,
            Self::Init(_) => ReconfigResult::P4ObjectsInitFail,
            Self::InvalidCommand { .. } => ReconfigResult::InvalidCommandError,
            Self::Prefix { .. } => ReconfigResult::PrefixError,
            Self::Duplicate { .. } => ReconfigResult::DupCheckError,
            Self::NotFound { .. } | Self::UnknownContext(_) => ReconfigResult::UnfoundIdError,
            Self::UnsupportedTarget(_) => ReconfigResult::UnsupportedTargetError,
            Self::InvalidHashFunction(_) => ReconfigResult::InvalidHashFunctionNameError,
        }
    }
}

/// Extension trait for converting a reconfiguration result to its code.
pub trait ReconfigResultExt {
    fn to_code(&self) -> ReconfigResult;
}

impl<T> ReconfigResultExt for ReconfigResultT<T> {
    fn to_code(&self) -> ReconfigResult {
        match self {
            Ok(_) => ReconfigResult::Success,
            Err(e) => e.code(),
        }
    }
}
