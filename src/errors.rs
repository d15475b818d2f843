//! Error types for the Trellis planning engine.
//!
//! A single [`TrellisError`] enum is returned from every fallible core
//! operation. Each variant carries the failing object's id/kind (when
//! known) and a small sanitized context bag so callers can render a
//! useful message without the core leaking filesystem paths, stack
//! frames, or other internal details (see [`crate::security::sanitize_message`]).
//!
//! Validation in the object model (C4) and parameter validation in the
//! tool handlers (C12) accumulate every violation instead of
//! short-circuiting on the first one; [`ValidationErrors`] is the
//! accumulator used for that.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Stable error code, used by callers to branch on failure kind without
/// string-matching the message. Matches the taxonomy in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorCode {
    MissingRequiredField,
    InvalidField,
    ParentNotExist,
    ParentInvalid,
    InvalidStatusTransition,
    PrerequisitesIncomplete,
    CircularDependency,
    ProtectedObject,
    NoAvailableTask,
    CascadeError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ErrorCode::InvalidField => "INVALID_FIELD",
            ErrorCode::ParentNotExist => "PARENT_NOT_EXIST",
            ErrorCode::ParentInvalid => "PARENT_INVALID",
            ErrorCode::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            ErrorCode::PrerequisitesIncomplete => "PREREQUISITES_INCOMPLETE",
            ErrorCode::CircularDependency => "CIRCULAR_DEPENDENCY",
            ErrorCode::ProtectedObject => "PROTECTED_OBJECT",
            ErrorCode::NoAvailableTask => "NO_AVAILABLE_TASK",
            ErrorCode::CascadeError => "CASCADE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single typed error produced by the core.
///
/// `message` is sanitized before it reaches a caller (see
/// [`crate::security::sanitize_message`]) — no file paths, stack frames,
/// IPs, connection strings, tokens, or UUIDs.
#[derive(Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct TrellisError {
    pub code: ErrorCode,
    pub message: String,
    pub object_id: Option<String>,
    pub object_kind: Option<String>,
    pub context: BTreeMap<String, String>,
}

impl TrellisError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: crate::security::sanitize_message(&message.into()),
            object_id: None,
            object_kind: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.object_kind = Some(kind.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl From<std::io::Error> for TrellisError {
    fn from(err: std::io::Error) -> Self {
        TrellisError::new(ErrorCode::CascadeError, err.to_string())
    }
}

/// Accumulator for validation passes that must report every violation in
/// a single response rather than failing fast (spec §7 propagation
/// policy).
#[derive(Debug, Default, Clone)]
pub struct ValidationErrors(pub Vec<TrellisError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, err: TrellisError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Joins every accumulated message into a single combined error
    /// (spec §4.4: `Missing required fields: a, b`). Returns `None` when
    /// nothing was accumulated.
    pub fn into_combined(self, code: ErrorCode) -> Option<TrellisError> {
        if self.0.is_empty() {
            return None;
        }
        let message = combine_messages(&self.0);
        Some(TrellisError::new(code, message))
    }

    pub fn into_result(self, code: ErrorCode) -> Result<(), TrellisError> {
        match self.into_combined(code) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Like [`Self::into_result`], but when exactly one violation was
    /// accumulated, returns it unchanged instead of rewrapping it under
    /// `fallback_code` — callers branching on `TrellisError::code` (e.g.
    /// distinguishing a missing parent from a missing title) need the
    /// original code preserved in the common single-violation case.
    /// `fallback_code` only applies when multiple violations combine.
    pub fn into_result_or_first(self, fallback_code: ErrorCode) -> Result<(), TrellisError> {
        let mut errors = self.0;
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => {
                let message = combine_messages(&errors);
                Err(TrellisError::new(fallback_code, message))
            }
        }
    }
}

/// Renders a batch of accumulated violations as a single message. When
/// every violation is a missing-field error, uses the canonical
/// `Missing required fields: a, b` form (spec §4.4); otherwise falls back
/// to a `; `-separated join of the individual messages.
fn combine_messages(errors: &[TrellisError]) -> String {
    if !errors.is_empty() && errors.iter().all(|e| e.code == ErrorCode::MissingRequiredField) {
        let fields = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join(", ");
        format!("Missing required fields: {fields}")
    } else {
        errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ")
    }
}

pub type TrellisResult<T> = Result<T, TrellisError>;
