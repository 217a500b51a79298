//! Error types for the MedSim session core.
//!
//! Precondition violations (calling an operation from the wrong mode, or
//! while a provider request is still in flight) are reported to the caller
//! as [`SessionError`] values. Provider failures are never returned this
//! way from session operations: they are folded into the session as a
//! localized message (see [`OperationKind::failure_message`]).

use std::path::PathBuf;

use crate::model::{ActionType, ScenarioId, SessionMode};
use crate::provider::ProviderError;
use crate::session::OperationKind;

/// A specialized `Result` type for MedSim session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that can occur while driving a MedSim session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your medsim.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Precondition Errors
    // ========================================================================
    /// Another provider request is still in flight.
    #[error("Cannot {operation}: another request is still in flight")]
    Busy {
        /// The operation that was rejected.
        operation: OperationKind,
    },

    /// The operation is not legal in the current mode.
    #[error("Cannot {operation} while in {mode} mode")]
    InvalidOperation {
        /// The operation that was rejected.
        operation: OperationKind,
        /// The mode the session was in.
        mode: SessionMode,
    },

    /// The scenario requires a higher level than the player has reached.
    #[error("Scenario '{scenario}' requires level {required}, current level is {current}")]
    ScenarioLocked {
        /// The locked scenario.
        scenario: ScenarioId,
        /// Level required to unlock it.
        required: u32,
        /// The player's current level.
        current: u32,
    },

    /// Closing entries can only be recorded through `finish_case`.
    #[error("'{action}' entries are recorded when the case is finished, not as regular actions")]
    ClosingActionNotAllowed {
        /// The rejected action type.
        action: ActionType,
    },

    /// The case has already been closed with hypotheses and conduct.
    #[error("The case is already closed; only retrying the finish is allowed")]
    CaseClosed,

    /// A required text field was empty or whitespace.
    #[error("Cannot {operation}: the {field} is empty")]
    EmptyInput {
        /// The operation that was rejected.
        operation: OperationKind,
        /// Which input was empty.
        field: &'static str,
    },

    // ========================================================================
    // Provider Errors
    // ========================================================================
    /// The content provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl SessionError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidOperation` error.
    #[must_use]
    pub const fn invalid_operation(operation: OperationKind, mode: SessionMode) -> Self {
        Self::InvalidOperation { operation, mode }
    }

    /// Returns `true` if the error reports a violated precondition.
    ///
    /// These errors leave the session untouched; the caller should not have
    /// issued the request in the first place.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Busy { .. }
                | Self::InvalidOperation { .. }
                | Self::ScenarioLocked { .. }
                | Self::ClosingActionNotAllowed { .. }
                | Self::CaseClosed
                | Self::EmptyInput { .. }
        )
    }
}
