//! Typed error model for the form.
//!
//! Every failure the form can observe maps to exactly one `FormError` variant.
//! Each variant is contained to the narrowest scope it affects:
//!
//! ```text
//! Compile         → one recompute call (prior state kept)
//! Execution       → one recompute call (prior state kept, edit kept)
//! FieldValidation → one adapter's local state (never logged)
//! Lookup          → one adapter's display value (degrades to empty)
//! Auth            → bootstrap only (form still renders)
//! Preview         → one preview request
//! ```

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FormError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error_kind", rename_all = "snake_case")]
pub enum FormError {
    /// The template source did not compile.
    #[error("Template compilation failed at byte {offset}: {reason}")]
    Compile { reason: String, offset: usize },

    /// The engine executed the template but reported an error message.
    #[error("Template execution error: {message}")]
    Execution { message: String },

    /// A raw value was rejected for one field.
    #[error("Invalid value for '{name}': {reason}")]
    FieldValidation { name: String, reason: String },

    /// Identity display lookup failed.
    #[error("Identity lookup failed: {reason}")]
    Lookup { reason: String },

    /// Login against the API service failed.
    #[error("Authentication failed{}: {reason}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Auth { status: Option<u16>, reason: String },

    /// The preview could not be produced.
    #[error("Preview failed: {reason}")]
    Preview { reason: String },

    /// Transport-level HTTP failure.
    #[error("HTTP error: {reason}")]
    Http { reason: String },
}

impl FormError {
    pub fn field(name: impl Into<String>, reason: impl Into<String>) -> Self {
        FormError::FieldValidation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Authorization failures are expected when running without credentials
    /// and are reported at warn level rather than error.
    ///
    /// The hosted service answers bad credentials with a 500.
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            FormError::Auth {
                status: Some(401 | 403 | 500),
                ..
            }
        )
    }
}

impl From<reqwest::Error> for FormError {
    fn from(err: reqwest::Error) -> Self {
        FormError::Http {
            reason: err.to_string(),
        }
    }
}

pub type FormResult<T> = Result<T, FormError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
