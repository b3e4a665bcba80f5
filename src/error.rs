use crate::runtime::RejectedExecution;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "batch.max_batch_size")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected value, actual state)
    pub details: Option<String>,
    /// Source of the error (e.g., "service_builder", "batch_service")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for the batch service.
///
/// Only structural problems surface here: bad configuration, operating the
/// service in the wrong lifecycle state, and rejection by an execution
/// resource. Individual request failures travel through [`RequestError`] on
/// the request's own future.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Illegal state: {message}{}", format_context(.context))]
    IllegalState {
        message: String,
        context: ErrorContext,
    },

    #[error("Execution rejected: {0}")]
    Rejected(#[from] RejectedExecution),

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML configuration error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON configuration error: {0}")]
    Json(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new illegal-state error with structured context
    pub fn illegal_state_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::IllegalState {
            message: msg.into(),
            context,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::IllegalState { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::IllegalState { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Outcome error of a single [`AsyncRequest`](crate::request::AsyncRequest).
///
/// Cloneable because every holder of the request's future observes the same
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Remote error: HTTP {code}: {message}")]
    Remote { code: u16, message: String },

    #[error("Transport error: {message}")]
    Transport { message: String, timed_out: bool },

    #[error("Execution rejected: {0}")]
    Rejected(String),

    #[error("Interrupted while waiting to retry")]
    Interrupted,

    #[error("Request cancelled")]
    Cancelled,
}

impl RequestError {
    /// Status code used for transport failures that carry no coded response.
    pub const UNKNOWN_STATUS_CODE: u16 = 0;
    /// Status code used for transport timeouts.
    pub const TIMEOUT_STATUS_CODE: u16 = 504;

    pub fn remote(code: u16, message: impl Into<String>) -> Self {
        RequestError::Remote {
            code,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        RequestError::Transport {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        RequestError::Transport {
            message: message.into(),
            timed_out: true,
        }
    }

    /// Numeric status code fed to the retry policy.
    pub fn status_code(&self) -> u16 {
        match self {
            RequestError::Remote { code, .. } => *code,
            RequestError::Transport {
                timed_out: true, ..
            } => Self::TIMEOUT_STATUS_CODE,
            _ => Self::UNKNOWN_STATUS_CODE,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestError::Cancelled)
    }
}

/// Signals that a backoff sleep was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sleep interrupted")]
pub struct Interrupted;
