use thiserror::Error;

/// Result type for searchkeeper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Upper bound on error messages carried into user-visible stage reports
pub const MAX_REPORTED_MESSAGE_CHARS: usize = 512;

/// Main error type for searchkeeper operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed document, missing identity field, unknown option
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport could not reach the search service
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request to the search service timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Search service answered with a non-success status
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Search service rejected the request body as too large
    #[error("Payload too large: {bytes} bytes rejected")]
    PayloadTooLarge { bytes: usize },

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Partial run refused because the live schema is absent or drifted
    #[error("Collection '{collection}' is {state}; run a full indexation before a partial run")]
    SchemaMissingOrDrifted { collection: String, state: String },

    /// Rollback requested with fewer than two retained generations
    #[error("Nothing to roll back to for '{collection}': {retained} generation(s) retained")]
    RollbackUnavailable { collection: String, retained: usize },

    /// Logical collection has no registration
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Destructive operation invoked without confirmation
    #[error("Confirmation required: {0}")]
    ConfirmationRequired(String),

    /// Populating a fresh physical generation failed; alias untouched
    #[error("Population of '{physical}' failed: {message}")]
    Population { physical: String, message: String },

    /// Repointing the alias failed; the new generation is kept for retry
    #[error("Alias swap '{logical}' -> '{physical}' failed: {message}")]
    AliasSwap {
        logical: String,
        physical: String,
        message: String,
    },

    /// Top-level lifecycle failure report
    #[error("Collection '{collection}' failed during {stage} [{class}]: {message}")]
    Stage {
        collection: String,
        stage: String,
        class: &'static str,
        message: String,
    },

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Creates a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates an API error for the given HTTP status
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Adds context to any error
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether this kind of failure is transient.
    ///
    /// Connection failures, timeouts, HTTP 429 and HTTP 5xx are transient.
    /// Everything else, including payload-too-large, is fatal.
    pub fn is_retryable_kind(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }

    /// Whether the service reported the target as already absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    /// HTTP status carried by the error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::PayloadTooLarge { .. } => Some(413),
            _ => None,
        }
    }

    /// Stable class name used in reports and lifecycle events
    pub fn class(&self) -> &'static str {
        match self {
            Self::Io(_) => "IoError",
            Self::Config(_) => "ConfigError",
            Self::Validation(_) => "ValidationError",
            Self::Connection(_) => "ConnectionError",
            Self::Timeout(_) => "TimeoutError",
            Self::Api { .. } => "ApiError",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::Serialization(_) => "SerializationError",
            Self::SchemaMissingOrDrifted { .. } => "SchemaMissingOrDrifted",
            Self::RollbackUnavailable { .. } => "RollbackUnavailable",
            Self::UnknownCollection(_) => "UnknownCollection",
            Self::ConfirmationRequired(_) => "ConfirmationRequired",
            Self::Population { .. } => "PopulationError",
            Self::AliasSwap { .. } => "AliasSwapError",
            Self::Stage { class, .. } => class,
            Self::WithContext { .. } | Self::Other(_) => "Error",
        }
    }

    /// Wraps an error into a bounded, user-facing stage report.
    ///
    /// Already-wrapped errors are returned unchanged so the innermost stage wins.
    pub fn at_stage(collection: impl Into<String>, stage: impl Into<String>, err: Error) -> Self {
        if matches!(err, Self::Stage { .. }) {
            return err;
        }
        Self::Stage {
            collection: collection.into(),
            stage: stage.into(),
            class: err.class(),
            message: truncate_message(&err.to_string(), MAX_REPORTED_MESSAGE_CHARS),
        }
    }
}

/// Truncates on a char boundary, appending an ellipsis when shortened
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let kept: String = message.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::with_context(context, e))
    }
}
