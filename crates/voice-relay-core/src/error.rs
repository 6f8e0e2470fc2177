use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceRelayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoiceRelayError>;

/// Failure reported by an upstream speech or completion provider.
///
/// The variant carries enough context for [`ProviderError::is_retryable`] to
/// decide whether another attempt against the same provider is worthwhile.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

/// Markers that make an error worth retrying. Checked before [`FATAL_MARKERS`].
const RETRYABLE_MARKERS: &[&str] = &[
    "timeout",
    "connection",
    "network",
    "503",
    "502",
    "504",
    "429",
    "rate limit",
    "too many requests",
];

/// Markers for auth/config failures that another attempt cannot fix.
const FATAL_MARKERS: &[&str] = &[
    "401",
    "403",
    "404",
    "invalid api key",
    "authentication",
    "authorization",
];

impl ProviderError {
    /// Whether the failure is transient.
    ///
    /// Network and timeout failures always retry. Everything else is
    /// classified from the lower-cased error text: retryable markers first,
    /// then auth/not-found markers, then a bare `500`. Unknown errors do not
    /// retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) => true,
            Self::NotConfigured(_) => false,
            other => is_retryable_message(&other.to_string()),
        }
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connection(_) => "connection",
            Self::Http { .. } => "http",
            Self::InvalidResponse(_) => "invalid_response",
            Self::NotConfigured(_) => "not_configured",
            Self::Unavailable(_) => "unavailable",
            Self::Other(_) => "other",
        }
    }
}

/// Classify a free-form error message.
pub fn is_retryable_message(message: &str) -> bool {
    let msg = message.to_lowercase();

    if RETRYABLE_MARKERS.iter().any(|m| msg.contains(m)) {
        return true;
    }
    if FATAL_MARKERS.iter().any(|m| msg.contains(m)) {
        return false;
    }
    msg.contains("500") || msg.contains("5xx")
}
