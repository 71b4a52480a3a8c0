use thiserror::Error;

/// Failure to load the system preamble documents.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("failed to fetch {resource}: {message}")]
    Fetch { resource: String, message: String },

    #[error("failed to fetch {resource}: HTTP {status}")]
    Status { resource: String, status: u16 },

    #[error("{resource} contains HTML content, expected plain text")]
    Html { resource: String },

    #[error("failed to read {resource}: {message}")]
    Io { resource: String, message: String },
}

impl LoadError {
    #[must_use]
    pub fn resource(&self) -> &str {
        match self {
            Self::Fetch { resource, .. }
            | Self::Status { resource, .. }
            | Self::Html { resource }
            | Self::Io { resource, .. } => resource,
        }
    }
}

/// How the dispatcher should react to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credential rejected; rotate immediately.
    Auth,
    /// Quota exhausted; rotate immediately, no backoff.
    RateLimit,
    /// Connectivity problem; back off before the next attempt.
    Network,
    Unknown,
}

/// Errors raised by a backend while opening or driving a conversation.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API key rejected: {0}")]
    Auth(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("could not load assistant instructions: {0}")]
    Load(#[from] LoadError),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Auth(_) => FailureKind::Auth,
            Self::RateLimited(_) => FailureKind::RateLimit,
            Self::Network(_) => FailureKind::Network,
            Self::Load(_) | Self::Other(_) => FailureKind::Unknown,
        }
    }

    /// Classify a free-form vendor error message by keyword.
    ///
    /// Used when a backend only reports a message string (SDK errors,
    /// error payloads embedded in a stream).
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("api key") || lower.contains("api_key") || lower.contains("403") {
            Self::Auth(message)
        } else if lower.contains("quota")
            || lower.contains("rate limit")
            || lower.contains("resource_exhausted")
        {
            Self::RateLimited(message)
        } else if lower.contains("fetch") || lower.contains("network") {
            Self::Network(message)
        } else {
            Self::Other(message)
        }
    }
}
