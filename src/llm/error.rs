use thiserror::Error;

/// Failure reported by an inference provider
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::new(
            ProviderErrorKind::Http,
            format!("HTTP {}: {}", status, body.into()),
        )
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Decode, message)
    }

    pub fn invalid_handle(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidHandle, message)
    }

    pub fn panicked() -> Self {
        Self::new(ProviderErrorKind::Panicked, "provider panicked mid-request")
    }

    pub fn scripted(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Scripted, message)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::decode(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

/// Error classification, used for logging only: nothing retries automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Connection failures, dropped bodies
    Network,
    /// Non-success status from the hub or inference endpoint
    Http,
    /// Body was not what we expected
    Decode,
    /// Handle passed to a provider that did not create it
    InvalidHandle,
    /// The provider future panicked
    Panicked,
    /// Failure queued on a scripted provider
    Scripted,
}
