//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

/// Errors that can occur while provisioning or using a remote sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// No credentials configured for the provisioning service.
    #[error("DAYTONA_API_KEY is not set. Please set the environment variable to use Daytona sandboxes.")]
    MissingCredentials,

    /// Sandbox was created or attached but does not expose a required capability.
    #[error("Sandbox {id} is not fully initialized: {missing} capability unavailable")]
    NotInitialized { id: String, missing: &'static str },

    /// Sandbox does not exist (expired or deleted upstream).
    #[error("Sandbox not found: {id}")]
    NotFound { id: String },

    /// Provider API returned an error response.
    #[error("Sandbox API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Request to the provider failed before a response arrived.
    #[error("Sandbox API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Local Docker backend failed.
    #[error("Docker operation failed: {message}")]
    Docker { message: String },
}

impl SandboxError {
    /// Creates a `NotInitialized` error.
    pub fn not_initialized(id: impl Into<String>, missing: &'static str) -> Self {
        Self::NotInitialized {
            id: id.into(),
            missing,
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an `Api` error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Creates a `Docker` error.
    pub fn docker(message: impl Into<String>) -> Self {
        Self::Docker {
            message: message.into(),
        }
    }

    /// Returns true if the sandbox no longer exists upstream.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for configuration errors that must never be retried.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingCredentials)
    }
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::NotFound { id: message },
            other => Self::docker(other.to_string()),
        }
    }
}
