//! # Error Handling
//!
//! This module provides error handling for the sealkeeper operator.
//! It defines the crate-wide error type using `thiserror`.

/// Custom result type for sealkeeper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sealkeeper operator
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Peer discovery errors (no endpoints object, no owning deployment)
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Bearer token authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Network transport errors (peer push/pull, HTTP listener)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Kubernetes API errors
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Vault API errors
    #[error("Vault error: {0}")]
    Vault(#[from] vaultrs::error::ClientError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new discovery error
    pub fn discovery<S: Into<String>>(message: S) -> Self {
        Self::Discovery(message.into())
    }

    /// Create a new authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_map_to_variants() {
        assert!(matches!(Error::config("x"), Error::Config(_)));
        assert!(matches!(Error::discovery("x"), Error::Discovery(_)));
        assert!(matches!(Error::auth("x"), Error::Auth(_)));
        assert!(matches!(Error::transport("x"), Error::Transport(_)));
    }

    #[test]
    fn display_includes_context() {
        let err = Error::discovery("could not find a service endpoint");
        assert_eq!(err.to_string(), "Discovery error: could not find a service endpoint");
    }
}
