//! # Error Handling
//!
//! Error types for the keyholder sidecar, defined with `thiserror`.
//!
//! Errors raised while publishing a credential or reloading the cached copy
//! are contained at their own boundary: callers log them and keep the
//! previous good state. Only watch-primitive failures are fatal, and those are
//! reported through the liveness probe rather than propagated.

/// Custom result type for keyholder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the keyholder sidecar
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The file-change notification primitive failed
    #[error("Watch error: {0}")]
    Watch(String),

    /// Fetching a fresh credential from the authentication service failed
    #[error("Token fetch failed: {0}")]
    TokenFetch(String),

    /// Writing to the cluster secret store failed
    #[error("Secret store error: {0}")]
    SecretStore(String),

    /// Encoding or decoding a credential failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Network transport errors (HTTP listener)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A component was used after shutdown
    #[error("Shutdown in progress: {0}")]
    Shutdown(String),

    /// The leader-election provider failed
    #[error("Leader election error: {0}")]
    Election(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Create a new watch error
    pub fn watch<S: Into<String>>(message: S) -> Self {
        Self::Watch(message.into())
    }

    /// Create a new token fetch error
    pub fn token_fetch<S: Into<String>>(message: S) -> Self {
        Self::TokenFetch(message.into())
    }

    /// Create a new secret store error
    pub fn secret_store<S: Into<String>>(message: S) -> Self {
        Self::SecretStore(message.into())
    }

    /// Create a new encoding error
    pub fn encoding<S: Into<String>>(message: S) -> Self {
        Self::Encoding(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new shutdown error
    pub fn shutdown<S: Into<String>>(message: S) -> Self {
        Self::Shutdown(message.into())
    }

    /// Create a new leader election error
    pub fn election<S: Into<String>>(message: S) -> Self {
        Self::Election(message.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Io { context: "I/O operation failed".to_string(), source }
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::SecretStore(err.to_string())
    }
}

impl From<kube_lease_manager::LeaseManagerError> for Error {
    fn from(err: kube_lease_manager::LeaseManagerError) -> Self {
        Self::Election(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::TokenFetch(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = Error::config("bad port");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Configuration error: bad port");

        let err = Error::secret_store("forbidden");
        assert_eq!(err.to_string(), "Secret store error: forbidden");

        let err = Error::watch("inotify limit reached");
        assert!(err.to_string().contains("inotify"));
    }

    #[test]
    fn test_io_error_keeps_context() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::io("reading /etc/token/accessToken", source);
        assert_eq!(err.to_string(), "I/O error: reading /etc/token/accessToken");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_lease_errors_map_to_election() {
        let err: Error = kube_lease_manager::LeaseManagerError::NonexistentLease("keyholder".to_string()).into();
        assert!(matches!(err, Error::Election(_)));
        assert!(err.to_string().contains("keyholder"));
    }
}
