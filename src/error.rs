use std::path::PathBuf;

/// Error type for sys-exporter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Filesystem error on {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind streaming listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Fan-out branch already registered: {0}")]
    DuplicateBranch(String),

    #[error("Exporter was already started")]
    AlreadyStarted,
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage { path: path.into(), source }
    }

    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub(crate) fn bind<S: Into<String>>(address: S, source: std::io::Error) -> Self {
        Error::Bind { address: address.into(), source }
    }

    /// Whether this error must terminate the exporter.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Bind { .. })
    }
}

/// Result type for sys-exporter operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_bind_is_fatal() {
        let bind = Error::bind("127.0.0.1:1", std::io::Error::from(std::io::ErrorKind::AddrInUse));
        assert!(bind.is_fatal());
        assert!(bind.to_string().contains("127.0.0.1:1"));

        let storage = Error::storage("/tmp/x", std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!storage.is_fatal());
        assert!(!Error::config("bad").is_fatal());
        assert!(!Error::AlreadyStarted.is_fatal());
    }
}
