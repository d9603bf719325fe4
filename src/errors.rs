use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed error detail carried as the source of the umbrella [`Error`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Cache,
    Storage,
    Queue,
    Batch,
    Featurization,
    Dispatch,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Cache => write!(f, "cache"),
            ErrorKind::Storage => write!(f, "storage"),
            ErrorKind::Queue => write!(f, "queue"),
            ErrorKind::Batch => write!(f, "batch"),
            ErrorKind::Featurization => write!(f, "featurization"),
            ErrorKind::Dispatch => write!(f, "dispatch"),
        }
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
    pub message: Option<String>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: None,
            }),
        }
    }

    pub fn with_message<E>(kind: ErrorKind, message: String, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: Some(message),
            }),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    pub fn is_storage(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Storage)
    }

    pub fn is_queue(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Queue)
    }

    pub fn is_dispatch(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Dispatch)
    }

    pub fn is_timeout(&self) -> bool {
        if matches!(self.as_dispatch(), Some(DispatchError::Timeout)) {
            return true;
        }
        if let Some(source) = &self.inner.source {
            let msg = source.to_string().to_lowercase();
            msg.contains("timeout") || msg.contains("timed out")
        } else {
            false
        }
    }

    pub fn is_connect(&self) -> bool {
        if let Some(source) = &self.inner.source {
            let msg = source.to_string().to_lowercase();
            msg.contains("connect") || msg.contains("connection")
        } else {
            false
        }
    }

    /// Dispatch detail, when this error wraps a [`DispatchError`].
    pub fn as_dispatch(&self) -> Option<&DispatchError> {
        self.inner
            .source
            .as_ref()
            .and_then(|s| s.downcast_ref::<DispatchError>())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("beacon::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref message) = self.inner.message {
            f.field("message", message);
        }
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.inner.message {
            write!(f, "{} error: {}", self.inner.kind, message)?;
        } else {
            write!(f, "{} error", self.inner.kind)?;
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

/// Failures of the disk store backing a hit queue.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create store directory: {0}")]
    CreateDir(BoxError),
    #[error("failed to persist record: {0}")]
    WriteFailed(BoxError),
    #[error("failed to read record: {0}")]
    ReadFailed(BoxError),
    #[error("failed to remove record: {0}")]
    RemoveFailed(BoxError),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("record could not be encoded: {0}")]
    EncodeFailed(BoxError),
    #[error("record could not be decoded: {0}")]
    DecodeFailed(BoxError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    ReadFailed(BoxError),
    #[error("failed to parse configuration: {0}")]
    ParseFailed(BoxError),
}

/// Network-facing failures, carrying enough detail for retry classification.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(BoxError),
    #[error("endpoint returned status {0}")]
    Status(u16),
    #[error("client construction failed: {0}")]
    Client(BoxError),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::new(ErrorKind::Storage, Some(err))
    }
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        Error::new(ErrorKind::Queue, Some(err))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::new(ErrorKind::Config, Some(err))
    }
}

impl From<DispatchError> for Error {
    fn from(err: DispatchError) -> Self {
        Error::new(ErrorKind::Dispatch, Some(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification_sees_own_dispatch_variant() {
        let err = Error::from(DispatchError::Timeout);
        assert!(err.is_timeout());
        assert!(err.is_dispatch());
        assert!(matches!(err.as_dispatch(), Some(DispatchError::Timeout)));
    }

    #[test]
    fn test_timeout_classification_matches_source_text() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "operation timed out");
        let err = Error::new(ErrorKind::Dispatch, Some(io));
        assert!(err.is_timeout());

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err = Error::new(ErrorKind::Dispatch, Some(io));
        assert!(!err.is_timeout());
        assert!(err.is_connect());
    }

    #[test]
    fn test_as_dispatch_none_for_other_sources() {
        let err: Error = QueueError::DecodeFailed("bad frame".into()).into();
        assert!(err.as_dispatch().is_none());
        assert!(!err.is_timeout());
    }
}
