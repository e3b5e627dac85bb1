use getset::Getters;
use strum_macros::Display;

/// Broad classification of client failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The HTTP request to the mapping provider failed to execute.
    Request,
    /// The provider answered with a non-success status.
    Status,
    /// The provider answered, but the body could not be decoded.
    Decode,
    /// The durable key-value store failed.
    Storage,
}

/// Error type shared by the gateway, cache, and storage layers.
///
/// Carries its context as owned strings so one failure can be cloned out to
/// every caller attached to the same in-flight computation.
#[derive(Debug, Clone, thiserror::Error, Getters)]
#[error("{kind}: {message}")]
#[get = "pub"]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Request, message)
    }

    pub fn status(status: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::Status, format!("unexpected status {}", status))
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let error = Error::storage("quota exceeded");
        assert_eq!(error.to_string(), "storage: quota exceeded");
        assert!(error.is_kind(ErrorKind::Storage));
    }
}
