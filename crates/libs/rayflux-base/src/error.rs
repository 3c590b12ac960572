//! Error type for rayflux.

use std::{
    error::Error,
    fmt::{Debug, Display, Formatter},
};

/// Custom error type for rayflux drivers and configuration.
///
/// Library components use their own `thiserror` enums; this type wraps them
/// (or I/O and parsing errors) together with a human readable context.
#[derive(Debug)]
pub struct RayfluxError {
    message: String,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl Display for RayfluxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(cause) => write!(f, "{}, caused by {}", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for RayfluxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn Error + 'static))
    }
}

impl RayfluxError {
    /// Creates a new RayfluxError.
    pub fn new<S>(message: S, source: Option<Box<dyn Error + Send + Sync>>) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            source,
        }
    }

    /// Creates a new RayfluxError from a std::io::Error.
    pub fn from_io_error<S>(err: std::io::Error, message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(message, Some(Box::new(err)))
    }

    /// Wraps any error with a context message.
    pub fn with_context<E, S>(err: E, message: S) -> Self
    where
        E: Error + Send + Sync + 'static,
        S: Into<String>,
    {
        Self::new(message, Some(Box::new(err)))
    }

    /// Returns the context message.
    pub fn message(&self) -> &str { &self.message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_cause() {
        let err = RayfluxError::from_io_error(
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            "Failed to read case file",
        );
        assert_eq!(err.to_string(), "Failed to read case file, caused by missing");
        assert!(err.source().is_some());

        let plain = RayfluxError::new("Invalid rank count", None);
        assert_eq!(plain.to_string(), "Invalid rank count");
        assert_eq!(plain.message(), "Invalid rank count");
    }
}
