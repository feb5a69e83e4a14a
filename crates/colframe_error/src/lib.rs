//! Error type shared by all colframe crates.

use std::error::Error;
use std::fmt;

/// Convenience alias, used pervasively in place of `std::result::Result`.
pub type Result<T, E = FrameError> = std::result::Result<T, E>;

/// The error type used throughout the engine.
///
/// Carries a human-readable message and an optional source error. There's
/// intentionally no error-code taxonomy here; callers that need to
/// distinguish classes of failure should do so before constructing the
/// error (configuration validation happens eagerly, I/O errors carry their
/// source).
#[derive(Debug)]
pub struct FrameError {
    msg: String,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl FrameError {
    pub fn new(msg: impl Into<String>) -> Self {
        FrameError {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn with_source<E>(msg: impl Into<String>, source: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        FrameError {
            msg: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl Error for FrameError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|s| s.as_ref() as _)
    }
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::with_source("IO error", err)
    }
}

/// Extension trait for attaching context to foreign errors.
pub trait ResultExt<T, E> {
    /// Wrap the error with a static context message.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap the error with a lazily computed context message.
    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T, E> for Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| FrameError::with_source(msg, e))
    }

    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| FrameError::with_source(f(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = FrameError::with_source("failed to read block", io);
        let s = err.to_string();
        assert!(s.contains("failed to read block"));
        assert!(s.contains("disk gone"));
    }

    #[test]
    fn context_wraps() {
        let res: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "nope"));
        let err = res.context("opening segment").unwrap_err();
        assert!(err.to_string().starts_with("opening segment"));
    }
}
