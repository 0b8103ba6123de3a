//! Error handling for hrm-stream
//!
//! This module defines the crate error type and a Result alias. Only a few
//! operations return errors to callers (launching the helper, loading config,
//! opening the CSV file); faults inside a running ingestion session are
//! reported through [`crate::ingest::IngestEvent`] instead.

use thiserror::Error;

/// Main error type for hrm-stream operations
#[derive(Error, Debug)]
pub enum HrmError {
    /// The helper process (or its reader thread) could not be started
    #[error("Failed to launch helper `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to the persistence sink
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<HrmError>,
    },
}

impl HrmError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        HrmError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a launch error for the given command line
    pub fn launch(command: impl Into<String>, source: std::io::Error) -> Self {
        HrmError::Launch {
            command: command.into(),
            source,
        }
    }

    /// Whether this error (or the error it wraps) is a launch failure
    pub fn is_launch(&self) -> bool {
        match self {
            HrmError::Launch { .. } => true,
            HrmError::WithContext { source, .. } => source.is_launch(),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for HrmError {
    fn from(err: toml::de::Error) -> Self {
        HrmError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for HrmError {
    fn from(err: toml::ser::Error) -> Self {
        HrmError::Serialization(err.to_string())
    }
}

/// Result type alias for hrm-stream operations
pub type Result<T> = std::result::Result<T, HrmError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| HrmError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| HrmError::Io(e).with_context(f()))
    }
}
