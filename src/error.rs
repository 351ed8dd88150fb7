//! Error types for the test environment

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for test environment operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error (transport, or a structured Status response)
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Cluster connection could not be established from the given settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A resource file with an extension the loader does not understand
    #[error("unsupported file extension: {}", path.display())]
    UnsupportedInput {
        /// Offending file name as given on the command line
        path: PathBuf,
    },

    /// A manifest file could not be parsed into resource documents
    #[error("invalid manifest {}: {message}", path.display())]
    Manifest {
        /// Manifest file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A watched or submitted object is missing a field the harness requires
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Malformed input such as an unparseable watch path
    #[error("validation error: {0}")]
    Validation(String),

    /// A procedural source selected a scenario module that is not compiled in
    #[error("no scenario module named '{name}'")]
    ScenarioNotFound {
        /// Module name derived from the file stem
        name: String,
    },

    /// A scenario leaf action failed
    #[error("scenario '{name}' failed: {message}")]
    Scenario {
        /// Leaf name
        name: String,
        /// Failure description
        message: String,
    },

    /// Filesystem error while reading resource files
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File or directory being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Conversion between typed and dynamic objects failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid object error with the given message
    pub fn invalid_object(msg: impl Into<String>) -> Self {
        Self::InvalidObject(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a scenario failure for the named leaf
    pub fn scenario(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Scenario {
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Attach a path to an I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the API server answered with a structured `Status` body.
    ///
    /// These are the benign conflicts (already exists, forbidden, invalid)
    /// the loader logs and skips. Everything else is fatal.
    ///
    /// kube also reports unparseable error bodies (a proxy's 502 page, an
    /// empty body) as `Error::Api`, with the HTTP status line in place of the
    /// `Status` object's `status` field; those are not status errors.
    pub fn is_status(&self) -> bool {
        self.status_response().is_some()
    }

    fn status_response(&self) -> Option<&kube::error::ErrorResponse> {
        match self {
            Error::Kube(kube::Error::Api(resp))
                if STATUS_OUTCOMES.contains(&resp.status.as_str()) =>
            {
                Some(resp)
            }
            _ => None,
        }
    }

    /// Message from the `Status` body, if this is a status error
    pub fn status_message(&self) -> Option<&str> {
        self.status_response().map(|resp| resp.message.as_str())
    }

    /// HTTP code from the `Status` body, if this is a status error
    pub fn status_code(&self) -> Option<u16> {
        self.status_response().map(|resp| resp.code)
    }
}

/// Values of `Status.status` sent by the API server
const STATUS_OUTCOMES: &[&str] = &["Failure", "Success"];

#[cfg(test)]
pub(crate) fn status_error(code: u16, reason: &str, message: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    }))
}
