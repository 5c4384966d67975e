//! Error types for the admission webhook.
//!
//! Everything here is a startup-time failure: per-request problems are
//! turned into admission responses and never surface as `Error`.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for webhook startup and serving
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The authentication ConfigMap exists but lacks the CA entry
    #[error("ConfigMap {namespace}/{name} has no {key} entry")]
    MissingClientCa {
        namespace: String,
        name: String,
        key: String,
    },

    /// The CA bundle contained no certificates
    #[error("client CA bundle contains no certificates")]
    EmptyClientCa,

    /// A certificate or key file could not be read
    #[error("cannot read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// PEM content could not be parsed
    #[error("invalid PEM in {what}: {message}")]
    Pem { what: String, message: String },

    /// Certificate and private key do not belong together
    #[error("certificate and key do not match: {0}")]
    KeyMismatch(String),

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Invalid process configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Server error
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}

/// Result type alias for webhook operations
pub type Result<T> = std::result::Result<T, Error>;
