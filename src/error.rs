//! Unified error types.

use thiserror::Error;

/// The error type returned by bulwark's fallible startup operations.
///
/// Request-level failures (401, 403, 404, ...) are expressed as HTTP
/// [`Response`](crate::Response) values produced by an
/// [`ErrorHandler`](crate::middleware::ErrorHandler), not as `Error`s. This
/// type surfaces infrastructure failures: binding a port, accepting a
/// connection, or a middleware that was configured wrongly.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A middleware configuration that cannot be turned into a working policy.
///
/// Raised once, when the middleware is constructed. A server that gets one of
/// these should refuse to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("lookup is empty")]
    EmptyLookup,

    #[error("lookup entry `{entry}` could not be split into `<source>:<name>`")]
    MalformedLookup { entry: String },

    #[error("lookup entry `{entry}` uses unknown source `{source_name}`")]
    UnknownSource { entry: String, source_name: String },

    #[error("`{name}` is not a valid header name")]
    InvalidHeaderName { name: String },

    #[error("allowed origin `{pattern}` cannot be compiled")]
    InvalidOriginPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unsupported jwt signing method `{0}`")]
    UnsupportedAlgorithm(String),

    #[error("jwt middleware requires a signing key, a key map or a parse function")]
    MissingSigningKey,
}
