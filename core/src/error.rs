//! Error types for request assembly and execution.
//!
//! # Design
//! Each stage of the pipeline keeps its own variant so callers can tell a
//! configuration mistake from a network failure from an application-level
//! rejection. Nothing is retried or folded into a catch-all: `execute`
//! returns the first failure it meets, unchanged.

use std::io;

use crate::body::BodyError;
use crate::client::TransportError;
use crate::uritemplate::TemplateError;

pub type Result<T, E = RequestError> = std::result::Result<T, E>;

/// Errors returned by `Request::build` and `Request::execute`.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The base URL, the expanded path, or their combination is not a valid URL.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The path template could not be expanded.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A path parameter value has no string form.
    #[error("path parameter {name:?}: {reason}")]
    PathParam { name: String, reason: String },

    /// The body provider failed to produce a stream.
    #[error("request body: {0}")]
    Body(#[from] BodyError),

    /// The wire-level request could not be constructed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The transport failed to complete the exchange.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The execution context was cancelled before the response arrived.
    #[error("request canceled")]
    Canceled,

    /// The execution context's deadline passed before the response arrived.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The response status is not one of the accepted codes.
    #[error("unexpected status: {status}")]
    UnexpectedStatus { status: u16 },

    /// The response body could not be decoded into the destination type.
    #[error("decode response: {0}")]
    Decode(#[source] serde_json::Error),

    /// Reading the response body or writing it to its destination failed.
    #[error("read response: {0}")]
    Io(#[from] io::Error),
}
