//! Fluent, synchronous HTTP request builder.
//!
//! # Overview
//! A `Request` names a method, a base URL and an RFC 6570 path template with
//! its parameters, plus optional headers, a body provider and a response
//! handler. `execute` turns that into an `HttpRequest`, sends it through a
//! `Client`'s `Transport` under a `Context`, and lets the handler consume the
//! `HttpResponse`.
//!
//! # Design
//! - Bodies are described by `BodyProvider`s and opened lazily, once per
//!   attempt, so a transport can replay them on redirects.
//! - Response handling is a `ResponseHandler` trait; handlers compose with
//!   `ResponseHandlerExt::then`.
//! - `Transport` is the only I/O boundary. `UreqTransport` is the default;
//!   tests plug in closures.
//! - Errors carry their kind (`RequestError`) so callers can tell URL, body,
//!   transport, cancellation and handler failures apart.

pub mod body;
pub mod client;
pub mod context;
pub mod error;
pub mod handler;
pub mod http;
pub mod pipe;
pub mod request;
pub mod resolve;
pub mod types;
pub mod uritemplate;

pub use body::{Body, BodyError, BodyProvider};
pub use client::{Client, ClientConfig, Transport, TransportError, UreqTransport};
pub use context::{CancelHandle, Context};
pub use error::{RequestError, Result};
pub use handler::{CheckStatus, ResponseHandler, ResponseHandlerExt};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use request::Request;
pub use resolve::resolve_url;
pub use types::PathParam;
pub use uritemplate::{Template, TemplateError};
