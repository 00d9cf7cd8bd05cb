//! Fluent request builder.
//!
//! # Design
//! A `Request` only accumulates configuration; nothing touches the network
//! or opens a body until `execute`. Execution is a fixed sequence: resolve
//! the URL, open the body, build the wire request, pick the client, call
//! the transport, hand the response to the handler, close the body. The
//! first failing step ends it and its error is returned unchanged.
//!
//! The builder borrows a handler's destination for `'a`; it is usable again
//! once `execute` returns.
//!
//! ```no_run
//! use request_core::{Context, Request};
//!
//! let mut item = String::new();
//! Request::get("https://example.com")
//!     .path("/items/{id}")
//!     .param("id", "42")
//!     .into_string(&mut item)
//!     .execute(&Context::background())?;
//! println!("{item}");
//! # Ok::<(), request_core::RequestError>(())
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::body::BodyProvider;
use crate::client::{Client, Transport};
use crate::context::Context;
use crate::error::{RequestError, Result};
use crate::handler::{
    BufReaderFn, Discard, IntoBuffer, IntoJson, IntoString, IntoWriter, ResponseHandler,
};
use crate::http::{HttpMethod, HttpRequest};
use crate::resolve::resolve_url;
use crate::types::PathParam;

pub struct Request<'a> {
    method: HttpMethod,
    base_url: String,
    path: String,
    path_params: HashMap<String, String>,
    // Keyed by lower-case name.
    headers: BTreeMap<String, String>,
    body: Option<Arc<dyn BodyProvider>>,
    handler: Option<Box<dyn ResponseHandler + 'a>>,
    client: Option<Client>,
    transport: Option<Arc<dyn Transport>>,
}

impl<'a> Request<'a> {
    pub fn new(method: HttpMethod, base_url: impl Into<String>) -> Self {
        Self {
            method,
            base_url: base_url.into(),
            path: String::new(),
            path_params: HashMap::new(),
            headers: BTreeMap::new(),
            body: None,
            handler: None,
            client: None,
            transport: None,
        }
    }

    pub fn get(base_url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, base_url)
    }

    pub fn head(base_url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Head, base_url)
    }

    pub fn post(base_url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, base_url)
    }

    pub fn put(base_url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, base_url)
    }

    pub fn patch(base_url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, base_url)
    }

    pub fn delete(base_url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, base_url)
    }

    /// Set the URI template, replacing any earlier one. Parameters already
    /// added are kept.
    pub fn path(mut self, template: impl Into<String>) -> Self {
        self.path = template.into();
        self
    }

    /// Add a template parameter; a repeated name takes the latest value.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Add template parameters in order, as if by repeated `param` calls.
    pub fn params<I, P>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathParam>,
    {
        for param in params {
            let PathParam { name, value } = param.into();
            self.path_params.insert(name, value);
        }
        self
    }

    /// Set a header, replacing any earlier value for the same name
    /// (compared case-insensitively).
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Attach a body. The method is left as configured.
    pub fn body(mut self, provider: impl BodyProvider + 'static) -> Self {
        self.body = Some(Arc::new(provider));
        self
    }

    pub fn handler(mut self, handler: impl ResponseHandler + 'a) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Decode the response body as JSON into `dest`.
    pub fn into_json<T: DeserializeOwned>(self, dest: &'a mut T) -> Self {
        self.handler(IntoJson(dest))
    }

    pub fn into_string(self, dest: &'a mut String) -> Self {
        self.handler(IntoString(dest))
    }

    pub fn into_writer<W: Write + 'a>(self, writer: W) -> Self {
        self.handler(IntoWriter(writer))
    }

    pub fn into_buffer(self, buf: &'a mut Vec<u8>) -> Self {
        self.handler(IntoBuffer(buf))
    }

    /// Hand a buffered reader over the response body to `f`.
    pub fn into_buf_reader<F>(self, f: F) -> Self
    where
        F: FnOnce(&mut dyn BufRead) -> io::Result<()> + 'a,
    {
        self.handler(BufReaderFn::new(f))
    }

    /// Execute on `client` instead of `Client::shared()`.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Execute on a copy of the chosen client that uses `transport`.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Materialise the wire-level request.
    pub fn build(&self, ctx: &Context) -> Result<HttpRequest> {
        let url = resolve_url(&self.base_url, &self.path, &self.path_params)?;

        let body = match &self.body {
            Some(provider) => Some(provider.open()?),
            None => None,
        };

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(RequestError::InvalidRequest(format!(
                "{} {url}: only absolute http(s) urls can be requested",
                self.method
            )));
        }

        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        for (name, value) in &self.headers {
            ::http::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| RequestError::InvalidRequest(format!("invalid header name {name:?}")))?;
            ::http::HeaderValue::from_str(value).map_err(|_| {
                RequestError::InvalidRequest(format!("invalid value for header {name:?}"))
            })?;
            headers.push((name.clone(), value.clone()));
        }
        if !self.headers.contains_key("content-type") {
            if let Some(content_type) = self.body.as_ref().and_then(|p| p.content_type()) {
                headers.push(("content-type".to_string(), content_type.to_string()));
            }
        }

        Ok(HttpRequest {
            method: self.method,
            url,
            headers,
            body,
            get_body: self.body.clone(),
            timeout: ctx.remaining(),
        })
    }

    /// Build, send and handle the request.
    ///
    /// `ctx` bounds the whole exchange, body included. A handler that fails
    /// after the context ended reports the context's error.
    pub fn execute(mut self, ctx: &Context) -> Result<()> {
        let request = self.build(ctx)?;
        let client = self.effective_client();

        tracing::debug!(method = %request.method, url = %request.url, "sending request");
        let mut res = client.call(ctx, request)?;
        tracing::debug!(status = res.status, "received response");

        let outcome = match self.handler.as_mut() {
            Some(handler) => handler.handle(&mut res),
            None => Discard.handle(&mut res),
        };
        res.body.close();
        outcome.map_err(|err| ctx.err().unwrap_or(err))
    }

    fn effective_client(&self) -> Client {
        let base = match &self.client {
            Some(client) => client.clone(),
            None => Client::shared().clone(),
        };
        match &self.transport {
            Some(transport) => base.replace_transport(Arc::clone(transport)),
            None => base,
        }
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("base_url", &self.base_url)
            .field("path", &self.path)
            .field("path_params", &self.path_params)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .field("has_handler", &self.handler.is_some())
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
