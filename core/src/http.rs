//! Wire-level request and response values exchanged with a `Transport`.
//!
//! # Design
//! These types describe an HTTP exchange as plain owned data plus a body
//! stream. `Request::build` materialises an `HttpRequest`; a `Transport`
//! turns it into an `HttpResponse`; a `ResponseHandler` consumes that.
//! Headers stay as ordered `(name, value)` pairs with lower-case names, so
//! values can be inspected in tests without pulling in a header map type.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::body::{Body, BodyProvider};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request, ready to hand to a `Transport`.
///
/// `body` is the stream for the first attempt. `get_body` re-opens an
/// identical stream so a transport can replay the body, e.g. on a 307.
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    pub get_body: Option<Arc<dyn BodyProvider>>,
    /// Time left on the execution context, if it carries a deadline.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("replayable", &self.get_body.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A response as returned by a `Transport`. Dropping it closes the body.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl HttpResponse {
    pub fn new(status: u16, body: Body) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'h>(headers: &'h [(String, String)], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_tokens_are_upper_case() {
        let all = [
            (HttpMethod::Get, "GET"),
            (HttpMethod::Head, "HEAD"),
            (HttpMethod::Post, "POST"),
            (HttpMethod::Put, "PUT"),
            (HttpMethod::Patch, "PATCH"),
            (HttpMethod::Delete, "DELETE"),
        ];
        for (method, token) in all {
            assert_eq!(method.as_str(), token);
            assert_eq!(method.to_string(), token);
        }
    }

    #[test]
    fn response_header_lookup_ignores_case() {
        let mut res = HttpResponse::new(200, Body::empty());
        res.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.header("CONTENT-TYPE"), Some("application/json"));
        assert!(res.header("location").is_none());
    }
}
