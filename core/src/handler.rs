//! Response handlers: validate, decode, or drain a completed response.
//!
//! # Design
//! A handler receives the response by mutable reference and owns the job
//! of consuming its body. The request closes the body after the handler
//! returns, whatever the outcome. Handlers that fill a caller-owned
//! destination (`IntoJson`, `IntoString`) decode into a temporary first and
//! only assign on success; `IntoBuffer` and `IntoWriter` stream as they go.
//!
//! A request carries a single handler. Use `ResponseHandlerExt::then` to
//! run several in sequence.

use std::io::{self, BufRead, BufReader, Read, Write};

use serde::de::DeserializeOwned;

use crate::error::{RequestError, Result};
use crate::http::HttpResponse;

/// Bytes `Discard` will drain so the connection can be reused.
pub const MAX_DISCARD_SIZE: u64 = 640 * 1024;

pub trait ResponseHandler {
    fn handle(&mut self, res: &mut HttpResponse) -> Result<()>;
}

impl<F> ResponseHandler for F
where
    F: FnMut(&mut HttpResponse) -> Result<()>,
{
    fn handle(&mut self, res: &mut HttpResponse) -> Result<()> {
        self(res)
    }
}

pub trait ResponseHandlerExt: ResponseHandler + Sized {
    /// Run `self`, then `next` if `self` succeeded.
    fn then<H: ResponseHandler>(self, next: H) -> Chain<Self, H> {
        Chain(self, next)
    }
}

impl<H: ResponseHandler> ResponseHandlerExt for H {}

/// Two handlers run in order; the first error stops the chain.
#[derive(Debug)]
pub struct Chain<A, B>(A, B);

impl<A: ResponseHandler, B: ResponseHandler> ResponseHandler for Chain<A, B> {
    fn handle(&mut self, res: &mut HttpResponse) -> Result<()> {
        self.0.handle(res)?;
        self.1.handle(res)
    }
}

/// Decode the body as JSON into the destination.
#[derive(Debug)]
pub struct IntoJson<'a, T>(pub &'a mut T);

impl<T: DeserializeOwned> ResponseHandler for IntoJson<'_, T> {
    fn handle(&mut self, res: &mut HttpResponse) -> Result<()> {
        let value = decode_json(&mut res.body)?;
        *self.0 = value;
        Ok(())
    }
}

/// Append the whole body to a byte buffer.
#[derive(Debug)]
pub struct IntoBuffer<'a>(pub &'a mut Vec<u8>);

impl ResponseHandler for IntoBuffer<'_> {
    fn handle(&mut self, res: &mut HttpResponse) -> Result<()> {
        res.body.read_to_end(self.0)?;
        Ok(())
    }
}

/// Replace the string with the body. Left untouched on failure, including
/// when the body is not valid UTF-8.
#[derive(Debug)]
pub struct IntoString<'a>(pub &'a mut String);

impl ResponseHandler for IntoString<'_> {
    fn handle(&mut self, res: &mut HttpResponse) -> Result<()> {
        let mut buf = String::new();
        res.body.read_to_string(&mut buf)?;
        *self.0 = buf;
        Ok(())
    }
}

/// Copy the body into a writer.
#[derive(Debug)]
pub struct IntoWriter<W>(pub W);

impl<W: Write> ResponseHandler for IntoWriter<W> {
    fn handle(&mut self, res: &mut HttpResponse) -> Result<()> {
        let mut reader = BufReader::new(&mut res.body);
        io::copy(&mut reader, &mut self.0)?;
        self.0.flush()?;
        Ok(())
    }
}

/// Hand a buffered reader over the body to a callback, for callers that
/// consume the body incrementally.
pub struct BufReaderFn<F>(Option<F>);

impl<F> BufReaderFn<F>
where
    F: FnOnce(&mut dyn BufRead) -> io::Result<()>,
{
    pub fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F> ResponseHandler for BufReaderFn<F>
where
    F: FnOnce(&mut dyn BufRead) -> io::Result<()>,
{
    fn handle(&mut self, res: &mut HttpResponse) -> Result<()> {
        let f = self
            .0
            .take()
            .ok_or_else(|| io::Error::other("response callback already ran"))?;
        let mut reader = BufReader::new(&mut res.body);
        f(&mut reader)?;
        Ok(())
    }
}

/// Accept only the listed status codes.
///
/// On any other status the body, when present and a destination was given,
/// is decoded as a JSON error payload into that destination, and the
/// handler returns `RequestError::UnexpectedStatus` either way. The payload
/// decode is best effort: a malformed payload leaves the destination as it
/// was.
#[derive(Debug)]
pub struct CheckStatus<'a, T> {
    error_payload: Option<&'a mut T>,
    accept: Vec<u16>,
}

impl<'a, T: DeserializeOwned> CheckStatus<'a, T> {
    pub fn new(error_payload: &'a mut T, accept: impl IntoIterator<Item = u16>) -> Self {
        Self {
            error_payload: Some(error_payload),
            accept: accept.into_iter().collect(),
        }
    }
}

impl CheckStatus<'static, serde_json::Value> {
    /// Status check without an error payload destination.
    pub fn only(accept: impl IntoIterator<Item = u16>) -> Self {
        Self {
            error_payload: None,
            accept: accept.into_iter().collect(),
        }
    }
}

impl<T: DeserializeOwned> ResponseHandler for CheckStatus<'_, T> {
    fn handle(&mut self, res: &mut HttpResponse) -> Result<()> {
        if self.accept.contains(&res.status) {
            return Ok(());
        }
        let status = res.status;
        let Some(dest) = self.error_payload.as_deref_mut() else {
            return Err(RequestError::UnexpectedStatus { status });
        };

        let mut data = Vec::new();
        res.body.read_to_end(&mut data)?;
        if !data.is_empty() {
            match serde_json::from_slice(&data) {
                Ok(payload) => *dest = payload,
                Err(err) => tracing::debug!(status, error = %err, "error payload is not valid JSON"),
            }
        }
        Err(RequestError::UnexpectedStatus { status })
    }
}

/// Drain up to `MAX_DISCARD_SIZE` bytes and drop the rest. Used when a
/// request has no handler of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl ResponseHandler for Discard {
    fn handle(&mut self, res: &mut HttpResponse) -> Result<()> {
        let n = io::copy(&mut (&mut res.body).take(MAX_DISCARD_SIZE), &mut io::sink())?;
        tracing::trace!(bytes = n, "discarded response body");
        Ok(())
    }
}

/// Decode the first JSON value in the body. Anything after it is left
/// unread.
fn decode_json<T: DeserializeOwned>(body: &mut impl Read) -> Result<T> {
    let first = serde_json::Deserializer::from_reader(body)
        .into_iter::<T>()
        .next()
        .unwrap_or_else(|| Err(serde::de::Error::custom("empty response body")));
    first.map_err(|err| {
        if err.is_io() {
            RequestError::Io(err.into())
        } else {
            RequestError::Decode(err)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use serde::Deserialize;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse::new(status, Body::from_bytes(body.as_bytes().to_vec()))
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct ApiError {
        code: u16,
        message: String,
    }

    #[test]
    fn into_json_decodes_body() {
        let mut value = serde_json::Value::Null;
        IntoJson(&mut value)
            .handle(&mut response(200, r#"{"a":1}"#))
            .unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn into_json_leaves_destination_on_malformed_body() {
        let mut value = vec![1u32, 2];
        let err = IntoJson(&mut value)
            .handle(&mut response(200, "[1, 2"))
            .unwrap_err();
        assert!(matches!(err, RequestError::Decode(_)));
        assert_eq!(value, vec![1, 2]);
    }

    #[test]
    fn into_json_stops_after_the_first_value() {
        let mut value = serde_json::Value::Null;
        IntoJson(&mut value)
            .handle(&mut response(200, "{\"a\":1}\n{\"b\":2} trailing"))
            .unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
    }

    #[test]
    fn into_json_rejects_an_empty_body() {
        let mut value = 7u8;
        let err = IntoJson(&mut value).handle(&mut response(200, "")).unwrap_err();
        assert!(matches!(err, RequestError::Decode(_)));
        assert_eq!(value, 7);
    }

    #[test]
    fn into_string_replaces_only_on_success() {
        let mut s = "old".to_string();
        IntoString(&mut s).handle(&mut response(200, "new")).unwrap();
        assert_eq!(s, "new");

        let mut bad = HttpResponse::new(200, Body::from_bytes(vec![0xff, 0xfe]));
        let err = IntoString(&mut s).handle(&mut bad).unwrap_err();
        assert!(matches!(err, RequestError::Io(_)));
        assert_eq!(s, "new");
    }

    #[test]
    fn into_buffer_appends() {
        let mut buf = b"x".to_vec();
        IntoBuffer(&mut buf).handle(&mut response(200, "yz")).unwrap();
        assert_eq!(buf, b"xyz");
    }

    #[test]
    fn into_writer_copies_everything() {
        let mut out = Vec::new();
        IntoWriter(&mut out)
            .handle(&mut response(200, "streamed"))
            .unwrap();
        assert_eq!(out, b"streamed");
    }

    #[test]
    fn buf_reader_callback_can_stop_early() {
        let mut first = String::new();
        BufReaderFn::new(|r: &mut dyn BufRead| r.read_line(&mut first).map(|_| ()))
            .handle(&mut response(200, "one\ntwo\n"))
            .unwrap();
        assert_eq!(first, "one\n");
    }

    #[test]
    fn buf_reader_callback_error_is_propagated() {
        let err = BufReaderFn::new(|_: &mut dyn BufRead| Err(io::Error::other("nope")))
            .handle(&mut response(200, ""))
            .unwrap_err();
        assert!(matches!(err, RequestError::Io(_)));
    }

    #[test]
    fn check_status_accepts_listed_codes_without_touching_destination() {
        let mut payload = ApiError::default();
        CheckStatus::new(&mut payload, [200, 201])
            .handle(&mut response(200, r#"{"code":1,"message":"ignored"}"#))
            .unwrap();
        assert_eq!(payload, ApiError::default());
    }

    #[test]
    fn check_status_decodes_error_payload_and_fails() {
        let mut payload = ApiError::default();
        let err = CheckStatus::new(&mut payload, [200, 201])
            .handle(&mut response(404, r#"{"code":404,"message":"item not found"}"#))
            .unwrap_err();
        assert!(matches!(err, RequestError::UnexpectedStatus { status: 404 }));
        assert_eq!(
            payload,
            ApiError {
                code: 404,
                message: "item not found".to_string()
            }
        );
    }

    #[test]
    fn check_status_without_destination_or_body_is_generic() {
        let err = CheckStatus::only([200])
            .handle(&mut response(500, "boom"))
            .unwrap_err();
        assert!(matches!(err, RequestError::UnexpectedStatus { status: 500 }));

        let mut payload = ApiError::default();
        let err = CheckStatus::new(&mut payload, [200])
            .handle(&mut response(503, ""))
            .unwrap_err();
        assert!(matches!(err, RequestError::UnexpectedStatus { status: 503 }));
        assert_eq!(payload, ApiError::default());
    }

    #[test]
    fn chain_stops_at_first_error() {
        let mut payload = ApiError::default();
        let mut out = String::from("untouched");
        let err = CheckStatus::new(&mut payload, [200])
            .then(IntoString(&mut out))
            .handle(&mut response(400, r#"{"code":400,"message":"bad"}"#))
            .unwrap_err();
        assert!(matches!(err, RequestError::UnexpectedStatus { status: 400 }));
        assert_eq!(out, "untouched");
        assert_eq!(payload.message, "bad");
    }

    #[test]
    fn chain_runs_both_on_success() {
        let mut out = String::new();
        CheckStatus::only([200])
            .then(IntoString(&mut out))
            .handle(&mut response(200, "ok"))
            .unwrap();
        assert_eq!(out, "ok");
    }

    #[test]
    fn discard_accepts_bodies_up_to_and_beyond_the_cap() {
        let small = "x".repeat(1024);
        Discard.handle(&mut response(200, &small)).unwrap();

        let big = vec![b'y'; (MAX_DISCARD_SIZE as usize) * 2];
        let mut res = HttpResponse::new(200, Body::from_bytes(big));
        Discard.handle(&mut res).unwrap();
        // Only the cap was drained.
        let mut rest = Vec::new();
        res.body.read_to_end(&mut rest).unwrap();
        assert_eq!(rest.len() as u64, MAX_DISCARD_SIZE);
    }

    #[test]
    fn closures_are_handlers() {
        let mut seen = 0;
        let mut h = |res: &mut HttpResponse| -> Result<()> {
            seen = res.status;
            Ok(())
        };
        h.handle(&mut response(204, "")).unwrap();
        assert_eq!(seen, 204);
    }
}
