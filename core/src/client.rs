//! HTTP client handle, pluggable transports, and the default ureq transport.
//!
//! # Design
//! `Client` is a cheap-to-clone handle around an `Arc<dyn Transport>` and
//! has no setters: overriding the transport for one request produces a
//! shallow copy (`replace_transport`), so a client shared between threads,
//! including `Client::shared()`, is never changed underneath its users.
//!
//! `UreqTransport` turns ureq's own redirect handling off and follows
//! redirects itself so that 307/308 can replay the request body through the
//! request's body provider.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use serde::Deserialize;
use url::Url;

use crate::body::{Body, BodyError};
use crate::context::Context;
use crate::error::Result;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::pipe::{pipe, PipeWriter};

/// Errors raised by a `Transport`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport: {0}")]
    Ureq(#[from] ureq::Error),

    #[error("build wire request: {0}")]
    Http(#[from] ::http::Error),

    #[error("transport i/o: {0}")]
    Io(#[from] io::Error),

    #[error("stopped after {0} redirects")]
    TooManyRedirects(u32),

    #[error("invalid redirect location {0:?}")]
    InvalidRedirect(String),

    #[error("replay request body: {0}")]
    ReplayBody(#[source] BodyError),

    #[error("{0}")]
    Other(String),
}

/// Performs one HTTP exchange.
pub trait Transport: Send + Sync {
    fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<F> Transport for F
where
    F: Fn(HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync,
{
    fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self(request)
    }
}

/// Settings for the default transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Whole-exchange timeout in milliseconds; `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_redirects: u32,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            connect_timeout_ms: Some(30_000),
            max_redirects: 10,
            user_agent: concat!("request-core/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

/// Handle used to execute requests.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
}

impl Client {
    /// A client on the default ureq transport.
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_transport(UreqTransport::new(config))
    }

    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn with_shared_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The process-wide client used by requests that do not pick their own.
    /// Built with `ClientConfig::default()` on first use and never modified.
    pub fn shared() -> &'static Client {
        static SHARED: OnceLock<Client> = OnceLock::new();
        SHARED.get_or_init(|| Client::new(&ClientConfig::default()))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Shallow copy of this client with a different transport.
    pub fn replace_transport(&self, transport: Arc<dyn Transport>) -> Client {
        let mut copy = self.clone();
        copy.transport = transport;
        copy
    }

    /// Run `request` on this client's transport, bounded by `ctx`.
    ///
    /// With a cancellable or deadline-bound context the exchange runs on a
    /// worker thread so the caller can return as soon as the context ends; a
    /// response that arrives after that is dropped, closing its body. The
    /// returned body stays bound to `ctx`: once the context ends, reads
    /// fail instead of waiting on the server.
    pub fn call(&self, ctx: &Context, request: HttpRequest) -> Result<HttpResponse> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if !ctx.is_bounded() {
            return Ok(self.transport.round_trip(request)?);
        }

        let (tx, rx) = bounded(1);
        let transport = Arc::clone(&self.transport);
        thread::Builder::new()
            .name("request-call".to_string())
            .spawn(move || {
                let _ = tx.send(transport.round_trip(request));
            })
            .map_err(TransportError::Io)?;

        match ctx.wait(&rx)? {
            Some(outcome) => bind_body(ctx, outcome?),
            None => Err(TransportError::Other("transport worker exited without a response".to_string()).into()),
        }
    }
}

/// Move the response body behind a pipe fed by its own thread, so a read
/// waiting on a slow or silent server still ends with the context.
fn bind_body(ctx: &Context, res: HttpResponse) -> Result<HttpResponse> {
    let HttpResponse {
        status,
        headers,
        body,
    } = res;
    let len = body.content_length();
    let (reader, writer) = pipe();
    thread::Builder::new()
        .name("response-body".to_string())
        .spawn(move || pump(body, writer))
        .map_err(TransportError::Io)?;

    let body = Body::new(reader.bounded_by(ctx.clone()));
    Ok(HttpResponse {
        status,
        headers,
        body: match len {
            Some(len) => body.with_len(len),
            None => body,
        },
    })
}

fn pump(mut body: Body, mut writer: PipeWriter) {
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => return writer.close(),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return writer.close_with_error(err),
        };
        if writer.write_all(&buf[..n]).is_err() {
            // Reader dropped; dropping `body` here closes the connection.
            return;
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

/// Transport backed by a blocking `ureq::Agent`.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
    max_redirects: u32,
}

impl UreqTransport {
    pub fn new(config: &ClientConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .user_agent(config.user_agent.as_str())
            .timeout_global(config.timeout())
            .timeout_connect(config.connect_timeout())
            .build()
            .new_agent();
        Self {
            agent,
            max_redirects: config.max_redirects,
        }
    }

    fn send_once(
        &self,
        method: HttpMethod,
        url: &Url,
        headers: &[(String, String)],
        body: Option<Body>,
        timeout: Option<Duration>,
    ) -> Result<::http::Response<ureq::Body>, TransportError> {
        let mut builder = ::http::Request::builder()
            .method(method.as_str())
            .uri(url.as_str());
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match body {
            Some(body) => {
                let has_length = headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
                if let (Some(len), false) = (body.content_length(), has_length) {
                    builder = builder.header("content-length", len);
                }
                let request = builder.body(ureq::SendBody::from_owned_reader(body))?;
                self.run(request, timeout)
            }
            None => self.run(builder.body(())?, timeout),
        }
    }

    fn run<S: ureq::AsSendBody>(
        &self,
        request: ::http::Request<S>,
        timeout: Option<Duration>,
    ) -> Result<::http::Response<ureq::Body>, TransportError> {
        let request = match timeout {
            Some(timeout) => self
                .agent
                .configure_request(request)
                .timeout_global(Some(timeout))
                .build(),
            None => request,
        };
        Ok(self.agent.run(request)?)
    }
}

impl Transport for UreqTransport {
    fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            mut method,
            mut url,
            mut headers,
            mut body,
            get_body,
            timeout,
        } = request;
        let started = Instant::now();
        let had_body = body.is_some();
        let mut redirects = 0;

        loop {
            let remaining = timeout.map(|t| t.saturating_sub(started.elapsed()));
            let res = self.send_once(method, &url, &headers, body.take(), remaining)?;
            let status = res.status().as_u16();
            if !is_redirect(status) {
                return Ok(into_response(res));
            }
            let Some(location) = res
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
            else {
                return Ok(into_response(res));
            };

            let replay = matches!(status, 307 | 308);
            if replay && had_body && get_body.is_none() {
                // The body was a one-shot stream; hand the redirect back as is.
                return Ok(into_response(res));
            }
            if redirects >= self.max_redirects {
                return Err(TransportError::TooManyRedirects(self.max_redirects));
            }
            redirects += 1;

            let next = url
                .join(&location)
                .map_err(|_| TransportError::InvalidRedirect(location.clone()))?;
            tracing::debug!(status, from = %url, to = %next, "following redirect");

            if replay {
                if let Some(provider) = &get_body {
                    body = Some(provider.open().map_err(TransportError::ReplayBody)?);
                }
            } else {
                if method != HttpMethod::Head {
                    method = HttpMethod::Get;
                }
                headers.retain(|(k, _)| {
                    !k.eq_ignore_ascii_case("content-type") && !k.eq_ignore_ascii_case("content-length")
                });
            }
            if next.host_str() != url.host_str() {
                headers.retain(|(k, _)| {
                    !k.eq_ignore_ascii_case("authorization") && !k.eq_ignore_ascii_case("cookie")
                });
            }
            url = next;
        }
    }
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

fn into_response(res: ::http::Response<ureq::Body>) -> HttpResponse {
    let status = res.status().as_u16();
    let headers = res
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect();
    HttpResponse {
        status,
        headers,
        body: Body::new(res.into_body().into_reader()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;

    fn echo_url(request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(
            200,
            Body::from_bytes(request.url.as_str().as_bytes().to_vec()),
        ))
    }

    fn request(url: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: Url::parse(url).unwrap(),
            headers: Vec::new(),
            body: None,
            get_body: None,
            timeout: None,
        }
    }

    #[test]
    fn replace_transport_leaves_original_alone() {
        let original = Client::with_transport(echo_url);
        let before = Arc::clone(original.transport());

        let replacement: Arc<dyn Transport> =
            Arc::new(|_: HttpRequest| -> Result<HttpResponse, TransportError> {
                Ok(HttpResponse::new(418, Body::empty()))
            });
        let copy = original.replace_transport(Arc::clone(&replacement));

        assert!(Arc::ptr_eq(original.transport(), &before));
        assert!(Arc::ptr_eq(copy.transport(), &replacement));
    }

    #[test]
    fn call_with_background_context_runs_inline() {
        let client = Client::with_transport(echo_url);
        let mut res = client
            .call(&Context::background(), request("http://example.com/a"))
            .unwrap();
        let mut body = String::new();
        res.body.read_to_string(&mut body).unwrap();
        assert_eq!(body, "http://example.com/a");
    }

    #[test]
    fn call_refuses_an_already_cancelled_context() {
        let client = Client::with_transport(|_: HttpRequest| -> Result<HttpResponse, TransportError> {
            panic!("transport must not be reached")
        });
        let (ctx, handle) = Context::background().with_cancel();
        handle.cancel();
        let err = client.call(&ctx, request("http://example.com")).unwrap_err();
        assert!(matches!(err, RequestError::Canceled));
    }

    #[test]
    fn call_returns_at_deadline_while_transport_hangs() {
        let client = Client::with_transport(|_: HttpRequest| -> Result<HttpResponse, TransportError> {
            thread::sleep(Duration::from_secs(2));
            Ok(HttpResponse::new(200, Body::empty()))
        });
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let started = Instant::now();
        let err = client.call(&ctx, request("http://example.com")).unwrap_err();
        assert!(matches!(err, RequestError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn call_surfaces_transport_errors() {
        let client = Client::with_transport(|_: HttpRequest| -> Result<HttpResponse, TransportError> {
            Err(TransportError::Other("connection refused".to_string()))
        });
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        let err = client.call(&ctx, request("http://example.com")).unwrap_err();
        assert!(matches!(err, RequestError::Transport(TransportError::Other(_))));
    }

    #[test]
    fn worker_panic_is_not_reported_as_cancellation() {
        let client = Client::with_transport(|_: HttpRequest| -> Result<HttpResponse, TransportError> {
            panic!("transport blew up")
        });
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        let err = client.call(&ctx, request("http://example.com")).unwrap_err();
        assert!(matches!(err, RequestError::Transport(TransportError::Other(_))));
    }

    /// Yields one byte per `delay`, like a server trickling its body.
    struct Trickle {
        left: usize,
        delay: Duration,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.left == 0 || buf.is_empty() {
                return Ok(0);
            }
            thread::sleep(self.delay);
            self.left -= 1;
            buf[0] = b'x';
            Ok(1)
        }
    }

    #[test]
    fn bounded_call_streams_the_whole_body() {
        let client = Client::with_transport(echo_url);
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        let mut res = client.call(&ctx, request("http://example.com/b")).unwrap();
        assert_eq!(res.body.content_length(), Some(20));
        let mut body = String::new();
        res.body.read_to_string(&mut body).unwrap();
        assert_eq!(body, "http://example.com/b");
    }

    #[test]
    fn body_reads_stop_once_the_context_is_cancelled() {
        let client = Client::with_transport(|_: HttpRequest| -> Result<HttpResponse, TransportError> {
            let trickle = Trickle {
                left: 50,
                delay: Duration::from_millis(50),
            };
            Ok(HttpResponse::new(200, Body::new(trickle)))
        });
        let (ctx, handle) = Context::background().with_cancel();
        let mut res = client.call(&ctx, request("http://example.com")).unwrap();

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            handle.cancel();
        });
        let started = Instant::now();
        let mut body = Vec::new();
        let err = res.body.read_to_end(&mut body).unwrap_err();
        canceller.join().unwrap();
        assert!(err.to_string().contains("canceled"), "{err}");
        assert!(body.len() < 50);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn body_reads_stop_at_the_deadline() {
        let client = Client::with_transport(|_: HttpRequest| -> Result<HttpResponse, TransportError> {
            let trickle = Trickle {
                left: 50,
                delay: Duration::from_millis(50),
            };
            Ok(HttpResponse::new(200, Body::new(trickle)))
        });
        let ctx = Context::background().with_timeout(Duration::from_millis(200));
        let mut res = client.call(&ctx, request("http://example.com")).unwrap();
        let mut body = Vec::new();
        let err = res.body.read_to_end(&mut body).unwrap_err();
        assert!(err.to_string().contains("deadline"), "{err}");
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"timeout_ms": 1500}"#).unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.max_redirects, 10);
        assert!(config.user_agent.starts_with("request-core/"));
    }

    #[test]
    fn redirect_statuses() {
        for status in [301, 302, 303, 307, 308] {
            assert!(is_redirect(status));
        }
        for status in [200, 304, 404] {
            assert!(!is_redirect(status));
        }
    }
}
