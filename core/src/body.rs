//! Request bodies and the providers that produce them.
//!
//! # Design
//! A `BodyProvider` is a factory, not a stream: `open` is called once when
//! the request is built and again by the transport whenever it must replay
//! the body (a 307/308 redirect). Every variant therefore produces a fresh
//! stream per call. The file and writer variants never hold the full
//! payload in memory.

use std::fmt;
use std::fs::File as StdFile;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use serde::Serialize;

use crate::pipe::pipe;

/// Errors raised while opening a request body.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("serialize body: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("start body producer: {0}")]
    Spawn(#[source] io::Error),
}

/// An owned byte stream. Dropping or `close`-ing it releases the source.
pub struct Body {
    reader: Box<dyn Read + Send>,
    len: Option<u64>,
}

impl Body {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            len: None,
        }
    }

    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Self {
            reader: Box::new(Cursor::new(bytes)),
            len: Some(len),
        }
    }

    /// Exact size in bytes, when known up front.
    pub fn content_length(&self) -> Option<u64> {
        self.len
    }

    pub fn close(self) {}

    pub(crate) fn with_len(mut self, len: u64) -> Self {
        self.len = Some(len);
        self
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").field("len", &self.len).finish_non_exhaustive()
    }
}

/// Deferred factory for request bodies.
pub trait BodyProvider: Send + Sync {
    /// Produce a fresh stream over the body.
    fn open(&self) -> Result<Body, BodyError>;

    /// Content-Type applied when the request does not set one explicitly.
    fn content_type(&self) -> Option<&str> {
        None
    }
}

/// Raw bytes, shared between every opened stream.
#[derive(Debug, Clone)]
pub struct Bytes(Arc<[u8]>);

impl Bytes {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into()))
    }
}

impl BodyProvider for Bytes {
    fn open(&self) -> Result<Body, BodyError> {
        let len = self.0.len() as u64;
        Ok(Body::new(Cursor::new(Arc::clone(&self.0))).with_len(len))
    }
}

/// A value serialized as JSON each time the body is opened.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize + Send + Sync> BodyProvider for Json<T> {
    fn open(&self) -> Result<Body, BodyError> {
        let bytes = serde_json::to_vec(&self.0).map_err(BodyError::Serialize)?;
        Ok(Body::from_bytes(bytes))
    }

    fn content_type(&self) -> Option<&str> {
        Some("application/json")
    }
}

/// Ordered key/value pairs encoded as `application/x-www-form-urlencoded`.
#[derive(Debug, Clone, Default)]
pub struct Form {
    pairs: Vec<(String, String)>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.pairs)
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Form {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl BodyProvider for Form {
    fn open(&self) -> Result<Body, BodyError> {
        Ok(Body::from_bytes(self.encode()))
    }

    fn content_type(&self) -> Option<&str> {
        Some("application/x-www-form-urlencoded")
    }
}

/// The contents of a file, opened anew for every stream.
#[derive(Debug, Clone)]
pub struct File(PathBuf);

impl File {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().to_path_buf())
    }
}

impl BodyProvider for File {
    fn open(&self) -> Result<Body, BodyError> {
        let open_err = |source| BodyError::Open {
            path: self.0.clone(),
            source,
        };
        let file = StdFile::open(&self.0).map_err(open_err)?;
        let body = Body::new(file);
        Ok(match std::fs::metadata(&self.0) {
            Ok(meta) if meta.is_file() => body.with_len(meta.len()),
            _ => body,
        })
    }
}

/// An arbitrary reader. It can only be streamed once: the first `open`
/// hands it out and later calls see an already-drained, empty stream.
pub struct Reader {
    source: Mutex<Option<Box<dyn Read + Send>>>,
}

impl Reader {
    pub fn new(source: impl Read + Send + 'static) -> Self {
        Self {
            source: Mutex::new(Some(Box::new(source))),
        }
    }
}

impl BodyProvider for Reader {
    fn open(&self) -> Result<Body, BodyError> {
        let taken = match self.source.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        Ok(match taken {
            Some(source) => Body {
                reader: source,
                len: None,
            },
            None => Body::empty(),
        })
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader").finish_non_exhaustive()
    }
}

type Produce = dyn Fn(&mut dyn Write) -> io::Result<()> + Send + Sync;

/// A callback that writes the body. Each `open` runs the callback on its own
/// thread, feeding a pipe whose read end becomes the body. If the callback
/// fails, the reader gets that error after the bytes written so far.
#[derive(Clone)]
pub struct Writer(Arc<Produce>);

impl Writer {
    pub fn new<F>(produce: F) -> Self
    where
        F: Fn(&mut dyn Write) -> io::Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(produce))
    }
}

impl BodyProvider for Writer {
    fn open(&self) -> Result<Body, BodyError> {
        let (reader, mut writer) = pipe();
        let produce = Arc::clone(&self.0);
        thread::Builder::new()
            .name("body-producer".to_string())
            .spawn(move || match produce(&mut writer) {
                Ok(()) => writer.close(),
                Err(err) => {
                    tracing::warn!(error = %err, "request body producer failed");
                    writer.close_with_error(err);
                }
            })
            .map_err(BodyError::Spawn)?;
        Ok(Body::new(reader))
    }
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer").finish_non_exhaustive()
    }
}
