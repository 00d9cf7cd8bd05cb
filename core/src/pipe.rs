//! In-memory, single-producer/single-consumer byte pipe.
//!
//! The channel has zero capacity: every write hands its chunk directly to
//! the reader and blocks until the reader takes it, so a slow consumer
//! throttles the producer and at most one chunk is in flight.
//!
//! The writer decides how the stream ends. `close` gives the reader a clean
//! EOF, `close_with_error` gives it that error once the bytes already written
//! have been read. A reader that goes away turns pending and later writes
//! into `BrokenPipe`.
//!
//! A reader bound to a `Context` also stops when the context ends, even if
//! the writer is blocked or silent.

use std::io::{self, Read, Write};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::context::Context;

type Chunk = io::Result<Vec<u8>>;

/// Create a connected reader/writer pair.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let (tx, rx) = bounded(0);
    (
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
            terminal: None,
            ctx: None,
        },
        PipeWriter { tx: Some(tx) },
    )
}

/// Read half of a `pipe`.
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Chunk>,
    chunk: Vec<u8>,
    pos: usize,
    // Sticky: once the stream has ended every read reports the same outcome.
    terminal: Option<Terminal>,
    ctx: Option<Context>,
}

impl PipeReader {
    /// Fail reads with the context's error once `ctx` is cancelled or past
    /// its deadline.
    pub(crate) fn bounded_by(mut self, ctx: Context) -> Self {
        self.ctx = Some(ctx);
        self
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        self.terminal = Some(Terminal::Failed(err.kind(), err.to_string()));
        err
    }

    fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        match &self.ctx {
            None => Ok(self.rx.recv().ok()),
            Some(ctx) => ctx.wait(&self.rx).map_err(|err| io::Error::other(err.to_string())),
        }
    }
}

#[derive(Debug)]
enum Terminal {
    Eof,
    Failed(io::ErrorKind, String),
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match &self.terminal {
                Some(Terminal::Eof) => return Ok(0),
                Some(Terminal::Failed(kind, msg)) => return Err(io::Error::new(*kind, msg.clone())),
                None => {}
            }
            if let Some(err) = self.ctx.as_ref().and_then(Context::err) {
                return Err(self.fail(io::Error::other(err.to_string())));
            }
            if self.pos < self.chunk.len() {
                let n = (self.chunk.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match self.next_chunk() {
                Ok(Some(Ok(chunk))) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Ok(Some(Err(err))) | Err(err) => return Err(self.fail(err)),
                Ok(None) => self.terminal = Some(Terminal::Eof),
            }
        }
    }
}

/// Write half of a `pipe`.
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<Sender<Chunk>>,
}

impl PipeWriter {
    /// End the stream; the reader sees EOF after the bytes already written.
    pub fn close(mut self) {
        self.tx.take();
    }

    /// End the stream with `err`; the reader sees it after the bytes already
    /// written.
    pub fn close_with_error(mut self, err: io::Error) {
        if let Some(tx) = self.tx.take() {
            // A reader that is already gone has nobody to report to.
            let _ = tx.send(Err(err));
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "write on closed pipe"))?;
        tx.send(Ok(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "read side of pipe closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            if std::thread::panicking() {
                let _ = tx.send(Err(io::Error::other("body producer panicked")));
            }
        }
    }
}
