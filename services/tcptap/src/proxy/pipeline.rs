//! Four-pipe readiness multiplexer for one proxied connection.
//!
//! A connection is spliced through four directed pipes:
//!
//! ```text
//! 0: client     -> in filter
//! 1: in filter  -> server
//! 2: server     -> out filter
//! 3: out filter -> client
//! ```
//!
//! Each pipe is either awaiting a read (buffer empty) or awaiting a write
//! (buffer holds bytes). One `select!` loop drives whichever pipes are
//! ready, so a pipe whose destination is not draining stops reading from
//! its source and memory stays bounded at one buffer per pipe.
//!
//! Teardown is asymmetric: end-of-stream on an outer hop (0 or 3) ends the
//! whole connection, while end-of-stream on an inner hop (1 or 2) only
//! kills the inner pair and closes the server socket, leaving the outer
//! pipes live so buffered filter output still drains toward the client.

use std::io::{self, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use super::logger::{Hop, TrafficLog};

/// Per-pipe buffer capacity.
pub const BUF_SIZE: usize = 1024;

pub type PipeSource = Box<dyn AsyncRead + Send + Unpin>;
pub type PipeSink = Box<dyn AsyncWrite + Send + Unpin>;

/// A directed byte channel between two descriptors.
///
/// The endpoints sit in `Option`s so teardown can close each one exactly
/// once; a dead pipe has both taken. The two proxy sockets are full-duplex
/// and contribute one half to each of two pipes, so "closing the server
/// socket" means dropping pipe 1's sink together with pipe 2's source.
pub struct Pipe {
    hop: Hop,
    src: Option<PipeSource>,
    dst: Option<PipeSink>,
    buf: Box<[u8]>,
    len: usize,
    pos: usize,
    dead: bool,
}

enum StepEvent {
    Read(usize),
    Wrote(usize),
    Eof,
}

impl Pipe {
    pub fn new(hop: Hop, src: PipeSource, dst: PipeSink) -> Self {
        Self {
            hop,
            src: Some(src),
            dst: Some(dst),
            buf: vec![0u8; BUF_SIZE].into_boxed_slice(),
            len: 0,
            pos: 0,
            dead: false,
        }
    }

    pub fn hop(&self) -> Hop {
        self.hop
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// The bytes currently buffered and not yet written.
    fn chunk(&self) -> &[u8] {
        &self.buf[self.pos..self.pos + self.len]
    }

    fn advance(&mut self, n: usize) {
        self.len -= n;
        self.pos += n;
    }

    /// Mark dead and close both endpoints.
    fn kill(&mut self) {
        self.dead = true;
        self.src = None;
        self.dst = None;
    }

    /// Perform this pipe's one pending operation: a read when the buffer
    /// is empty, a write otherwise. Zero-length transfers and I/O errors
    /// both surface as [`StepEvent::Eof`]; interrupted calls are retried.
    ///
    /// Cancellation-safe: `read` and `write` on tokio streams transfer
    /// bytes only when the resource is ready, so dropping this future
    /// mid-wait loses nothing.
    async fn step(&mut self) -> StepEvent {
        if self.len == 0 {
            let Some(src) = self.src.as_mut() else {
                return StepEvent::Eof;
            };
            loop {
                match src.read(&mut self.buf).await {
                    Ok(0) => return StepEvent::Eof,
                    Ok(n) => {
                        self.len = n;
                        self.pos = 0;
                        return StepEvent::Read(n);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => return StepEvent::Eof,
                }
            }
        } else {
            let Some(dst) = self.dst.as_mut() else {
                return StepEvent::Eof;
            };
            loop {
                match dst.write(&self.buf[self.pos..self.pos + self.len]).await {
                    Ok(0) => return StepEvent::Eof,
                    Ok(n) => return StepEvent::Wrote(n),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => return StepEvent::Eof,
                }
            }
        }
    }
}

/// Drive the four pipes of one connection until it terminates.
///
/// Returns once an outer hop reaches end-of-stream or every pipe has died;
/// the caller closes whatever endpoints remain by dropping the pipes.
pub async fn splice<W: Write>(pipes: &mut [Pipe; 4], transcript: &mut TrafficLog<W>) {
    loop {
        if pipes.iter().all(Pipe::is_dead) {
            return;
        }

        let live = [
            !pipes[0].dead,
            !pipes[1].dead,
            !pipes[2].dead,
            !pipes[3].dead,
        ];
        let [p0, p1, p2, p3] = &mut *pipes;
        let (idx, event) = tokio::select! {
            ev = p0.step(), if live[0] => (0, ev),
            ev = p1.step(), if live[1] => (1, ev),
            ev = p2.step(), if live[2] => (2, ev),
            ev = p3.step(), if live[3] => (3, ev),
        };

        match event {
            StepEvent::Eof => {
                if pipes[idx].hop.is_outer() {
                    return;
                }
                // Inner end-of-stream: the filter/server pair dies and the
                // server socket closes with it; hops 0 and 3 keep draining.
                pipes[1].kill();
                pipes[2].kill();
            }
            StepEvent::Read(_) => {
                if pipes[idx].hop.logs_reads() {
                    transcript.render(pipes[idx].hop, pipes[idx].chunk());
                }
            }
            StepEvent::Wrote(n) => {
                let n = if n > pipes[idx].len {
                    warn!(hop = pipes[idx].hop.label(), "wrote more than expected");
                    pipes[idx].len
                } else {
                    n
                };
                if pipes[idx].hop.logs_writes() {
                    transcript.render(pipes[idx].hop, pipes[idx].chunk());
                }
                pipes[idx].advance(n);
            }
        }
    }
}
