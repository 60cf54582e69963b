//! Traffic transcript rendering and deduplication.
//!
//! Every chunk crossing a boundary hop is rendered to the transcript stream
//! (stdout by default) as a colored banner line followed by the bytes
//! themselves, with control characters made visible. A rolling content
//! digest suppresses re-rendering when the same bytes were just logged on
//! any hop of the connection; the repeat is reduced to a `COPY` marker.
//!
//! Diagnostics go through `tracing`; this module only produces the
//! human-oriented transcript.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::process;

use chrono::Local;
use colored::{ColoredString, Colorize};
use sha2::{Digest, Sha256};

/// One directed leg of a connection's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    /// Hop 0: bytes read from the client, heading into the in-filter.
    ClientToFilter,
    /// Hop 1: in-filter output, heading to the server.
    FilterToServer,
    /// Hop 2: bytes read from the server, heading into the out-filter.
    ServerToFilter,
    /// Hop 3: out-filter output, heading back to the client.
    FilterToClient,
}

impl Hop {
    /// Outer hops touch the client side; end-of-stream there tears the
    /// whole connection down.
    pub fn is_outer(self) -> bool {
        matches!(self, Hop::ClientToFilter | Hop::FilterToClient)
    }

    /// Reads are logged where they enter the proxy: from the client and
    /// from the server.
    pub fn logs_reads(self) -> bool {
        matches!(self, Hop::ClientToFilter | Hop::ServerToFilter)
    }

    /// Writes are logged where they leave the proxy: to the server and to
    /// the client.
    pub fn logs_writes(self) -> bool {
        matches!(self, Hop::FilterToServer | Hop::FilterToClient)
    }

    pub fn label(self) -> &'static str {
        match self {
            Hop::ClientToFilter => "client -> in filter",
            Hop::FilterToServer => "in filter -> server",
            Hop::ServerToFilter => "server -> out filter",
            Hop::FilterToClient => "out filter -> client",
        }
    }
}

/// Banner identity: each hop and the two connection lifecycle events get a
/// distinct color so directions can be told apart at a glance.
#[derive(Debug, Clone, Copy)]
enum Tag {
    Hop(Hop),
    Start,
    End,
}

impl Tag {
    fn paint(self, s: &str) -> ColoredString {
        match self {
            Tag::Hop(Hop::ClientToFilter) => s.red().reversed(),
            Tag::Hop(Hop::FilterToServer) => s.red().bold(),
            Tag::Hop(Hop::ServerToFilter) => s.green().bold(),
            Tag::Hop(Hop::FilterToClient) => s.green().reversed(),
            Tag::Start => s.blue().reversed(),
            Tag::End => s.cyan().reversed(),
        }
    }
}

/// Per-connection transcript logger.
///
/// Owns the dedup state for its connection; the digest window is shared
/// across all four hops, so a repeat is detected whenever the immediately
/// preceding logged chunk had identical content, whichever hop it was on.
pub struct TrafficLog<W: Write> {
    peer: SocketAddr,
    out: W,
    last_digest: Option<[u8; 32]>,
}

impl TrafficLog<io::Stdout> {
    /// Transcript logger writing to stdout.
    pub fn stdout(peer: SocketAddr) -> Self {
        Self::new(peer, io::stdout())
    }
}

impl<W: Write> TrafficLog<W> {
    pub fn new(peer: SocketAddr, out: W) -> Self {
        Self {
            peer,
            out,
            last_digest: None,
        }
    }

    /// Emit the "new connection" lifecycle event.
    pub fn connection_start(&mut self) {
        let mut buf = Vec::new();
        self.banner(&mut buf, Tag::Start, Some("new connection"));
        self.flush(&buf);
    }

    /// Emit the "end of connection" lifecycle event.
    pub fn connection_end(&mut self) {
        let mut buf = Vec::new();
        self.banner(&mut buf, Tag::End, Some("end"));
        self.flush(&buf);
    }

    /// Render one chunk of traffic for the given hop.
    ///
    /// If the chunk's digest matches the previously logged chunk, only a
    /// `COPY` marker is emitted and the bytes are not re-rendered.
    pub fn render(&mut self, hop: Hop, chunk: &[u8]) {
        let digest: [u8; 32] = Sha256::digest(chunk).into();
        let mut buf = Vec::new();
        if self.last_digest == Some(digest) {
            self.banner(&mut buf, Tag::Hop(hop), Some("COPY"));
            self.flush(&buf);
            return;
        }
        self.last_digest = Some(digest);
        self.banner(&mut buf, Tag::Hop(hop), None);
        render_body(&mut buf, chunk);
        self.flush(&buf);
    }

    /// Borrow the underlying sink (used by tests to inspect output).
    pub fn sink(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn banner(&self, buf: &mut Vec<u8>, tag: Tag, msg: Option<&str>) {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S%.6f");
        let _ = write!(
            buf,
            "{} {} {}:{}:{}",
            tag.paint("==>"),
            now,
            process::id(),
            self.peer.ip(),
            self.peer.port(),
        );
        if let Some(msg) = msg {
            let _ = write!(buf, " {msg}");
        }
        let _ = writeln!(buf, " {}", tag.paint("<=="));
    }

    fn flush(&mut self, buf: &[u8]) {
        // The transcript is informational; a broken stdout must not take
        // the connection down with it.
        let _ = self.out.write_all(buf);
        let _ = self.out.flush();
    }
}

/// Render chunk bytes with control characters made visible.
///
/// Printable ASCII and newlines pass through. `\r` becomes a red `\r`
/// marker; other control bytes, DEL, and everything with the high bit set
/// (C1 controls included, so raw bytes can never smuggle escape sequences
/// into the terminal) become a bold `\xNN` escape. A newline preceded by
/// a space gets a `$` marker so trailing whitespace shows up, and a chunk
/// without a final newline is terminated with `$$` plus a real newline to
/// keep the transcript line-delimited.
fn render_body(buf: &mut Vec<u8>, chunk: &[u8]) {
    let Some(&last) = chunk.last() else {
        return;
    };
    let mut space = false;
    for &b in chunk {
        if b == b'\n' && space {
            let _ = write!(buf, "{}", "$".blue());
        }
        if (b < 0x20 && b != b'\n') || b >= 0x7F {
            if b == b'\r' {
                let _ = write!(buf, "{}", "\\r".red());
            } else {
                let _ = write!(buf, "{}", format!("\\x{b:02X}").red().bold());
            }
        } else {
            buf.push(b);
        }
        space = b == b' ';
    }
    if last != b'\n' {
        let _ = writeln!(buf, "{}", "$$".blue());
    }
}
