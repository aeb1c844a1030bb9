use std::io::{self, Read};

use tracing::{trace, warn};

/// Bytes asked of the socket per `receive`, independent of the line cap.
const READ_CHUNK: usize = 1024;

/// One decoded line, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Complete(String),
    /// The sender exceeded the length cap; this is the first `cap` bytes and
    /// the remainder up to the next newline was dropped.
    Truncated(String),
}

impl Line {
    pub fn text(&self) -> &str {
        match self {
            Line::Complete(text) | Line::Truncated(text) => text,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, Line::Truncated(_))
    }
}

#[derive(Debug)]
pub enum Received {
    /// Every line completed by this read, possibly none.
    Lines(Vec<Line>),
    /// The peer closed its end.
    Disconnected,
    Failed(io::Error),
}

/// Per-connection line framer.
///
/// Each `receive` performs exactly one read, so it is safe to call once per
/// readiness report without blocking on a peer that sent half a line.
#[derive(Debug)]
pub struct LineReader {
    pending: Vec<u8>,
    cap: usize,
    discarding: bool,
    eof: bool,
}

impl LineReader {
    pub fn new(cap: usize) -> Self {
        Self {
            pending: Vec::with_capacity(cap),
            cap,
            discarding: false,
            eof: false,
        }
    }

    pub fn receive<R: Read>(&mut self, mut src: R) -> Received {
        if self.eof {
            return Received::Disconnected;
        }

        let mut buf = [0u8; READ_CHUNK];
        let n = match src.read(&mut buf) {
            Ok(0) => return self.finish(),
            Ok(n) => n,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
                ) =>
            {
                trace!("spurious wakeup: {err}");
                return Received::Lines(Vec::new());
            }
            Err(err) => return Received::Failed(err),
        };

        Received::Lines(self.consume(&buf[..n]))
    }

    fn consume(&mut self, mut chunk: &[u8]) -> Vec<Line> {
        let mut lines = Vec::new();

        while !chunk.is_empty() {
            let newline = chunk.iter().position(|&b| b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        self.discarding = false;
                        chunk = &chunk[pos + 1..];
                    }
                    None => chunk = &[],
                }
                continue;
            }

            match newline {
                Some(pos) if self.pending.len() + pos <= self.cap => {
                    self.pending.extend_from_slice(&chunk[..pos]);
                    chunk = &chunk[pos + 1..];
                    lines.push(Line::Complete(self.take_pending()));
                }
                None if self.pending.len() + chunk.len() <= self.cap => {
                    self.pending.extend_from_slice(chunk);
                    chunk = &[];
                }
                _ => {
                    let room = self.cap - self.pending.len();
                    self.pending.extend_from_slice(&chunk[..room]);
                    chunk = &chunk[room..];

                    warn!(cap = self.cap, "line exceeds limit, truncating");
                    lines.push(Line::Truncated(self.take_pending()));
                    self.discarding = true;
                }
            }
        }

        lines
    }

    /// End of stream: a trailing partial line is still delivered, and the
    /// next call reports the disconnect.
    fn finish(&mut self) -> Received {
        self.eof = true;

        if self.pending.is_empty() || self.discarding {
            return Received::Disconnected;
        }

        Received::Lines(vec![Line::Complete(self.take_pending())])
    }

    fn take_pending(&mut self) -> String {
        let raw = std::mem::take(&mut self.pending);
        let mut text = String::from_utf8_lossy(&raw).into_owned();

        // "\n" is already gone; drop one "\r" before it.
        if text.ends_with('\r') {
            text.pop();
        }
        text
    }
}
