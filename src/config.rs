use std::num::NonZeroUsize;
use std::time::Duration;

use clap::Parser;

/// Single-process TCP chat relay.
#[derive(Debug, Clone, Parser)]
#[command(name = "multirelay", version, about)]
pub struct Config {
    /// TCP port to listen on (all interfaces).
    #[arg(short, long, env = "MULTIRELAY_PORT", default_value_t = 5500)]
    pub port: u16,

    /// Maximum number of concurrent clients.
    #[arg(long, env = "MULTIRELAY_MAX_CLIENTS", default_value = "10")]
    pub max_clients: NonZeroUsize,

    /// Upper bound on a single readiness poll, in milliseconds.
    #[arg(long, env = "MULTIRELAY_POLL_TIMEOUT_MS", default_value_t = 1000)]
    pub poll_timeout_ms: u64,

    /// Longest accepted line in bytes; longer lines are cut.
    #[arg(long, env = "MULTIRELAY_MAX_LINE_BYTES", default_value = "1024")]
    pub max_line_bytes: NonZeroUsize,

    /// Read/write timeout on client sockets, in milliseconds.
    #[arg(long, env = "MULTIRELAY_IO_TIMEOUT_MS", default_value_t = 2000)]
    pub io_timeout_ms: u64,

    /// Verbose logging.
    #[arg(long, env = "MULTIRELAY_DEBUG")]
    pub debug: bool,
}

impl Config {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// `None` when zero, which leaves the socket fully blocking.
    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5500,
            max_clients: NonZeroUsize::new(10).unwrap_or(NonZeroUsize::MIN),
            poll_timeout_ms: 1000,
            max_line_bytes: NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN),
            io_timeout_ms: 2000,
            debug: false,
        }
    }
}
