use std::io;

use thiserror::Error;

/// Failures while opening the listening socket.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to create listening socket: {0}")]
    Create(#[source] io::Error),

    #[error("failed to configure listening socket: {0}")]
    Configure(#[source] io::Error),

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),
}

/// Errors that end the server, either before or during the event loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error("readiness poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("server is not running")]
    NotRunning,

    #[error("server already started")]
    AlreadyStarted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot index {index} out of range (capacity {capacity})")]
    InvalidIndex { index: usize, capacity: usize },

    #[error("slot {0} is already empty")]
    AlreadyEvicted(usize),
}

/// Returned by `SlotTable::admit` when every slot is taken.
///
/// Carries the rejected handle back so the caller can notify it before
/// closing.
#[derive(Debug, Error)]
#[error("capacity exceeded: all {capacity} slots are in use")]
pub struct CapacityExceeded<T> {
    pub capacity: usize,
    pub handle: T,
}
