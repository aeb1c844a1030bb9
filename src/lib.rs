//! A small TCP chat relay.
//!
//! One thread accepts up to a fixed number of clients, watches them all with
//! a single `poll(2)` per iteration, and relays every line a client sends to
//! everyone connected as `[Player_<slot>]: <line>`.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod mux;
pub mod protocol;
pub mod reader;
pub mod server;
pub mod slots;
mod sys;

pub use config::Config;
pub use error::{ServerError, StartError};
pub use server::{Server, State, StopHandle};
