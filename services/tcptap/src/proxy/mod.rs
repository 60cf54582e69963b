//! Per-connection proxy pipeline.
//!
//! ```text
//! client -> [pipe 0] -> in filter  -> [pipe 1] -> server
//! client <- [pipe 3] <- out filter <- [pipe 2] <- server
//! ```
//!
//! - [`listener`]: accept loop, dispatch, and the connection handler
//! - [`pipeline`]: the four-pipe readiness multiplexer
//! - [`filter`]: filter subprocess launching
//! - [`logger`]: transcript rendering and deduplication

mod filter;
mod listener;
mod logger;
mod pipeline;

pub use filter::{spawn as spawn_filter, FilterProcess, FilterSpec};
pub use listener::{Listener, ListenerStats};
pub use logger::{Hop, TrafficLog};
pub use pipeline::{splice, Pipe, BUF_SIZE};
