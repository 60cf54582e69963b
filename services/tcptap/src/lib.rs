pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::ProxyError;
pub use proxy::{FilterSpec, Hop, Listener, ListenerStats, Pipe, TrafficLog};
