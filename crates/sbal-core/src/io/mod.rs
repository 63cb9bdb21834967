//! I/O utilities.

mod relay;

pub use relay::{RelayStats, relay_bidirectional};
