//! Upstream pool: server descriptors with liveness state, selection
//! policies, and the dual health-check scheduler that feeds liveness back
//! into selection.
//!
//! Only the health checker writes liveness; selection only reads it. The
//! registry is fixed at configuration load — no servers are added or removed
//! at runtime.

mod checker;
mod probe;
mod registry;
mod select;
mod server;

pub use checker::HealthChecker;
pub use probe::{HttpsProber, ProbeError, tcp_probe};
pub use registry::{PoolSnapshot, ServerSnapshot, UpstreamPool};
pub use server::{Liveness, UpstreamServer};
