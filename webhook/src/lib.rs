pub mod api;
pub mod config;
pub mod errors;
pub mod handler;
pub mod metrics_defs;
pub mod queue;
pub mod ratelimit;

mod engine;

pub use engine::{PassSummary, SyncEngine};
pub use handler::{HandleOutcome, SyncService};
