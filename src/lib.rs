//! spyserv - client-side monitoring agent
//!
//! Watches a configurable set of local applications, restarts the ones that
//! die, and relays system resource usage and per-app liveness to the spyserv
//! backend.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod internal_metrics;
pub mod logging;
pub mod process;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod task_manager;
pub mod transport;

// Re-export core types for convenience
pub use core::*;
