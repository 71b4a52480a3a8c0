#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Resilient request dispatch across several API keys.
//!
//! # Components
//! - [`KeyPool`]: per-key health and error bookkeeping, round-robin selection
//! - [`SessionCache`]: one lazily-created conversation context per key
//! - [`Dispatcher`]: sends through the pool, rotating keys on failure
//! - [`HealthMonitor`]: periodic background probe of every key

pub mod cache;
mod dispatcher;
mod error;
mod monitor;
pub mod pool;
mod stats;

pub use cache::{CachedSession, SessionCache};
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use error::{DispatchError, apology};
pub use monitor::HealthMonitor;
pub use pool::{KeyPool, SlotStatus};
pub use stats::{DispatcherStats, HealthReport, KeyStats};
