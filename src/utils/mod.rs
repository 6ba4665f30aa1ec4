//! # Utility Modules
//!
//! Supporting utilities for logging, timing, observability and fan-in.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Rollup**: Aggregates several asynchronous completions into one callback
//! - **Timeout**: Async timeout wrappers and connection-setup intervals

pub mod logging;
pub mod metrics;
pub mod rollup;
pub mod timeout;

pub use rollup::{Dispatch, Reply, RollupTracker};
