//! Worker engine.
//!
//! A `Worker` polls one queue on one driver and processes claimed entries
//! strictly one at a time:
//!
//! ```text
//! pop ─► decode ─┬─ corrupt ───────────────────────────► delete (discard)
//!                ├─ attempts > max_tries ─► failed hook ─► mark_failed + delete
//!                └─ run under timeout ─┬─ ok ─────────► delete
//!                                      ├─ err, tries left ► release(retry_after)
//!                                      └─ err, exhausted ─► failed hook ─► mark_failed + delete
//! ```
//!
//! Stop requests are observed between jobs only; a running handler is never
//! interrupted except by its own timeout.

pub mod config;
pub mod engine;
pub mod pool;
pub mod stats;

pub use config::WorkerConfig;
pub use engine::{Worker, WorkerControl, WorkerState};
pub use pool::{PoolError, WorkerPool, WorkerPoolConfig};
pub use stats::{JobOutcome, StatsSnapshot, WorkerStats};
