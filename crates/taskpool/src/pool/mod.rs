//! The worker pool: manager, computation units, handles and statistics.
//!
//! ## Structure
//!
//! - [`manager`] - [`WorkerPool`]: dispatch, queueing, cancellation, shutdown.
//! - [`worker`] - unit task loop and the [`TaskExecutor`] seam.
//! - [`handle`] - [`TaskHandle`], the future a caller awaits.
//! - [`stats`] - [`PoolStats`] snapshots and [`UnitState`].

pub mod handle;
pub mod manager;
pub mod stats;
pub mod worker;

pub use handle::TaskHandle;
pub use manager::WorkerPool;
pub use stats::{PoolStats, UnitInfo, UnitState};
pub use worker::{ProtocolExecutor, TaskExecutor};
