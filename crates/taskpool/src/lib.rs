#![doc = include_str!("../README.md")]

pub mod config;
pub mod driver;
pub mod pool;
pub mod telemetry;

pub use config::{DriverConfig, PoolConfig};
pub use pool::{
    PoolStats, ProtocolExecutor, TaskExecutor, TaskHandle, UnitInfo, UnitState, WorkerPool,
};
pub use taskpool_core::{
    Error, Result, Task, TaskId, TaskKind, TaskOutput, TaskPayload, TaskResult, protocol,
};
