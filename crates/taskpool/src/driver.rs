//! JSON-lines front end for a [`WorkerPool`].
//!
//! Every input line is either a task request
//! `{"id"?: <u64>, "kind": "<kind>", "payload": {...}}` or a cancellation
//! `{"cancel": <id>}`. Each task, accepted or rejected, produces exactly one
//! output line:
//!
//! ```json
//! {"taskId":1,"status":"success","result":{...}}
//! {"taskId":2,"status":"failure","error":{"code":"ValidationError","message":"..."}}
//! ```
//!
//! Rejected lines that carry no id, and lines rejected because their id is
//! still outstanding, are reported with `"taskId": null`. When
//! a stats interval is configured, `{"stats": {...}}` lines are interleaved,
//! and one is written after shutdown.

use crate::pool::{PoolStats, TaskHandle, WorkerPool};
use core::{future::Future, time::Duration};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskpool_core::{Error, TaskId, TaskKind, TaskOutput, TaskPayload, TaskResult};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Request {
    Cancel {
        cancel: TaskId,
    },
    Submit {
        #[serde(default)]
        id: Option<TaskId>,
        kind: String,
        #[serde(default)]
        payload: Value,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Success,
    Failure,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultLine<'a> {
    task_id: Option<TaskId>,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a TaskOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

impl<'a> From<&'a TaskResult> for ResultLine<'a> {
    fn from(result: &'a TaskResult) -> Self {
        match &result.outcome {
            Ok(output) => Self {
                task_id: Some(result.task_id),
                status: Status::Success,
                result: Some(output),
                error: None,
            },
            Err(err) => Self {
                task_id: Some(result.task_id),
                status: Status::Failure,
                result: None,
                error: Some(err.into()),
            },
        }
    }
}

#[derive(Serialize)]
struct StatsLine {
    stats: PoolStats,
}

/// Counts of what a driver run did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverSummary {
    /// Tasks the pool accepted.
    pub accepted: u64,
    /// Lines rejected before reaching a unit (bad JSON, unknown kind,
    /// invalid payload, duplicate id, closed pool).
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
}

struct ResultWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> ResultWriter<W> {
    fn new(output: W) -> Self {
        Self {
            inner: BufWriter::new(output),
        }
    }

    async fn write_json(&mut self, value: &impl Serialize) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.inner.write_all(&line).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn write_result(
        &mut self,
        result: &TaskResult,
        summary: &mut DriverSummary,
    ) -> anyhow::Result<()> {
        if result.is_success() {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
        self.write_json(&ResultLine::from(result)).await
    }

    async fn write_rejection(&mut self, id: Option<TaskId>, err: &Error) -> anyhow::Result<()> {
        self.write_json(&ResultLine {
            task_id: id,
            status: Status::Failure,
            result: None,
            error: Some(err.into()),
        })
        .await
    }

    async fn write_stats(&mut self, stats: PoolStats) -> anyhow::Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Pool stats: {} busy, {} idle, {} queued, {} completed, {} failed",
            stats.busy_units,
            stats.idle_units,
            stats.queue_length,
            stats.completed_count,
            stats.failed_count
        );
        self.write_json(&StatsLine { stats }).await
    }
}

fn submit(
    pool: &WorkerPool,
    id: Option<TaskId>,
    kind: &str,
    payload: Value,
) -> taskpool_core::Result<TaskHandle> {
    let kind: TaskKind = kind.parse()?;
    let payload = TaskPayload::from_json(kind, payload)?;
    match id {
        Some(id) => pool.submit_with_id(id, payload),
        None => pool.submit(payload),
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => core::future::pending().await,
    }
}

/// Feeds `input` into `pool` until EOF or until `stop` resolves, then shuts
/// the pool down and writes the remaining results.
///
/// # Errors
///
/// Fails on I/O errors reading `input` or writing `output`. Bad request
/// lines are reported in the output, not as errors.
pub async fn run<R, W, S>(
    pool: &WorkerPool,
    input: R,
    output: W,
    stats_interval: Option<Duration>,
    stop: S,
) -> anyhow::Result<DriverSummary>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = BufReader::new(input).lines();
    let mut out = ResultWriter::new(output);
    let mut inflight: FuturesUnordered<TaskHandle> = FuturesUnordered::new();
    let mut summary = DriverSummary::default();
    let mut ticker = stats_interval.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop => {
                #[cfg(feature = "tracing")]
                tracing::info!("Stop requested, no further input is read");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Request>(line) {
                        Ok(Request::Cancel { cancel }) => {
                            let _cancelled = pool.cancel(cancel);
                            #[cfg(feature = "tracing")]
                            tracing::debug!("Cancel request for task {cancel}: {_cancelled}");
                        }
                        Ok(Request::Submit { id, kind, payload }) => {
                            match submit(pool, id, &kind, payload) {
                                Ok(handle) => {
                                    summary.accepted += 1;
                                    inflight.push(handle);
                                }
                                Err(err) => {
                                    summary.rejected += 1;
                                    // The id still belongs to the outstanding task.
                                    let id = match err {
                                        Error::DuplicateTaskId { .. } => None,
                                        _ => id,
                                    };
                                    out.write_rejection(id, &err).await?;
                                }
                            }
                        }
                        Err(err) => {
                            summary.rejected += 1;
                            out.write_rejection(None, &Error::from(err)).await?;
                        }
                    }
                }
                None => break,
            },
            Some(result) = inflight.next(), if !inflight.is_empty() => {
                out.write_result(&result, &mut summary).await?;
            }
            () = tick(&mut ticker) => out.write_stats(pool.stats()).await?,
        }
    }

    let (shutdown, drained) = tokio::join!(pool.shutdown(), async {
        while let Some(result) = inflight.next().await {
            out.write_result(&result, &mut summary).await?;
        }
        anyhow::Ok(())
    });
    shutdown?;
    drained?;

    if ticker.is_some() {
        out.write_stats(pool.stats()).await?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PoolConfig,
        pool::{ProtocolExecutor, TaskExecutor},
    };
    use parking_lot::{Condvar, Mutex};
    use std::{collections::HashMap, sync::Arc};

    /// Holds every task until released.
    #[derive(Default)]
    struct Latch {
        open: Mutex<bool>,
        cv: Condvar,
    }

    impl Latch {
        fn release(&self) {
            *self.open.lock() = true;
            self.cv.notify_all();
        }
    }

    struct LatchedExecutor(Arc<Latch>);

    impl TaskExecutor for LatchedExecutor {
        fn execute(&self, payload: &TaskPayload) -> taskpool_core::Result<TaskOutput> {
            let mut open = self.0.open.lock();
            while !*open {
                self.0.cv.wait(&mut open);
            }
            drop(open);
            ProtocolExecutor.execute(payload)
        }
    }

    async fn drive(input: &str, stats_interval: Option<Duration>) -> (DriverSummary, Vec<Value>) {
        let pool = WorkerPool::start(PoolConfig::new(2)).await.unwrap();
        let mut output = Vec::new();
        let summary = run(
            &pool,
            input.as_bytes(),
            &mut output,
            stats_interval,
            core::future::pending(),
        )
        .await
        .unwrap();
        let lines = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (summary, lines)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_line_per_task() {
        let input = r#"
{"kind": "compress", "payload": {"text": "aaabbbcc"}}
{"kind": "aggregate", "payload": {"operation": "median", "numbers": [1, 2, 3, 4]}}

{"kind": "sha256", "payload": {"text": "x"}}
not json
{"id": 42, "kind": "hash", "payload": {"text": "hello"}}
"#;
        let (summary, lines) = drive(input, None).await;
        assert_eq!(
            summary,
            DriverSummary {
                accepted: 3,
                rejected: 2,
                succeeded: 3,
                failed: 0,
            }
        );
        assert_eq!(lines.len(), 5);

        let by_id: HashMap<u64, &Value> = lines
            .iter()
            .filter_map(|line| Some((line["taskId"].as_u64()?, line)))
            .collect();
        assert_eq!(by_id[&1]["result"]["compressed"], "3a3b2c");
        assert_eq!(by_id[&2]["result"]["result"], 2.5);
        assert_eq!(by_id[&42]["status"], "success");
        assert_eq!(by_id[&42]["result"]["hash"], "5e918d2");

        let rejected: Vec<&Value> = lines.iter().filter(|l| l["taskId"].is_null()).collect();
        assert_eq!(rejected.len(), 2);
        for line in rejected {
            assert_eq!(line["status"], "failure");
            assert_eq!(line["error"]["code"], "ValidationError");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn execution_failures_are_reported_with_their_id() {
        let input = r#"{"id": 5, "kind": "compress", "payload": {"text": "aa", "algorithm": "lz4"}}"#;
        let (summary, lines) = drive(input, None).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["taskId"], 5);
        assert_eq!(lines[0]["status"], "failure");
        assert_eq!(lines[0]["error"]["code"], "UnsupportedOperationError");
        assert!(lines[0].get("result").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn final_stats_line_when_enabled() {
        let input = r#"{"kind": "hash", "payload": {"text": "a"}}"#;
        let (_, lines) = drive(input, Some(Duration::from_secs(60))).await;
        let stats = &lines.last().unwrap()["stats"];
        assert_eq!(stats["totalUnits"], 2);
        assert_eq!(stats["terminatedUnits"], 2);
        assert_eq!(stats["completedCount"], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_id_rejection_does_not_reuse_the_id() {
        let latch = Arc::new(Latch::default());
        let pool = WorkerPool::with_executor(
            PoolConfig::new(1).with_shutdown_timeout(Duration::from_millis(100)),
            LatchedExecutor(Arc::clone(&latch)),
        )
        .await
        .unwrap();

        let input = r#"{"id": 7, "kind": "hash", "payload": {"text": "first"}}
{"id": 7, "kind": "hash", "payload": {"text": "second"}}
"#;
        let mut output = Vec::new();
        let summary = run(
            &pool,
            input.as_bytes(),
            &mut output,
            None,
            core::future::pending(),
        )
        .await
        .unwrap();
        latch.release();

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        let tagged: Vec<&Value> = lines.iter().filter(|l| l["taskId"] == 7).collect();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0]["error"]["code"], "ShutdownTimeout");

        let rejected: Vec<&Value> = lines.iter().filter(|l| l["taskId"].is_null()).collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0]["error"]["code"], "DuplicateTaskId");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_signal_ends_input() {
        let pool = WorkerPool::start(PoolConfig::new(1)).await.unwrap();
        let (_writer, reader) = tokio::io::duplex(64);
        let mut output = Vec::new();
        let summary = run(&pool, reader, &mut output, None, async {}).await.unwrap();
        assert_eq!(summary, DriverSummary::default());
        assert!(pool.is_closed());
    }
}
