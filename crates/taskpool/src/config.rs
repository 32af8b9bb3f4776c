use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;
use taskpool_core::Error;

/// Default drain window granted to outstanding tasks on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Runtime configuration for the `taskpool` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file in the working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskpool",
    version,
    about = "Runs JSON-lines compute tasks on a fixed pool of parallel units"
)]
pub struct CliArgs {
    /// Number of computation units in the pool.
    ///
    /// The pool never grows or shrinks after start. Defaults to the number of
    /// logical CPUs.
    ///
    /// Environment variable: `NUM_UNITS`
    #[arg(long, env = "NUM_UNITS")]
    pub num_units: Option<usize>,

    /// How long shutdown waits for queued and running tasks, in milliseconds.
    ///
    /// Tasks still outstanding when the window elapses fail with
    /// `ShutdownTimeout`.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_MS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_MS", default_value_t = 5_000)]
    pub shutdown_timeout_ms: u64,

    /// Interval between pool statistics lines, in milliseconds. 0 disables
    /// them.
    ///
    /// Environment variable: `STATS_INTERVAL_MS`
    #[arg(long, env = "STATS_INTERVAL_MS", default_value_t = 0)]
    pub stats_interval_ms: u64,

    /// File to read task requests from instead of stdin.
    ///
    /// Environment variable: `TASKPOOL_INPUT`
    #[arg(long, env = "TASKPOOL_INPUT")]
    pub input: Option<PathBuf>,
}

/// Sizing and lifecycle settings of a [`crate::WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub num_units: usize,
    pub shutdown_timeout: Duration,
}

impl PoolConfig {
    pub const fn new(num_units: usize) -> Self {
        Self {
            num_units,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a pool without units.
    pub fn validate(&self) -> taskpool_core::Result<()> {
        if self.num_units == 0 {
            return Err(Error::InvalidConfig {
                reason: "a pool needs at least one unit".to_owned(),
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

/// Everything the driver binary needs, validated.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub pool: PoolConfig,
    pub stats_interval: Option<Duration>,
    pub input: Option<PathBuf>,
}

impl TryFrom<CliArgs> for DriverConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let num_units = args.num_units.unwrap_or_else(num_cpus::get);
        if num_units == 0 {
            bail!("NUM_UNITS must be greater than 0");
        }

        if args.shutdown_timeout_ms == 0 {
            bail!("SHUTDOWN_TIMEOUT_MS must be greater than 0");
        }

        let stats_interval =
            (args.stats_interval_ms > 0).then(|| Duration::from_millis(args.stats_interval_ms));

        Ok(Self {
            pool: PoolConfig::new(num_units)
                .with_shutdown_timeout(Duration::from_millis(args.shutdown_timeout_ms)),
            stats_interval,
            input: args.input,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<DriverConfig> {
        let args = CliArgs::try_parse_from(core::iter::once("taskpool").chain(args.iter().copied()))?;
        DriverConfig::try_from(args)
    }

    #[test]
    fn explicit_flags() {
        let config = parse(&[
            "--num-units",
            "3",
            "--shutdown-timeout-ms",
            "250",
            "--stats-interval-ms",
            "1000",
            "--input",
            "tasks.jsonl",
        ])
        .unwrap();
        assert_eq!(config.pool.num_units, 3);
        assert_eq!(config.pool.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.stats_interval, Some(Duration::from_secs(1)));
        assert_eq!(config.input, Some(PathBuf::from("tasks.jsonl")));
    }

    #[test]
    fn zero_units_is_rejected() {
        assert!(parse(&["--num-units", "0"]).is_err());
        assert!(matches!(
            PoolConfig::new(0).validate(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(parse(&["--num-units", "1", "--shutdown-timeout-ms", "0"]).is_err());
    }

    #[test]
    fn zero_stats_interval_disables_stats() {
        let config = parse(&["--num-units", "2", "--stats-interval-ms", "0"]).unwrap();
        assert_eq!(config.stats_interval, None);
    }
}
