//! Numeric aggregation over a list of numbers.

use crate::{Error, Result, TaskKind, protocol::round_to};
use serde::{Deserialize, Serialize};

/// Largest input accepted by `factorial`; 171! no longer fits in an `f64`.
pub const MAX_FACTORIAL_INPUT: f64 = 170.0;

/// Largest input accepted by `fibonacci`. The series is computed with the
/// naive recursion, so the bound keeps a single task in the sub-second range.
pub const MAX_FIBONACCI_INPUT: f64 = 40.0;

/// Largest number of decimal digits a result can be rounded to.
pub const MAX_PRECISION: u32 = 15;

const DEFAULT_PRECISION: u32 = 2;

const fn default_precision() -> u32 {
    DEFAULT_PRECISION
}

/// Reduction requested by an aggregate task.
///
/// Names outside the known set decode into [`AggregateOp::Other`] and are
/// reported as unsupported when the task runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AggregateOp {
    Sum,
    Average,
    Median,
    StandardDeviation,
    Factorial,
    Fibonacci,
    Other(String),
}

impl AggregateOp {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Median => "median",
            Self::StandardDeviation => "standardDeviation",
            Self::Factorial => "factorial",
            Self::Fibonacci => "fibonacci",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for AggregateOp {
    fn from(name: String) -> Self {
        match name.as_str() {
            "sum" => Self::Sum,
            "average" => Self::Average,
            "median" => Self::Median,
            "standardDeviation" => Self::StandardDeviation,
            "factorial" => Self::Factorial,
            "fibonacci" => Self::Fibonacci,
            _ => Self::Other(name),
        }
    }
}

impl From<AggregateOp> for String {
    fn from(op: AggregateOp) -> Self {
        match op {
            AggregateOp::Other(name) => name,
            known => known.as_str().to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatePayload {
    pub operation: AggregateOp,
    pub numbers: Vec<f64>,
    #[serde(default = "default_precision")]
    pub precision: u32,
}

impl AggregatePayload {
    pub fn new(operation: AggregateOp, numbers: impl Into<Vec<f64>>) -> Self {
        Self {
            operation,
            numbers: numbers.into(),
            precision: DEFAULT_PRECISION,
        }
    }

    #[must_use]
    pub const fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.precision > MAX_PRECISION {
            return Err(Error::validation(format!(
                "precision {} exceeds maximum of {MAX_PRECISION}",
                self.precision
            )));
        }

        if let Some(pos) = self.numbers.iter().position(|n| !n.is_finite()) {
            return Err(Error::validation(format!(
                "numbers[{pos}] is not a finite number"
            )));
        }

        match self.operation {
            AggregateOp::Average | AggregateOp::Median | AggregateOp::StandardDeviation
                if self.numbers.is_empty() =>
            {
                Err(Error::validation(format!(
                    "{} requires at least one number",
                    self.operation.as_str()
                )))
            }
            AggregateOp::Factorial => check_naturals(&self.numbers, MAX_FACTORIAL_INPUT, "factorial"),
            AggregateOp::Fibonacci => check_naturals(&self.numbers, MAX_FIBONACCI_INPUT, "fibonacci"),
            _ => Ok(()),
        }
    }
}

fn check_naturals(numbers: &[f64], max: f64, op: &str) -> Result<()> {
    for (pos, n) in numbers.iter().enumerate() {
        if *n < 0.0 || n.fract() != 0.0 || *n > max {
            return Err(Error::validation(format!(
                "{op} input numbers[{pos}] = {n} must be an integer in 0..={max}"
            )));
        }
    }
    Ok(())
}

/// Either a single rounded number or an element-wise series.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AggregateValue {
    Scalar(f64),
    Series(Vec<u64>),
}

impl AggregateValue {
    pub const fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Series(_) => None,
        }
    }

    pub fn as_series(&self) -> Option<&[u64]> {
        match self {
            Self::Series(v) => Some(v),
            Self::Scalar(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOutput {
    pub operation: String,
    pub result: AggregateValue,
    pub count: usize,
}

pub(crate) fn run(payload: &AggregatePayload) -> Result<AggregateOutput> {
    let numbers = &payload.numbers;
    let result = match &payload.operation {
        AggregateOp::Sum => AggregateValue::Scalar(sum(numbers)),
        AggregateOp::Average => AggregateValue::Scalar(sum(numbers) / numbers.len() as f64),
        AggregateOp::Median => AggregateValue::Scalar(median(numbers)),
        AggregateOp::StandardDeviation => AggregateValue::Scalar(std_dev(numbers)),
        AggregateOp::Factorial => {
            AggregateValue::Scalar(numbers.iter().map(|n| factorial(*n as u64)).sum())
        }
        AggregateOp::Fibonacci => {
            AggregateValue::Series(numbers.iter().map(|n| fibonacci(*n as u64)).collect())
        }
        AggregateOp::Other(name) => return Err(Error::unsupported(TaskKind::Aggregate, name)),
    };

    let result = match result {
        AggregateValue::Scalar(v) if !v.is_finite() => {
            return Err(Error::ExecutionFault {
                message: format!("{} result overflows f64", payload.operation.as_str()),
            });
        }
        AggregateValue::Scalar(v) => AggregateValue::Scalar(round_to(v, payload.precision)),
        series => series,
    };

    Ok(AggregateOutput {
        operation: payload.operation.as_str().to_owned(),
        result,
        count: numbers.len(),
    })
}

fn sum(numbers: &[f64]) -> f64 {
    numbers.iter().sum()
}

fn median(numbers: &[f64]) -> f64 {
    let mut sorted = numbers.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population standard deviation (divides by `n`).
fn std_dev(numbers: &[f64]) -> f64 {
    let n = numbers.len() as f64;
    let mean = sum(numbers) / n;
    let variance = numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

fn factorial(n: u64) -> f64 {
    (2..=n).fold(1.0, |acc, k| acc * k as f64)
}

fn fibonacci(n: u64) -> u64 {
    if n < 2 {
        n
    } else {
        fibonacci(n - 1) + fibonacci(n - 2)
    }
}
