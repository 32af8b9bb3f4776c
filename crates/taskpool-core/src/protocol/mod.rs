//! The task protocol: per-kind payloads, outputs and algorithms.
//!
//! Every algorithm is a pure function of its payload. [`execute`] is the
//! single entry point a computation unit calls; it never looks at anything
//! but the payload it is given.
//!
//! ## Structure
//!
//! - [`aggregate`] - numeric reductions and series (sum, median, ...).
//! - [`transform`] - filter/sort/group/aggregate over JSON records.
//! - [`text`] - text statistics, keywords and sentiment.
//! - [`hash`] - 32-bit rolling hash (non-cryptographic).
//! - [`compress`] - run-length encoding.
//! - [`schema`] - required-field and per-field validation of JSON data.

pub mod aggregate;
pub mod compress;
pub mod hash;
pub mod schema;
pub mod text;
pub mod transform;

use crate::{Result, TaskOutput, TaskPayload};

/// Runs the algorithm matching the payload's kind.
///
/// # Errors
///
/// Returns [`crate::Error::UnsupportedOperation`] when the payload names a
/// sub-operation the kind does not implement.
pub fn execute(payload: &TaskPayload) -> Result<TaskOutput> {
    match payload {
        TaskPayload::Aggregate(p) => aggregate::run(p).map(TaskOutput::Aggregate),
        TaskPayload::Transform(p) => transform::run(p).map(TaskOutput::Transform),
        TaskPayload::TextAnalyze(p) => Ok(TaskOutput::TextAnalyze(text::analyze(p))),
        TaskPayload::Hash(p) => Ok(TaskOutput::Hash(hash::run(p))),
        TaskPayload::Compress(p) => compress::run(p).map(TaskOutput::Compress),
        TaskPayload::Validate(p) => Ok(TaskOutput::Validate(schema::run(p))),
    }
}

/// Rounds `value` to `digits` decimal places, half away from zero.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10_f64.powi(digits as i32);
    let scaled = (value * factor).round();
    if scaled.is_finite() {
        scaled / factor
    } else {
        value
    }
}
