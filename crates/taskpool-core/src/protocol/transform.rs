//! Bulk transforms over a dataset of JSON records.
//!
//! Each operation reads the original dataset and stores its output under
//! the operation's name, so operations never feed into one another.

use crate::{Error, Result, TaskKind};
use core::cmp::Ordering;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single dataset row.
pub type Record = serde_json::Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformPayload {
    pub dataset: Vec<Record>,
    pub operations: Vec<TransformOperation>,
}

impl TransformPayload {
    pub const fn new(dataset: Vec<Record>, operations: Vec<TransformOperation>) -> Self {
        Self {
            dataset,
            operations,
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        for (pos, op) in self.operations.iter().enumerate() {
            if op.name.is_empty() {
                return Err(Error::validation(format!(
                    "operations[{pos}] must have a non-empty name"
                )));
            }
            let field = match &op.step {
                TransformStep::Filter { conditions } => conditions
                    .iter()
                    .position(|c| c.field.is_empty())
                    .map(|i| format!("conditions[{i}].field")),
                TransformStep::Sort { field, .. }
                | TransformStep::Group { field }
                | TransformStep::Aggregate { field, .. } => {
                    field.is_empty().then(|| "field".to_owned())
                }
            };
            if let Some(field) = field {
                return Err(Error::validation(format!(
                    "operation `{}`: {field} must not be empty",
                    op.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformOperation {
    pub name: String,
    #[serde(flatten)]
    pub step: TransformStep,
}

impl TransformOperation {
    pub fn new(name: impl Into<String>, step: TransformStep) -> Self {
        Self {
            name: name.into(),
            step,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformStep {
    Filter {
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    Sort {
        field: String,
        #[serde(default)]
        direction: SortDirection,
    },
    Group {
        field: String,
    },
    Aggregate {
        field: String,
        operation: Reducer,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Comparator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Comparator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $text,)+
                    Self::Other(name) => name,
                }
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                match name.as_str() {
                    $($text => Self::$variant,)+
                    _ => Self::Other(name),
                }
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                match value {
                    $name::Other(name) => name,
                    known => known.as_str().to_owned(),
                }
            }
        }
    };
}

string_enum!(Comparator {
    Equals => "equals",
    NotEquals => "not_equals",
    GreaterThan => "greater_than",
    LessThan => "less_than",
    Contains => "contains",
    StartsWith => "starts_with",
    EndsWith => "ends_with",
});

string_enum!(Reducer {
    Sum => "sum",
    Count => "count",
    Average => "average",
    Min => "min",
    Max => "max",
});

/// Sort order. Anything other than `"desc"` sorts ascending.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl From<String> for SortDirection {
    fn from(value: String) -> Self {
        if value == "desc" { Self::Desc } else { Self::Asc }
    }
}

impl From<SortDirection> for String {
    fn from(value: SortDirection) -> Self {
        match value {
            SortDirection::Asc => "asc".to_owned(),
            SortDirection::Desc => "desc".to_owned(),
        }
    }
}

/// Output of one named operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TransformValue {
    Records(Vec<Record>),
    Groups(BTreeMap<String, Vec<Record>>),
    Number(f64),
}

impl TransformValue {
    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            Self::Records(r) => Some(r),
            _ => None,
        }
    }

    pub const fn as_groups(&self) -> Option<&BTreeMap<String, Vec<Record>>> {
        match self {
            Self::Groups(g) => Some(g),
            _ => None,
        }
    }

    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOutput {
    pub results: BTreeMap<String, TransformValue>,
    pub processed_records: usize,
}

pub(crate) fn run(payload: &TransformPayload) -> Result<TransformOutput> {
    let dataset = &payload.dataset;
    let mut results = BTreeMap::new();

    for op in &payload.operations {
        let value = match &op.step {
            TransformStep::Filter { conditions } => {
                let mut kept = Vec::new();
                for record in dataset {
                    if matches_all(record, conditions)? {
                        kept.push(record.clone());
                    }
                }
                TransformValue::Records(kept)
            }
            TransformStep::Sort { field, direction } => {
                let mut sorted = dataset.clone();
                sorted.sort_by(|a, b| {
                    let ord = compare_for_sort(a.get(field), b.get(field));
                    match direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    }
                });
                TransformValue::Records(sorted)
            }
            TransformStep::Group { field } => {
                let mut groups: BTreeMap<String, Vec<Record>> = BTreeMap::new();
                for record in dataset {
                    groups
                        .entry(group_key(record.get(field)))
                        .or_default()
                        .push(record.clone());
                }
                TransformValue::Groups(groups)
            }
            TransformStep::Aggregate { field, operation } => {
                TransformValue::Number(reduce(dataset, field, operation)?)
            }
        };
        results.insert(op.name.clone(), value);
    }

    Ok(TransformOutput {
        results,
        processed_records: dataset.len(),
    })
}

fn matches_all(record: &Record, conditions: &[Condition]) -> Result<bool> {
    for condition in conditions {
        if !matches(record.get(&condition.field), condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches(actual: Option<&Value>, condition: &Condition) -> Result<bool> {
    let expected = &condition.value;
    let hit = match &condition.operator {
        Comparator::Equals => actual.is_some_and(|a| loosely_equal(a, expected)),
        Comparator::NotEquals => !actual.is_some_and(|a| loosely_equal(a, expected)),
        Comparator::GreaterThan => {
            actual.and_then(|a| partial_compare(a, expected)) == Some(Ordering::Greater)
        }
        Comparator::LessThan => {
            actual.and_then(|a| partial_compare(a, expected)) == Some(Ordering::Less)
        }
        Comparator::Contains => text_test(actual, expected, |a, e| a.contains(e)),
        Comparator::StartsWith => text_test(actual, expected, |a, e| a.starts_with(e)),
        Comparator::EndsWith => text_test(actual, expected, |a, e| a.ends_with(e)),
        Comparator::Other(name) => return Err(Error::unsupported(TaskKind::Transform, name)),
    };
    Ok(hit)
}

/// Equality where `1` and `1.0` are the same number.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn partial_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_test(actual: Option<&Value>, expected: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    match (actual.and_then(as_text), as_text(expected)) {
        (Some(a), Some(e)) => test(&a, &e),
        _ => false,
    }
}

const fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn group_key(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "null".to_owned(),
    }
}

fn reduce(dataset: &[Record], field: &str, reducer: &Reducer) -> Result<f64> {
    let numbers = dataset
        .iter()
        .filter_map(|record| record.get(field).and_then(Value::as_f64));

    let value = match reducer {
        Reducer::Sum => numbers.sum(),
        Reducer::Count => dataset.len() as f64,
        Reducer::Average => {
            if dataset.is_empty() {
                0.0
            } else {
                numbers.sum::<f64>() / dataset.len() as f64
            }
        }
        Reducer::Min => numbers.fold(f64::INFINITY, f64::min),
        Reducer::Max => numbers.fold(f64::NEG_INFINITY, f64::max),
        Reducer::Other(name) => return Err(Error::unsupported(TaskKind::Transform, name)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Vec<Record> {
        let rows = json!([
            { "name": "ada", "dept": "eng", "age": 36, "city": "London" },
            { "name": "grace", "dept": "eng", "age": 45.0, "city": "Arlington" },
            { "name": "linus", "dept": "ops", "age": 28, "city": "Helsinki" },
            { "name": "barbara", "dept": "ops", "city": "Boston" },
        ]);
        serde_json::from_value(rows).unwrap()
    }

    fn run_one(step: TransformStep) -> Result<TransformValue> {
        let payload = TransformPayload::new(people(), vec![TransformOperation::new("out", step)]);
        payload.check()?;
        let mut out = run(&payload)?;
        assert_eq!(out.processed_records, 4);
        Ok(out.results.remove("out").unwrap())
    }

    fn names(records: &[Record]) -> Vec<&str> {
        records
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn filter_requires_all_conditions() {
        let value = run_one(TransformStep::Filter {
            conditions: vec![
                Condition::new("dept", Comparator::Equals, "eng"),
                Condition::new("age", Comparator::GreaterThan, 40),
            ],
        })
        .unwrap();
        assert_eq!(names(value.as_records().unwrap()), ["grace"]);
    }

    #[test]
    fn filter_string_comparators() {
        let value = run_one(TransformStep::Filter {
            conditions: vec![Condition::new("city", Comparator::StartsWith, "B")],
        })
        .unwrap();
        assert_eq!(names(value.as_records().unwrap()), ["barbara"]);

        let value = run_one(TransformStep::Filter {
            conditions: vec![Condition::new("city", Comparator::Contains, "ing")],
        })
        .unwrap();
        assert_eq!(names(value.as_records().unwrap()), ["grace"]);

        let value = run_one(TransformStep::Filter {
            conditions: vec![Condition::new("name", Comparator::EndsWith, "a")],
        })
        .unwrap();
        assert_eq!(names(value.as_records().unwrap()), ["ada", "barbara"]);
    }

    #[test]
    fn equality_treats_integers_and_floats_alike() {
        let value = run_one(TransformStep::Filter {
            conditions: vec![Condition::new("age", Comparator::Equals, 45)],
        })
        .unwrap();
        assert_eq!(names(value.as_records().unwrap()), ["grace"]);

        let value = run_one(TransformStep::Filter {
            conditions: vec![Condition::new("age", Comparator::NotEquals, 45)],
        })
        .unwrap();
        assert_eq!(names(value.as_records().unwrap()), ["ada", "linus", "barbara"]);
    }

    #[test]
    fn sort_is_stable_and_honours_direction() {
        let value = run_one(TransformStep::Sort {
            field: "dept".into(),
            direction: SortDirection::Asc,
        })
        .unwrap();
        assert_eq!(
            names(value.as_records().unwrap()),
            ["ada", "grace", "linus", "barbara"]
        );

        let value = run_one(TransformStep::Sort {
            field: "age".into(),
            direction: SortDirection::Desc,
        })
        .unwrap();
        // Missing values rank lowest, so they come last when descending.
        assert_eq!(
            names(value.as_records().unwrap()),
            ["grace", "ada", "linus", "barbara"]
        );
    }

    #[test]
    fn group_partitions_by_value() {
        let value = run_one(TransformStep::Group {
            field: "dept".into(),
        })
        .unwrap();
        let groups = value.as_groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(names(&groups["eng"]), ["ada", "grace"]);
        assert_eq!(names(&groups["ops"]), ["linus", "barbara"]);
    }

    #[test]
    fn aggregate_reducers() {
        let reduce = |op: Reducer| {
            run_one(TransformStep::Aggregate {
                field: "age".into(),
                operation: op,
            })
            .unwrap()
            .as_number()
            .unwrap()
        };
        assert_eq!(reduce(Reducer::Sum), 109.0);
        assert_eq!(reduce(Reducer::Count), 4.0);
        // Divides by the dataset length, including the row without an age.
        assert_eq!(reduce(Reducer::Average), 27.25);
        assert_eq!(reduce(Reducer::Min), 28.0);
        assert_eq!(reduce(Reducer::Max), 45.0);
    }

    #[test]
    fn unknown_comparator_is_unsupported() {
        let err = run_one(TransformStep::Filter {
            conditions: vec![Condition::new(
                "age",
                Comparator::from("between".to_owned()),
                1,
            )],
        })
        .unwrap_err();
        assert_eq!(err, Error::unsupported(TaskKind::Transform, "between"));
    }

    #[test]
    fn operations_decode_from_json() {
        let payload: TransformPayload = serde_json::from_value(json!({
            "dataset": [{ "x": 1 }, { "x": 3 }, { "x": 2 }],
            "operations": [
                { "name": "top", "type": "sort", "field": "x", "direction": "desc" },
                { "name": "total", "type": "aggregate", "field": "x", "operation": "sum" },
                { "name": "big", "type": "filter",
                  "conditions": [{ "field": "x", "operator": "greater_than", "value": 1 }] },
            ],
        }))
        .unwrap();
        payload.check().unwrap();

        let out = run(&payload).unwrap();
        assert_eq!(out.results["total"].as_number(), Some(6.0));
        assert_eq!(out.results["big"].as_records().unwrap().len(), 2);
        let top = out.results["top"].as_records().unwrap();
        assert_eq!(top[0]["x"], json!(3));
    }

    #[test]
    fn unknown_step_type_fails_to_decode() {
        let decoded = serde_json::from_value::<TransformPayload>(json!({
            "dataset": [],
            "operations": [{ "name": "p", "type": "pivot", "field": "x" }],
        }));
        assert!(decoded.is_err());
    }

    #[test]
    fn check_rejects_empty_names() {
        let payload = TransformPayload::new(
            Vec::new(),
            vec![TransformOperation::new(
                "",
                TransformStep::Group { field: "x".into() },
            )],
        );
        assert!(matches!(payload.check(), Err(Error::Validation { .. })));
    }
}
