//! Schema validation of a JSON object.
//!
//! Every violation is collected; nothing short-circuits. Problems with the
//! schema itself that do not make the payload malformed (unknown field
//! types, undeclared data keys) are reported as warnings.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatePayload {
    pub schema: Schema,
    pub data: serde_json::Map<String, Value>,
}

impl ValidatePayload {
    pub const fn new(schema: Schema, data: serde_json::Map<String, Value>) -> Self {
        Self { schema, data }
    }

    pub(crate) fn check(&self) -> Result<()> {
        for (pos, rule) in self.schema.fields.iter().enumerate() {
            if rule.name.is_empty() {
                return Err(Error::validation(format!(
                    "schema.fields[{pos}] must have a non-empty name"
                )));
            }
            if let (Some(min), Some(max)) = (rule.min_length, rule.max_length) {
                if min > max {
                    return Err(Error::validation(format!(
                        "schema field `{}`: minLength {min} exceeds maxLength {max}",
                        rule.name
                    )));
                }
            }
            if let (Some(min), Some(max)) = (rule.min, rule.max) {
                if min > max {
                    return Err(Error::validation(format!(
                        "schema field `{}`: min {min} exceeds max {max}",
                        rule.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldRule>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FieldRule {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
        }
    }

    #[must_use]
    pub const fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    #[must_use]
    pub const fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    Number,
    Email,
    Url,
    Other(std::string::String),
}

impl From<std::string::String> for FieldType {
    fn from(name: std::string::String) -> Self {
        match name.as_str() {
            "string" => Self::String,
            "number" => Self::Number,
            "email" => Self::Email,
            "url" => Self::Url,
            _ => Self::Other(name),
        }
    }
}

impl From<FieldType> for std::string::String {
    fn from(value: FieldType) -> Self {
        match value {
            FieldType::String => "string".to_owned(),
            FieldType::Number => "number".to_owned(),
            FieldType::Email => "email".to_owned(),
            FieldType::Url => "url".to_owned(),
            FieldType::Other(name) => name,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub(crate) fn run(payload: &ValidatePayload) -> ValidationReport {
    let ValidatePayload { schema, data } = payload;
    let mut report = ValidationReport::default();

    for name in &schema.required {
        if !data.contains_key(name) {
            report.errors.push(format!("Field '{name}' is required"));
        }
    }

    for rule in &schema.fields {
        match data.get(&rule.name) {
            None | Some(Value::Null) => {}
            Some(value) => check_field(rule, value, &mut report),
        }
    }

    let described: BTreeSet<&str> = schema
        .required
        .iter()
        .map(String::as_str)
        .chain(schema.fields.iter().map(|f| f.name.as_str()))
        .collect();
    for key in data.keys() {
        if !described.contains(key.as_str()) {
            report
                .warnings
                .push(format!("Field '{key}' is not described by the schema"));
        }
    }

    report.is_valid = report.errors.is_empty();
    report
}

fn check_field(rule: &FieldRule, value: &Value, report: &mut ValidationReport) {
    let name = &rule.name;
    match &rule.field_type {
        FieldType::String => {
            let Some(s) = value.as_str() else {
                report.errors.push(format!("Field '{name}' must be a string"));
                return;
            };
            let len = s.chars().count();
            if let Some(min) = rule.min_length.filter(|min| len < *min) {
                report
                    .errors
                    .push(format!("Field '{name}' must be at least {min} characters"));
            }
            if let Some(max) = rule.max_length.filter(|max| len > *max) {
                report
                    .errors
                    .push(format!("Field '{name}' must be at most {max} characters"));
            }
        }
        FieldType::Number => {
            let Some(n) = value.as_f64() else {
                report.errors.push(format!("Field '{name}' must be a number"));
                return;
            };
            if let Some(min) = rule.min.filter(|min| n < *min) {
                report
                    .errors
                    .push(format!("Field '{name}' must be at least {min}"));
            }
            if let Some(max) = rule.max.filter(|max| n > *max) {
                report
                    .errors
                    .push(format!("Field '{name}' must be at most {max}"));
            }
        }
        FieldType::Email => {
            if !value.as_str().is_some_and(is_email) {
                report
                    .errors
                    .push(format!("Field '{name}' must be a valid email address"));
            }
        }
        FieldType::Url => {
            if !value.as_str().is_some_and(|s| url::Url::parse(s).is_ok()) {
                report
                    .errors
                    .push(format!("Field '{name}' must be a valid URL"));
            }
        }
        FieldType::Other(kind) => report.warnings.push(format!(
            "Field '{name}' has unknown type '{kind}'; rule skipped"
        )),
    }
}

/// `local@domain.tld`: no whitespace, exactly one `@`, and a dot inside the
/// domain with text on both sides. Accepts exactly what the pattern
/// `^[^\s@]+@[^\s@]+\.[^\s@]+$` accepts.
fn is_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(payload: serde_json::Value) -> ValidationReport {
        let payload: ValidatePayload = serde_json::from_value(payload).unwrap();
        payload.check().unwrap();
        run(&payload)
    }

    #[test]
    fn rejects_malformed_email() {
        let report = validate(json!({
            "schema": { "required": ["email"], "fields": [{ "name": "email", "type": "email" }] },
            "data": { "email": "not-an-email" },
        }));
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("email"), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn email_shapes() {
        assert!(is_email("ada@example.com"));
        assert!(is_email("a.b+c@mail.example.org"));
        assert!(!is_email("ada@example"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("ada@@example.com"));
        assert!(!is_email("ada @example.com"));
        assert!(!is_email("ada@.com"));
        assert!(!is_email("ada@example."));
        // Dots may repeat or lead as long as one splits the domain.
        assert!(is_email("ada@example..com"));
        assert!(is_email("ada@.example.com"));
    }

    #[test]
    fn accumulates_every_violation() {
        let report = validate(json!({
            "schema": {
                "required": ["name", "age", "site"],
                "fields": [
                    { "name": "name", "type": "string", "minLength": 3, "maxLength": 5 },
                    { "name": "age", "type": "number", "min": 0, "max": 130 },
                    { "name": "site", "type": "url" },
                    { "name": "nick", "type": "string", "maxLength": 2 },
                ],
            },
            "data": { "name": "al", "age": 200, "nick": 7 },
        }));
        assert!(!report.is_valid);
        assert_eq!(
            report.errors,
            [
                "Field 'site' is required",
                "Field 'name' must be at least 3 characters",
                "Field 'age' must be at most 130",
                "Field 'nick' must be a string",
            ]
        );
    }

    #[test]
    fn valid_data_passes() {
        let report = validate(json!({
            "schema": {
                "required": ["site"],
                "fields": [
                    { "name": "site", "type": "url" },
                    { "name": "score", "type": "number", "min": 0 },
                ],
            },
            "data": { "site": "https://example.com/a?b=c", "score": 0 },
        }));
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn invalid_url_and_type_mismatch() {
        let report = validate(json!({
            "schema": { "fields": [
                { "name": "site", "type": "url" },
                { "name": "count", "type": "number" },
            ] },
            "data": { "site": "not a url", "count": "3" },
        }));
        assert_eq!(
            report.errors,
            ["Field 'site' must be a valid URL", "Field 'count' must be a number"]
        );
    }

    #[test]
    fn warnings_do_not_invalidate() {
        let report = validate(json!({
            "schema": { "fields": [{ "name": "color", "type": "hex" }] },
            "data": { "color": "#fff", "extra": true },
        }));
        assert!(report.is_valid);
        assert_eq!(
            report.warnings,
            [
                "Field 'color' has unknown type 'hex'; rule skipped",
                "Field 'extra' is not described by the schema",
            ]
        );
    }

    #[test]
    fn check_rejects_inverted_bounds() {
        let rule = FieldRule::new("n", FieldType::Number).with_range(Some(5.0), Some(1.0));
        let payload = ValidatePayload::new(
            Schema {
                required: Vec::new(),
                fields: vec![rule],
            },
            serde_json::Map::new(),
        );
        assert!(matches!(payload.check(), Err(Error::Validation { .. })));
    }
}
