//! Response coercion: raw model text → [`CanonicalRecord`].
//!
//! Models are asked for bare JSON but routinely wrap it in markdown fences,
//! prefix it with a sentence, or return a one-element array. Parsing tries,
//! in order:
//!
//! 1. the whole response as JSON
//! 2. the body of the first ```` ``` ```` fence
//! 3. each balanced `{…}` substring, leftmost first (bounded)
//! 4. the span from the first `{` to the last `}`
//!
//! The first candidate that yields a JSON object wins. Only when none does
//! is the response rejected. Once there is an object, nothing else is
//! fatal: each schema field is read if it is a scalar and defaulted to `""`
//! otherwise, and keys outside the schema are dropped.

use crate::output::CanonicalRecord;
use crate::pipeline::backend::RawModelResponse;
use crate::schema::CanonicalSchema;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on `{` positions tried by the balanced-brace scan.
const MAX_BRACE_CANDIDATES: usize = 32;

/// The response held no usable JSON object.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoercionError {
    #[error("response was empty")]
    Empty,

    #[error("no JSON object found in response starting {preview:?}")]
    NoJsonObject { preview: String },

    #[error("top-level JSON value is {found}, expected an object")]
    NotAnObject { found: &'static str },
}

/// How the JSON object was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Strict,
    Fenced,
    Embedded,
}

impl fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParseStrategy::Strict => "strict",
            ParseStrategy::Fenced => "fenced",
            ParseStrategy::Embedded => "embedded",
        })
    }
}

/// Bookkeeping from one coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionReport {
    pub strategy: ParseStrategy,
    /// Fields with a non-empty value.
    pub filled: usize,
    /// Fields left as `""`.
    pub defaulted: usize,
    /// Response keys outside the schema, as `section` or `section.field`.
    pub dropped_keys: Vec<String>,
}

/// A coerced record and how it was obtained.
#[derive(Debug, Clone)]
pub struct Coerced {
    pub record: CanonicalRecord,
    pub report: CoercionReport,
}

/// Coerce a model response into a record of `schema`'s exact shape.
pub fn coerce(
    response: &RawModelResponse,
    schema: &'static CanonicalSchema,
) -> Result<Coerced, CoercionError> {
    let (object, strategy) = parse_json_object(&response.text)?;
    let (record, mut report) = fill_record(&object, schema);
    report.strategy = strategy;

    debug!(
        "Coerced {} response: {} filled, {} defaulted",
        strategy, report.filled, report.defaulted
    );
    if !report.dropped_keys.is_empty() {
        warn!(
            "Dropped {} key(s) not in the schema: {}",
            report.dropped_keys.len(),
            report.dropped_keys.join(", ")
        );
    }
    Ok(Coerced { record, report })
}

/// Locate and parse the JSON object in `raw`.
pub fn parse_json_object(raw: &str) -> Result<(Map<String, Value>, ParseStrategy), CoercionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoercionError::Empty);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return into_object(value).map(|m| (m, ParseStrategy::Strict));
    }

    if let Some(body) = fenced_body(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if let Ok(object) = into_object(value) {
                return Ok((object, ParseStrategy::Fenced));
            }
        }
    }

    for start in trimmed
        .match_indices('{')
        .map(|(i, _)| i)
        .take(MAX_BRACE_CANDIDATES)
    {
        let Some(end) = balanced_end(trimmed, start) else {
            continue;
        };
        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&trimmed[start..end]) {
            return Ok((object, ParseStrategy::Embedded));
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(object)) =
                serde_json::from_str::<Value>(&trimmed[start..=end])
            {
                return Ok((object, ParseStrategy::Embedded));
            }
        }
    }

    Err(CoercionError::NoJsonObject {
        preview: trimmed.chars().take(60).collect(),
    })
}

/// Objects pass through; `[{…}, …]` yields its first element; a string
/// holding JSON is decoded once more.
fn into_object(value: Value) -> Result<Map<String, Value>, CoercionError> {
    match value {
        Value::Object(object) => Ok(object),
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(object)) => Ok(object),
            _ => Err(CoercionError::NotAnObject { found: "an array" }),
        },
        Value::String(inner) => match serde_json::from_str::<Value>(inner.trim()) {
            Ok(Value::Object(object)) => Ok(object),
            _ => Err(CoercionError::NotAnObject { found: "a string" }),
        },
        Value::Number(_) => Err(CoercionError::NotAnObject { found: "a number" }),
        Value::Bool(_) => Err(CoercionError::NotAnObject { found: "a boolean" }),
        Value::Null => Err(CoercionError::NotAnObject { found: "null" }),
    }
}

/// Body of the first markdown fence, language tag removed. An unclosed
/// fence (truncated response) runs to the end of the text.
fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    Some(body.trim())
}

/// Byte index just past the `}` that closes the `{` at `start`, skipping
/// braces inside string literals.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Scalar JSON → string; anything else → `None`.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn fill_record(
    object: &Map<String, Value>,
    schema: &'static CanonicalSchema,
) -> (CanonicalRecord, CoercionReport) {
    let mut dropped_keys = Vec::new();
    for (key, value) in object {
        match schema.section(key) {
            None => dropped_keys.push(key.clone()),
            Some(section) => {
                if let Value::Object(fields) = value {
                    dropped_keys.extend(
                        fields
                            .keys()
                            .filter(|k| section.position(k).is_none())
                            .map(|k| format!("{key}.{k}")),
                    );
                }
            }
        }
    }
    dropped_keys.sort();

    let record = CanonicalRecord::from_fn(schema, |section, field| {
        object
            .get(section.name)
            .and_then(Value::as_object)
            .and_then(|fields| fields.get(field.name))
            .and_then(scalar_to_string)
            .unwrap_or_default()
    });

    let filled = record.filled_count();
    let report = CoercionReport {
        strategy: ParseStrategy::Strict,
        filled,
        defaulted: schema.field_count() - filled,
        dropped_keys,
    };
    (record, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CANONICAL_SCHEMA;

    fn run(text: &str) -> Result<Coerced, CoercionError> {
        coerce(&RawModelResponse::new(text), &CANONICAL_SCHEMA)
    }

    #[test]
    fn subset_response_fills_the_rest_with_empty() {
        let out = run(r#"{"patient_information":{"patient_first_name":"Tracy","patient_dob":"6/8/1969"}}"#)
            .unwrap();
        let r = &out.record;
        assert_eq!(r.get("patient_information", "patient_first_name"), Some("Tracy"));
        assert_eq!(r.get("patient_information", "patient_dob"), Some("6/8/1969"));
        assert_eq!(r.get("payment", "payor"), Some(""));
        assert_eq!(out.report.filled, 2);
        assert_eq!(out.report.defaulted, CANONICAL_SCHEMA.field_count() - 2);
        assert_eq!(out.report.strategy, ParseStrategy::Strict);
    }

    #[test]
    fn fenced_json_is_recovered() {
        let out = run("```json\n{\"payment\":{\"payor\":\"Aetna\"}}\n```").unwrap();
        assert_eq!(out.record.get("payment", "payor"), Some("Aetna"));
        assert_eq!(out.report.strategy, ParseStrategy::Fenced);
    }

    #[test]
    fn unclosed_fence_is_recovered() {
        let out = run("```json\n{\"payment\":{\"payor\":\"Aetna\"}}").unwrap();
        assert_eq!(out.record.get("payment", "payor"), Some("Aetna"));
    }

    #[test]
    fn json_after_prose_is_recovered() {
        let out = run(
            "Sure! Here is the extraction {note: not json} and then \
             {\"clinical\":{\"patient_allergies\":\"penicillin {severe}\"}} hope it helps",
        )
        .unwrap();
        assert_eq!(
            out.record.get("clinical", "patient_allergies"),
            Some("penicillin {severe}")
        );
        assert_eq!(out.report.strategy, ParseStrategy::Embedded);
    }

    #[test]
    fn garbage_is_a_coercion_error() {
        assert!(matches!(
            run("I could not read this prescription."),
            Err(CoercionError::NoJsonObject { .. })
        ));
        assert_eq!(run("  \n").unwrap_err(), CoercionError::Empty);
        assert!(matches!(run("{ broken"), Err(CoercionError::NoJsonObject { .. })));
    }

    #[test]
    fn non_object_top_level_is_rejected() {
        assert_eq!(
            run("42").unwrap_err(),
            CoercionError::NotAnObject { found: "a number" }
        );
        assert_eq!(
            run("[1, 2]").unwrap_err(),
            CoercionError::NotAnObject { found: "an array" }
        );
    }

    #[test]
    fn array_of_objects_uses_the_first() {
        let out = run(r#"[{"payment":{"payor":"first"}},{"payment":{"payor":"second"}}]"#).unwrap();
        assert_eq!(out.record.get("payment", "payor"), Some("first"));
    }

    #[test]
    fn double_encoded_json_is_decoded() {
        let out = run(r#""{\"payment\":{\"payor_zip\":\"02139\"}}""#).unwrap();
        assert_eq!(out.record.get("payment", "payor_zip"), Some("02139"));
    }

    #[test]
    fn scalars_are_stringified_and_others_defaulted() {
        let out = run(
            r#"{"medication_prescription_data":{
                "days_supply":30,
                "unit_price":12.5,
                "pharmacy_notes":true,
                "drug_name":"  Lisinopril  ",
                "strength":null,
                "form":["tablet"],
                "sig":{"text":"1 daily"}
            }}"#,
        )
        .unwrap();
        let r = &out.record;
        let get = |f| r.get("medication_prescription_data", f).unwrap();
        assert_eq!(get("days_supply"), "30");
        assert_eq!(get("unit_price"), "12.5");
        assert_eq!(get("pharmacy_notes"), "true");
        assert_eq!(get("drug_name"), "Lisinopril");
        assert_eq!(get("strength"), "");
        assert_eq!(get("form"), "");
        assert_eq!(get("sig"), "");
    }

    #[test]
    fn unknown_keys_are_dropped_and_reported() {
        let out = run(
            r#"{"payment":{"payor":"Cash","tip":"5"},"confidence":0.9,"clinical":"none"}"#,
        )
        .unwrap();
        assert_eq!(out.report.dropped_keys, vec!["confidence", "payment.tip"]);
        assert_eq!(out.record.get("clinical", "patient_allergies"), Some(""));
        let json = serde_json::to_value(&out.record).unwrap();
        assert!(json.get("confidence").is_none());
        assert!(json["payment"].get("tip").is_none());
    }

    #[test]
    fn balanced_end_skips_string_braces() {
        let text = r#"x {"a":"}\"{","b":{"c":1}} y"#;
        let start = text.find('{').unwrap();
        let end = balanced_end(text, start).unwrap();
        assert_eq!(&text[start..end], r#"{"a":"}\"{","b":{"c":1}}"#);
        assert_eq!(balanced_end("{ {", 0), None);
    }
}
