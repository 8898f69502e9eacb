//! Field normalisation: per-rule cleanup of coerced values.
//!
//! The rule for each field comes from the static schema table:
//!
//! | Rule      | Output                                   | Unusable input |
//! |-----------|------------------------------------------|----------------|
//! | `Date`    | `YYYY-MM-DD`                             | `""`           |
//! | `Numeric` | digits, at most one `.`, optional `-`    | `""`           |
//! | `Text`    | unchanged                                | n/a            |
//!
//! Every function here is total and idempotent: a normalised value
//! normalises to itself, which the property tests check.

use crate::output::CanonicalRecord;
use crate::schema::FieldRule;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Date layouts tried in order. Month-first wins for ambiguous slash dates.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%m.%d.%Y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %b %Y",
    "%d %b, %Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%m/%d/%y",
    "%d/%m/%y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

const OUTPUT_DATE_FORMAT: &str = "%Y-%m-%d";

/// "8th" → "8", "1st," → "1,"
static ORDINAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").unwrap());

static VALID_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?(\d+\.?\d*|\.\d+)$").unwrap());

/// Apply each field's rule across the whole record.
pub fn normalize(record: CanonicalRecord) -> CanonicalRecord {
    record.map_values(|section, field, value| {
        let normalized = normalize_value(field.rule, &value);
        if normalized.is_empty() && !value.is_empty() {
            debug!(
                "Cleared {}.{}: {:?} is not a valid {:?}",
                section.name, field.name, value, field.rule
            );
        }
        normalized
    })
}

pub fn normalize_value(rule: FieldRule, value: &str) -> String {
    match rule {
        FieldRule::Date => normalize_date(value),
        FieldRule::Numeric => normalize_numeric(value),
        FieldRule::Text => value.to_string(),
    }
}

/// Best-effort date parse to `YYYY-MM-DD`; `""` when nothing matches.
pub fn normalize_date(value: &str) -> String {
    parse_date(value)
        .filter(|d| (1000..=9999).contains(&d.year()))
        .map(|d| d.format(OUTPUT_DATE_FORMAT).to_string())
        .unwrap_or_default()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let cleaned = ORDINAL_SUFFIX.replace_all(value.trim(), "$1");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return None;
    }

    if let Some(date) = parse_date_only(&cleaned) {
        return Some(date);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&cleaned) {
        return Some(dt.date_naive());
    }
    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&cleaned, fmt).ok())
    {
        return Some(dt.date());
    }

    // "06/08/1969 10:30 AM": retry with the leading token alone.
    cleaned
        .split_once(' ')
        .and_then(|(head, _)| parse_date_only(head))
}

fn parse_date_only(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(text, fmt)
            .ok()
            // `%Y` happily reads "69" as year 69; leave two-digit years to `%y`.
            .filter(|d| !fmt.contains("%Y") || (1000..=9999).contains(&d.year()))
    })
}

/// Strip everything but digits, `.` and a leading `-`; `""` unless the
/// result is a well-formed number.
pub fn normalize_numeric(value: &str) -> String {
    let mut kept = String::with_capacity(value.len());
    for c in value.trim().chars() {
        match c {
            '0'..='9' | '.' => kept.push(c),
            '-' if kept.is_empty() => kept.push(c),
            _ => {}
        }
    }
    if VALID_NUMBER.is_match(&kept) {
        kept
    } else {
        String::new()
    }
}
