//! Output types: the canonical record, run statistics, and the assembler.
//!
//! [`CanonicalRecord`] stores its values positionally against a
//! `&'static` [`CanonicalSchema`], so a record cannot hold a key the schema
//! does not declare, and serialisation walks the schema table rather than a
//! hash map. The JSON produced by [`assemble_json`] is therefore
//! byte-identical for identical records, which is what downstream form
//! merges and golden-file tests rely on.

use crate::error::Rx2JsonError;
use crate::pipeline::mode::ExtractionMode;
use crate::schema::{CanonicalSchema, FieldSpec, SectionSpec};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use std::path::Path;

/// A schema-shaped record where every leaf is a (possibly empty) string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    schema: &'static CanonicalSchema,
    values: Vec<Vec<String>>,
}

impl CanonicalRecord {
    /// A record with every field set to `""`.
    pub fn empty(schema: &'static CanonicalSchema) -> Self {
        Self::from_fn(schema, |_, _| String::new())
    }

    /// Build a record by asking `value` for each `(section, field)` in
    /// canonical order.
    pub fn from_fn<F>(schema: &'static CanonicalSchema, mut value: F) -> Self
    where
        F: FnMut(&'static SectionSpec, &'static FieldSpec) -> String,
    {
        let values = schema
            .sections()
            .iter()
            .map(|section| section.fields.iter().map(|f| value(section, f)).collect())
            .collect();
        Self { schema, values }
    }

    pub fn schema(&self) -> &'static CanonicalSchema {
        self.schema
    }

    /// Value of `section.field`, or `None` if the schema has no such field.
    pub fn get(&self, section: &str, field: &str) -> Option<&str> {
        let s = self.schema.section_position(section)?;
        let f = self.schema.sections()[s].position(field)?;
        Some(self.values[s][f].as_str())
    }

    /// Overwrite `section.field`. Returns `false` (and changes nothing) when
    /// the field is not part of the schema.
    pub fn set(&mut self, section: &str, field: &str, value: impl Into<String>) -> bool {
        let Some(s) = self.schema.section_position(section) else {
            return false;
        };
        let Some(f) = self.schema.sections()[s].position(field) else {
            return false;
        };
        self.values[s][f] = value.into();
        true
    }

    /// Iterate sections in canonical order with their values.
    pub fn sections(&self) -> impl Iterator<Item = (&'static SectionSpec, &[String])> {
        self.schema
            .sections()
            .iter()
            .zip(self.values.iter().map(Vec::as_slice))
    }

    /// Transform every leaf, keeping the shape.
    pub fn map_values<F>(self, mut f: F) -> Self
    where
        F: FnMut(&'static SectionSpec, &'static FieldSpec, String) -> String,
    {
        let schema = self.schema;
        let values = schema
            .sections()
            .iter()
            .zip(self.values)
            .map(|(section, vals)| {
                section
                    .fields
                    .iter()
                    .zip(vals)
                    .map(|(field, v)| f(section, field, v))
                    .collect()
            })
            .collect();
        Self { schema, values }
    }

    /// Number of non-empty leaves.
    pub fn filled_count(&self) -> usize {
        self.values.iter().flatten().filter(|v| !v.is_empty()).count()
    }
}

impl Serialize for CanonicalRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (section, values) in self.sections() {
            map.serialize_entry(section.name, &SectionView { section, values })?;
        }
        map.end()
    }
}

struct SectionView<'a> {
    section: &'static SectionSpec,
    values: &'a [String],
}

impl Serialize for SectionView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (field, value) in self.section.fields.iter().zip(self.values) {
            map.serialize_entry(field.name, value)?;
        }
        map.end()
    }
}

/// Serialise a record in canonical section/field order.
pub fn assemble_json(record: &CanonicalRecord, pretty: bool) -> Result<String, Rx2JsonError> {
    let json = if pretty {
        serde_json::to_string_pretty(record)
    } else {
        serde_json::to_string(record)
    };
    json.map_err(|e| Rx2JsonError::Internal(format!("Failed to serialise record: {e}")))
}

/// Write the assembled record to `path` atomically (temp file + rename).
pub async fn write_record(
    record: &CanonicalRecord,
    path: &Path,
    pretty: bool,
) -> Result<(), Rx2JsonError> {
    let mut json = assemble_json(record, pretty)?;
    json.push('\n');

    let write_err = |source| Rx2JsonError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Document-level metadata read from the PDF.
#[derive(Debug, Clone, Default, serde::Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Counters and timings for one extraction run.
#[derive(Debug, Clone, Default, serde::Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Non-whitespace characters in the selectable text layer.
    pub text_chars: usize,
    pub is_text_sufficient: bool,
    pub pages_rendered: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Schema fields with a non-empty value after coercion.
    pub fields_filled: usize,
    /// Schema fields left as `""`.
    pub fields_defaulted: usize,
    /// Keys in the response that are not in the schema.
    pub dropped_keys: Vec<String>,
    pub content_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything one extraction run produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExtractionOutput {
    pub document: String,
    pub mode: ExtractionMode,
    pub record: CanonicalRecord,
    pub metadata: DocumentMetadata,
    pub stats: ExtractionStats,
}

/// What [`crate::inspect`] learns without calling a model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InspectReport {
    pub metadata: DocumentMetadata,
    pub text_chars: usize,
    pub is_text_sufficient: bool,
    /// Mode the pipeline would pick with the given config.
    pub mode: ExtractionMode,
}
