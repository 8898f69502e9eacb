//! # edgequake-rx2json
//!
//! Turn prescription PDFs (digital e-prescriptions, scanned faxes, pharmacy
//! forms) into one canonical JSON record using LLMs.
//!
//! Every run yields the same shape: 7 sections and 99 string fields, in a
//! fixed order, with `""` for anything the document does not show. Dates
//! come back as `YYYY-MM-DD` and amounts as bare decimals, so downstream
//! form filling never has to guess.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file, URL download, or in-memory bytes
//!  ├─ 2. Content    text layer via pdfium; render pages only when needed
//!  ├─ 3. Mode       text-only / vision / hybrid from text sufficiency
//!  ├─ 4. Prompt     schema instruction + text + ordered page images
//!  ├─ 5. Model      edgequake-llm provider or Vertex AI, under a deadline
//!  ├─ 6. Coerce     recover the JSON object, force it into schema shape
//!  ├─ 7. Normalise  dates → YYYY-MM-DD, amounts → plain numbers
//!  └─ 8. Output     deterministic JSON + run stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_rx2json::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads OPENAI_API_KEY; use .provider("vertex") for Vertex AI.
//!     let config = ExtractionConfig::default();
//!     let output = extract("prescription.pdf", &config).await?;
//!     println!("{}", edgequake_rx2json::assemble_json(&output.record, true)?);
//!     eprintln!("mode: {}, fields filled: {}", output.mode, output.stats.fields_filled);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rx2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-rx2json = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{Rx2JsonError, Stage};
pub use extract::{
    extract, extract_document, extract_from_bytes, extract_sync, extract_to_file, inspect,
    inspect_document,
};
pub use output::{
    assemble_json, write_record, CanonicalRecord, DocumentMetadata, ExtractionOutput,
    ExtractionStats, InspectReport,
};
pub use pipeline::backend::{
    BackendError, GenerationOptions, ModelBackend, ProviderConfig, RawModelResponse,
};
pub use pipeline::content::{DocumentSource, PageImage, RasterOptions, TextLayer};
pub use pipeline::mode::ExtractionMode;
pub use pipeline::request::ModelRequest;
pub use schema::{CanonicalSchema, FieldRule, CANONICAL_SCHEMA};
