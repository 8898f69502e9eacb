//! Extraction entry points and the stage orchestrator.
//!
//! Every public function funnels into [`extract_document`], which runs the
//! stages once, in order, and stops at the first fatal error:
//!
//! ```text
//! content ─▶ mode ─▶ request ─▶ backend (deadline) ─▶ coerce ─▶ normalize
//! ```
//!
//! The orchestrator owns no policy of its own beyond that order. It does
//! not retry; [`Rx2JsonError::is_retryable`] tells the caller whether
//! running the whole thing again could help.

use crate::config::ExtractionConfig;
use crate::error::Rx2JsonError;
use crate::output::{self, ExtractionOutput, ExtractionStats, InspectReport};
use crate::pipeline::backend::{self, BackendError, ModelBackend};
use crate::pipeline::coerce;
use crate::pipeline::content::{self, DocumentSource};
use crate::pipeline::input;
use crate::pipeline::mode::select_mode;
use crate::pipeline::normalize::normalize;
use crate::pipeline::render::PdfiumDocument;
use crate::pipeline::request::build_request;
use crate::schema::CANONICAL_SCHEMA;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Extract a prescription PDF (file path or HTTP/HTTPS URL) into the
/// canonical record.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Every error is fatal for this document:
/// - unreadable input (missing, not a PDF, encrypted, corrupt)
/// - model backend unavailable or past its deadline
/// - a model response with no parseable JSON object
///
/// Missing or malformed *fields* are not errors; they come back as `""`.
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Rx2JsonError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let source = PdfiumDocument::new(input_str.trim(), resolved.path(), config.password.clone());
    // `resolved` keeps any downloaded temp file alive until we are done.
    extract_document(&source, config).await
}

/// Extract from PDF bytes held in memory.
///
/// The bytes are written to a managed temp file that is removed on return.
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Rx2JsonError> {
    let resolved = input::resolve_bytes(bytes, "prescription.pdf")?;
    let id = format!("<{} bytes>", bytes.len());
    let source = PdfiumDocument::new(id, resolved.path(), config.password.clone());
    extract_document(&source, config).await
}

/// Extract and write the record to `output_path` (atomic temp file + rename).
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
    pretty: bool,
) -> Result<ExtractionOutput, Rx2JsonError> {
    let output = extract(input_str, config).await?;
    output::write_record(&output.record, output_path.as_ref(), pretty).await?;
    info!("Wrote {}", output_path.as_ref().display());
    Ok(output)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Rx2JsonError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Rx2JsonError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(extract(input_str, config))
}

/// Read the text layer and report the mode that would be chosen, without
/// rendering pages or calling a model. Needs no API key.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<InspectReport, Rx2JsonError> {
    let input_str = input_str.as_ref();
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let source = PdfiumDocument::new(input_str.trim(), resolved.path(), config.password.clone());
    inspect_document(&source, config).await
}

/// [`inspect`] over any [`DocumentSource`].
pub async fn inspect_document(
    source: &dyn DocumentSource,
    config: &ExtractionConfig,
) -> Result<InspectReport, Rx2JsonError> {
    let layer = source.text_layer().await?;
    let is_text_sufficient = config.text_threshold().is_sufficient(&layer);
    Ok(InspectReport {
        text_chars: layer.char_count(),
        is_text_sufficient,
        mode: select_mode(is_text_sufficient, config.mode_override),
        metadata: layer.metadata,
    })
}

/// Run every stage against an already-opened document.
pub async fn extract_document(
    source: &dyn DocumentSource,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Rx2JsonError> {
    let total_start = Instant::now();
    let document = source.id().to_string();

    // ── Step 1: Backend ──────────────────────────────────────────────────
    let backend = resolve_backend(config)?;
    debug!("Using backend {}/{}", backend.provider(), backend.model());

    // ── Step 2: Content + mode ───────────────────────────────────────────
    let extracted = content::extract_content(source, config).await?;
    let mode = extracted.mode;

    // ── Step 3: Prompt ───────────────────────────────────────────────────
    let request = build_request(
        &extracted.content,
        mode,
        &CANONICAL_SCHEMA,
        &config.prompt_options(),
    );

    // ── Step 4: Model call ───────────────────────────────────────────────
    let llm_start = Instant::now();
    let raw = backend::invoke_with_deadline(backend.as_ref(), &request, config.api_deadline())
        .await
        .map_err(|e| model_error(e, backend.as_ref(), &document))?;
    let llm_duration_ms = llm_start.elapsed().as_millis() as u64;
    info!(
        "{}: model answered in {}ms ({} chars)",
        document,
        llm_duration_ms,
        raw.text.len()
    );

    // ── Step 5: Coerce ───────────────────────────────────────────────────
    let coerced = coerce::coerce(&raw, &CANONICAL_SCHEMA).map_err(|e| {
        Rx2JsonError::SchemaCoercion {
            document: document.clone(),
            detail: e.to_string(),
        }
    })?;

    // ── Step 6: Normalise ────────────────────────────────────────────────
    let record = normalize(coerced.record);

    let stats = ExtractionStats {
        text_chars: extracted.text_chars,
        is_text_sufficient: extracted.is_text_sufficient,
        pages_rendered: extracted.content.pages().len(),
        input_tokens: raw.input_tokens,
        output_tokens: raw.output_tokens,
        fields_filled: record.filled_count(),
        fields_defaulted: CANONICAL_SCHEMA.field_count() - record.filled_count(),
        dropped_keys: coerced.report.dropped_keys,
        content_duration_ms: extracted.duration_ms,
        llm_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {} ({} mode), {}/{} fields filled, {}ms total",
        document,
        mode,
        stats.fields_filled,
        CANONICAL_SCHEMA.field_count(),
        stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        document,
        mode,
        record,
        metadata: extracted.metadata,
        stats,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Injected backend first, otherwise one built from `config.provider`.
fn resolve_backend(config: &ExtractionConfig) -> Result<Arc<dyn ModelBackend>, Rx2JsonError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    backend::create_backend(&config.provider, config.generation_options())
}

fn model_error(e: BackendError, backend: &dyn ModelBackend, document: &str) -> Rx2JsonError {
    match e {
        BackendError::Timeout { secs } => Rx2JsonError::ModelTimeout {
            provider: backend.provider().to_string(),
            document: document.to_string(),
            secs,
        },
        BackendError::Unavailable(detail) => Rx2JsonError::ModelUnavailable {
            provider: backend.provider().to_string(),
            document: document.to_string(),
            detail,
        },
    }
}
