//! Error types for the edgequake-rx2json library.
//!
//! Every variant of [`Rx2JsonError`] is **fatal** for the extraction run that
//! produced it. They fall into four families:
//!
//! * **Document read**: the source is missing, not a PDF, encrypted, or
//!   corrupt. The cause is not transient; retrying will not help.
//! * **Model unavailable**: transport or authentication failure talking to
//!   the backend. Surfaced as-is; retry is the caller's policy.
//! * **Model timeout**: the backend exceeded the configured deadline.
//! * **Schema coercion**: the model answered, but nothing in the answer
//!   could be parsed as a JSON object.
//!
//! Individual missing or malformed *fields* are never errors: they resolve to
//! an empty string during coercion and normalisation.
//!
//! Each variant carries the document identifier (path or URL) where one is
//! known, and [`Rx2JsonError::stage`] names the pipeline stage that failed,
//! so callers can log one line and decide whether to re-run the pipeline.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage in which a fatal error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Configuration,
    Input,
    TextExtraction,
    Rendering,
    ModelInvocation,
    Coercion,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configuration => "configuration",
            Stage::Input => "input",
            Stage::TextExtraction => "text extraction",
            Stage::Rendering => "page rendering",
            Stage::ModelInvocation => "model invocation",
            Stage::Coercion => "response coercion",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

/// All fatal errors returned by the edgequake-rx2json library.
#[derive(Debug, Error)]
pub enum Rx2JsonError {
    // ── Document read errors ──────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Prescription file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF requires a password but none was provided.
    #[error("PDF '{document}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { document: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{document}'")]
    WrongPassword { document: String },

    /// The PDF could not be read: corrupt structure, zero pages, or a page
    /// that pdfium refused to extract or rasterise.
    #[error("Cannot read document '{document}' during {stage}: {reason}")]
    DocumentRead {
        document: String,
        stage: Stage,
        reason: String,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library next to the\n\
rx2json executable, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider cannot be constructed (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Transport or authentication failure talking to the model backend.
    #[error("Model backend '{provider}' unavailable while extracting '{document}': {detail}")]
    ModelUnavailable {
        provider: String,
        document: String,
        detail: String,
    },

    /// The backend did not answer within the configured deadline.
    #[error("Model backend '{provider}' timed out after {secs}s while extracting '{document}'\nIncrease --api-timeout.")]
    ModelTimeout {
        provider: String,
        document: String,
        secs: u64,
    },

    // ── Coercion errors ───────────────────────────────────────────────────
    /// The model response contained no parseable JSON object at all.
    #[error("Model response for '{document}' contained no parseable JSON object: {detail}")]
    SchemaCoercion { document: String, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Rx2JsonError {
    /// The pipeline stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Rx2JsonError::FileNotFound { .. }
            | Rx2JsonError::PermissionDenied { .. }
            | Rx2JsonError::InvalidInput { .. }
            | Rx2JsonError::DownloadFailed { .. }
            | Rx2JsonError::DownloadTimeout { .. }
            | Rx2JsonError::NotAPdf { .. } => Stage::Input,
            Rx2JsonError::PasswordRequired { .. }
            | Rx2JsonError::WrongPassword { .. }
            | Rx2JsonError::PdfiumBindingFailed(_) => Stage::TextExtraction,
            Rx2JsonError::DocumentRead { stage, .. } => *stage,
            Rx2JsonError::ProviderNotConfigured { .. } | Rx2JsonError::InvalidConfig(_) => {
                Stage::Configuration
            }
            Rx2JsonError::ModelUnavailable { .. } | Rx2JsonError::ModelTimeout { .. } => {
                Stage::ModelInvocation
            }
            Rx2JsonError::SchemaCoercion { .. } => Stage::Coercion,
            Rx2JsonError::OutputWriteFailed { .. } => Stage::Output,
            Rx2JsonError::Internal(_) => Stage::Configuration,
        }
    }

    /// True for the "document unreadable" family. These abort the pipeline
    /// and are never worth retrying.
    pub fn is_document_read(&self) -> bool {
        matches!(
            self,
            Rx2JsonError::FileNotFound { .. }
                | Rx2JsonError::PermissionDenied { .. }
                | Rx2JsonError::InvalidInput { .. }
                | Rx2JsonError::DownloadFailed { .. }
                | Rx2JsonError::DownloadTimeout { .. }
                | Rx2JsonError::NotAPdf { .. }
                | Rx2JsonError::PasswordRequired { .. }
                | Rx2JsonError::WrongPassword { .. }
                | Rx2JsonError::DocumentRead { .. }
        )
    }

    /// Whether re-running the whole pipeline might succeed.
    ///
    /// The library never retries on its own; this is input for the caller's
    /// retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Rx2JsonError::ModelUnavailable { .. }
                | Rx2JsonError::ModelTimeout { .. }
                | Rx2JsonError::DownloadTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_timeout_display() {
        let e = Rx2JsonError::ModelTimeout {
            provider: "openai".into(),
            document: "rx.pdf".into(),
            secs: 120,
        };
        let msg = e.to_string();
        assert!(msg.contains("120s"), "got: {msg}");
        assert!(msg.contains("rx.pdf"), "got: {msg}");
        assert_eq!(e.stage(), Stage::ModelInvocation);
        assert!(e.is_retryable());
    }

    #[test]
    fn model_unavailable_carries_context() {
        let e = Rx2JsonError::ModelUnavailable {
            provider: "vertex".into(),
            document: "scan.pdf".into(),
            detail: "HTTP 403".into(),
        };
        assert!(e.to_string().contains("vertex"));
        assert!(e.to_string().contains("scan.pdf"));
        assert!(e.to_string().contains("HTTP 403"));
        assert!(!e.is_document_read());
    }

    #[test]
    fn document_read_reports_stage() {
        let e = Rx2JsonError::DocumentRead {
            document: "broken.pdf".into(),
            stage: Stage::Rendering,
            reason: "page 2: bad xref".into(),
        };
        assert!(e.to_string().contains("page rendering"));
        assert_eq!(e.stage(), Stage::Rendering);
        assert!(e.is_document_read());
        assert!(!e.is_retryable());
    }

    #[test]
    fn schema_coercion_is_fatal_and_not_retryable() {
        let e = Rx2JsonError::SchemaCoercion {
            document: "rx.pdf".into(),
            detail: "no '{' found".into(),
        };
        assert_eq!(e.stage(), Stage::Coercion);
        assert!(!e.is_retryable());
    }

    #[test]
    fn input_errors_are_document_read() {
        let e = Rx2JsonError::NotAPdf {
            path: PathBuf::from("notes.txt"),
            magic: *b"hell",
        };
        assert!(e.is_document_read());
        assert_eq!(e.stage(), Stage::Input);
    }
}
