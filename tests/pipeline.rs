//! Orchestrator tests driven by an in-memory document and a scripted model.
//!
//! No pdfium, no network: [`StaticDocument`] stands in for the PDF and
//! [`ScriptedBackend`] returns a canned answer while recording every request
//! it receives.

use async_trait::async_trait;
use edgequake_rx2json::{
    assemble_json, extract_document, inspect_document, write_record, BackendError,
    DocumentMetadata, DocumentSource, ExtractionConfig, ExtractionMode, ModelBackend,
    ModelRequest, PageImage, RasterOptions, RawModelResponse, Rx2JsonError, Stage, TextLayer,
    CANONICAL_SCHEMA,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test doubles ─────────────────────────────────────────────────────────────

struct StaticDocument {
    id: String,
    pages: Vec<String>,
    images: Vec<PageImage>,
    unreadable: bool,
    render_calls: AtomicUsize,
}

impl StaticDocument {
    fn new(id: &str, pages: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            pages: pages.iter().map(|p| p.to_string()).collect(),
            images: Vec::new(),
            unreadable: false,
            render_calls: AtomicUsize::new(0),
        }
    }

    fn with_images(mut self, page_nums: &[usize]) -> Self {
        self.images = page_nums
            .iter()
            .map(|&n| PageImage {
                page_num: n,
                width: 10,
                height: 10,
                png: vec![n as u8; 8],
            })
            .collect();
        self
    }

    fn unreadable(mut self) -> Self {
        self.unreadable = true;
        self
    }

    fn renders(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for StaticDocument {
    fn id(&self) -> &str {
        &self.id
    }

    async fn text_layer(&self) -> Result<TextLayer, Rx2JsonError> {
        if self.unreadable {
            return Err(Rx2JsonError::DocumentRead {
                document: self.id.clone(),
                stage: Stage::TextExtraction,
                reason: "corrupt xref table".into(),
            });
        }
        Ok(TextLayer {
            pages: self.pages.clone(),
            metadata: DocumentMetadata {
                page_count: self.pages.len(),
                pdf_version: "Pdf1_7".into(),
                ..Default::default()
            },
        })
    }

    async fn render_pages(&self, _options: RasterOptions) -> Result<Vec<PageImage>, Rx2JsonError> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.images.clone())
    }
}

struct ScriptedBackend {
    reply: Result<RawModelResponse, BackendError>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedBackend {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(RawModelResponse {
                text: text.to_string(),
                input_tokens: 1200,
                output_tokens: 300,
            }),
            delay: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing(err: BackendError) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(err),
            delay: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(RawModelResponse::new("{}")),
            delay: Some(delay),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<RawModelResponse, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone()
    }
}

/// Library logs go to the test writer; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config_with(backend: &Arc<ScriptedBackend>) -> ExtractionConfig {
    init_tracing();
    ExtractionConfig::builder()
        .backend(backend.clone() as Arc<dyn ModelBackend>)
        .build()
        .unwrap()
}

const TRACY_TEXT: &str = "\
ACME FAMILY PHARMACY    Order #RX-2024-00817    Date: 03/01/2024
Patient: Tracy Nguyen    DOB: 6/8/1969    Gender: F
Address: 42 Elm Street, Springfield, IL 62704    Phone: (217) 555-0142
Insurance: Blue Cross Blue Shield    Member ID: XJH123456789    Group: 00451
Prescriber: Dr. Alan Reyes, MD    NPI: 1234567893    DEA: AR1234563
Clinic: Springfield Internal Medicine, 900 Main St, Springfield, IL 62701
Rx: Lisinopril 10 mg tablet    NDC: 0071-0155-23
Sig: Take one tablet by mouth once daily for blood pressure.
Qty: 30    Days supply: 30    Refills: 2    Unit price: $12.50
Allergies: Penicillin (rash)";

const TRACY_REPLY: &str = r#"{
  "order_metadata": {"order_id": "RX-2024-00817", "order_date": "03/01/2024"},
  "patient_information": {
    "patient_first_name": "Tracy",
    "patient_last_name": "Nguyen",
    "patient_dob": "6/8/1969",
    "patient_gender": "F"
  },
  "medication_prescription_data": {
    "drug_name": "Lisinopril",
    "quantity_dispensed": "30",
    "refills_remaining": 2,
    "unit_price": "$12.50"
  },
  "confidence": "high"
}"#;

// ── Digital prescription ─────────────────────────────────────────────────────

#[tokio::test]
async fn tracy_digital_prescription_end_to_end() {
    let doc = StaticDocument::new("tracy.pdf", &[TRACY_TEXT]);
    let backend = ScriptedBackend::replying(TRACY_REPLY);
    let output = extract_document(&doc, &config_with(&backend)).await.unwrap();

    // Plenty of selectable text: no rendering, no images.
    assert_eq!(output.mode, ExtractionMode::TextOnly);
    assert!(output.stats.is_text_sufficient);
    assert_eq!(doc.renders(), 0);
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].images.is_empty());
    assert!(requests[0].user_text.contains("Patient: Tracy Nguyen"));

    let r = &output.record;
    assert_eq!(r.get("patient_information", "patient_first_name"), Some("Tracy"));
    assert_eq!(r.get("patient_information", "patient_dob"), Some("1969-06-08"));
    assert_eq!(r.get("order_metadata", "order_date"), Some("2024-03-01"));
    assert_eq!(r.get("medication_prescription_data", "unit_price"), Some("12.50"));
    assert_eq!(r.get("medication_prescription_data", "refills_remaining"), Some("2"));
    assert_eq!(r.get("prescriber_information", "prescriber_npi"), Some(""));

    assert_eq!(output.stats.fields_filled, 10);
    assert_eq!(output.stats.fields_defaulted, CANONICAL_SCHEMA.field_count() - 10);
    assert_eq!(output.stats.dropped_keys, vec!["confidence"]);
    assert_eq!(output.stats.input_tokens, 1200);
    assert_eq!(output.document, "tracy.pdf");
}

#[tokio::test]
async fn output_json_has_every_field_in_canonical_order() {
    let doc = StaticDocument::new("tracy.pdf", &[TRACY_TEXT]);
    let backend = ScriptedBackend::replying(TRACY_REPLY);
    let output = extract_document(&doc, &config_with(&backend)).await.unwrap();

    let json = assemble_json(&output.record, true).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let object = value.as_object().unwrap();
    assert_eq!(object.len(), CANONICAL_SCHEMA.sections().len());
    let leaves: usize = object
        .values()
        .map(|section| section.as_object().unwrap().len())
        .sum();
    assert_eq!(leaves, CANONICAL_SCHEMA.field_count());
    assert!(object.values().flat_map(|s| s.as_object().unwrap().values()).all(|v| v.is_string()));
    assert!(!json.contains("confidence"));

    let positions: Vec<usize> = CANONICAL_SCHEMA
        .sections()
        .iter()
        .map(|s| json.find(&format!("\"{}\"", s.name)).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn same_document_same_bytes() {
    let doc = StaticDocument::new("tracy.pdf", &[TRACY_TEXT]);
    let backend = ScriptedBackend::replying(TRACY_REPLY);
    let config = config_with(&backend);
    let a = extract_document(&doc, &config).await.unwrap();
    let b = extract_document(&doc, &config).await.unwrap();

    let requests = backend.requests();
    assert_eq!(requests[0], requests[1]);
    assert_eq!(
        assemble_json(&a.record, false).unwrap(),
        assemble_json(&b.record, false).unwrap()
    );
}

#[tokio::test]
async fn record_is_written_atomically() {
    let doc = StaticDocument::new("tracy.pdf", &[TRACY_TEXT]);
    let backend = ScriptedBackend::replying(TRACY_REPLY);
    let output = extract_document(&doc, &config_with(&backend)).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/out/prescription_payload.json");
    write_record(&output.record, &path, true).await.unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.ends_with("}\n"));
    assert_eq!(written.trim_end(), assemble_json(&output.record, true).unwrap());
    assert!(!path.with_extension("json.tmp").exists());
}

// ── Scanned prescription ─────────────────────────────────────────────────────

#[tokio::test]
async fn scanned_document_goes_hybrid_with_pages_in_order() {
    let doc = StaticDocument::new("fax-0042.pdf", &["Patient: Tracy", " \n "]).with_images(&[2, 1]);
    let backend = ScriptedBackend::replying(r#"{"patient_information":{"patient_first_name":"Tracy"}}"#);
    let output = extract_document(&doc, &config_with(&backend)).await.unwrap();

    assert_eq!(output.mode, ExtractionMode::Hybrid);
    assert!(!output.stats.is_text_sufficient);
    assert_eq!(output.stats.pages_rendered, 2);
    assert_eq!(doc.renders(), 1);

    let request = &backend.requests()[0];
    let order: Vec<usize> = request.images.iter().map(|p| p.page_num).collect();
    assert_eq!(order, vec![1, 2]);
    assert!(request.user_text.contains("Document text:\nPatient: Tracy"));
    assert_eq!(
        output.record.get("patient_information", "patient_first_name"),
        Some("Tracy")
    );
}

#[tokio::test]
async fn blank_scan_sends_images_without_text_block() {
    let doc = StaticDocument::new("blank.pdf", &["", "\n\n"]).with_images(&[1, 2]);
    let backend = ScriptedBackend::replying("{}");
    let output = extract_document(&doc, &config_with(&backend)).await.unwrap();

    assert_eq!(output.mode, ExtractionMode::Hybrid);
    let request = &backend.requests()[0];
    assert_eq!(request.images.len(), 2);
    assert!(!request.user_text.contains("Document text:"));
    assert_eq!(output.record.filled_count(), 0);
}

// ── Mode overrides ───────────────────────────────────────────────────────────

#[tokio::test]
async fn forced_text_only_never_renders() {
    let doc = StaticDocument::new("fax.pdf", &["Rx"]).with_images(&[1]);
    let backend = ScriptedBackend::replying("{}");
    let config = ExtractionConfig::builder()
        .backend(backend.clone() as Arc<dyn ModelBackend>)
        .mode(ExtractionMode::TextOnly)
        .build()
        .unwrap();
    let output = extract_document(&doc, &config).await.unwrap();

    assert_eq!(output.mode, ExtractionMode::TextOnly);
    assert_eq!(doc.renders(), 0);
    assert!(backend.requests()[0].images.is_empty());
}

#[tokio::test]
async fn forced_vision_sends_no_text() {
    let doc = StaticDocument::new("tracy.pdf", &[TRACY_TEXT]).with_images(&[1]);
    let backend = ScriptedBackend::replying("{}");
    let config = ExtractionConfig::builder()
        .backend(backend.clone() as Arc<dyn ModelBackend>)
        .mode(ExtractionMode::Vision)
        .build()
        .unwrap();
    let output = extract_document(&doc, &config).await.unwrap();

    assert_eq!(output.mode, ExtractionMode::Vision);
    let request = &backend.requests()[0];
    assert_eq!(request.images.len(), 1);
    assert!(!request.user_text.contains("Tracy Nguyen"));
}

#[test]
fn inspect_reports_mode_without_a_model() {
    let doc = StaticDocument::new("fax.pdf", &["short"]);
    let config = ExtractionConfig::default();
    let report = tokio_test::block_on(inspect_document(&doc, &config)).unwrap();
    assert_eq!(report.text_chars, 5);
    assert!(!report.is_text_sufficient);
    assert_eq!(report.mode, ExtractionMode::Hybrid);
    assert_eq!(report.metadata.page_count, 1);
}

// ── Fatal errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn unreadable_document_stops_before_the_model() {
    let doc = StaticDocument::new("broken.pdf", &[]).unreadable();
    let backend = ScriptedBackend::replying("{}");
    let err = extract_document(&doc, &config_with(&backend)).await.unwrap_err();

    assert!(err.is_document_read());
    assert_eq!(err.stage(), Stage::TextExtraction);
    assert!(err.to_string().contains("broken.pdf"));
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn backend_unavailable_carries_document_and_provider() {
    let doc = StaticDocument::new("tracy.pdf", &[TRACY_TEXT]);
    let backend = ScriptedBackend::failing(BackendError::Unavailable("HTTP 401: bad key".into()));
    let err = extract_document(&doc, &config_with(&backend)).await.unwrap_err();

    match err {
        Rx2JsonError::ModelUnavailable {
            ref provider,
            ref document,
            ref detail,
        } => {
            assert_eq!(provider, "scripted");
            assert_eq!(document, "tracy.pdf");
            assert!(detail.contains("401"));
        }
        ref other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn slow_backend_hits_the_deadline() {
    let doc = StaticDocument::new("tracy.pdf", &[TRACY_TEXT]);
    let backend = ScriptedBackend::slow(Duration::from_secs(30));
    let config = ExtractionConfig::builder()
        .backend(backend.clone() as Arc<dyn ModelBackend>)
        .api_timeout_secs(1)
        .build()
        .unwrap();
    let err = extract_document(&doc, &config).await.unwrap_err();

    assert!(
        matches!(err, Rx2JsonError::ModelTimeout { secs: 1, ref document, .. } if document == "tracy.pdf"),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn garbage_reply_is_a_schema_coercion_error() {
    let doc = StaticDocument::new("tracy.pdf", &[TRACY_TEXT]);
    let backend = ScriptedBackend::replying("Sorry, I cannot help with that.");
    let err = extract_document(&doc, &config_with(&backend)).await.unwrap_err();

    assert_eq!(err.stage(), Stage::Coercion);
    assert!(matches!(err, Rx2JsonError::SchemaCoercion { ref document, .. } if document == "tracy.pdf"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn fenced_reply_is_recovered() {
    let doc = StaticDocument::new("tracy.pdf", &[TRACY_TEXT]);
    let backend = ScriptedBackend::replying(
        "Here is the record:\n```json\n{\"payment\": {\"payor\": \"Blue Cross\"}}\n```",
    );
    let output = extract_document(&doc, &config_with(&backend)).await.unwrap();
    assert_eq!(output.record.get("payment", "payor"), Some("Blue Cross"));
}
