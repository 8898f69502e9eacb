//! Prompts for schema-constrained prescription extraction.
//!
//! Everything the model is told lives here so prompt changes never touch the
//! request plumbing, and tests can assert on the exact wording. The schema
//! instruction is rendered from [`CanonicalSchema::outline`], which
//! serialises in table order, so the same schema always yields the same
//! bytes.
//!
//! Callers can replace the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the schema instruction
//! is always appended to the user turn regardless.

use crate::schema::CanonicalSchema;

/// Default system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert prescription parser for pharmacy and healthcare documents.
Return ONLY a JSON object that exactly matches the provided canonical schema keys.

Rules:
- Use an empty string "" for anything not found or not applicable.
- Never omit a key. Never add keys that are not in the schema.
- Never invent or infer a value beyond what the document shows.
- Every value is a string.
- Dates as YYYY-MM-DD when possible.
- Numbers as plain numerals (no currency symbols or thousands separators).
- Do not wrap the JSON in markdown fences and do not add commentary."#;

/// Instruction naming the exact field set.
pub fn schema_instruction(schema: &CanonicalSchema) -> String {
    // Serialising a static outline of &str cannot fail.
    let outline = serde_json::to_string_pretty(&schema.outline()).unwrap_or_default();
    format!(
        "Canonical schema (section -> keys). Produce JSON with exactly these sections and keys:\n\
         {outline}\n\n\
         Use \"\" for anything not found or not applicable. Never omit a key, never invent a value.\n\
         Extract values from the attached document pages and/or the accompanying text."
    )
}

/// Wraps the extracted text layer.
pub fn document_text_block(text: &str) -> String {
    format!("Document text:\n{text}")
}

/// Tells the model how the attached images map to pages.
pub fn page_images_note(count: usize) -> String {
    match count {
        0 => String::new(),
        1 => "The attached image is page 1 of the document.".to_string(),
        n => format!("The {n} attached images are pages 1 to {n} of the document, in order."),
    }
}
