//! Prompt builder: content + mode + schema → provider-neutral request.
//!
//! [`ModelRequest`] is the only thing a backend sees. It is plain data and
//! derives `PartialEq`, so determinism ("same inputs, identical request") is
//! checked with a straight equality assertion.

use crate::pipeline::content::{DocumentContent, PageImage};
use crate::pipeline::mode::ExtractionMode;
use crate::prompts::{
    document_text_block, page_images_note, schema_instruction, DEFAULT_SYSTEM_PROMPT,
};
use crate::schema::CanonicalSchema;
use tracing::{debug, warn};

/// A provider-neutral, multi-part model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub system: String,
    /// Schema instruction, then the document text (if any), then the page note.
    pub user_text: String,
    /// Page images in physical page order.
    pub images: Vec<PageImage>,
}

/// Knobs for [`build_request`].
#[derive(Debug, Clone, Copy)]
pub struct PromptOptions<'a> {
    pub system_prompt: Option<&'a str>,
    /// Document text beyond this many characters is cut off.
    pub max_text_chars: usize,
}

impl Default for PromptOptions<'_> {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_text_chars: 150_000,
        }
    }
}

/// Assemble the request for one extraction.
pub fn build_request(
    content: &DocumentContent,
    mode: ExtractionMode,
    schema: &CanonicalSchema,
    options: &PromptOptions<'_>,
) -> ModelRequest {
    let mut user_text = schema_instruction(schema);

    if mode.includes_text() {
        if let Some(text) = content.text() {
            let kept = truncate_chars(text, options.max_text_chars);
            if kept.len() < text.len() {
                warn!(
                    "Document text truncated to {} characters for the prompt",
                    options.max_text_chars
                );
            }
            user_text.push_str("\n\n");
            user_text.push_str(&document_text_block(kept));
        }
    }

    let images: Vec<PageImage> = if mode.needs_images() {
        let mut pages = content.pages().to_vec();
        pages.sort_by_key(|p| p.page_num);
        pages
    } else {
        Vec::new()
    };

    if !images.is_empty() {
        user_text.push_str("\n\n");
        user_text.push_str(&page_images_note(images.len()));
    }

    debug!(
        "Built {} request: {} prompt chars, {} images",
        mode,
        user_text.len(),
        images.len()
    );

    ModelRequest {
        system: options
            .system_prompt
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
            .to_string(),
        user_text,
        images,
    }
}

/// Longest prefix of `text` with at most `max` characters.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
