//! Content extraction: text layer, sufficiency verdict, and page images.
//!
//! The pdfium specifics live behind [`DocumentSource`] so this stage (and the
//! whole orchestrator) can be driven by an in-memory source in tests.
//! Rendering is skipped entirely unless the selected mode needs images; a
//! digital prescription never pays for rasterisation.

use crate::config::ExtractionConfig;
use crate::error::Rx2JsonError;
use crate::output::DocumentMetadata;
use crate::pipeline::mode::{select_mode, ExtractionMode};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info};

/// Selectable text, one entry per page in physical order.
#[derive(Debug, Clone, Default)]
pub struct TextLayer {
    pub pages: Vec<String>,
    pub metadata: DocumentMetadata,
}

impl TextLayer {
    /// All page texts joined with a blank line.
    pub fn joined(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.trim_end())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Non-whitespace character count across all pages.
    ///
    /// Scanned pages often yield nothing but line breaks, so whitespace is
    /// not counted.
    pub fn char_count(&self) -> usize {
        self.pages
            .iter()
            .map(|p| p.chars().filter(|c| !c.is_whitespace()).count())
            .sum()
    }
}

/// A rendered page, PNG-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed physical page number.
    pub page_num: usize,
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// Rasterisation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptions {
    pub dpi: u32,
    /// Cap on the longest edge, in pixels.
    pub max_pixels: u32,
}

/// Minimum text needed before the text layer is trusted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextThreshold {
    pub min_chars: usize,
    /// Multiply `min_chars` by the page count (average-per-page heuristic).
    pub per_page: bool,
}

impl TextThreshold {
    /// Required non-whitespace characters for a document of `page_count` pages.
    pub fn required(&self, page_count: usize) -> usize {
        if self.per_page {
            self.min_chars.saturating_mul(page_count.max(1))
        } else {
            self.min_chars
        }
    }

    /// `true` when the text layer reaches the threshold.
    pub fn is_sufficient(&self, layer: &TextLayer) -> bool {
        layer.char_count() >= self.required(layer.pages.len())
    }
}

/// What the model will be shown. Produced once per run; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    Text { text: String },
    Visual { pages: Vec<PageImage> },
    Hybrid { text: String, pages: Vec<PageImage> },
}

impl DocumentContent {
    /// Combine whatever parts the mode allows.
    ///
    /// Blank text is dropped when images are present; with neither, an empty
    /// text content is returned so the model still gets the schema and
    /// answers with empty fields.
    pub fn from_parts(text: Option<String>, pages: Vec<PageImage>) -> Self {
        let text = text.filter(|t| !t.trim().is_empty());
        match (text, pages.is_empty()) {
            (Some(text), true) => DocumentContent::Text { text },
            (Some(text), false) => DocumentContent::Hybrid { text, pages },
            (None, false) => DocumentContent::Visual { pages },
            (None, true) => DocumentContent::Text {
                text: String::new(),
            },
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            DocumentContent::Text { text } | DocumentContent::Hybrid { text, .. } => Some(text),
            DocumentContent::Visual { .. } => None,
        }
    }

    pub fn pages(&self) -> &[PageImage] {
        match self {
            DocumentContent::Visual { pages } | DocumentContent::Hybrid { pages, .. } => pages,
            DocumentContent::Text { .. } => &[],
        }
    }
}

/// A readable prescription document.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Identifier used in logs and error messages (path or URL).
    fn id(&self) -> &str;

    /// Extract the selectable text layer and metadata.
    async fn text_layer(&self) -> Result<TextLayer, Rx2JsonError>;

    /// Render every page, in physical order.
    async fn render_pages(&self, options: RasterOptions) -> Result<Vec<PageImage>, Rx2JsonError>;
}

/// Result of the content stage.
#[derive(Debug, Clone)]
pub struct ContentExtraction {
    pub content: DocumentContent,
    pub mode: ExtractionMode,
    pub is_text_sufficient: bool,
    pub text_chars: usize,
    pub metadata: DocumentMetadata,
    pub duration_ms: u64,
}

/// Read the text layer, judge sufficiency, select the mode, and render
/// pages when the mode needs them.
pub async fn extract_content(
    source: &dyn DocumentSource,
    config: &ExtractionConfig,
) -> Result<ContentExtraction, Rx2JsonError> {
    let start = Instant::now();
    let layer = source.text_layer().await?;
    let text_chars = layer.char_count();
    let threshold = config.text_threshold();
    let is_text_sufficient = threshold.is_sufficient(&layer);
    let mode = select_mode(is_text_sufficient, config.mode_override);

    info!(
        "{}: {} pages, {} text chars (need {}), mode {}",
        source.id(),
        layer.pages.len(),
        text_chars,
        threshold.required(layer.pages.len()),
        mode
    );

    let pages = if mode.needs_images() {
        let rendered = source.render_pages(config.raster_options()).await?;
        debug!("{}: rendered {} page images", source.id(), rendered.len());
        rendered
    } else {
        Vec::new()
    };

    let text = mode.includes_text().then(|| layer.joined());
    let content = DocumentContent::from_parts(text, pages);

    Ok(ContentExtraction {
        content,
        mode,
        is_text_sufficient,
        text_chars,
        metadata: layer.metadata,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
