//! pdfium-backed [`DocumentSource`]: text layer, metadata and page rasters.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and is not safe to drive
//! from async contexts. Every pdfium call happens inside
//! `tokio::task::spawn_blocking`, and each call binds and opens the document
//! afresh: the upstream `Pdfium` handle is `!Send`, and the OS caches the
//! `dlopen` so rebinding is effectively free.
//!
//! ## Why DPI *and* a pixel cap?
//!
//! Prescriptions are mostly Letter/A4, where 200 DPI gives crisp small print.
//! Faxed or oversized scans can declare absurd page sizes, so the longest
//! edge is additionally capped at `max_pixels`.

use crate::error::{Rx2JsonError, Stage};
use crate::output::DocumentMetadata;
use crate::pipeline::content::{DocumentSource, PageImage, RasterOptions, TextLayer};
use crate::pipeline::encode;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const POINTS_PER_INCH: f32 = 72.0;

/// A PDF on the local file system, read through pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumDocument {
    id: String,
    path: PathBuf,
    password: Option<String>,
}

impl PdfiumDocument {
    /// `id` is what errors and logs call the document (usually the
    /// user-supplied path or URL); `path` is where the bytes actually are.
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            password,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentSource for PdfiumDocument {
    fn id(&self) -> &str {
        &self.id
    }

    async fn text_layer(&self) -> Result<TextLayer, Rx2JsonError> {
        let doc = self.clone();
        tokio::task::spawn_blocking(move || doc.text_layer_blocking())
            .await
            .map_err(|e| Rx2JsonError::Internal(format!("Text extraction task panicked: {e}")))?
    }

    async fn render_pages(&self, options: RasterOptions) -> Result<Vec<PageImage>, Rx2JsonError> {
        let doc = self.clone();
        tokio::task::spawn_blocking(move || doc.render_pages_blocking(options))
            .await
            .map_err(|e| Rx2JsonError::Internal(format!("Render task panicked: {e}")))?
    }
}

impl PdfiumDocument {
    fn read_error(&self, stage: Stage, reason: impl Into<String>) -> Rx2JsonError {
        Rx2JsonError::DocumentRead {
            document: self.id.clone(),
            stage,
            reason: reason.into(),
        }
    }

    /// Map a pdfium load failure, detecting encryption.
    fn map_load_error(&self, e: PdfiumError, stage: Stage) -> Rx2JsonError {
        let err_str = format!("{e:?}");
        if err_str.to_lowercase().contains("password") {
            if self.password.is_some() {
                Rx2JsonError::WrongPassword {
                    document: self.id.clone(),
                }
            } else {
                Rx2JsonError::PasswordRequired {
                    document: self.id.clone(),
                }
            }
        } else {
            self.read_error(stage, format!("corrupt or unreadable PDF: {err_str}"))
        }
    }

    fn text_layer_blocking(&self) -> Result<TextLayer, Rx2JsonError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(&self.path, self.password.as_deref())
            .map_err(|e| self.map_load_error(e, Stage::TextExtraction))?;

        let pages = document.pages();
        let page_count = pages.len() as usize;
        if page_count == 0 {
            return Err(self.read_error(Stage::TextExtraction, "document has no pages"));
        }
        info!("PDF loaded: {} pages", page_count);

        let mut texts = Vec::with_capacity(page_count);
        for (idx, page) in pages.iter().enumerate() {
            let text = page
                .text()
                .map_err(|e| {
                    self.read_error(
                        Stage::TextExtraction,
                        format!("page {}: {e:?}", idx + 1),
                    )
                })?
                .all();
            debug!("Page {}: {} chars of selectable text", idx + 1, text.len());
            texts.push(text);
        }

        let metadata = document.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata
                .get(tag)
                .map(|t| t.value().trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(TextLayer {
            pages: texts,
            metadata: DocumentMetadata {
                title: get_meta(PdfDocumentMetadataTagType::Title),
                author: get_meta(PdfDocumentMetadataTagType::Author),
                producer: get_meta(PdfDocumentMetadataTagType::Producer),
                page_count,
                pdf_version: format!("{:?}", document.version()),
            },
        })
    }

    fn render_pages_blocking(&self, options: RasterOptions) -> Result<Vec<PageImage>, Rx2JsonError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(&self.path, self.password.as_deref())
            .map_err(|e| self.map_load_error(e, Stage::Rendering))?;

        let pages = document.pages();
        let mut results = Vec::with_capacity(pages.len() as usize);

        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;
            let (target_w, max_h) = render_dimensions(
                page.width().value,
                page.height().value,
                options.dpi,
                options.max_pixels,
            );
            let render_config = PdfRenderConfig::new()
                .set_target_width(target_w as i32)
                .set_maximum_height(max_h as i32);

            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| self.read_error(Stage::Rendering, format!("page {page_num}: {e:?}")))?;

            let image = bitmap.as_image();
            let encoded = encode::encode_png(page_num, &image).map_err(|e| {
                self.read_error(
                    Stage::Rendering,
                    format!("page {page_num}: PNG encoding failed: {e}"),
                )
            })?;
            debug!(
                "Rendered page {} → {}x{} px",
                page_num, encoded.width, encoded.height
            );
            results.push(encoded);
        }

        Ok(results)
    }
}

/// Target width and height cap for a page of the given size in points.
///
/// Aspect ratio is preserved; the longest edge never exceeds `max_pixels`.
fn render_dimensions(width_pt: f32, height_pt: f32, dpi: u32, max_pixels: u32) -> (u32, u32) {
    let raw_w = (width_pt * dpi as f32 / POINTS_PER_INCH).max(1.0);
    let raw_h = (height_pt * dpi as f32 / POINTS_PER_INCH).max(1.0);
    let longest = raw_w.max(raw_h);

    let ratio = if longest > max_pixels as f32 {
        max_pixels as f32 / longest
    } else {
        1.0
    };
    let w = ((raw_w * ratio) as u32).clamp(1, max_pixels);
    (w, max_pixels)
}

/// Bind to a pdfium shared library.
///
/// Discovery order:
/// 1. `PDFIUM_LIB_PATH` (explicit path to the library file)
/// 2. Alongside the running executable
/// 3. System library search paths
pub fn bind_pdfium() -> Result<Pdfium, Rx2JsonError> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        if !path.is_empty() {
            debug!("Loading pdfium from PDFIUM_LIB_PATH={}", path);
            let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
                Rx2JsonError::PdfiumBindingFailed(format!("PDFIUM_LIB_PATH '{path}': {e}"))
            })?;
            return Ok(Pdfium::new(bindings));
        }
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let lib_path =
            Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            debug!("Loaded pdfium from {}", exe_dir.display());
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| Rx2JsonError::PdfiumBindingFailed(e.to_string()))?;
    Ok(Pdfium::new(bindings))
}
