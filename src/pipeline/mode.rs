//! Mode selection: text-only, vision-only, or hybrid prompting.
//!
//! A pure function of the text-sufficiency verdict and the caller's
//! override. No I/O, no configuration lookups.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the document is presented to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Selectable text only.
    TextOnly,
    /// Rendered page images only.
    Vision,
    /// Selectable text plus rendered page images.
    Hybrid,
}

impl ExtractionMode {
    /// Whether page images must be rendered and attached.
    pub fn needs_images(self) -> bool {
        matches!(self, ExtractionMode::Vision | ExtractionMode::Hybrid)
    }

    /// Whether extracted text is sent to the model.
    pub fn includes_text(self) -> bool {
        matches!(self, ExtractionMode::TextOnly | ExtractionMode::Hybrid)
    }
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionMode::TextOnly => "text-only",
            ExtractionMode::Vision => "vision",
            ExtractionMode::Hybrid => "hybrid",
        })
    }
}

/// Pick the extraction mode.
///
/// An explicit override always wins. Without one, a sufficient text layer
/// means text-only; a sparse one (likely a scan) means hybrid, since partial
/// text can still help alongside the page images.
pub fn select_mode(is_text_sufficient: bool, caller_override: Option<ExtractionMode>) -> ExtractionMode {
    match caller_override {
        Some(mode) => mode,
        None if is_text_sufficient => ExtractionMode::TextOnly,
        None => ExtractionMode::Hybrid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sufficient_text_without_override_is_text_only() {
        assert_eq!(select_mode(true, None), ExtractionMode::TextOnly);
    }

    #[test]
    fn sparse_text_without_override_is_hybrid() {
        assert_eq!(select_mode(false, None), ExtractionMode::Hybrid);
    }

    #[test]
    fn text_only_override_wins_regardless_of_sufficiency() {
        for sufficient in [true, false] {
            assert_eq!(
                select_mode(sufficient, Some(ExtractionMode::TextOnly)),
                ExtractionMode::TextOnly
            );
        }
    }

    #[test]
    fn vision_override_is_honoured() {
        assert_eq!(
            select_mode(true, Some(ExtractionMode::Vision)),
            ExtractionMode::Vision
        );
    }

    #[test]
    fn mode_capabilities() {
        assert!(!ExtractionMode::TextOnly.needs_images());
        assert!(ExtractionMode::Vision.needs_images());
        assert!(!ExtractionMode::Vision.includes_text());
        assert!(ExtractionMode::Hybrid.needs_images());
        assert!(ExtractionMode::Hybrid.includes_text());
    }
}
