//! Configuration types for prescription extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The stages read their slice of it
//! through small accessor structs ([`TextThreshold`], [`RasterOptions`],
//! [`PromptOptions`], [`GenerationOptions`]) so none of them depends on the
//! whole config.

use crate::error::Rx2JsonError;
use crate::pipeline::backend::{GenerationOptions, ModelBackend, ProviderConfig};
use crate::pipeline::content::{RasterOptions, TextThreshold};
use crate::pipeline::mode::ExtractionMode;
use crate::pipeline::request::PromptOptions;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one prescription extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_rx2json::{ExtractionConfig, ExtractionMode};
///
/// let config = ExtractionConfig::builder()
///     .provider("vertex")
///     .location("europe-west4")
///     .mode(ExtractionMode::Hybrid)
///     .build()
///     .unwrap();
/// assert_eq!(config.provider.model, "gemini-1.5-pro");
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Backend selection: provider name, model, region.
    pub provider: ProviderConfig,

    /// Pre-constructed backend. Takes precedence over `provider`.
    pub backend: Option<Arc<dyn ModelBackend>>,

    /// Force a mode instead of deciding from text sufficiency.
    pub mode_override: Option<ExtractionMode>,

    /// Non-whitespace characters the text layer needs before it is trusted
    /// alone. Default: 300.
    pub min_text_chars: usize,

    /// Treat `min_text_chars` as a per-page average. Default: false.
    pub scale_threshold_by_pages: bool,

    /// Rendering DPI for page images. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// Longest edge of a rendered page, in pixels. Default: 2400.
    pub max_rendered_pixels: u32,

    /// Document text beyond this many characters is not sent. Default: 150 000.
    pub max_text_chars: usize,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum output tokens. Default: 4096.
    ///
    /// The full record is around 1 500 tokens when every field is filled.
    pub max_tokens: usize,

    /// Deadline for the model call in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            backend: None,
            mode_override: None,
            min_text_chars: 300,
            scale_threshold_by_pages: false,
            dpi: 200,
            max_rendered_pixels: 2400,
            max_text_chars: 150_000,
            temperature: 0.0,
            max_tokens: 4096,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            password: None,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("provider", &self.provider)
            .field("backend", &self.backend.as_ref().map(|b| b.provider().to_string()))
            .field("mode_override", &self.mode_override)
            .field("min_text_chars", &self.min_text_chars)
            .field("scale_threshold_by_pages", &self.scale_threshold_by_pages)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_text_chars", &self.max_text_chars)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("system_prompt", &self.system_prompt.as_ref().map(String::len))
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
            model_set: false,
        }
    }

    pub fn text_threshold(&self) -> TextThreshold {
        TextThreshold {
            min_chars: self.min_text_chars,
            per_page: self.scale_threshold_by_pages,
        }
    }

    pub fn raster_options(&self) -> RasterOptions {
        RasterOptions {
            dpi: self.dpi,
            max_pixels: self.max_rendered_pixels,
        }
    }

    pub fn prompt_options(&self) -> PromptOptions<'_> {
        PromptOptions {
            system_prompt: self.system_prompt.as_deref(),
            max_text_chars: self.max_text_chars,
        }
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout_secs: self.api_timeout_secs,
        }
    }

    pub fn api_deadline(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
    model_set: bool,
}

impl ExtractionConfigBuilder {
    /// Select a provider; its default model applies unless [`Self::model`]
    /// is called as well (in either order).
    pub fn provider(mut self, name: impl Into<String>) -> Self {
        let mut provider = ProviderConfig::new(name);
        if self.model_set {
            provider.model = self.config.provider.model.clone();
        }
        provider.location = self.config.provider.location.take();
        self.config.provider = provider;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.provider.model = model.into();
        self.model_set = true;
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.config.provider.location = Some(location.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn mode(mut self, mode: ExtractionMode) -> Self {
        self.config.mode_override = Some(mode);
        self
    }

    /// `None` restores automatic selection.
    pub fn mode_override(mut self, mode: Option<ExtractionMode>) -> Self {
        self.config.mode_override = mode;
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn scale_threshold_by_pages(mut self, v: bool) -> Self {
        self.config.scale_threshold_by_pages = v;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px;
        self
    }

    pub fn max_text_chars(mut self, n: usize) -> Self {
        self.config.max_text_chars = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Rx2JsonError> {
        let c = &self.config;
        if !(72..=400).contains(&c.dpi) {
            return Err(Rx2JsonError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_rendered_pixels < 100 {
            return Err(Rx2JsonError::InvalidConfig(format!(
                "max_rendered_pixels must be ≥ 100, got {}",
                c.max_rendered_pixels
            )));
        }
        if c.max_tokens == 0 {
            return Err(Rx2JsonError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(Rx2JsonError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.backend.is_none() && (c.provider.provider.is_empty() || c.provider.model.trim().is_empty())
        {
            return Err(Rx2JsonError::InvalidConfig(
                "provider and model must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.provider.provider, "openai");
        assert_eq!(c.provider.model, "gpt-4o-mini");
        assert_eq!(c.min_text_chars, 300);
        assert_eq!(c.dpi, 200);
        assert_eq!(c.temperature, 0.0);
        assert_eq!(c.api_deadline(), Duration::from_secs(120));
        assert!(c.mode_override.is_none());
    }

    #[test]
    fn provider_and_model_in_either_order() {
        let a = ExtractionConfig::builder()
            .model("gemini-2.0-flash-001")
            .provider("vertex")
            .build()
            .unwrap();
        let b = ExtractionConfig::builder()
            .provider("vertex")
            .model("gemini-2.0-flash-001")
            .build()
            .unwrap();
        assert_eq!(a.provider, b.provider);

        let default_model = ExtractionConfig::builder().provider("vertex").build().unwrap();
        assert_eq!(default_model.provider.model, "gemini-1.5-pro");
    }

    #[test]
    fn location_survives_provider_change() {
        let c = ExtractionConfig::builder()
            .location("asia-northeast1")
            .provider("vertex")
            .build()
            .unwrap();
        assert_eq!(c.provider.location_or_default(), "asia-northeast1");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(ExtractionConfig::builder().dpi(30).build().is_err());
        assert!(ExtractionConfig::builder().max_tokens(0).build().is_err());
        assert!(ExtractionConfig::builder().api_timeout_secs(0).build().is_err());
        assert!(ExtractionConfig::builder().model(" ").build().is_err());
    }

    #[test]
    fn accessors_mirror_fields() {
        let c = ExtractionConfig::builder()
            .min_text_chars(50)
            .scale_threshold_by_pages(true)
            .dpi(150)
            .max_rendered_pixels(1000)
            .system_prompt("be terse")
            .build()
            .unwrap();
        assert_eq!(c.text_threshold().required(2), 100);
        assert_eq!(c.raster_options(), RasterOptions { dpi: 150, max_pixels: 1000 });
        assert_eq!(c.prompt_options().system_prompt, Some("be terse"));
        assert_eq!(c.generation_options().max_tokens, 4096);
    }

    #[test]
    fn debug_redacts_password() {
        let c = ExtractionConfig::builder().password("hunter2").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }
}
