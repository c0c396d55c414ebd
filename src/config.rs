//! Configuration types for invoice extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. OCR and LLM settings live in the
//! nested [`OcrConfig`] and [`LlmConfig`] so each stage only sees its own
//! knobs.

use crate::error::InvoiceError;
use crate::progress::ExtractionProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Characters Tesseract may emit. Everything else is treated as noise.
pub const DEFAULT_CHAR_WHITELIST: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyzÁÉÍÓÚÑáéíóúñ.,:-/()&%$#@!?=+*[]{}|\"' ";

/// Default deployment / model used for structuring.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default provider name handed to `ProviderFactory`.
pub const DEFAULT_PROVIDER: &str = "azure";

/// Upper bound on LLM retries per prompt strategy.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Configuration for one extraction (or one batch).
///
/// # Example
/// ```rust
/// use invoice2xlsx::{ExtractionConfig, OcrMode};
///
/// let config = ExtractionConfig::builder()
///     .ocr_mode(OcrMode::Always)
///     .ocr_dpi(300)
///     .llm_enabled(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.ocr.dpi, 300);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    pub ocr: OcrConfig,

    pub llm: LlmConfig,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Documents processed at once by `extract_batch`. Default: 1.
    pub concurrency: usize,

    /// A page has a text layer when its trimmed text has at least this many
    /// characters. Default: 10.
    pub min_page_chars: usize,

    /// A document whose final text is shorter than this fails with
    /// [`InvoiceError::NoTextExtracted`]. Default: 10.
    pub min_document_chars: usize,

    /// Optional observer for batch / document / stage events.
    pub progress_callback: Option<Arc<dyn ExtractionProgressCallback>>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
            password: None,
            download_timeout_secs: 120,
            concurrency: 1,
            min_page_chars: 10,
            min_document_chars: 10,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("ocr", &self.ocr)
            .field("llm", &self.llm)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("concurrency", &self.concurrency)
            .field("min_page_chars", &self.min_page_chars)
            .field("min_document_chars", &self.min_document_chars)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

// ── OCR ──────────────────────────────────────────────────────────────────

/// When to run OCR on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    /// Text layer only.
    Never,
    /// OCR only pages without a text layer. (default)
    #[default]
    Fallback,
    /// OCR every page; the text layer is used where OCR fails.
    Always,
}

impl FromStr for OcrMode {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" | "off" | "none" => Ok(OcrMode::Never),
            "fallback" | "auto" => Ok(OcrMode::Fallback),
            "always" | "force" => Ok(OcrMode::Always),
            other => Err(InvoiceError::InvalidConfig(format!(
                "unknown OCR mode '{other}' (expected never, fallback or always)"
            ))),
        }
    }
}

/// Tesseract settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub mode: OcrMode,

    /// Explicit path to the `tesseract` executable. When `None` the engine is
    /// looked up on `PATH` and in the usual Windows install folders.
    pub tesseract_path: Option<PathBuf>,

    /// Tesseract language codes joined with `+`. Default: `spa+eng`.
    pub languages: String,

    /// Page segmentation mode. Default: 11 (sparse text, suits invoices
    /// with many small blocks).
    pub psm: u8,

    /// Rasterisation resolution for OCR. Range: 72–600. Default: 400.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 6000.
    pub max_rendered_pixels: u32,

    /// `tessedit_char_whitelist`; `None` lets Tesseract emit anything.
    pub char_whitelist: Option<String>,

    /// Run grayscale / denoise / binarise / upscale before OCR. Default: true.
    pub preprocess: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            mode: OcrMode::default(),
            tesseract_path: None,
            languages: "spa+eng".to_string(),
            psm: 11,
            dpi: 400,
            max_rendered_pixels: 6000,
            char_whitelist: Some(DEFAULT_CHAR_WHITELIST.to_string()),
            preprocess: true,
        }
    }
}

// ── LLM ──────────────────────────────────────────────────────────────────

/// Settings of the optional LLM structuring stage.
#[derive(Clone)]
pub struct LlmConfig {
    /// Default: true. Without a configured provider the stage is skipped.
    pub enabled: bool,

    /// Provider name for `ProviderFactory`. Default: `azure`.
    /// `None` auto-detects from the environment.
    pub provider_name: Option<String>,

    /// Model or deployment name. Default: `gpt-4o-mini`.
    pub model: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Default: 0.1.
    pub temperature: f32,

    /// Default: 8000.
    pub max_tokens: usize,

    /// Extracted text is cut to this many characters before prompting.
    /// Default: 8000.
    pub max_input_chars: usize,

    /// Retries per prompt strategy on transient failures. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 90.
    pub api_timeout_secs: u64,

    /// Known customer the model should normalise the customer name to.
    pub expected_customer: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider_name: Some(DEFAULT_PROVIDER.to_string()),
            model: Some(DEFAULT_MODEL.to_string()),
            provider: None,
            temperature: 0.1,
            max_tokens: 8000,
            max_input_chars: 8000,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 90,
            expected_customer: None,
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("enabled", &self.enabled)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_input_chars", &self.max_input_chars)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("expected_customer", &self.expected_customer)
            .finish()
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn ocr_mode(mut self, mode: OcrMode) -> Self {
        self.config.ocr.mode = mode;
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ocr.tesseract_path = Some(path.into());
        self
    }

    pub fn ocr_languages(mut self, langs: impl Into<String>) -> Self {
        self.config.ocr.languages = langs.into();
        self
    }

    pub fn ocr_psm(mut self, psm: u8) -> Self {
        self.config.ocr.psm = psm;
        self
    }

    /// Not clamped; out-of-range values are rejected by [`build`](Self::build).
    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.ocr.max_rendered_pixels = px.max(100);
        self
    }

    pub fn char_whitelist(mut self, whitelist: Option<String>) -> Self {
        self.config.ocr.char_whitelist = whitelist;
        self
    }

    pub fn ocr_preprocess(mut self, v: bool) -> Self {
        self.config.ocr.preprocess = v;
        self
    }

    pub fn llm_enabled(mut self, v: bool) -> Self {
        self.config.llm.enabled = v;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.llm.provider_name = Some(name.into());
        self
    }

    /// Let `ProviderFactory::from_env()` pick the provider.
    pub fn auto_detect_provider(mut self) -> Self {
        self.config.llm.provider_name = None;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.llm.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.llm.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.llm.max_tokens = n;
        self
    }

    pub fn max_input_chars(mut self, n: usize) -> Self {
        self.config.llm.max_input_chars = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.llm.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.llm.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.llm.api_timeout_secs = secs;
        self
    }

    pub fn expected_customer(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.config.llm.expected_customer = if name.trim().is_empty() {
            None
        } else {
            Some(name.trim().to_string())
        };
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn min_page_chars(mut self, n: usize) -> Self {
        self.config.min_page_chars = n;
        self
    }

    pub fn min_document_chars(mut self, n: usize) -> Self {
        self.config.min_document_chars = n;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn ExtractionProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, InvoiceError> {
        let c = &self.config;
        if c.ocr.dpi < 72 || c.ocr.dpi > 600 {
            return Err(InvoiceError::InvalidConfig(format!(
                "OCR DPI must be 72–600, got {}",
                c.ocr.dpi
            )));
        }
        if c.ocr.psm > 13 {
            return Err(InvoiceError::InvalidConfig(format!(
                "Tesseract page segmentation mode must be 0–13, got {}",
                c.ocr.psm
            )));
        }
        if c.ocr.languages.trim().is_empty() {
            return Err(InvoiceError::InvalidConfig(
                "OCR languages must not be empty".into(),
            ));
        }
        if c.llm.max_input_chars == 0 {
            return Err(InvoiceError::InvalidConfig(
                "max_input_chars must be ≥ 1".into(),
            ));
        }
        if c.llm.api_timeout_secs == 0 {
            return Err(InvoiceError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.llm.max_retries > MAX_RETRIES_LIMIT {
            return Err(InvoiceError::InvalidConfig(format!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT, c.llm.max_retries
            )));
        }
        if c.concurrency == 0 {
            return Err(InvoiceError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_invoice_tuning() {
        let c = ExtractionConfig::default();
        assert_eq!(c.ocr.mode, OcrMode::Fallback);
        assert_eq!(c.ocr.languages, "spa+eng");
        assert_eq!(c.ocr.psm, 11);
        assert_eq!(c.ocr.dpi, 400);
        assert_eq!(c.llm.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(c.llm.provider_name.as_deref(), Some("azure"));
        assert_eq!(c.llm.max_input_chars, 8000);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.min_document_chars, 10);
    }

    #[test]
    fn build_rejects_out_of_range_dpi() {
        let err = ExtractionConfig::builder().ocr_dpi(1200).build().unwrap_err();
        assert!(matches!(err, InvoiceError::InvalidConfig(_)));
        assert!(ExtractionConfig::builder().ocr_dpi(600).build().is_ok());
    }

    #[test]
    fn build_rejects_zero_api_timeout() {
        let err = ExtractionConfig::builder()
            .api_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, InvoiceError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_unbounded_retries() {
        assert!(ExtractionConfig::builder().max_retries(1000).build().is_err());
        assert!(ExtractionConfig::builder()
            .max_retries(MAX_RETRIES_LIMIT)
            .build()
            .is_ok());
    }

    #[test]
    fn build_rejects_bad_psm() {
        assert!(ExtractionConfig::builder().ocr_psm(14).build().is_err());
    }

    #[test]
    fn blank_customer_is_ignored() {
        let c = ExtractionConfig::builder()
            .expected_customer("   ")
            .build()
            .unwrap();
        assert!(c.llm.expected_customer.is_none());
    }

    #[test]
    fn ocr_mode_parses_aliases() {
        assert_eq!("ALWAYS".parse::<OcrMode>().unwrap(), OcrMode::Always);
        assert_eq!("auto".parse::<OcrMode>().unwrap(), OcrMode::Fallback);
        assert_eq!("off".parse::<OcrMode>().unwrap(), OcrMode::Never);
        assert!("sometimes".parse::<OcrMode>().is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let c = ExtractionConfig::builder().password("hunter2").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
    }
}
