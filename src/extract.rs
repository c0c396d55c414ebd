//! Extraction entry points.
//!
//! [`InvoiceExtractor`] resolves the OCR engine and the LLM provider once
//! and then runs any number of documents through the pipeline. The free
//! functions are conveniences that build a throwaway extractor.

use crate::config::{ExtractionConfig, LlmConfig, OcrMode, DEFAULT_MODEL};
use crate::error::{DocumentError, InvoiceError};
use crate::output::{
    BatchOutput, DocumentMetadata, DocumentOutcome, ExtractionOutput, ExtractionStats,
    FieldSource, PageText, TextSource, TokenUsage,
};
use crate::pipeline::ocr::{self, OcrPage, TesseractEngine};
use crate::pipeline::{fields, input, llm, text};
use crate::progress::Stage;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Label used for documents handed over as bytes.
const BYTES_INPUT_LABEL: &str = "<bytes>";

/// Runs invoice documents through text extraction, OCR and structuring.
pub struct InvoiceExtractor {
    config: ExtractionConfig,
    ocr_engine: Option<Arc<TesseractEngine>>,
    provider: Option<Arc<dyn LLMProvider>>,
}

impl InvoiceExtractor {
    /// Build an extractor, probing Tesseract and the LLM provider.
    ///
    /// Neither is required: without Tesseract only the text layer is read,
    /// without a provider the fields come from pattern matching.
    pub fn new(config: ExtractionConfig) -> Self {
        let ocr_engine = match config.ocr.mode {
            OcrMode::Never => None,
            _ => match TesseractEngine::discover(&config.ocr) {
                Ok(engine) => Some(Arc::new(engine)),
                Err(e) => {
                    warn!("{}; scanned pages will not be read", e);
                    None
                }
            },
        };

        let provider = if config.llm.enabled {
            match resolve_provider(&config.llm) {
                Ok(provider) => {
                    info!(
                        "LLM structuring enabled (provider: {})",
                        config.llm.provider_name.as_deref().unwrap_or("auto-detected")
                    );
                    Some(provider)
                }
                Err(e) => {
                    warn!("{}; fields will be populated by pattern matching", e);
                    None
                }
            }
        } else {
            debug!("LLM structuring disabled");
            None
        };

        Self {
            config,
            ocr_engine,
            provider,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// The Tesseract installation in use, if any.
    pub fn ocr_engine(&self) -> Option<&TesseractEngine> {
        self.ocr_engine.as_deref()
    }

    pub fn has_llm(&self) -> bool {
        self.provider.is_some()
    }

    /// Extract one invoice from a local path or URL.
    ///
    /// # Errors
    /// Input and PDF errors, and [`InvoiceError::NoTextExtracted`] when
    /// neither the text layer nor OCR produced enough text. OCR and LLM
    /// failures are degradations and never surface here.
    pub async fn extract(&self, input_str: &str) -> Result<ExtractionOutput, InvoiceError> {
        let total_start = Instant::now();
        info!("Starting extraction: {}", input_str);
        self.notify(|cb| cb.on_document_start(input_str));

        let result: Result<ExtractionOutput, InvoiceError> = async {
            let resolved =
                input::resolve_input(input_str, self.config.download_timeout_secs).await?;
            self.run(input_str, resolved.path(), total_start).await
        }
        .await;

        self.report(input_str, &result);
        result
    }

    /// Extract one invoice from PDF bytes held in memory.
    pub async fn extract_bytes(&self, bytes: &[u8]) -> Result<ExtractionOutput, InvoiceError> {
        let total_start = Instant::now();
        self.notify(|cb| cb.on_document_start(BYTES_INPUT_LABEL));

        let result: Result<ExtractionOutput, InvoiceError> = async {
            // The temporary copy is removed when `resolved` drops.
            let resolved = input::ResolvedInput::from_bytes(bytes, "document.pdf")?;
            self.run(BYTES_INPUT_LABEL, resolved.path(), total_start).await
        }
        .await;

        self.report(BYTES_INPUT_LABEL, &result);
        result
    }

    /// Extract many documents.
    ///
    /// At most `config.concurrency` documents are in flight; results keep
    /// the input order. A failing document becomes a [`DocumentError`] and
    /// the batch carries on.
    pub async fn extract_batch<I, S>(&self, inputs: I) -> BatchOutput
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let start = Instant::now();
        let inputs: Vec<String> = inputs.into_iter().map(|s| s.as_ref().to_string()).collect();
        self.notify(|cb| cb.on_batch_start(inputs.len()));

        let documents: Vec<DocumentOutcome> = stream::iter(inputs.iter().map(|input| async move {
            match self.extract(input).await {
                Ok(output) => DocumentOutcome::Extracted(Box::new(output)),
                Err(e) => DocumentOutcome::Failed(DocumentError::new(input.as_str(), &e)),
            }
        }))
        .buffered(self.config.concurrency.max(1))
        .collect()
        .await;

        let mut token_usage = TokenUsage::default();
        for doc in &documents {
            if let DocumentOutcome::Extracted(out) = doc {
                token_usage.merge(&out.token_usage);
            }
        }

        let batch = BatchOutput {
            documents,
            token_usage,
            total_duration_ms: start.elapsed().as_millis() as u64,
        };
        let succeeded = batch.successes().count();
        info!(
            "Batch complete: {}/{} documents extracted in {}ms",
            succeeded,
            batch.documents.len(),
            batch.total_duration_ms
        );
        self.notify(|cb| cb.on_batch_complete(batch.documents.len(), succeeded));
        batch
    }

    async fn run(
        &self,
        input_str: &str,
        pdf_path: &Path,
        total_start: Instant,
    ) -> Result<ExtractionOutput, InvoiceError> {
        let config = &self.config;
        let password = config.password.as_deref();
        let mut stats = ExtractionStats::default();

        // ── Step 1: Text layer ───────────────────────────────────────────
        self.notify(|cb| cb.on_stage(input_str, Stage::TextLayer));
        let text_start = Instant::now();
        let layer = text::read_text_layer(pdf_path, password, config.min_page_chars).await?;
        stats.text_duration_ms = text_start.elapsed().as_millis() as u64;
        stats.total_pages = layer.metadata.page_count;

        // ── Step 2: OCR ──────────────────────────────────────────────────
        let wanted = ocr_page_indices(config.ocr.mode, &layer.metadata.pages_with_text);
        let ocr_results = match (&self.ocr_engine, wanted.is_empty()) {
            (_, true) => Vec::new(),
            (None, false) => {
                warn!(
                    "{} page(s) of {} need OCR but Tesseract is unavailable; using the text layer only",
                    wanted.len(),
                    input_str
                );
                Vec::new()
            }
            (Some(engine), false) => {
                self.notify(|cb| cb.on_stage(input_str, Stage::Ocr));
                let ocr_start = Instant::now();
                let results =
                    match ocr::ocr_pages(Arc::clone(engine), pdf_path, &config.ocr, password, &wanted)
                        .await
                    {
                        Ok(results) => results,
                        Err(e) => {
                            warn!("OCR of {} failed: {}; using the text layer", input_str, e);
                            stats.ocr_failed_pages = wanted.len();
                            Vec::new()
                        }
                    };
                stats.ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;
                info!("OCR: {} page(s) in {}ms", results.len(), stats.ocr_duration_ms);
                results
            }
        };

        // ── Step 3: Assemble page text ───────────────────────────────────
        let (pages, failed) = assemble_pages(layer.pages, ocr_results, config.min_page_chars);
        stats.ocr_failed_pages += failed;
        stats.ocr_pages = pages.iter().filter(|p| p.source == TextSource::Ocr).count();

        let full_text = pages
            .iter()
            .map(|p| p.text.as_str())
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        stats.text_chars = full_text.trim().chars().count();
        let text_source = TextSource::combine(
            pages
                .iter()
                .filter(|p| !p.text.trim().is_empty())
                .map(|p| p.source),
        );

        if stats.text_chars < config.min_document_chars {
            return Err(InvoiceError::NoTextExtracted {
                path: PathBuf::from(input_str),
                chars: stats.text_chars,
            });
        }
        debug!(
            "{}: {} chars of text ({} OCR page(s))",
            input_str, stats.text_chars, stats.ocr_pages
        );

        // ── Step 4: Structure fields ─────────────────────────────────────
        let mut token_usage = TokenUsage::default();
        let mut structured = None;
        if let Some(provider) = &self.provider {
            self.notify(|cb| cb.on_stage(input_str, Stage::Llm));
            let llm_start = Instant::now();
            match llm::structure_invoice(provider, &full_text, &config.llm, &mut token_usage).await
            {
                Ok(invoice) => structured = Some(invoice),
                Err(e) => warn!(
                    "LLM structuring of {} failed, falling back to pattern matching: {}",
                    input_str, e
                ),
            }
            stats.llm_duration_ms = llm_start.elapsed().as_millis() as u64;
        }

        let (invoice, field_source) = match structured {
            Some(invoice) => (invoice, FieldSource::Llm),
            None => {
                self.notify(|cb| cb.on_stage(input_str, Stage::Patterns));
                (fields::extract_invoice(&full_text), FieldSource::Patterns)
            }
        };

        stats.line_items = invoice.items.len();
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "Extracted {}: invoice {:?}, {} header fields, {} items in {}ms",
            input_str,
            invoice.header.invoice_number.as_deref().unwrap_or("-"),
            invoice.header.filled_fields(),
            stats.line_items,
            stats.total_duration_ms
        );

        Ok(ExtractionOutput {
            input: input_str.to_string(),
            invoice,
            text: full_text,
            text_source,
            field_source,
            pages,
            token_usage,
            stats,
        })
    }

    fn notify(&self, f: impl FnOnce(&dyn crate::progress::ExtractionProgressCallback)) {
        if let Some(cb) = &self.config.progress_callback {
            f(cb.as_ref());
        }
    }

    fn report(&self, input_str: &str, result: &Result<ExtractionOutput, InvoiceError>) {
        match result {
            Ok(output) => self.notify(|cb| cb.on_document_complete(input_str, output.invoice.items.len())),
            Err(e) => {
                warn!("{}: {}", input_str, e);
                let msg = e.to_string();
                self.notify(|cb| cb.on_document_error(input_str, &msg));
            }
        }
    }
}

/// Extract one invoice from a PDF file or URL.
///
/// Builds a new [`InvoiceExtractor`] per call; reuse an extractor when
/// processing several documents.
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoiceError> {
    InvoiceExtractor::new(config.clone())
        .extract(input_str.as_ref())
        .await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoiceError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InvoiceError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Extract one invoice from PDF bytes in memory.
///
/// # Example
/// ```rust,no_run
/// use invoice2xlsx::{extract_from_bytes, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("factura.pdf")?;
/// let output = extract_from_bytes(&bytes, &ExtractionConfig::default()).await?;
/// println!("{:?}", output.invoice.header.total);
/// # Ok(())
/// # }
/// ```
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, InvoiceError> {
    InvoiceExtractor::new(config.clone()).extract_bytes(bytes).await
}

/// Extract many documents; see [`InvoiceExtractor::extract_batch`].
pub async fn extract_batch<I, S>(inputs: I, config: &ExtractionConfig) -> BatchOutput
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    InvoiceExtractor::new(config.clone())
        .extract_batch(inputs)
        .await
}

/// Read PDF metadata without OCR or LLM calls.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentMetadata, InvoiceError> {
    let defaults = ExtractionConfig::default();
    let resolved =
        input::resolve_input(input_str.as_ref(), defaults.download_timeout_secs).await?;
    let layer = text::read_text_layer(resolved.path(), None, defaults.min_page_chars).await?;
    Ok(layer.metadata)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// 0-based indices of the pages to OCR.
pub(crate) fn ocr_page_indices(mode: OcrMode, pages_with_text: &[bool]) -> Vec<usize> {
    match mode {
        OcrMode::Never => Vec::new(),
        OcrMode::Fallback => pages_with_text
            .iter()
            .enumerate()
            .filter(|(_, has_text)| !**has_text)
            .map(|(idx, _)| idx)
            .collect(),
        OcrMode::Always => (0..pages_with_text.len()).collect(),
    }
}

/// Pick each page's final text.
///
/// OCR text wins when it reaches `min_chars` or is longer than the text
/// layer; otherwise the page keeps its text layer and counts as an OCR
/// failure. Returns the pages and the failure count.
pub(crate) fn assemble_pages(
    layer_pages: Vec<String>,
    ocr_results: Vec<OcrPage>,
    min_chars: usize,
) -> (Vec<PageText>, usize) {
    let mut ocr_by_page: Vec<Option<Result<String, InvoiceError>>> =
        (0..layer_pages.len()).map(|_| None).collect();
    for page in ocr_results {
        if let Some(slot) = ocr_by_page.get_mut(page.index) {
            *slot = Some(page.result);
        }
    }

    let mut failed = 0;
    let pages = layer_pages
        .into_iter()
        .zip(ocr_by_page)
        .enumerate()
        .map(|(idx, (layer_text, ocr))| {
            let layer_chars = layer_text.trim().chars().count();
            let (source, text) = match ocr {
                Some(Ok(ocr_text)) => {
                    let ocr_chars = ocr_text.trim().chars().count();
                    if ocr_chars >= min_chars || ocr_chars > layer_chars {
                        (TextSource::Ocr, ocr_text)
                    } else {
                        debug!("Page {}: OCR text too short, keeping text layer", idx + 1);
                        failed += 1;
                        (TextSource::TextLayer, layer_text)
                    }
                }
                Some(Err(_)) => {
                    failed += 1;
                    (TextSource::TextLayer, layer_text)
                }
                None => (TextSource::TextLayer, layer_text),
            };
            PageText {
                page_num: idx + 1,
                source,
                text,
            }
        })
        .collect();
    (pages, failed)
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        InvoiceError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching credentials (`AZURE_OPENAI_*`, `OPENAI_API_KEY`, ...) from
///    the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
fn resolve_provider(config: &LlmConfig) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| InvoiceError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set AZURE_OPENAI_API_KEY / AZURE_OPENAI_ENDPOINT or OPENAI_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ocr_page(index: usize, result: Result<&str, InvoiceError>) -> OcrPage {
        OcrPage {
            index,
            result: result.map(str::to_string),
            duration_ms: 1,
        }
    }

    #[test]
    fn page_selection_follows_ocr_mode() {
        let with_text = [true, false, true, false];
        assert!(ocr_page_indices(OcrMode::Never, &with_text).is_empty());
        assert_eq!(ocr_page_indices(OcrMode::Fallback, &with_text), vec![1, 3]);
        assert_eq!(ocr_page_indices(OcrMode::Always, &with_text), vec![0, 1, 2, 3]);
    }

    #[test]
    fn ocr_text_replaces_empty_layer() {
        let layer = vec!["FACTURA ELECTRONICA N° 4521".to_string(), String::new()];
        let ocr = vec![ocr_page(1, Ok("TOTAL $ 119.000 pagado"))];
        let (pages, failed) = assemble_pages(layer, ocr, 10);
        assert_eq!(failed, 0);
        assert_eq!(pages[0].source, TextSource::TextLayer);
        assert_eq!(pages[1].source, TextSource::Ocr);
        assert_eq!(pages[1].text, "TOTAL $ 119.000 pagado");
        assert_eq!(pages[1].page_num, 2);
    }

    #[test]
    fn failed_or_short_ocr_keeps_text_layer() {
        let layer = vec![
            "FACTURA ELECTRONICA N° 4521".to_string(),
            "RUT 76.123.456-7 GIRO SERVICIOS".to_string(),
        ];
        let ocr = vec![
            ocr_page(
                0,
                Err(InvoiceError::OcrFailed {
                    page: 1,
                    detail: "boom".into(),
                }),
            ),
            ocr_page(1, Ok("RUT")),
        ];
        let (pages, failed) = assemble_pages(layer, ocr, 10);
        assert_eq!(failed, 2);
        assert!(pages.iter().all(|p| p.source == TextSource::TextLayer));
        assert_eq!(pages[1].text, "RUT 76.123.456-7 GIRO SERVICIOS");
    }

    #[test]
    fn disabled_llm_has_no_provider() {
        let config = ExtractionConfig::builder()
            .llm_enabled(false)
            .ocr_mode(OcrMode::Never)
            .build()
            .unwrap();
        let extractor = InvoiceExtractor::new(config);
        assert!(!extractor.has_llm());
        assert!(extractor.ocr_engine().is_none());
    }

    #[tokio::test]
    async fn missing_file_fails_before_pdfium() {
        let config = ExtractionConfig::builder()
            .llm_enabled(false)
            .ocr_mode(OcrMode::Never)
            .build()
            .unwrap();
        let err = InvoiceExtractor::new(config)
            .extract("/nonexistent/factura.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, InvoiceError::FileNotFound { .. }), "got {err:?}");
    }
}
