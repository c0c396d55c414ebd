//! Result types returned by the extraction entry points.

use crate::error::DocumentError;
use crate::model::Invoice;
use serde::{Deserialize, Serialize};

/// Where the text of a page (or a whole document) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// Embedded text layer read by pdfium.
    TextLayer,
    /// Tesseract OCR on the rasterised page.
    Ocr,
    /// Some pages from the text layer, some from OCR.
    Mixed,
}

impl TextSource {
    /// Combine the sources of individual pages into a document-level source.
    pub fn combine(pages: impl IntoIterator<Item = TextSource>) -> TextSource {
        let mut seen: Option<TextSource> = None;
        for source in pages {
            seen = match seen {
                None => Some(source),
                Some(prev) if prev == source => Some(prev),
                Some(_) => return TextSource::Mixed,
            };
        }
        seen.unwrap_or(TextSource::TextLayer)
    }
}

/// How the invoice fields were populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Llm,
    Patterns,
}

/// Text of a single page after the text-layer / OCR decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed page number.
    pub page_num: usize,
    pub source: TextSource,
    pub text: String,
}

impl PageText {
    pub fn chars(&self) -> usize {
        self.text.trim().chars().count()
    }
}

/// Token accounting for LLM calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Number of successful LLM calls.
    pub calls: u32,
}

impl TokenUsage {
    /// Record one successful call.
    pub fn record(&mut self, prompt_tokens: u64, completion_tokens: u64) {
        self.prompt_tokens += prompt_tokens;
        self.completion_tokens += completion_tokens;
        self.total_tokens += prompt_tokens + completion_tokens;
        self.calls += 1;
    }

    pub fn merge(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.calls += other.calls;
    }

    /// Average total tokens per call, `0.0` when nothing was called.
    pub fn average_per_call(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_tokens as f64 / self.calls as f64
        }
    }
}

/// Timing and page statistics of one extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    /// Pages whose final text came from OCR.
    pub ocr_pages: usize,
    /// Pages where OCR was attempted but failed or yielded too little text.
    pub ocr_failed_pages: usize,
    pub text_chars: usize,
    pub line_items: usize,
    pub text_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of extracting one invoice document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The input as given by the caller (path or URL).
    pub input: String,
    pub invoice: Invoice,
    /// Full extracted text, kept for review next to the fields.
    pub text: String,
    pub text_source: TextSource,
    pub field_source: FieldSource,
    pub pages: Vec<PageText>,
    pub token_usage: TokenUsage,
    pub stats: ExtractionStats,
}

/// Outcome of one document inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Extracted(Box<ExtractionOutput>),
    Failed(DocumentError),
}

impl DocumentOutcome {
    pub fn input(&self) -> &str {
        match self {
            DocumentOutcome::Extracted(out) => &out.input,
            DocumentOutcome::Failed(err) => &err.input,
        }
    }
}

/// Results of a batch, in input order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutput {
    pub documents: Vec<DocumentOutcome>,
    pub token_usage: TokenUsage,
    pub total_duration_ms: u64,
}

impl BatchOutput {
    pub fn successes(&self) -> impl Iterator<Item = &ExtractionOutput> {
        self.documents.iter().filter_map(|d| match d {
            DocumentOutcome::Extracted(out) => Some(out.as_ref()),
            DocumentOutcome::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentError> {
        self.documents.iter().filter_map(|d| match d {
            DocumentOutcome::Failed(err) => Some(err),
            DocumentOutcome::Extracted(_) => None,
        })
    }

    /// Successfully extracted invoices that carry an invoice number.
    pub fn exportable(&self) -> impl Iterator<Item = &Invoice> {
        self.successes()
            .map(|out| &out.invoice)
            .filter(|inv| inv.is_exportable())
    }
}

/// Document-level metadata read without OCR or LLM calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub page_count: usize,
    /// Per page: does it carry a usable text layer?
    pub pages_with_text: Vec<bool>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
    pub pdf_version: String,
}

impl DocumentMetadata {
    /// 0-based indices of pages without a usable text layer.
    pub fn scanned_pages(&self) -> Vec<usize> {
        self.pages_with_text
            .iter()
            .enumerate()
            .filter(|(_, has_text)| !**has_text)
            .map(|(idx, _)| idx)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvoiceError;
    use std::path::PathBuf;

    #[test]
    fn combine_sources() {
        use TextSource::*;
        assert_eq!(TextSource::combine([]), TextLayer);
        assert_eq!(TextSource::combine([Ocr, Ocr]), Ocr);
        assert_eq!(TextSource::combine([TextLayer, Ocr, TextLayer]), Mixed);
    }

    #[test]
    fn token_usage_accumulates() {
        let mut a = TokenUsage::default();
        assert_eq!(a.average_per_call(), 0.0);
        a.record(1000, 200);
        a.record(800, 100);
        assert_eq!(a.total_tokens, 2100);
        assert_eq!(a.calls, 2);
        assert_eq!(a.average_per_call(), 1050.0);

        let mut b = TokenUsage::default();
        b.record(10, 5);
        b.merge(&a);
        assert_eq!(b.total_tokens, 2115);
        assert_eq!(b.calls, 3);
    }

    #[test]
    fn batch_exports_only_numbered_invoices() {
        let mut numbered = Invoice::default();
        numbered.header.invoice_number = Some("77".into());
        let output = |input: &str, invoice: Invoice| {
            DocumentOutcome::Extracted(Box::new(ExtractionOutput {
                input: input.into(),
                invoice,
                text: String::new(),
                text_source: TextSource::TextLayer,
                field_source: FieldSource::Patterns,
                pages: vec![],
                token_usage: TokenUsage::default(),
                stats: ExtractionStats::default(),
            }))
        };
        let failed = DocumentError::new(
            "c.pdf",
            &InvoiceError::FileNotFound {
                path: PathBuf::from("c.pdf"),
            },
        );
        let batch = BatchOutput {
            documents: vec![
                output("a.pdf", numbered),
                output("b.pdf", Invoice::default()),
                DocumentOutcome::Failed(failed),
            ],
            ..Default::default()
        };

        assert_eq!(batch.successes().count(), 2);
        assert_eq!(batch.failures().count(), 1);
        assert_eq!(batch.exportable().count(), 1);
        assert_eq!(batch.documents[2].input(), "c.pdf");
    }

    #[test]
    fn scanned_pages_lists_pages_without_text() {
        let meta = DocumentMetadata {
            page_count: 3,
            pages_with_text: vec![true, false, false],
            ..Default::default()
        };
        assert_eq!(meta.scanned_pages(), vec![1, 2]);
    }
}
