//! Error types for the invoice2xlsx library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`InvoiceError`]: **Fatal** for the operation at hand: a document
//!   cannot be read at all (bad input file, wrong password, no text), or a
//!   workbook cannot be written. Returned as `Err(InvoiceError)` from the
//!   top-level `extract*` and `write_*` functions.
//!
//! * [`DocumentError`]: **Non-fatal** inside a batch: one document failed
//!   but the others are fine. Stored inside [`crate::output::BatchOutput`]
//!   so callers can export the successful invoices and report the rest.
//!
//! Degradations are not errors at all. A missing OCR engine, a failing page
//! OCR or an unreachable LLM only produce `warn!` logs and the pipeline
//! continues with what it has.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the invoice2xlsx library.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium failed to read the text layer of a page.
    #[error("Text extraction failed for page {page}: {detail}")]
    TextExtractionFailed { page: usize, detail: String },

    /// pdfium failed to rasterise a page for OCR.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Neither the text layer nor OCR produced usable text.
    #[error(
        "No text could be extracted from '{path}' ({chars} characters found).\n\
The file may be corrupt or a scanned image; install Tesseract OCR for scanned invoices."
    )]
    NoTextExtracted { path: PathBuf, chars: usize },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The Tesseract binary could not be found or started.
    #[error("Tesseract OCR is not available: {hint}")]
    OcrUnavailable { hint: String },

    /// Tesseract ran but failed on a page.
    #[error("OCR failed on page {page}: {detail}")]
    OcrFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API call failed after all retries.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The LLM replied, but not with a usable invoice JSON object.
    #[error("LLM reply is not a valid invoice object: {detail}")]
    LlmInvalidResponse { detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not build the workbook in memory.
    #[error("Failed to build spreadsheet: {detail}")]
    SpreadsheetFailed { detail: String },

    /// Could not create or write the output workbook file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Export was requested but no invoice carries an invoice number.
    #[error("No exportable invoices: {total} document(s) processed, none with an invoice number")]
    NoExportableInvoices { total: usize },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Place libpdfium next to the binary, install it system-wide,\n\
or set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for one document of a batch.
///
/// Carries the input string so a report can name the file that failed.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("{input}: {detail}")]
pub struct DocumentError {
    /// The input as given by the caller (path or URL).
    pub input: String,
    /// Human-readable reason, taken from the fatal [`InvoiceError`].
    pub detail: String,
}

impl DocumentError {
    pub fn new(input: impl Into<String>, err: &InvoiceError) -> Self {
        Self {
            input: input.into(),
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_text_display_mentions_ocr() {
        let e = InvoiceError::NoTextExtracted {
            path: PathBuf::from("scan.pdf"),
            chars: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("scan.pdf"), "got: {msg}");
        assert!(msg.contains("Tesseract"), "got: {msg}");
    }

    #[test]
    fn no_exportable_display() {
        let e = InvoiceError::NoExportableInvoices { total: 4 };
        assert!(e.to_string().contains("4 document(s)"));
    }

    #[test]
    fn document_error_carries_input_and_reason() {
        let fatal = InvoiceError::FileNotFound {
            path: PathBuf::from("/nope.pdf"),
        };
        let e = DocumentError::new("/nope.pdf", &fatal);
        assert_eq!(e.input, "/nope.pdf");
        assert!(e.detail.contains("not found"));
        assert!(e.to_string().starts_with("/nope.pdf: "));
    }

    #[test]
    fn ocr_failed_display() {
        let e = InvoiceError::OcrFailed {
            page: 2,
            detail: "exit status 1".into(),
        };
        assert!(e.to_string().contains("page 2"));
    }
}
