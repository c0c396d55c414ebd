//! # invoice2xlsx
//!
//! Extract Chilean invoices (facturas, boletas, guías de despacho) from PDF
//! into a two-sheet Excel workbook: one row per invoice header, one row per
//! line item.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Text      read the embedded text layer via pdfium (spawn_blocking)
//!  ├─ 3. OCR       rasterise + preprocess + Tesseract for pages without text
//!  ├─ 4. LLM       optional JSON structuring (azure / openai / ...)
//!  ├─ 5. Patterns  regular-expression fields when the LLM is off or fails
//!  └─ 6. Export    Header + Detail sheets via rust_xlsxwriter
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice2xlsx::{extract_batch, export_batch, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // LLM credentials are read from AZURE_OPENAI_* / OPENAI_API_KEY;
//!     // without them the fields come from pattern matching.
//!     let config = ExtractionConfig::default();
//!     let batch = extract_batch(["factura-1.pdf", "factura-2.pdf"], &config).await;
//!     for failure in batch.failures() {
//!         eprintln!("{failure}");
//!     }
//!     let path = export_batch(&batch, "facturas.xlsx").await?;
//!     println!("wrote {}", path.display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice2xlsx` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ## Runtime Requirements
//!
//! * A pdfium shared library (`PDFIUM_LIB_PATH`, the working directory, or
//!   the system library path).
//! * Tesseract with Spanish language data for scanned invoices (optional).

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod spreadsheet;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, LlmConfig, OcrConfig, OcrMode};
pub use error::{DocumentError, InvoiceError};
pub use extract::{extract, extract_batch, extract_from_bytes, extract_sync, inspect, InvoiceExtractor};
pub use model::{Invoice, InvoiceHeader, LineItem};
pub use output::{
    BatchOutput, DocumentMetadata, DocumentOutcome, ExtractionOutput, ExtractionStats,
    FieldSource, PageText, TextSource, TokenUsage,
};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use spreadsheet::{export_batch, write_workbook};
