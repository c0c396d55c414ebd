//! Pipeline stages for invoice extraction.
//!
//! Each submodule implements one step; [`crate::extract`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ text ──▶ render ──▶ preprocess ──▶ ocr ──▶ llm ──▶ fields
//! (URL/path) (text layer) (pdfium) (image)   (tesseract) (JSON) (patterns)
//! ```
//!
//! 1. [`input`] canonicalise the user-supplied path or URL to a local PDF
//! 2. [`text`] read each page's embedded text; decides which pages need OCR
//! 3. [`render`] rasterise pages at OCR resolution; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 4. [`preprocess`] denoise, contrast, sharpen, binarise and upscale
//! 5. [`ocr`] run Tesseract on each prepared page image
//! 6. [`llm`] optional structuring call with retry/backoff; the only stage
//!    with network I/O besides URL download
//! 7. [`fields`] regular-expression population of header and line items,
//!    used whenever the LLM stage is off or fails
//!
//! [`postprocess`] holds the text-cleanup rules shared by several stages.

pub mod fields;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod postprocess;
pub mod preprocess;
pub mod render;
pub mod text;
