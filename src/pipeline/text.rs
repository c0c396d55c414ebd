//! Text-layer extraction: read the embedded text of every page via pdfium.
//!
//! Runs inside `spawn_blocking`; pdfium is a C++ library with thread-local
//! state and must not be driven from async worker threads.

use crate::error::InvoiceError;
use crate::output::DocumentMetadata;
use crate::pipeline::postprocess;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit pdfium library file.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Text of every page plus document metadata.
#[derive(Debug, Clone)]
pub struct TextLayer {
    /// Cleaned text per page, in page order.
    pub pages: Vec<String>,
    pub metadata: DocumentMetadata,
}

/// Bind to a pdfium library.
///
/// Order: `PDFIUM_LIB_PATH`, a library next to the working directory, then
/// the system library.
pub(crate) fn bind_pdfium() -> Result<Pdfium, InvoiceError> {
    if let Some(path) = std::env::var_os(PDFIUM_LIB_PATH_ENV) {
        let path = PathBuf::from(path);
        debug!("Binding pdfium from {}", path.display());
        return Pdfium::bind_to_library(&path)
            .map(Pdfium::new)
            .map_err(|e| InvoiceError::PdfiumBindingFailed(format!("{}: {:?}", path.display(), e)));
    }

    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| InvoiceError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Open a PDF, mapping pdfium errors onto password / corruption errors.
pub(crate) fn load_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, InvoiceError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                InvoiceError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                InvoiceError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            InvoiceError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

/// Read the text layer of every page.
pub async fn read_text_layer(
    pdf_path: &Path,
    password: Option<&str>,
    min_page_chars: usize,
) -> Result<TextLayer, InvoiceError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(|s| s.to_string());

    tokio::task::spawn_blocking(move || read_text_layer_blocking(&path, pwd.as_deref(), min_page_chars))
        .await
        .map_err(|e| InvoiceError::Internal(format!("Text extraction task panicked: {}", e)))?
}

fn read_text_layer_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    min_page_chars: usize,
) -> Result<TextLayer, InvoiceError> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, pdf_path, password)?;

    let mut pages = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let text = match page.text() {
            Ok(t) => postprocess::clean_page_text(&t.all()),
            Err(e) => {
                let err = InvoiceError::TextExtractionFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                };
                warn!("{}; treating page as scanned", err);
                String::new()
            }
        };
        debug!("Page {}: {} text-layer chars", idx + 1, text.chars().count());
        pages.push(text);
    }

    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    let metadata = DocumentMetadata {
        page_count: pages.len(),
        pages_with_text: pages
            .iter()
            .map(|p| has_text_layer(p, min_page_chars))
            .collect(),
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        pdf_version: format!("{:?}", document.version()),
    };

    info!(
        "PDF loaded: {} pages, {} with a text layer",
        metadata.page_count,
        metadata.pages_with_text.iter().filter(|t| **t).count()
    );

    Ok(TextLayer { pages, metadata })
}

/// A page has a text layer when its trimmed text reaches `min_chars`.
pub fn has_text_layer(text: &str, min_chars: usize) -> bool {
    text.trim().chars().count() >= min_chars
}
