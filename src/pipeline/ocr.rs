//! Tesseract OCR via the command-line engine.
//!
//! The engine is discovered once per [`crate::InvoiceExtractor`]: explicit
//! path first, then `tesseract` on `PATH`, then the usual Windows install
//! folders. Each candidate is probed with `--version`. When nothing answers
//! the extractor logs a warning and works from the text layer alone.

use crate::config::OcrConfig;
use crate::error::InvoiceError;
use crate::pipeline::text::{bind_pdfium, load_document};
use crate::pipeline::{postprocess, preprocess, render};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

#[cfg(windows)]
const BINARY_NAME: &str = "tesseract.exe";
#[cfg(not(windows))]
const BINARY_NAME: &str = "tesseract";

/// A probed, runnable Tesseract installation plus the invocation settings.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    version: String,
    languages: String,
    psm: u8,
    char_whitelist: Option<String>,
}

impl TesseractEngine {
    /// Find a working Tesseract binary.
    ///
    /// # Errors
    /// [`InvoiceError::OcrUnavailable`] when no candidate answers `--version`.
    pub fn discover(config: &OcrConfig) -> Result<Self, InvoiceError> {
        let candidates = candidate_binaries(config.tesseract_path.as_deref(), windows_install_dirs());
        for binary in &candidates {
            if let Some(version) = probe(binary) {
                info!("Using {} ({})", binary.display(), version);
                return Ok(Self {
                    binary: binary.clone(),
                    version,
                    languages: config.languages.clone(),
                    psm: config.psm,
                    char_whitelist: config.char_whitelist.clone(),
                });
            }
            debug!("No Tesseract at {}", binary.display());
        }
        Err(InvoiceError::OcrUnavailable {
            hint: format!(
                "tried {}. Install tesseract-ocr (with the '{}' language data) or set TESSERACT_PATH.",
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                config.languages
            ),
        })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// First line of `tesseract --version`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Arguments for one recognition run, writing text to stdout.
    pub fn args_for(&self, image_path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            image_path.as_os_str().to_owned(),
            "stdout".into(),
            "-l".into(),
            self.languages.clone().into(),
            "--psm".into(),
            self.psm.to_string().into(),
            "-c".into(),
            "preserve_interword_spaces=1".into(),
        ];
        if let Some(whitelist) = self.char_whitelist.as_deref().filter(|w| !w.is_empty()) {
            args.push("-c".into());
            args.push(format!("tessedit_char_whitelist={whitelist}").into());
        }
        args
    }

    /// Run Tesseract on an image file and return the cleaned text.
    pub fn recognise(&self, image_path: &Path, page_num: usize) -> Result<String, InvoiceError> {
        let output = Command::new(&self.binary)
            .args(self.args_for(image_path))
            .output();

        match output {
            Ok(output) if output.status.success() => Ok(postprocess::clean_ocr_text(
                &String::from_utf8_lossy(&output.stdout),
            )),
            Ok(output) => Err(InvoiceError::OcrFailed {
                page: page_num,
                detail: format!(
                    "tesseract exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(InvoiceError::OcrUnavailable {
                hint: format!("{} disappeared", self.binary.display()),
            }),
            Err(e) => Err(InvoiceError::OcrFailed {
                page: page_num,
                detail: e.to_string(),
            }),
        }
    }
}

/// Discovery order: configured path (a file, or a directory holding the
/// binary), bare name for a `PATH` lookup, then the install folders.
pub fn candidate_binaries(configured: Option<&Path>, install_dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(path) = configured {
        if path.is_dir() {
            out.push(path.join(BINARY_NAME));
        } else {
            out.push(path.to_path_buf());
        }
    }
    out.push(PathBuf::from(BINARY_NAME));
    out.extend(install_dirs.into_iter().map(|d| d.join(BINARY_NAME)));
    out
}

fn windows_install_dirs() -> Vec<PathBuf> {
    if !cfg!(windows) {
        return Vec::new();
    }
    let mut dirs = vec![
        PathBuf::from(r"C:\Program Files\Tesseract-OCR"),
        PathBuf::from(r"C:\Program Files (x86)\Tesseract-OCR"),
    ];
    if let Some(local) = std::env::var_os("LOCALAPPDATA") {
        dirs.push(PathBuf::from(local).join("Programs").join("Tesseract-OCR"));
    }
    dirs
}

/// `Some(version line)` when the binary runs and reports a version.
fn probe(binary: &Path) -> Option<String> {
    let output = Command::new(binary).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    // Older releases print the version banner on stderr.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// OCR result of one page.
#[derive(Debug)]
pub struct OcrPage {
    /// 0-based page index.
    pub index: usize,
    pub result: Result<String, InvoiceError>,
    pub duration_ms: u64,
}

/// Render, preprocess and recognise the selected pages.
///
/// Document-level failures (pdfium binding, unreadable PDF) are returned as
/// `Err`; a page that fails carries its error in [`OcrPage::result`].
pub async fn ocr_pages(
    engine: Arc<TesseractEngine>,
    pdf_path: &Path,
    config: &OcrConfig,
    password: Option<&str>,
    page_indices: &[usize],
) -> Result<Vec<OcrPage>, InvoiceError> {
    let path = pdf_path.to_path_buf();
    let config = config.clone();
    let password = password.map(|s| s.to_string());
    let indices = page_indices.to_vec();

    tokio::task::spawn_blocking(move || {
        ocr_pages_blocking(&engine, &path, &config, password.as_deref(), &indices)
    })
    .await
    .map_err(|e| InvoiceError::Internal(format!("OCR task panicked: {}", e)))?
}

fn ocr_pages_blocking(
    engine: &TesseractEngine,
    pdf_path: &Path,
    config: &OcrConfig,
    password: Option<&str>,
    page_indices: &[usize],
) -> Result<Vec<OcrPage>, InvoiceError> {
    let pdfium = bind_pdfium()?;
    let document = load_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let scratch = TempDir::new().map_err(|e| InvoiceError::Internal(e.to_string()))?;

    let mut results = Vec::with_capacity(page_indices.len());
    for &idx in page_indices {
        let start = Instant::now();
        let page_num = idx + 1;
        let result = pages
            .get(idx as u16)
            .map_err(|e| InvoiceError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            })
            .and_then(|page| render::render_page(&page, page_num, config.dpi, config.max_rendered_pixels))
            .and_then(|image| {
                let prepared = if config.preprocess {
                    preprocess::prepare_for_ocr(&image)
                } else {
                    image.to_luma8()
                };
                let image_path = scratch.path().join(format!("page-{page_num:04}.png"));
                prepared.save(&image_path).map_err(|e| InvoiceError::OcrFailed {
                    page: page_num,
                    detail: format!("could not write page image: {}", e),
                })?;
                engine.recognise(&image_path, page_num)
            });

        match &result {
            Ok(text) => debug!("OCR page {}: {} chars", page_num, text.chars().count()),
            Err(e) => warn!("{}", e),
        }
        results.push(OcrPage {
            index: idx,
            result,
            duration_ms: start.elapsed().as_millis() as u64,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(whitelist: Option<&str>) -> TesseractEngine {
        TesseractEngine {
            binary: PathBuf::from("tesseract"),
            version: "tesseract 5.3.0".into(),
            languages: "spa+eng".into(),
            psm: 11,
            char_whitelist: whitelist.map(str::to_string),
        }
    }

    #[test]
    fn args_carry_language_psm_and_spacing() {
        let args = engine(None).args_for(Path::new("/tmp/page-0001.png"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "/tmp/page-0001.png",
                "stdout",
                "-l",
                "spa+eng",
                "--psm",
                "11",
                "-c",
                "preserve_interword_spaces=1"
            ]
        );
    }

    #[test]
    fn args_include_whitelist_when_set() {
        let args = engine(Some("0123456789")).args_for(Path::new("p.png"));
        let last = args.last().unwrap().to_string_lossy().into_owned();
        assert_eq!(last, "tessedit_char_whitelist=0123456789");
        assert_eq!(engine(Some("")).args_for(Path::new("p.png")).len(), 8);
    }

    #[test]
    fn candidates_start_with_configured_path() {
        let dirs = vec![PathBuf::from("/opt/Tesseract-OCR")];
        let list = candidate_binaries(Some(Path::new("/usr/local/bin/tesseract-5")), dirs);
        assert_eq!(list[0], PathBuf::from("/usr/local/bin/tesseract-5"));
        assert_eq!(list[1], PathBuf::from(BINARY_NAME));
        assert_eq!(list[2], PathBuf::from("/opt/Tesseract-OCR").join(BINARY_NAME));
    }

    #[test]
    fn configured_directory_is_joined_with_binary_name() {
        let dir = tempfile::tempdir().unwrap();
        let list = candidate_binaries(Some(dir.path()), Vec::new());
        assert_eq!(list[0], dir.path().join(BINARY_NAME));
    }

    #[test]
    fn probe_of_missing_binary_is_none() {
        assert!(probe(Path::new("/nonexistent/dir/tesseract")).is_none());
    }

    #[test]
    fn discover_reports_tried_paths() {
        let config = OcrConfig {
            tesseract_path: Some(PathBuf::from("/nonexistent/dir/tesseract")),
            ..Default::default()
        };
        // May succeed when tesseract is installed on PATH; only the error
        // message is checked here.
        if let Err(InvoiceError::OcrUnavailable { hint }) = TesseractEngine::discover(&config) {
            assert!(hint.contains("/nonexistent/dir/tesseract"));
            assert!(hint.contains("spa+eng"));
        }
    }
}
