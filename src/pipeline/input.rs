//! Input resolution: normalise a user-supplied path, URL or byte buffer to a
//! local PDF file.
//!
//! pdfium opens documents from a file-system path, so downloads and
//! in-memory buffers are written into a `TempDir` owned by the
//! [`ResolvedInput`]. The directory is removed when the value is dropped.
//! The `%PDF` magic bytes are checked before returning.

use crate::error::InvoiceError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// The resolved input: a local path, or a temp file we own.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was downloaded or handed over as bytes.
    /// The `TempDir` is kept alive until extraction completes.
    Temporary { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Temporary { path, .. } => path,
        }
    }

    /// Write an in-memory PDF to a temp file.
    pub fn from_bytes(bytes: &[u8], file_name: &str) -> Result<Self, InvoiceError> {
        let temp_dir = TempDir::new().map_err(|e| InvoiceError::Internal(e.to_string()))?;
        let path = temp_dir.path().join(sanitise_file_name(file_name));
        check_magic(&path, bytes)?;
        std::fs::write(&path, bytes)
            .map_err(|e| InvoiceError::Internal(format!("Failed to write temp file: {}", e)))?;
        debug!("Buffered {} bytes to {}", bytes.len(), path.display());
        Ok(ResolvedInput::Temporary {
            path,
            _temp_dir: temp_dir,
        })
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, InvoiceError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, InvoiceError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(InvoiceError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            let read = f.read(&mut magic).unwrap_or(0);
            check_magic(&path, &magic[..read])?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(InvoiceError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(InvoiceError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, InvoiceError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| InvoiceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let timeout_err = |e: reqwest::Error| {
        if e.is_timeout() {
            InvoiceError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            InvoiceError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(timeout_err)?;

    if !response.status().is_success() {
        return Err(InvoiceError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let bytes = response.bytes().await.map_err(timeout_err)?;

    let resolved = ResolvedInput::from_bytes(&bytes, &filename)?;
    info!("Downloaded to: {}", resolved.path().display());
    Ok(resolved)
}

fn check_magic(path: &Path, head: &[u8]) -> Result<(), InvoiceError> {
    if head.len() >= 4 && &head[..4] == PDF_MAGIC {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = head.len().min(4);
    magic[..n].copy_from_slice(&head[..n]);
    Err(InvoiceError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

/// Last URL path segment when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return sanitise_file_name(last);
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

fn sanitise_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let clean: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if clean.is_empty() || clean.chars().all(|c| c == '.') {
        "document.pdf".to_string()
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(
            filename_from_url("https://example.com/files/factura%201.pdf"),
            "factura_201.pdf"
        );
        assert_eq!(filename_from_url("https://example.com/download"), "downloaded.pdf");
    }

    #[test]
    fn sanitise_strips_directories() {
        assert_eq!(sanitise_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitise_file_name(""), "document.pdf");
    }

    #[test]
    fn local_missing_file_is_not_found() {
        let err = resolve_local("/definitely/not/here.pdf").err().unwrap();
        assert!(matches!(err, InvoiceError::FileNotFound { .. }));
    }

    #[test]
    fn local_non_pdf_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"PK\x03\x04zip data").unwrap();
        let err = resolve_local(file.path().to_str().unwrap()).err().unwrap();
        match err {
            InvoiceError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_file_is_not_a_pdf() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = resolve_local(file.path().to_str().unwrap()).err().unwrap();
        assert!(matches!(err, InvoiceError::NotAPdf { .. }));
    }

    #[test]
    fn bytes_are_buffered_to_temp_file() {
        let resolved = ResolvedInput::from_bytes(b"%PDF-1.7\n%%EOF", "inv.pdf").unwrap();
        let path = resolved.path().to_path_buf();
        assert!(path.ends_with("inv.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7\n%%EOF");
        drop(resolved);
        assert!(!path.exists());
    }

    #[test]
    fn bytes_without_magic_are_rejected() {
        assert!(ResolvedInput::from_bytes(b"hello", "x.pdf").is_err());
    }
}
