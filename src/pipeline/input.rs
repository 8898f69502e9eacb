//! Document source resolution: path, URL, or in-memory bytes → local PDF.
//!
//! pdfium opens files by path, so every input ends up as a file on disk.
//! URLs and byte buffers are written into a `TempDir` owned by the returned
//! [`ResolvedInput`]; the directory disappears when it is dropped, even on
//! panic. The `%PDF` magic is checked up front so a mis-named fax TIFF gets a
//! clear `NotAPdf` instead of an opaque pdfium failure.

use crate::error::Rx2JsonError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF that pdfium can open.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was downloaded or materialised from bytes into a temp dir that
    /// lives as long as this value.
    Temporary { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Temporary { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a user-supplied path or HTTP(S) URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, Rx2JsonError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Rx2JsonError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input))
    }
}

/// Write in-memory PDF bytes to a managed temp file.
pub fn resolve_bytes(bytes: &[u8], name: &str) -> Result<ResolvedInput, Rx2JsonError> {
    let temp_dir = TempDir::new().map_err(|e| Rx2JsonError::Internal(format!("tempdir: {e}")))?;
    let path = temp_dir.path().join(sanitize_file_name(name));
    check_magic(&path, bytes)?;
    std::fs::write(&path, bytes)
        .map_err(|e| Rx2JsonError::Internal(format!("Failed to write temp file: {e}")))?;
    Ok(ResolvedInput::Temporary {
        path,
        _temp_dir: temp_dir,
    })
}

fn resolve_local(path: &Path) -> Result<ResolvedInput, Rx2JsonError> {
    let path = path.to_path_buf();
    if !path.exists() {
        return Err(Rx2JsonError::FileNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Rx2JsonError::PermissionDenied { path });
        }
        Err(_) => return Err(Rx2JsonError::FileNotFound { path }),
    };

    let mut magic = [0u8; 4];
    let read = file.read(&mut magic).unwrap_or(0);
    check_magic(&path, &magic[..read])?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Reject anything that does not start with `%PDF`.
fn check_magic(path: &Path, head: &[u8]) -> Result<(), Rx2JsonError> {
    if head.len() >= 4 && &head[..4] == PDF_MAGIC {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = head.len().min(4);
    magic[..n].copy_from_slice(&head[..n]);
    Err(Rx2JsonError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, Rx2JsonError> {
    info!("Downloading prescription from: {}", url);

    let parsed = reqwest::Url::parse(url).map_err(|_| Rx2JsonError::InvalidInput {
        input: url.to_string(),
    })?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Rx2JsonError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let download_err = |e: reqwest::Error| {
        if e.is_timeout() {
            Rx2JsonError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Rx2JsonError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(parsed.clone()).send().await.map_err(download_err)?;
    if !response.status().is_success() {
        return Err(Rx2JsonError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(download_err)?;
    let resolved = resolve_bytes(&bytes, &file_name_from_url(&parsed))?;
    info!("Downloaded {} bytes to {}", bytes.len(), resolved.path().display());
    Ok(resolved)
}

/// Last path segment when it looks like a file name, else a fixed fallback.
fn file_name_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "prescription.pdf".to_string())
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "prescription.pdf".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/rx.pdf"));
        assert!(is_url("http://example.com/rx.pdf"));
        assert!(!is_url("/tmp/rx.pdf"));
        assert!(!is_url("rx.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn file_name_from_url_falls_back() {
        let u = reqwest::Url::parse("https://fax.example.com/inbox/rx-123.pdf").unwrap();
        assert_eq!(file_name_from_url(&u), "rx-123.pdf");
        let u = reqwest::Url::parse("https://fax.example.com/inbox/").unwrap();
        assert_eq!(file_name_from_url(&u), "prescription.pdf");
    }

    #[test]
    fn sanitize_strips_path_separators() {
        assert_eq!(sanitize_file_name("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_file_name(".."), "prescription.pdf");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = resolve_local(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, Rx2JsonError::FileNotFound { .. }));
    }

    #[test]
    fn non_pdf_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"hello world").unwrap();
        let err = resolve_local(&path).unwrap_err();
        match err {
            Rx2JsonError::NotAPdf { magic, .. } => assert_eq!(&magic, b"hell"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bytes_are_materialised_and_cleaned_up() {
        let resolved = resolve_bytes(b"%PDF-1.7\n%%EOF", "upload.pdf").unwrap();
        let path = resolved.path().to_path_buf();
        assert!(path.exists());
        drop(resolved);
        assert!(!path.exists());
    }

    #[test]
    fn short_bytes_are_not_a_pdf() {
        let err = resolve_bytes(b"%P", "x.pdf").unwrap_err();
        assert!(err.is_document_read());
    }

    #[tokio::test]
    async fn blank_input_is_invalid() {
        let err = resolve_input("   ", 5).await.unwrap_err();
        assert!(matches!(err, Rx2JsonError::InvalidInput { .. }));
    }
}
