//! Plain text out of a CV file.

use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::DocumentError;

pub fn extract_text(path: &Path) -> Result<String, DocumentError> {
    if !path.exists() {
        return Err(DocumentError::NotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let io_err = |source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    };

    match extension.as_str() {
        "pdf" => {
            let bytes = std::fs::read(path).map_err(io_err)?;
            let text = extract_pdf(&bytes);
            if text.trim().is_empty() {
                return Err(DocumentError::UnreadableDocument(path.to_path_buf()));
            }
            info!("extracted {} characters from {}", text.len(), path.display());
            Ok(text)
        }
        "txt" | "md" => std::fs::read_to_string(path).map_err(io_err),
        other => Err(DocumentError::UnsupportedFormat {
            extension: if other.is_empty() {
                "(none)".to_string()
            } else {
                format!(".{}", other)
            },
        }),
    }
}

/// Layout-aware extraction first, page-by-page fallback second.
fn extract_pdf(bytes: &[u8]) -> String {
    // pdf-extract panics on some malformed fonts instead of erroring.
    let layout = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
    match layout {
        Ok(Ok(text)) if !text.trim().is_empty() => return text.trim().to_string(),
        Ok(Ok(_)) => debug!("layout extraction produced no text"),
        Ok(Err(e)) => warn!("layout extraction failed: {}", e),
        Err(_) => warn!("layout extraction aborted on a malformed document"),
    }

    let document = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("fallback extraction could not parse the document: {}", e);
            return String::new();
        }
    };

    let mut text = String::new();
    for page in document.get_pages().keys() {
        match document.extract_text(&[*page]) {
            Ok(page_text) if !page_text.trim().is_empty() => {
                text.push_str(page_text.trim_end());
                text.push('\n');
            }
            Ok(_) => {}
            Err(e) => warn!("could not extract text from page {}: {}", page, e),
        }
    }
    text.trim().to_string()
}
