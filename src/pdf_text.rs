use async_trait::async_trait;

use crate::text_normalizer::normalize;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("file is not a PDF document")]
    NotPdf,

    #[error("failed to parse PDF: {0}")]
    Parse(String),

    #[error("PDF extraction task failed: {0}")]
    Task(String),
}

/// Source of a PDF's text layer. Output is already normalized and may be
/// empty for scanned documents.
#[async_trait]
pub trait PdfTextSource: Send + Sync {
    async fn extract(&self, bytes: Vec<u8>) -> Result<String, PdfError>;
}

/// Text layer extraction backed by `pdf-extract`.
#[derive(Debug, Clone, Default)]
pub struct PdfExtractor;

#[async_trait]
impl PdfTextSource for PdfExtractor {
    async fn extract(&self, bytes: Vec<u8>) -> Result<String, PdfError> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(PdfError::NotPdf);
        }

        let started = std::time::Instant::now();
        let byte_len = bytes.len();

        // Parsing is CPU bound and the parser can panic on malformed input;
        // a panic surfaces here as a join error.
        let raw = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| PdfError::Task(e.to_string()))?
            .map_err(|e| PdfError::Parse(e.to_string()))?;

        let text = normalize(&raw);
        tracing::debug!(
            component = "pdf_text",
            pdf_bytes = byte_len,
            text_length = text.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Extracted PDF text layer"
        );

        Ok(text)
    }
}
