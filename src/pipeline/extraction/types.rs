use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Text layer of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: usize,
    pub text: String,
}

/// Reads the embedded text layer of a PDF. Scanned raster pages yield
/// empty text; there is no OCR fallback.
pub trait PdfExtractor: Send + Sync {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError>;
}
