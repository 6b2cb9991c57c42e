pub mod extractor;
pub mod parsers;
pub mod pdf;
pub mod sanitize;
pub mod types;

pub use extractor::*;
pub use pdf::*;
pub use sanitize::*;
pub use types::*;

use thiserror::Error;

/// Failures reading the text layer. Never escapes the extractor: an
/// unreadable upload is treated as having no text.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("Text encoding error: {0}")]
    EncodingError(String),

    #[error("Unsupported format for extraction")]
    UnsupportedFormat,
}
