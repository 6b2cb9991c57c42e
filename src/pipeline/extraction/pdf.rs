use super::types::{PageText, PdfExtractor};
use super::ExtractionError;
use crate::pipeline::import::{detect_format, FileCategory};

/// PDF text extractor using the pdf-extract crate.
/// Handles digital PDFs with embedded text layers.
pub struct PdfTextExtractor;

impl PdfExtractor for PdfTextExtractor {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError> {
        let page_texts = pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
            .map_err(|e| ExtractionError::PdfParsing(e.to_string()))?;

        Ok(page_texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| PageText {
                page_number: i + 1,
                text,
            })
            .collect())
    }
}

/// Page texts of an upload. PDFs go through the text layer; UTF-8 text is
/// taken as already extracted, pages split on form feed.
pub fn read_pages(extractor: &dyn PdfExtractor, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
    match detect_format(bytes) {
        FileCategory::Pdf => Ok(extractor
            .extract_text(bytes)?
            .into_iter()
            .map(|p| p.text)
            .collect()),
        FileCategory::PlainText => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| ExtractionError::EncodingError(e.to_string()))?;
            Ok(text.split('\x0c').map(str::to_string).collect())
        }
        FileCategory::Unsupported => Err(ExtractionError::UnsupportedFormat),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Generate a valid PDF with text using lopdf (the library that pdf-extract uses internally).
    pub(crate) fn make_test_pdf(text: &str) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document, Object, Stream};

        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        // Page content stream: BT /F1 12 Tf (text) Tj ET
        let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
        let content_stream = Stream::new(dictionary! {}, content.into_bytes());
        let content_id = doc.add_object(content_stream);

        let resources = dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        };

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });

        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        });

        if let Ok(Object::Dictionary(ref mut dict)) = doc.get_object_mut(page_id) {
            dict.set("Parent", pages_id);
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });

        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn extract_text_from_digital_pdf() {
        let pdf_bytes = make_test_pdf("Project C100 control price");
        let pages = PdfTextExtractor.extract_text(&pdf_bytes).unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
        assert!(
            pages[0].text.contains("C100"),
            "Expected text to contain 'C100', got: {}",
            pages[0].text
        );
    }

    #[test]
    fn pdf_upload_read_through_text_layer() {
        let pdf_bytes = make_test_pdf("Test content");
        let pages = read_pages(&PdfTextExtractor, &pdf_bytes).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].contains("Test content"));
    }

    #[test]
    fn truncated_pdf_returns_error() {
        let result = PdfTextExtractor.extract_text(b"%PDF-1.4 truncated");
        assert!(result.is_err());
    }

    #[test]
    fn plain_text_split_on_form_feed() {
        let pages = read_pages(&PdfTextExtractor, "第一页\x0c第二页".as_bytes()).unwrap();
        assert_eq!(pages, vec!["第一页".to_string(), "第二页".to_string()]);
    }

    #[test]
    fn pdf_bytes_routed_to_extractor() {
        let pdf_bytes = make_test_pdf("routed");
        let pages = read_pages(&PdfTextExtractor, &pdf_bytes).unwrap();
        assert!(pages.concat().contains("routed"));
    }

    #[test]
    fn binary_garbage_is_unsupported() {
        let result = read_pages(&PdfTextExtractor, &[0xff, 0xfe, 0x00, 0x9f]);
        assert!(matches!(result, Err(ExtractionError::UnsupportedFormat)));
    }
}
