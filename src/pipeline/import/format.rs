/// Broad upload categories we handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Pdf,
    PlainText,
    Unsupported,
}

/// Uploads above this size are refused before any parsing.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Detect upload format from magic bytes (NOT file extensions).
pub fn detect_format(bytes: &[u8]) -> FileCategory {
    match bytes {
        // PDF: starts with %PDF
        [0x25, 0x50, 0x44, 0x46, ..] => FileCategory::Pdf,
        _ if is_likely_text(bytes) => FileCategory::PlainText,
        _ => FileCategory::Unsupported,
    }
}

/// Valid UTF-8 and mostly printable.
fn is_likely_text(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let text = match std::str::from_utf8(bytes) {
        Ok(t) => t,
        Err(_) => return false,
    };

    // At least 80% printable characters (or whitespace / form feed)
    let total = text.chars().count();
    let printable = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace() || *c == '\x0c')
        .count();
    printable * 100 >= total * 80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_magic_detected() {
        assert_eq!(detect_format(b"%PDF-1.7\n..."), FileCategory::Pdf);
    }

    #[test]
    fn utf8_text_detected() {
        assert_eq!(detect_format("项目名称：道路工程".as_bytes()), FileCategory::PlainText);
    }

    #[test]
    fn binary_and_empty_unsupported() {
        assert_eq!(detect_format(&[0x89, 0x50, 0x4E, 0x47, 0x00]), FileCategory::Unsupported);
        assert_eq!(detect_format(b""), FileCategory::Unsupported);
    }

    #[test]
    fn mostly_control_bytes_unsupported() {
        assert_eq!(detect_format(b"\x01\x02\x03\x04a"), FileCategory::Unsupported);
    }
}
