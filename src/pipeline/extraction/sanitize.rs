/// Sanitize extracted text before field matching.
/// Strips control characters, folds colon and space variants to the forms
/// the rule labels use, trims lines and drops blank ones.
pub fn sanitize_extracted_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .map(|c| match c {
            // ratio sign, small and presentation-form colons
            '\u{2236}' | '\u{FE55}' | '\u{FE13}' | '\u{FE30}' => '：',
            '\u{3000}' | '\u{00A0}' | '\t' => ' ',
            _ => c,
        })
        .collect::<String>()
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
