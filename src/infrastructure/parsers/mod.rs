pub mod json_normalizer;
pub mod xml_normalizer;

use crate::domain::{error::ParseError, models::NormalizedDocument};

/// Normalizes a member by content: JSON when it opens with `{` or `[`,
/// markup otherwise. A leading UTF-8 BOM and whitespace are ignored.
pub fn normalize_document(bytes: &[u8]) -> Result<NormalizedDocument, ParseError> {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => json_normalizer::normalize_slice(body),
        _ => xml_normalizer::normalize_bytes(body),
    }
}
