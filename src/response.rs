//! Pulls the raw text out of a generation response envelope.

use crate::gemini::GenerateResponse;

/// Concatenate the text parts of the first candidate that carries any text,
/// trimmed. An envelope without text yields an empty string.
pub fn extract_raw_text(response: &GenerateResponse) -> String {
    response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<String>()
        })
        .find(|text| !text.trim().is_empty())
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}
