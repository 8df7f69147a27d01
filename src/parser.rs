//! Defensive JSON recovery from model output.
//!
//! Models wrap JSON in fences, prepend prose, or get cut off mid-object.
//! [`parse_payload`] tries a strict parse of the outermost `{...}` span, then
//! one brace-balancing repair, and otherwise hands back the raw text with no
//! structure. It never fails.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// How the payload was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseOutcome {
    /// Nothing to parse.
    Empty,
    Strict,
    Repaired,
    /// No JSON could be recovered; only `raw_text` is meaningful.
    Unstructured,
}

#[derive(Debug, Clone)]
pub struct ExtractedPayload {
    /// Always the text that was handed in, verbatim.
    pub raw_text: String,
    pub parsed: Option<Map<String, Value>>,
    pub outcome: ParseOutcome,
}

impl ExtractedPayload {
    fn unstructured(raw_text: String) -> Self {
        Self {
            raw_text,
            parsed: None,
            outcome: ParseOutcome::Unstructured,
        }
    }
}

pub fn parse_payload(raw_text: &str) -> ExtractedPayload {
    if raw_text.is_empty() {
        return ExtractedPayload {
            raw_text: String::new(),
            parsed: None,
            outcome: ParseOutcome::Empty,
        };
    }

    let body = strip_code_fence(raw_text);
    let Some(span) = object_span(body) else {
        debug!("No JSON object span in model output ({} chars)", raw_text.len());
        return ExtractedPayload::unstructured(raw_text.to_string());
    };

    if let Some(parsed) = parse_object(span) {
        return ExtractedPayload {
            raw_text: raw_text.to_string(),
            parsed: Some(parsed),
            outcome: ParseOutcome::Strict,
        };
    }

    match repair_braces(span).and_then(|fixed| parse_object(&fixed)) {
        Some(parsed) => {
            debug!("Recovered model output with brace repair");
            ExtractedPayload {
                raw_text: raw_text.to_string(),
                parsed: Some(parsed),
                outcome: ParseOutcome::Repaired,
            }
        }
        None => {
            debug!("Model output is not recoverable JSON; keeping raw text");
            ExtractedPayload::unstructured(raw_text.to_string())
        }
    }
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Return the body of the first fenced block (language tag dropped). An
/// unterminated fence, typical of truncated output, runs to the end.
fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    let tag_len = after
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(after.len());
    let inner = &after[tag_len..];
    match inner.find("```") {
        Some(close) => &inner[..close],
        None => inner,
    }
}

/// Slice from the first `{` to the last `}` inclusive.
fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Walk the span tracking `{}`/`[]` depth outside string literals.
///
/// If depth returns to zero anywhere, cut after the last such point (this
/// drops trailing prose and stray closers). Otherwise the output was cut
/// off inside the structure: append the missing closers.
fn repair_braces(span: &str) -> Option<String> {
    let mut closers: Vec<char> = Vec::new();
    let mut last_zero: Option<usize> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in span.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                if closers.pop() != Some(ch) {
                    break;
                }
                if closers.is_empty() {
                    last_zero = Some(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    if let Some(end) = last_zero {
        return Some(span[..end].to_string());
    }
    if in_string || closers.is_empty() {
        return None;
    }

    let mut fixed = span.trim_end().trim_end_matches(',').to_string();
    fixed.extend(closers.iter().rev());
    Some(fixed)
}
