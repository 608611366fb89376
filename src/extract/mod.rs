//! Best-effort extraction of structured values from backend text.
//!
//! Generation backends do not reliably return bare JSON: the object may be
//! wrapped in prose, fenced in a markdown code block, or cut off where the
//! backend hit its output-size ceiling. `extract_value` walks a ladder of
//! progressively more forgiving strategies and hands the hard cases to the
//! repairer. `None` means no recoverable structure was found and the caller
//! should substitute the stage's degraded fallback — that is an expected
//! outcome, not a pipeline error.

pub mod repair;

use serde_json::Value;

pub use repair::repair_value;

/// Extract a JSON value from text that may contain other content.
///
/// Strategies, in order:
/// 1. Parse the trimmed text directly.
/// 2. Strip one markdown code fence pair (with or without a language tag)
///    and parse what it wrapped.
/// 3. Parse the slice from the first `{` to its corresponding `}` — first
///    by matched brace count, then first-to-last as a fallback (JSON
///    embedded in surrounding prose).
/// 4. Hand everything from the first `{` onward to the repairer (truncated
///    output).
pub fn extract_value(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(inner) = strip_code_fence(trimmed) {
        if let Ok(value) = serde_json::from_str(inner) {
            return Some(value);
        }
    }

    if let Some(slice) = braced_slice(trimmed) {
        if let Ok(value) = serde_json::from_str(slice) {
            return Some(value);
        }
    }

    // Brace counting miscounts braces inside strings; the widest slice
    // catches the object the matched scan clipped short.
    if let Some(slice) = widest_braced_slice(trimmed) {
        if let Ok(value) = serde_json::from_str(slice) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    repair::repair_value(&trimmed[start..])
}

/// Strip a single leading/trailing markdown code fence pair.
///
/// The opening fence may carry a language tag; everything up to the first
/// newline after the backticks is discarded.
fn strip_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    let body_start = rest.find('\n')?;
    let body = rest[body_start + 1..].trim_end();
    let body = body.strip_suffix("```")?;
    Some(body.trim())
}

/// Slice from the first `{` to its corresponding `}`.
/// Uses brace-counting to find the outermost object; truncated input never
/// balances and returns `None`.
fn braced_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0;

    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Slice from the first `{` to the last `}` anywhere in the text.
fn widest_braced_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
