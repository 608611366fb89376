//! Structural repair for truncated JSON.
//!
//! Backends cut output mid-structure when they hit their output-size
//! ceiling. The repairer scans the fragment once, left to right, tracking
//! the stack of expected closers and whether the scan sits inside a string,
//! then closes whatever the truncation left open. Input that is malformed
//! rather than merely cut short — closers that never had openers, or
//! mismatched pairs — is rejected, never patched.

use serde_json::Value;

/// Attempt to repair a JSON fragment truncated at an arbitrary offset.
///
/// Returns the parsed value when a structurally valid document can be
/// produced by closing open strings and brackets, trimming back dangling
/// keys or trailing commas where needed. Already-valid input parses as-is.
/// Returns `None` for malformed input; extra or mismatched closers are
/// never guessed away.
pub fn repair_value(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in trimmed.chars() {
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
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                if closers.pop() != Some(ch) {
                    return None;
                }
            }
            '"' => in_string = true,
            _ => {}
        }
    }

    if closers.is_empty() && !in_string {
        // Nothing left open: only a direct parse can decide.
        return serde_json::from_str(trimmed).ok();
    }

    let mut body = trimmed.to_string();
    if in_string {
        if escaped {
            // A dangling escape introducer would swallow the synthesized quote.
            body.pop();
        }
        body.push('"');
    }
    let closing: String = closers.iter().rev().collect();

    loop {
        let candidate = format!("{}{}", body.trim_end(), closing);
        if let Ok(value) = serde_json::from_str(&candidate) {
            return Some(value);
        }
        if !trim_dangling(&mut body) {
            return None;
        }
    }
}

/// Remove one trailing incomplete element from `body`.
///
/// Handles the value positions a truncation can leave empty: a trailing
/// comma, a key with no value, a dangling key string, or a partial
/// number/literal. Returns false once nothing more can be safely removed.
fn trim_dangling(body: &mut String) -> bool {
    while body.ends_with(|c: char| c.is_whitespace()) {
        body.pop();
    }
    if body.ends_with(',') || body.ends_with(':') {
        body.pop();
        return true;
    }
    if body.ends_with('"') {
        return strip_trailing_string(body);
    }
    // Partial number or literal (`tru`, `12.`, `-`): peel back to the
    // previous structural character.
    let mut removed = false;
    while body
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'))
    {
        body.pop();
        removed = true;
    }
    removed
}

/// Remove a trailing complete string, quotes included.
///
/// The closing quote is the last character of `body`; the opening quote is
/// found by scanning backward, skipping quotes escaped by an odd run of
/// backslashes.
fn strip_trailing_string(body: &mut String) -> bool {
    let bytes = body.as_bytes();
    let mut i = bytes.len() - 1;
    while i > 0 {
        i -= 1;
        if bytes[i] == b'"' {
            let mut backslashes = 0;
            while backslashes < i && bytes[i - 1 - backslashes] == b'\\' {
                backslashes += 1;
            }
            if backslashes % 2 == 0 {
                body.truncate(i);
                return true;
            }
        }
    }
    false
}
