//! Input validation for caller-supplied text and identifiers.
//!
//! Text is cleaned of unsafe control characters first and then checked
//! against a per-field length limit. Identifiers get a deliberately loose
//! shape check: 36 characters with exactly four hyphens.

use crate::{Error, Result};

/// Length limits per field, in characters
const FIELD_LIMITS: &[(&str, usize)] = &[
    ("title", 500),
    ("content", 50_000),
    ("description", 50_000),
    ("comment", 10_000),
    ("message", 10_000),
    ("search", 500),
    ("deck", 200),
    ("project", 200),
    ("milestone", 200),
    ("owner", 200),
    ("tag", 200),
];

/// Limit for fields missing from the table
const DEFAULT_LIMIT: usize = 500;

/// Expected identifier length
const ID_LEN: usize = 36;
/// Expected hyphen count in an identifier
const ID_HYPHENS: usize = 4;

/// Control characters to strip (C0 range excluding common whitespace).
/// We preserve: `\t` (0x09), `\n` (0x0A), `\r` (0x0D).
fn is_unsafe_control(c: char) -> bool {
    let code = c as u32;
    // C0 control characters (0x00-0x1F) minus tab, newline, carriage return
    (code <= 0x1F && code != 0x09 && code != 0x0A && code != 0x0D)
    // DEL and C1 control characters (0x7F-0x9F)
    || (0x7F..=0x9F).contains(&code)
    // zero-width and separator characters
    || matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{2028}' | '\u{2029}')
}

/// Remove unsafe control characters, keeping all other Unicode intact
#[must_use]
pub fn strip_control_chars(text: &str) -> String {
    text.chars().filter(|c| !is_unsafe_control(*c)).collect()
}

/// Character limit for a field
#[must_use]
pub fn field_limit(field: &str) -> usize {
    FIELD_LIMITS
        .iter()
        .find(|(name, _)| *name == field)
        .map_or(DEFAULT_LIMIT, |(_, limit)| *limit)
}

/// Strip control characters, then enforce the field's length limit.
///
/// # Errors
///
/// Returns `Error::Validation` naming the field and limit when the cleaned
/// text is too long.
pub fn validate_text(text: &str, field: &str) -> Result<String> {
    let cleaned = strip_control_chars(text);
    let limit = field_limit(field);
    let len = cleaned.chars().count();
    if len > limit {
        return Err(Error::validation(format!(
            "{field} is {len} characters; the limit is {limit}"
        )));
    }
    Ok(cleaned)
}

/// [`validate_text`] for optional inputs
pub fn validate_optional_text(text: Option<&str>, field: &str) -> Result<Option<String>> {
    text.map(|t| validate_text(t, field)).transpose()
}

/// Check the identifier shape: 36 characters, exactly four hyphens.
///
/// # Errors
///
/// Returns `Error::Validation` when the shape does not match.
pub fn validate_identifier(id: &str) -> Result<&str> {
    let hyphens = id.chars().filter(|c| *c == '-').count();
    if id.chars().count() != ID_LEN || hyphens != ID_HYPHENS {
        return Err(Error::validation(format!(
            "invalid card id {id:?}: expected a 36-character id with 4 hyphens"
        )));
    }
    Ok(id)
}

/// Validate identifiers in order, failing on the first bad one
///
/// # Errors
///
/// Returns `Error::Validation` naming the position of the first invalid id.
pub fn validate_identifiers(ids: &[String]) -> Result<Vec<String>> {
    if ids.is_empty() {
        return Err(Error::validation("at least one card id is required"));
    }
    ids.iter()
        .enumerate()
        .map(|(index, id)| {
            validate_identifier(id)
                .map(str::to_string)
                .map_err(|e| Error::validation(format!("card_ids[{index}]: {e}")))
        })
        .collect()
}
