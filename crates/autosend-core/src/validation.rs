//! Input validation for inbound message requests.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Maximum body length of a single short message.
pub const MAX_CONTENT_LEN: usize = 160;

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+[1-9]\d{1,14}$").expect("static phone regex is valid")
});

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Check an E.164 phone number.
pub fn validate_phone_number(phone: &str) -> Result<(), String> {
    if phone.is_empty() {
        return Err("phone number is required".into());
    }
    if !PHONE_RE.is_match(phone) {
        return Err("phone number must be in E.164 format (e.g., +905551234567)".into());
    }
    Ok(())
}

/// Check message body length. Length is counted in characters, not bytes.
pub fn validate_content(content: &str) -> Result<(), String> {
    if content.is_empty() {
        return Err("message content is required".into());
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(format!("message content must be {MAX_CONTENT_LEN} characters or less"));
    }
    Ok(())
}

/// Validate a create-message request, collecting every failure.
pub fn validate_message(to: &str, content: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if let Err(message) = validate_phone_number(to) {
        errors.push(FieldError { field: "to".into(), message });
    }
    if let Err(message) = validate_content(content) {
        errors.push(FieldError { field: "content".into(), message });
    }
    errors
}

/// Join field errors into one line.
pub fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
