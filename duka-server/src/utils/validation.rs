//! Input validation helpers
//!
//! Centralized text length constants and validation functions for checkout
//! payloads, plus M-Pesa phone number normalization.

use crate::utils::AppError;

// ── Text length limits ──────────────────────────────────────────────

/// Recipient names
pub const MAX_NAME_LEN: usize = 255;

/// Delivery addresses
pub const MAX_ADDRESS_LEN: usize = 1000;

/// City names
pub const MAX_CITY_LEN: usize = 100;

/// Customer notes
pub const MAX_NOTE_LEN: usize = 500;

/// Email addresses (RFC 5321)
pub const MAX_EMAIL_LEN: usize = 254;

/// Maximum quantity per cart line
pub const MAX_LINE_QUANTITY: u32 = 100;

// ── Validation helpers ──────────────────────────────────────────────

/// Validate that a required string is non-empty and within the length limit.
pub fn validate_required_text(value: &str, field: &str, max_len: usize) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(field, format!("{field} must not be empty")));
    }
    if value.len() > max_len {
        return Err(AppError::validation(
            field,
            format!("{field} is too long ({} chars, max {max_len})", value.len()),
        ));
    }
    Ok(())
}

/// Validate that an optional string, if present, is within the length limit.
pub fn validate_optional_text(
    value: &Option<String>,
    field: &str,
    max_len: usize,
) -> Result<(), AppError> {
    if let Some(v) = value
        && v.len() > max_len
    {
        return Err(AppError::validation(
            field,
            format!("{field} is too long ({} chars, max {max_len})", v.len()),
        ));
    }
    Ok(())
}

/// Minimal email shape check: one `@`, non-empty local and domain parts,
/// domain contains a dot.
pub fn validate_email(value: &str, field: &str) -> Result<(), AppError> {
    let valid = value.len() <= MAX_EMAIL_LEN
        && value.split('@').count() == 2
        && value
            .split_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
            });
    if !valid {
        return Err(AppError::validation(field, format!("{field} is not a valid email address")));
    }
    Ok(())
}

// ── M-Pesa phone numbers ────────────────────────────────────────────

/// Normalize a phone number to the canonical M-Pesa form `254XXXXXXXXX`.
///
/// Accepted input forms (Kenyan mobile numbers, Safaricom and others):
/// - `254712345678` (already canonical)
/// - `0712345678` / `0112345678` (national)
/// - `+254712345678` (international)
///
/// Separators (spaces, hyphens) are stripped. Returns `None` when the number
/// does not normalize to a 12-digit `2547…`/`2541…` number.
pub fn normalize_msisdn(input: &str) -> Option<String> {
    let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();

    let canonical = if let Some(rest) = digits.strip_prefix("254") {
        format!("254{rest}")
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("254{rest}")
    } else {
        return None;
    };

    if canonical.len() != 12 {
        return None;
    }
    if !(canonical.starts_with("2547") || canonical.starts_with("2541")) {
        return None;
    }
    Some(canonical)
}
