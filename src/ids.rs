//! Identifier handling for everything that crosses the gateway boundary.
//!
//! The gateway is untrusted: any id it hands back goes through
//! [`parse_uuid`] before it lands in a typed field.

use uuid::Uuid;

use crate::error::AppError;

pub fn parse_uuid(field: &'static str, raw: &str) -> Result<Uuid, AppError> {
    let trimmed = raw.trim();
    // `Uuid::parse_str` also takes braced and urn forms; the gateway only speaks hyphenated.
    if trimmed.len() != 36 {
        return Err(invalid(field, raw));
    }
    Uuid::parse_str(trimmed).map_err(|_| invalid(field, raw))
}

pub fn parse_optional_uuid(field: &'static str, raw: Option<&str>) -> Result<Option<Uuid>, AppError> {
    match raw {
        Some(value) if !value.trim().is_empty() => parse_uuid(field, value).map(Some),
        _ => Ok(None),
    }
}

pub fn new_request_id() -> Uuid {
    Uuid::new_v4()
}

fn invalid(field: &'static str, raw: &str) -> AppError {
    AppError::InvalidIdentifier {
        field,
        value: raw.to_string(),
    }
}
