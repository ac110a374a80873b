use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Who is logged in. Persisted by the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl SessionRecord {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.email
        } else {
            &self.name
        }
    }

    pub fn phone_display(&self) -> &str {
        self.phone.as_deref().unwrap_or("-")
    }

    /// Applies the non-empty fields of `patch`. Returns whether anything changed.
    pub fn merge(&mut self, patch: ProfilePatch) -> bool {
        let mut changed = false;
        if let Some(name) = normalize(patch.name) {
            if name != self.name {
                self.name = name;
                changed = true;
            }
        }
        if let Some(phone) = normalize(patch.phone) {
            if self.phone.as_deref() != Some(phone.as_str()) {
                self.phone = Some(phone);
                changed = true;
            }
        }
        changed
    }
}

/// Extra profile data that arrives once a device finished pairing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Serialize)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
}

impl RegisterInput {
    pub fn validate(&self) -> Result<(), AppError> {
        require("name", &self.name)?;
        require_email(&self.email)?;
        require("password", &self.password)
    }
}

impl std::fmt::Debug for RegisterInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterInput")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<(), AppError> {
        require_email(&self.email)?;
        require("password", &self.password)
    }
}

// Keeps the password out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

fn require(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("Please fill in the {field} field.")));
    }
    Ok(())
}

fn require_email(value: &str) -> Result<(), AppError> {
    require("email", value)?;
    let trimmed = value.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AppError::Validation(format!(
            "{trimmed:?} is not a valid email address."
        ))),
    }
}

pub(crate) fn normalize(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
