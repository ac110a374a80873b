use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Pending,
    Active,
    Connected,
    Other(String),
}

impl InstanceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Active => "active",
            InstanceStatus::Connected => "connected",
            InstanceStatus::Other(raw) => raw,
        }
    }
}

impl From<&str> for InstanceStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "pending" => InstanceStatus::Pending,
            "active" => InstanceStatus::Active,
            "connected" | "open" => InstanceStatus::Connected,
            other => InstanceStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A provisioned gateway connection. Read-only on this side.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub name: String,
    pub status: InstanceStatus,
    pub expiration_date: Option<DateTime<Utc>>,
    pub evo_api_key: Option<String>,
    pub sent_messages_number: u64,
}

impl Instance {
    pub fn expiration_display(&self) -> String {
        self.expiration_date
            .map(|ts| ts.with_timezone(&Local).format("%d.%m.%Y").to_string())
            .unwrap_or_else(|| "-".into())
    }
}

/// Body of the create-instance call.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInput {
    pub user_id: Uuid,
    pub name: String,
    pub plan_id: Uuid,
    pub email: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    /// Client-generated; lets the gateway drop duplicate submissions.
    pub request_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInstance {
    pub instance_id: Uuid,
    pub qr_code: String,
    /// Synthesized locally because the gateway was unreachable.
    pub placeholder: bool,
}

impl CreatedInstance {
    pub fn placeholder(instance_id: Uuid) -> Self {
        Self {
            instance_id,
            qr_code: format!(
                "https://api.qrserver.com/v1/create-qr-code/?size=200x200&data={instance_id}"
            ),
            placeholder: true,
        }
    }

    /// Value usable as an `<img src>`: URLs and data URIs pass through, bare
    /// payloads are taken as base64 PNG.
    pub fn qr_image_src(&self) -> String {
        let qr = self.qr_code.trim();
        if qr.starts_with("data:") || qr.starts_with("https://") || qr.starts_with("http://") {
            qr.to_string()
        } else {
            format!("data:image/png;base64,{qr}")
        }
    }
}
