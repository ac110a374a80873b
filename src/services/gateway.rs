use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    config::GatewayConfig,
    error::AppError,
    ids,
    models::{
        instance::{CreatedInstance, Instance, InstanceInput, InstanceStatus},
        session::{normalize, Credentials, RegisterInput, SessionRecord},
    },
};

/// The remote service that owns accounts and instances.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn register(&self, input: &RegisterInput) -> Result<SessionRecord, AppError>;
    async fn login(&self, credentials: &Credentials) -> Result<SessionRecord, AppError>;
    async fn create_instance(&self, input: &InstanceInput) -> Result<CreatedInstance, AppError>;
    async fn list_instances(&self, user_id: Uuid) -> Result<Vec<Instance>, AppError>;
}

pub struct HttpGateway {
    client: Client,
    base_url: Url,
    max_retries: usize,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;

        // `Url::join` replaces the last segment unless the base ends with a slash.
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url, AppError> {
        self.base_url
            .join(name)
            .map_err(|err| AppError::Config(format!("invalid gateway endpoint {name}: {err}")))
    }

    async fn post_json<B, R>(&self, operation: &'static str, body: &B) -> Result<R, AppError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(operation)?;
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(100)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.max_retries);

        let result: Result<R, AppError> = RetryIf::spawn(
            strategy,
            || self.post_once(&url, body),
            |err: &AppError| {
                let retry = matches!(err, AppError::RemoteUnavailable(_));
                if retry {
                    debug!(operation, "retrying gateway call: {err}");
                }
                retry
            },
        )
        .await;

        if let Err(err) = &result {
            warn!(operation, endpoint = %url, error = %err, "gateway call failed");
        }
        result
    }

    async fn post_once<B, R>(&self, url: &Url, body: &B) -> Result<R, AppError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|err| AppError::RemoteUnavailable(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| AppError::RemoteUnavailable(err.to_string()))?;

        if !status.is_success() {
            return Err(AppError::RemoteRejected {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text)
            .map_err(|err| AppError::InvalidResponse(format!("malformed json body: {err}")))
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    #[instrument(skip_all, fields(email = %input.email, has_phone = input.phone.is_some()))]
    async fn register(&self, input: &RegisterInput) -> Result<SessionRecord, AppError> {
        let reply: RegisterReply = self.post_json("register", input).await?;

        // Some gateway revisions answer with `user_id` instead of `id`.
        let raw_id = normalize(reply.user_id)
            .or_else(|| normalize(reply.id))
            .ok_or_else(|| AppError::InvalidResponse("register reply has no id".into()))?;

        Ok(SessionRecord {
            id: ids::parse_uuid("id", &raw_id)?,
            name: normalize(reply.name).unwrap_or_else(|| input.name.trim().to_string()),
            email: normalize(reply.email).unwrap_or_else(|| input.email.trim().to_string()),
            phone: normalize(reply.phone).or_else(|| normalize(input.phone.clone())),
        })
    }

    #[instrument(skip_all, fields(email = %credentials.email))]
    async fn login(&self, credentials: &Credentials) -> Result<SessionRecord, AppError> {
        let reply: LoginReply = self.post_json("login", credentials).await?;
        if !reply.logged {
            return Err(AppError::Unauthorized);
        }

        let raw_id = normalize(reply.id)
            .ok_or_else(|| AppError::InvalidResponse("login reply has no id".into()))?;

        Ok(SessionRecord {
            id: ids::parse_uuid("id", &raw_id)?,
            name: normalize(reply.name).unwrap_or_default(),
            email: normalize(reply.email).unwrap_or_else(|| credentials.email.trim().to_string()),
            phone: normalize(reply.phone),
        })
    }

    #[instrument(skip_all, fields(user_id = %input.user_id, plan_id = %input.plan_id, request_id = %input.request_id))]
    async fn create_instance(&self, input: &InstanceInput) -> Result<CreatedInstance, AppError> {
        let reply: CreateInstanceReply = self.post_json("create-instance", input).await?;

        let qr_code = normalize(reply.qr_code)
            .ok_or_else(|| AppError::InvalidResponse("create-instance reply has no qrCode".into()))?;
        let raw_id = normalize(reply.instance_id).ok_or_else(|| {
            AppError::InvalidResponse("create-instance reply has no instanceId".into())
        })?;

        Ok(CreatedInstance {
            instance_id: ids::parse_uuid("instanceId", &raw_id)?,
            qr_code,
            placeholder: false,
        })
    }

    #[instrument(skip(self))]
    async fn list_instances(&self, user_id: Uuid) -> Result<Vec<Instance>, AppError> {
        let reply: ListInstancesReply = self
            .post_json("get-all-instances", &ListInstancesRequest { user_id })
            .await?;
        let items = reply
            .instances
            .ok_or_else(|| AppError::InvalidResponse("get-all-instances reply has no instances".into()))?;

        let mut instances = Vec::with_capacity(items.len());
        for item in items {
            let instance = item.into_inner().into_instance(user_id)?;
            if instance.user_id != user_id {
                warn!(instance_id = %instance.id, owner = %instance.user_id, "dropping instance owned by another user");
                continue;
            }
            instances.push(instance);
        }
        Ok(instances)
    }
}

#[derive(Debug, Deserialize)]
struct RegisterReply {
    id: Option<String>,
    user_id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(default)]
    logged: bool,
    id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateInstanceReply {
    #[serde(rename = "qrCode")]
    qr_code: Option<String>,
    #[serde(rename = "instanceId", alias = "instance_id")]
    instance_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListInstancesRequest {
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ListInstancesReply {
    instances: Option<Vec<InstanceItem>>,
}

/// Webhook engines sometimes wrap each row as `{"json": {...}}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InstanceItem {
    Wrapped { json: InstanceRow },
    Plain(InstanceRow),
}

impl InstanceItem {
    fn into_inner(self) -> InstanceRow {
        match self {
            InstanceItem::Wrapped { json } => json,
            InstanceItem::Plain(row) => row,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct InstanceRow {
    id: Option<String>,
    user_id: Option<String>,
    plan_id: Option<String>,
    name: Option<String>,
    status: Option<String>,
    expiration_date: Option<String>,
    evo_api_key: Option<String>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    sent_messages_number: u64,
}

impl InstanceRow {
    fn into_instance(self, requested_for: Uuid) -> Result<Instance, AppError> {
        let raw_id = normalize(self.id)
            .ok_or_else(|| AppError::InvalidResponse("instance without id".into()))?;
        let id = ids::parse_uuid("instance.id", &raw_id)?;
        let user_id = ids::parse_optional_uuid("instance.user_id", self.user_id.as_deref())?
            .unwrap_or(requested_for);
        let plan_id = ids::parse_optional_uuid("instance.plan_id", self.plan_id.as_deref())?;

        let expiration_date = normalize(self.expiration_date).and_then(|raw| {
            match DateTime::parse_from_rfc3339(&raw) {
                Ok(ts) => Some(ts.with_timezone(&Utc)),
                Err(err) => {
                    debug!(instance_id = %id, "unparseable expiration_date {raw:?}: {err}");
                    None
                }
            }
        });

        Ok(Instance {
            id,
            user_id,
            plan_id,
            name: normalize(self.name).unwrap_or_else(|| "Unnamed instance".into()),
            status: self
                .status
                .as_deref()
                .map(InstanceStatus::from)
                .unwrap_or(InstanceStatus::Pending),
            expiration_date,
            evo_api_key: normalize(self.evo_api_key),
            sent_messages_number: self.sent_messages_number,
        })
    }
}
