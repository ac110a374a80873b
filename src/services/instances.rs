use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::FallbackPolicy,
    error::AppError,
    models::{
        instance::{CreatedInstance, Instance, InstanceInput},
        plan,
        session::SessionRecord,
    },
    services::gateway::Gateway,
};

/// A submitted create-instance form.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub name: String,
    pub plan_id: Option<Uuid>,
    pub request_id: Uuid,
}

/// Results remembered for resubmitted forms, oldest dropped first.
const CREATED_CAPACITY: usize = 64;

type CreatedKey = (Uuid, Uuid);

/// Created instances keyed by owner and request id.
#[derive(Default)]
struct CreatedCache {
    entries: HashMap<CreatedKey, CreatedInstance>,
    order: VecDeque<CreatedKey>,
}

impl CreatedCache {
    fn get(&self, key: &CreatedKey) -> Option<&CreatedInstance> {
        self.entries.get(key)
    }

    fn insert(&mut self, key: CreatedKey, instance: CreatedInstance) {
        if self.entries.insert(key, instance).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > CREATED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn forget_owner(&mut self, owner: Uuid) {
        self.order.retain(|(user_id, _)| *user_id != owner);
        self.entries.retain(|(user_id, _), _| *user_id != owner);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct InstanceService {
    gateway: Arc<dyn Gateway>,
    fallback: FallbackPolicy,
    // Held across the gateway call so one request id never reaches the gateway twice.
    created: Mutex<CreatedCache>,
}

impl InstanceService {
    pub fn new(gateway: Arc<dyn Gateway>, fallback: FallbackPolicy) -> Self {
        Self {
            gateway,
            fallback,
            created: Mutex::new(CreatedCache::default()),
        }
    }

    pub async fn create(
        &self,
        owner: &SessionRecord,
        form: NewInstance,
    ) -> Result<CreatedInstance, AppError> {
        let name = form.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Please enter a name for the instance.".into()));
        }
        let plan = form
            .plan_id
            .and_then(|id| plan::selectable().find(|plan| plan.id == id))
            .ok_or_else(|| AppError::Validation("Please select a plan.".into()))?;

        let key = (owner.id, form.request_id);
        let mut created = self.created.lock().await;
        if let Some(existing) = created.get(&key) {
            info!(request_id = %form.request_id, instance_id = %existing.instance_id, "duplicate create-instance submission");
            return Ok(existing.clone());
        }

        let input = InstanceInput {
            user_id: owner.id,
            name: name.to_string(),
            plan_id: plan.id,
            email: owner.email.clone(),
            user_name: owner.name.clone(),
            request_id: form.request_id,
        };

        match self.gateway.create_instance(&input).await {
            Ok(instance) => {
                info!(instance_id = %instance.instance_id, plan = plan.name, "instance created");
                created.insert(key, instance.clone());
                Ok(instance)
            }
            Err(AppError::RemoteUnavailable(reason)) if self.fallback == FallbackPolicy::Placeholder => {
                let placeholder = CreatedInstance::placeholder(Uuid::new_v4());
                warn!(
                    request_id = %form.request_id,
                    instance_id = %placeholder.instance_id,
                    "gateway unavailable ({reason}), showing placeholder instance"
                );
                Ok(placeholder)
            }
            Err(err) => Err(err),
        }
    }

    /// Drops remembered results for a user who logged out.
    pub async fn forget(&self, owner: Uuid) {
        self.created.lock().await.forget_owner(owner);
    }

    pub async fn list(&self, owner: &SessionRecord) -> Result<Vec<Instance>, AppError> {
        match self.gateway.list_instances(owner.id).await {
            Err(AppError::RemoteUnavailable(reason)) if self.fallback == FallbackPolicy::Placeholder => {
                warn!(user_id = %owner.id, "gateway unavailable ({reason}), listing no instances");
                Ok(Vec::new())
            }
            other => other,
        }
    }
}
