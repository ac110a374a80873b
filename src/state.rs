use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    config::AppConfig,
    error::AppError,
    services::{
        gateway::{Gateway, HttpGateway},
        instances::InstanceService,
        storage::IdentityStore,
    },
    session::{SessionController, SnapshotCell},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub session: Arc<Mutex<SessionController>>,
    /// Read by the route guard instead of locking `session`.
    pub snapshot: SnapshotCell,
    pub instances: Arc<InstanceService>,
}

impl AppState {
    /// Wires the HTTP gateway and the on-disk identity store.
    pub fn from_config(config: AppConfig) -> Result<Self, AppError> {
        let gateway: Arc<dyn Gateway> = Arc::new(HttpGateway::new(&config.gateway)?);
        let store = IdentityStore::file(config.identity_store_path.clone());
        Ok(Self::new(config, store, gateway))
    }

    pub fn new(config: AppConfig, store: IdentityStore, gateway: Arc<dyn Gateway>) -> Self {
        let instances = InstanceService::new(gateway.clone(), config.gateway.fallback);
        let session = SessionController::new(store, gateway);
        let snapshot = session.snapshot();
        Self {
            config,
            session: Arc::new(Mutex::new(session)),
            snapshot,
            instances: Arc::new(instances),
        }
    }
}
