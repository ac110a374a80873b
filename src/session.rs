//! The single owner of "who is logged in".
//!
//! Every change of identity goes through one of the transition methods on
//! [`SessionController`]. Storage is written at those points only, always
//! before the in-memory state, so storage and memory never disagree.

use std::{
    fmt, mem,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::{error, info, warn};

use crate::{
    error::AppError,
    models::session::{Credentials, ProfilePatch, RegisterInput, SessionRecord},
    services::{gateway::Gateway, storage::IdentityStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// The registration form is open.
    RegistrationPending,
    /// A register or login call is in flight.
    Authenticating,
    /// Registered; waiting for the user to acknowledge the welcome screen.
    RegistrationComplete,
    Authenticated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::RegistrationPending => "registration-pending",
            SessionState::Authenticating => "authenticating",
            SessionState::RegistrationComplete => "registration-complete",
            SessionState::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Error,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Success => "success",
            NotificationLevel::Error => "error",
        }
    }
}

/// A toast for the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

/// What the route guard needs to know about the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub initialized: bool,
    pub logged_in: bool,
}

/// Shared copy of the latest [`SessionSnapshot`]. Readable while a
/// register or login call holds the controller.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCell(Arc<RwLock<SessionSnapshot>>);

impl SnapshotCell {
    pub fn get(&self) -> SessionSnapshot {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, snapshot: SessionSnapshot) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

pub struct SessionController {
    store: IdentityStore,
    gateway: Arc<dyn Gateway>,
    state: SessionState,
    /// State to return to if the in-flight call fails or is abandoned.
    resume: SessionState,
    current: Option<SessionRecord>,
    initialized: bool,
    notifications: Vec<Notification>,
    snapshot: SnapshotCell,
}

impl SessionController {
    pub fn new(store: IdentityStore, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            store,
            gateway,
            state: SessionState::Unauthenticated,
            resume: SessionState::Unauthenticated,
            current: None,
            initialized: false,
            notifications: Vec::new(),
            snapshot: SnapshotCell::default(),
        }
    }

    /// Reads the identity store. Only the first call has any effect.
    pub fn hydrate(&mut self) -> SessionState {
        if self.initialized {
            return self.state;
        }
        self.current = self.store.load();
        self.state = if self.current.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
        self.initialized = true;
        self.publish();
        info!(state = %self.state, "session hydrated");
        self.state
    }

    pub fn snapshot(&self) -> SnapshotCell {
        self.snapshot.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current(&self) -> Option<&SessionRecord> {
        self.current.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(
            self.state,
            SessionState::Authenticated | SessionState::RegistrationComplete
        )
    }

    pub fn is_loading(&self) -> bool {
        self.state == SessionState::Authenticating
    }

    /// Resets a call that was dropped before it finished.
    ///
    /// With `&mut self` held for the whole call, seeing `Authenticating` here
    /// means the future owning the call was cancelled.
    pub fn settle(&mut self) {
        if self.state == SessionState::Authenticating {
            warn!(resume = %self.resume, "abandoned authentication call, restoring state");
            self.state = self.resume;
        }
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        mem::take(&mut self.notifications)
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn start_registration(&mut self) {
        self.settle();
        if self.state == SessionState::Unauthenticated {
            self.state = SessionState::RegistrationPending;
        }
    }

    pub fn cancel_registration(&mut self) {
        self.settle();
        if self.state == SessionState::RegistrationPending {
            self.state = SessionState::Unauthenticated;
        }
    }

    pub async fn register(&mut self, input: RegisterInput) -> Result<SessionRecord, AppError> {
        self.begin("register")?;
        if let Err(err) = input.validate() {
            return Err(self.fail("register", err));
        }

        self.resume = self.state;
        self.state = SessionState::Authenticating;
        let outcome = self.gateway.register(&input).await;
        let outcome = outcome.and_then(|record| self.store.save(&record).map(|()| record));

        match outcome {
            Ok(record) => {
                info!(user_id = %record.id, "registered");
                self.current = Some(record.clone());
                self.state = SessionState::RegistrationComplete;
                self.publish();
                self.notify(Notification::success("Account created successfully!"));
                Ok(record)
            }
            Err(err) => {
                self.state = self.resume;
                Err(self.fail("register", err))
            }
        }
    }

    pub async fn login(&mut self, credentials: Credentials) -> Result<SessionRecord, AppError> {
        self.begin("login")?;
        if let Err(err) = credentials.validate() {
            return Err(self.fail("login", err));
        }

        self.resume = self.state;
        self.state = SessionState::Authenticating;
        let outcome = self.gateway.login(&credentials).await;
        let outcome = outcome.and_then(|record| self.store.save(&record).map(|()| record));

        match outcome {
            Ok(record) => {
                info!(user_id = %record.id, "logged in");
                self.notify(Notification::success(format!(
                    "Welcome back, {}!",
                    record.display_name()
                )));
                self.current = Some(record.clone());
                self.state = SessionState::Authenticated;
                self.publish();
                Ok(record)
            }
            Err(err) => {
                self.state = self.resume;
                Err(self.fail("login", err))
            }
        }
    }

    pub fn acknowledge_registration(&mut self) {
        if self.state == SessionState::RegistrationComplete {
            self.state = SessionState::Authenticated;
        }
    }

    /// Clears storage first; memory is only cleared once storage is.
    pub fn logout(&mut self) -> Result<(), AppError> {
        self.settle();
        if let Err(err) = self.store.clear() {
            return Err(self.fail("logout", err));
        }
        let was_logged_in = self.current.take().is_some();
        self.state = SessionState::Unauthenticated;
        self.resume = SessionState::Unauthenticated;
        self.publish();
        if was_logged_in {
            info!("logged out");
            self.notify(Notification::success("You have been logged out."));
        }
        Ok(())
    }

    /// Merges profile fields reported after a device finished pairing.
    pub fn complete_pairing(&mut self, patch: ProfilePatch) -> Result<SessionRecord, AppError> {
        let current = self.current.clone().filter(|_| self.is_logged_in());
        let Some(mut updated) = current else {
            return Err(self.fail("complete_pairing", AppError::Unauthorized));
        };

        if !updated.merge(patch) {
            return Ok(updated);
        }
        if let Err(err) = self.store.save(&updated) {
            return Err(self.fail("complete_pairing", err));
        }
        self.current = Some(updated.clone());
        self.notify(Notification::success("Profile updated."));
        Ok(updated)
    }

    fn publish(&self) {
        self.snapshot.set(SessionSnapshot {
            initialized: self.initialized,
            logged_in: self.is_logged_in(),
        });
    }

    fn begin(&mut self, operation: &'static str) -> Result<(), AppError> {
        self.settle();
        match self.state {
            SessionState::Unauthenticated | SessionState::RegistrationPending => Ok(()),
            SessionState::Authenticating => Err(self.fail(operation, AppError::Busy)),
            SessionState::Authenticated | SessionState::RegistrationComplete => Err(self.fail(
                operation,
                AppError::Validation("You are already logged in.".into()),
            )),
        }
    }

    fn fail(&mut self, operation: &'static str, err: AppError) -> AppError {
        error!(operation, state = %self.state, error = %err, "session operation failed");
        self.notify(Notification::error(err.user_message()));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::instance::{CreatedInstance, Instance, InstanceInput},
        services::storage::{MemoryStore, LOGGED_IN_KEY, USER_DATA_KEY},
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    enum Reply {
        Record(SessionRecord),
        WrongPassword,
        Offline,
    }

    struct StubGateway {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl StubGateway {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }

        fn answer(&self) -> Result<SessionRecord, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Reply::Record(record) => Ok(record.clone()),
                Reply::WrongPassword => Err(AppError::Unauthorized),
                Reply::Offline => Err(AppError::RemoteUnavailable("connection refused".into())),
            }
        }
    }

    #[async_trait]
    impl Gateway for StubGateway {
        async fn register(&self, _input: &RegisterInput) -> Result<SessionRecord, AppError> {
            self.answer()
        }

        async fn login(&self, _credentials: &Credentials) -> Result<SessionRecord, AppError> {
            self.answer()
        }

        async fn create_instance(&self, _input: &InstanceInput) -> Result<CreatedInstance, AppError> {
            unreachable!()
        }

        async fn list_instances(&self, _user_id: Uuid) -> Result<Vec<Instance>, AppError> {
            unreachable!()
        }
    }

    fn ana() -> SessionRecord {
        SessionRecord {
            id: "3fae2b6c-4c1e-4b7a-9a53-0d6f2f1b8e21".parse().unwrap(),
            name: "Ana".into(),
            email: "ana@x.com".into(),
            phone: Some("+551199999999".into()),
        }
    }

    fn controller(gateway: Arc<StubGateway>) -> (SessionController, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        let mut controller = SessionController::new(IdentityStore::new(kv.clone()), gateway);
        controller.hydrate();
        (controller, kv)
    }

    fn credentials(password: &str) -> Credentials {
        Credentials {
            email: "ana@x.com".into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn register_ends_in_registration_complete_and_persists() {
        let (mut session, kv) = controller(StubGateway::new(Reply::Record(ana())));
        let record = session
            .register(RegisterInput {
                name: "Ana".into(),
                email: "ana@x.com".into(),
                phone: Some("+551199999999".into()),
                password: "secret".into(),
            })
            .await
            .unwrap();

        assert_eq!(record, ana());
        assert_eq!(session.state(), SessionState::RegistrationComplete);
        assert!(session.is_logged_in());
        assert_eq!(session.store.load(), Some(ana()));
        assert_eq!(kv.raw(LOGGED_IN_KEY).as_deref(), Some("true"));

        session.acknowledge_registration();
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn wrong_password_leaves_storage_untouched() {
        let (mut session, kv) = controller(StubGateway::new(Reply::WrongPassword));
        let err = session.login(credentials("wrong")).await.unwrap_err();

        assert!(matches!(err, AppError::Unauthorized));
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(kv.write_count(), 0);
        let notes = session.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn unavailable_gateway_restores_pre_call_state() {
        let gateway = StubGateway::new(Reply::Offline);
        let (mut session, kv) = controller(gateway.clone());

        session.start_registration();
        let err = session.login(credentials("secret")).await.unwrap_err();
        assert!(matches!(err, AppError::RemoteUnavailable(_)));
        assert_eq!(session.state(), SessionState::RegistrationPending);
        assert_eq!(session.current(), None);
        assert_eq!(kv.write_count(), 0);
        assert_eq!(session.take_notifications().len(), 1);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn validation_errors_never_reach_the_gateway() {
        let gateway = StubGateway::new(Reply::Record(ana()));
        let (mut session, _kv) = controller(gateway.clone());

        let err = session.login(credentials("")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.take_notifications().len(), 1);
    }

    #[tokio::test]
    async fn logout_clears_storage_and_memory() {
        let (mut session, kv) = controller(StubGateway::new(Reply::Record(ana())));
        session.login(credentials("secret")).await.unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);

        session.logout().unwrap();
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(session.current(), None);
        assert_eq!(kv.raw(LOGGED_IN_KEY), None);
        assert_eq!(kv.raw(USER_DATA_KEY), None);
        assert!(!session.is_logged_in());
    }

    #[test]
    fn hydrate_restores_saved_session_without_network() {
        let gateway = StubGateway::new(Reply::Offline);
        let kv = Arc::new(MemoryStore::new());
        IdentityStore::new(kv.clone()).save(&ana()).unwrap();

        let mut session = SessionController::new(IdentityStore::new(kv.clone()), gateway.clone());
        assert!(!session.is_initialized());
        assert_eq!(session.hydrate(), SessionState::Authenticated);
        assert_eq!(session.current(), Some(&ana()));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);

        // Later storage changes do not re-hydrate.
        IdentityStore::new(kv).clear().unwrap();
        assert_eq!(session.hydrate(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn login_is_rejected_while_logged_in() {
        let gateway = StubGateway::new(Reply::Record(ana()));
        let (mut session, _kv) = controller(gateway.clone());
        session.login(credentials("secret")).await.unwrap();
        session.take_notifications();

        let err = session.login(credentials("secret")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn pairing_merges_profile_into_stored_record() {
        let mut record = ana();
        record.phone = None;
        let (mut session, _kv) = controller(StubGateway::new(Reply::Record(record)));

        assert!(session.complete_pairing(ProfilePatch::default()).is_err());

        session.login(credentials("secret")).await.unwrap();
        let updated = session
            .complete_pairing(ProfilePatch {
                name: None,
                phone: Some("(11) 99999-9999".into()),
            })
            .unwrap();
        assert_eq!(updated.phone.as_deref(), Some("(11) 99999-9999"));
        assert_eq!(session.store.load(), Some(updated));
    }

    #[tokio::test]
    async fn snapshot_follows_identity_changes() {
        let kv = Arc::new(MemoryStore::new());
        let mut session = SessionController::new(
            IdentityStore::new(kv),
            StubGateway::new(Reply::Record(ana())),
        );
        let snapshot = session.snapshot();
        assert_eq!(snapshot.get(), SessionSnapshot::default());

        session.hydrate();
        assert_eq!(
            snapshot.get(),
            SessionSnapshot {
                initialized: true,
                logged_in: false
            }
        );

        session.login(credentials("secret")).await.unwrap();
        assert!(snapshot.get().logged_in);

        session.logout().unwrap();
        assert!(!snapshot.get().logged_in);
        assert!(snapshot.get().initialized);
    }

    #[test]
    fn settle_recovers_an_abandoned_call() {
        let (mut session, _kv) = controller(StubGateway::new(Reply::Offline));
        session.start_registration();
        session.resume = session.state;
        session.state = SessionState::Authenticating;
        assert!(session.is_loading());

        session.settle();
        assert_eq!(session.state(), SessionState::RegistrationPending);
    }
}
