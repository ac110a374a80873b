use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use serde_with::{serde_as, NoneAsEmptyString};
use tracing::error;
use uuid::Uuid;

use crate::{
    error::AppError,
    guard::LOGIN_PATH,
    ids,
    models::{
        instance::Instance,
        plan::{self, Plan},
        session::{ProfilePatch, SessionRecord},
    },
    routes::render_with_status,
    services::instances::NewInstance,
    session::Notification,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(overview))
        .route("/instances", get(instances_list))
        .route(
            "/instances/new",
            get(instance_new_form).post(instance_new_submit),
        )
        .route("/profile", get(profile))
        .route("/pairing", post(pairing_complete))
}

/// The logged-in user plus any queued toasts, read under one lock.
async fn viewer(state: &AppState) -> Option<(SessionRecord, Vec<Notification>)> {
    let mut session = state.session.lock().await;
    if !session.is_logged_in() {
        return None;
    }
    let user = session.current()?.clone();
    Some((user, session.take_notifications()))
}

#[derive(Template)]
#[template(path = "dashboard/overview.html")]
struct OverviewTemplate {
    notifications: Vec<Notification>,
    user: SessionRecord,
}

async fn overview(State(state): State<AppState>) -> Response {
    let Some((user, notifications)) = viewer(&state).await else {
        return Redirect::to(LOGIN_PATH).into_response();
    };
    AskamaTemplateResponse::into_response(OverviewTemplate {
        notifications,
        user,
    })
}

#[derive(Template)]
#[template(path = "dashboard/instances.html")]
struct InstancesTemplate {
    notifications: Vec<Notification>,
    user: SessionRecord,
    instances: Vec<InstanceRow>,
}

struct InstanceRow {
    id: String,
    name: String,
    status: String,
    plan: String,
    expires: String,
    sent_messages: u64,
}

impl From<Instance> for InstanceRow {
    fn from(instance: Instance) -> Self {
        let plan = instance
            .plan_id
            .and_then(plan::find)
            .map(|plan| plan.name.to_string())
            .unwrap_or_else(|| "-".into());
        Self {
            id: instance.id.to_string(),
            expires: instance.expiration_display(),
            status: instance.status.to_string(),
            name: instance.name,
            plan,
            sent_messages: instance.sent_messages_number,
        }
    }
}

async fn instances_list(State(state): State<AppState>) -> Response {
    let Some((user, mut notifications)) = viewer(&state).await else {
        return Redirect::to(LOGIN_PATH).into_response();
    };

    let instances = match state.instances.list(&user).await {
        Ok(items) => items.into_iter().map(InstanceRow::from).collect(),
        Err(err) => {
            error!(operation = "list_instances", user_id = %user.id, error = %err, "could not load instances");
            notifications.push(Notification::error(err.user_message()));
            Vec::new()
        }
    };

    AskamaTemplateResponse::into_response(InstancesTemplate {
        notifications,
        user,
        instances,
    })
}

#[derive(Template)]
#[template(path = "dashboard/instance_new.html")]
struct InstanceNewTemplate {
    notifications: Vec<Notification>,
    plans: Vec<&'static Plan>,
    name: String,
    selected_plan: String,
    request_id: String,
}

impl InstanceNewTemplate {
    fn blank(notifications: Vec<Notification>) -> Self {
        Self {
            notifications,
            plans: plan::selectable().collect(),
            name: String::new(),
            selected_plan: String::new(),
            request_id: ids::new_request_id().to_string(),
        }
    }
}

async fn instance_new_form(State(state): State<AppState>) -> Response {
    let Some((_, notifications)) = viewer(&state).await else {
        return Redirect::to(LOGIN_PATH).into_response();
    };
    AskamaTemplateResponse::into_response(InstanceNewTemplate::blank(notifications))
}

#[serde_as]
#[derive(Deserialize)]
struct InstanceForm {
    name: String,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    plan_id: Option<Uuid>,
    request_id: Uuid,
}

#[derive(Template)]
#[template(path = "dashboard/instance_qr.html")]
struct InstanceQrTemplate {
    notifications: Vec<Notification>,
    instance_id: String,
    qr_src: String,
    placeholder: bool,
}

async fn instance_new_submit(
    State(state): State<AppState>,
    Form(form): Form<InstanceForm>,
) -> Response {
    let Some((user, mut notifications)) = viewer(&state).await else {
        return Redirect::to(LOGIN_PATH).into_response();
    };

    let request = NewInstance {
        name: form.name.clone(),
        plan_id: form.plan_id,
        request_id: form.request_id,
    };
    match state.instances.create(&user, request).await {
        Ok(created) => {
            notifications.push(Notification::success("Instance created successfully!"));
            AskamaTemplateResponse::into_response(InstanceQrTemplate {
                notifications,
                instance_id: created.instance_id.to_string(),
                qr_src: created.qr_image_src(),
                placeholder: created.placeholder,
            })
        }
        Err(err) => {
            error!(operation = "create_instance", user_id = %user.id, request_id = %form.request_id, error = %err, "could not create instance");
            notifications.push(Notification::error(err.user_message()));
            let status = match err {
                AppError::Validation(_) => StatusCode::BAD_REQUEST,
                AppError::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            // Same request id, so a retry of this form is still deduplicated.
            render_with_status(
                status,
                InstanceNewTemplate {
                    notifications,
                    plans: plan::selectable().collect(),
                    name: form.name,
                    selected_plan: form.plan_id.map(|id| id.to_string()).unwrap_or_default(),
                    request_id: form.request_id.to_string(),
                },
            )
        }
    }
}

#[derive(Template)]
#[template(path = "dashboard/profile.html")]
struct ProfileTemplate {
    notifications: Vec<Notification>,
    user: SessionRecord,
}

async fn profile(State(state): State<AppState>) -> Response {
    let Some((user, notifications)) = viewer(&state).await else {
        return Redirect::to(LOGIN_PATH).into_response();
    };
    AskamaTemplateResponse::into_response(ProfileTemplate {
        notifications,
        user,
    })
}

async fn pairing_complete(
    State(state): State<AppState>,
    Form(patch): Form<ProfilePatch>,
) -> Redirect {
    // Errors are queued as toasts by the controller.
    let _ = state.session.lock().await.complete_pairing(patch);
    Redirect::to("/dashboard/profile")
}
