pub mod dashboard;
pub mod public;

use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    Router,
};
use tower_http::services::ServeDir;

use crate::{guard, session::Notification, state::AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .nest("/dashboard", dashboard::router())
        .nest_service("/static", ServeDir::new("static"))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            guard::require_session,
        ))
        .with_state(state)
}

/// Drains queued toasts so each one is shown exactly once. While a register
/// or login call is in flight they stay queued for a later page.
pub(crate) fn drain_notifications(state: &AppState) -> Vec<Notification> {
    state
        .session
        .try_lock()
        .map(|mut session| session.take_notifications())
        .unwrap_or_default()
}

/// Renders a template with an explicit status code.
pub(crate) fn render_with_status<T: Template>(status: StatusCode, template: T) -> Response {
    (status, askama_axum::into_response(&template)).into_response()
}

#[derive(Template)]
#[template(path = "loading.html")]
struct LoadingTemplate {
    notifications: Vec<Notification>,
}

pub fn render_loading() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, "1")],
        AskamaTemplateResponse::into_response(LoadingTemplate {
            notifications: Vec::new(),
        }),
    )
        .into_response()
}

#[derive(Template)]
#[template(path = "not_found.html")]
struct NotFoundTemplate {
    notifications: Vec<Notification>,
}

async fn not_found() -> Response {
    render_with_status(
        StatusCode::NOT_FOUND,
        NotFoundTemplate {
            notifications: Vec::new(),
        },
    )
}
