//! Which screen may be shown for a given session.

use axum::{
    extract::{Request, State},
    http::Uri,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::{routes::render_loading, state::AppState};

pub const LOGIN_PATH: &str = "/login";
pub const LANDING_PATH: &str = "/dashboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Landing,
    Login,
    Register,
    RegistrationComplete,
    Logout,
    Dashboard,
    Static,
    NotFound,
}

impl Route {
    pub fn from_path(path: &str) -> Self {
        let path = path.trim_end_matches('/');
        match path {
            "" => Route::Landing,
            "/login" => Route::Login,
            "/register" => Route::Register,
            "/registration/complete" => Route::RegistrationComplete,
            "/logout" => Route::Logout,
            "/dashboard" => Route::Dashboard,
            p if p.starts_with("/dashboard/") => Route::Dashboard,
            p if p.starts_with("/static/") => Route::Static,
            _ => Route::NotFound,
        }
    }

    pub fn is_protected(self) -> bool {
        matches!(self, Route::Dashboard | Route::RegistrationComplete)
    }

    /// Screens only meant for visitors who are not logged in.
    fn is_guest_only(self) -> bool {
        matches!(self, Route::Landing | Route::Login | Route::Register)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardInput<'a> {
    pub initialized: bool,
    pub authenticated: bool,
    pub target: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session not read yet; render a neutral placeholder.
    Loading,
    Allow,
    Redirect(String),
}

pub fn decide(input: GuardInput<'_>) -> GuardDecision {
    if !input.initialized {
        return GuardDecision::Loading;
    }

    let route = Route::from_path(input.target);
    if !input.authenticated && route.is_protected() {
        return GuardDecision::Redirect(login_redirect(input.target));
    }
    if input.authenticated && route.is_guest_only() {
        return GuardDecision::Redirect(LANDING_PATH.to_string());
    }
    GuardDecision::Allow
}

fn login_redirect(target: &str) -> String {
    let next: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!("{LOGIN_PATH}?next={next}")
}

/// Accepts `next` only when it points back into this app.
pub fn safe_next(next: Option<&str>) -> Option<&str> {
    next.filter(|path| {
        path.starts_with('/')
            && !path.starts_with("//")
            && !path.contains('\\')
            && Route::from_path(path.split('?').next().unwrap_or_default()).is_protected()
    })
}

pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let target = target_of(request.uri());
    // Only an idle controller can be left with an abandoned call.
    if let Ok(mut session) = state.session.try_lock() {
        session.settle();
    }
    let snapshot = state.snapshot.get();
    let decision = decide(GuardInput {
        initialized: snapshot.initialized,
        authenticated: snapshot.logged_in,
        target: &target,
    });

    match decision {
        GuardDecision::Allow => next.run(request).await,
        GuardDecision::Loading => render_loading(),
        GuardDecision::Redirect(to) => Redirect::to(&to).into_response(),
    }
}

fn target_of(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}
