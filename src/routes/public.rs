use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use serde_with::{serde_as, NoneAsEmptyString};

use crate::{
    error::AppError,
    guard::{self, LANDING_PATH},
    models::session::{Credentials, RegisterInput, SessionRecord},
    routes::{drain_notifications, render_with_status},
    session::{Notification, SessionState},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(landing))
        .route("/login", get(login_form).post(login_submit))
        .route("/register", get(register_form).post(register_submit))
        .route(
            "/registration/complete",
            get(registration_complete).post(registration_acknowledge),
        )
        .route("/logout", post(logout))
}

#[derive(Template)]
#[template(path = "landing.html")]
struct LandingTemplate {
    notifications: Vec<Notification>,
}

async fn landing(State(state): State<AppState>) -> impl IntoResponse {
    AskamaTemplateResponse::into_response(LandingTemplate {
        notifications: drain_notifications(&state),
    })
}

#[derive(Template)]
#[template(path = "auth/login.html")]
pub struct LoginTemplate {
    notifications: Vec<Notification>,
    email: String,
    next: String,
}

#[derive(Deserialize)]
struct NextQuery {
    next: Option<String>,
}

async fn login_form(State(state): State<AppState>, Query(query): Query<NextQuery>) -> Response {
    // Leaves a call that is still in flight alone.
    let notifications = match state.session.try_lock() {
        Ok(mut session) => {
            session.cancel_registration();
            session.take_notifications()
        }
        Err(_) => Vec::new(),
    };
    AskamaTemplateResponse::into_response(LoginTemplate {
        notifications,
        email: String::new(),
        next: guard::safe_next(query.next.as_deref())
            .unwrap_or_default()
            .to_string(),
    })
}

#[derive(Deserialize)]
struct LoginForm {
    email: String,
    password: String,
    #[serde(default)]
    next: String,
}

async fn login_submit(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let next = guard::safe_next(Some(form.next.as_str())).map(str::to_string);
    let Ok(mut session) = state.session.try_lock() else {
        return render_with_status(
            StatusCode::CONFLICT,
            LoginTemplate {
                notifications: vec![Notification::error(AppError::Busy.user_message())],
                email: form.email,
                next: next.unwrap_or_default(),
            },
        );
    };

    let credentials = Credentials {
        email: form.email.trim().to_string(),
        password: form.password,
    };
    match session.login(credentials).await {
        Ok(_) => Redirect::to(next.as_deref().unwrap_or(LANDING_PATH)).into_response(),
        Err(err) => render_with_status(
            status_for(&err),
            LoginTemplate {
                notifications: session.take_notifications(),
                email: form.email,
                next: next.unwrap_or_default(),
            },
        ),
    }
}

#[derive(Template)]
#[template(path = "auth/register.html")]
pub struct RegisterTemplate {
    notifications: Vec<Notification>,
    name: String,
    email: String,
    phone: String,
}

async fn register_form(State(state): State<AppState>) -> Response {
    let notifications = match state.session.try_lock() {
        Ok(mut session) => {
            session.start_registration();
            session.take_notifications()
        }
        Err(_) => Vec::new(),
    };
    AskamaTemplateResponse::into_response(RegisterTemplate {
        notifications,
        name: String::new(),
        email: String::new(),
        phone: String::new(),
    })
}

#[serde_as]
#[derive(Deserialize)]
struct RegisterForm {
    name: String,
    email: String,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    phone: Option<String>,
    password: String,
    password_confirm: String,
}

async fn register_submit(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> Response {
    let Ok(mut session) = state.session.try_lock() else {
        return render_register_error(
            StatusCode::CONFLICT,
            &form,
            vec![Notification::error(AppError::Busy.user_message())],
        );
    };

    if form.password != form.password_confirm {
        session.notify(Notification::error("The passwords do not match."));
        let notifications = session.take_notifications();
        return render_register_error(StatusCode::BAD_REQUEST, &form, notifications);
    }

    let input = RegisterInput {
        name: form.name.trim().to_string(),
        email: form.email.trim().to_string(),
        phone: form.phone.as_deref().map(str::trim).map(str::to_string),
        password: form.password.clone(),
    };
    match session.register(input).await {
        Ok(_) => Redirect::to("/registration/complete").into_response(),
        Err(err) => {
            let notifications = session.take_notifications();
            render_register_error(status_for(&err), &form, notifications)
        }
    }
}

fn render_register_error(
    status: StatusCode,
    form: &RegisterForm,
    notifications: Vec<Notification>,
) -> Response {
    render_with_status(
        status,
        RegisterTemplate {
            notifications,
            name: form.name.clone(),
            email: form.email.clone(),
            phone: form.phone.clone().unwrap_or_default(),
        },
    )
}

#[derive(Template)]
#[template(path = "auth/registration_complete.html")]
struct RegistrationCompleteTemplate {
    notifications: Vec<Notification>,
    user: SessionRecord,
}

async fn registration_complete(State(state): State<AppState>) -> Response {
    let mut session = state.session.lock().await;
    let user = match (session.state(), session.current()) {
        (SessionState::RegistrationComplete, Some(user)) => user.clone(),
        _ => return Redirect::to(LANDING_PATH).into_response(),
    };
    AskamaTemplateResponse::into_response(RegistrationCompleteTemplate {
        notifications: session.take_notifications(),
        user,
    })
}

async fn registration_acknowledge(State(state): State<AppState>) -> Redirect {
    state.session.lock().await.acknowledge_registration();
    Redirect::to(LANDING_PATH)
}

async fn logout(State(state): State<AppState>) -> Redirect {
    let outcome = {
        let mut session = state.session.lock().await;
        let user_id = session.current().map(|user| user.id);
        session.logout().map(|()| user_id)
    };
    match outcome {
        Ok(user_id) => {
            if let Some(user_id) = user_id {
                state.instances.forget(user_id).await;
            }
            Redirect::to(guard::LOGIN_PATH)
        }
        // The failure is queued as a toast; the session is still valid.
        Err(_) => Redirect::to(LANDING_PATH),
    }
}

fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::Validation(_) | AppError::Unauthorized => StatusCode::BAD_REQUEST,
        AppError::Busy => StatusCode::CONFLICT,
        AppError::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::RemoteRejected { .. }
        | AppError::InvalidResponse(_)
        | AppError::InvalidIdentifier { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_credentials_are_a_client_error() {
        assert_eq!(status_for(&AppError::Unauthorized), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&AppError::RemoteUnavailable("timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
