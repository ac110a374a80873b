use pairdesk::config::AppConfig;
use pairdesk::error::AppError;
use pairdesk::routes::create_router;
use pairdesk::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    info!(
        gateway = %config.gateway.base_url,
        fallback = ?config.gateway.fallback,
        store = %config.identity_store_path.display(),
        "starting"
    );

    let state = AppState::from_config(config.clone())?;

    // Hydrate before the first request so the guard never answers from an unread store.
    let restored = state.session.lock().await.hydrate();
    info!(session = %restored, "identity store loaded");

    let app = create_router(state);

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,pairdesk=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
