use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use url::Url;

use crate::error::AppError;

const DEFAULT_GATEWAY_URL: &str = "https://api.teste.onlinecenter.com.br/webhook";

/// What to do when the gateway cannot be reached at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Surface `RemoteUnavailable` to the user.
    #[default]
    Fail,
    /// Synthesize a local placeholder result and log the substitution.
    Placeholder,
}

impl FromStr for FallbackPolicy {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "placeholder" => Ok(Self::Placeholder),
            other => Err(AppError::Config(format!(
                "invalid GATEWAY_FALLBACK {other:?}, expected \"fail\" or \"placeholder\""
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub max_retries: usize,
    pub fallback: FallbackPolicy,
}

impl GatewayConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(15),
            max_retries: 0,
            fallback: FallbackPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub identity_store_path: PathBuf,
    pub gateway: GatewayConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let identity_store_path = env::var("IDENTITY_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data").join("identity.json"));

        let base_url = env::var("GATEWAY_URL")
            .unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string())
            .parse::<Url>()
            .map_err(|err| AppError::Config(format!("invalid GATEWAY_URL: {err}")))?;

        let mut gateway = GatewayConfig::new(base_url);

        if let Ok(raw) = env::var("GATEWAY_TIMEOUT_SECS") {
            let secs: u64 = raw
                .parse()
                .map_err(|err| AppError::Config(format!("invalid GATEWAY_TIMEOUT_SECS: {err}")))?;
            gateway.timeout = Duration::from_secs(secs);
        }

        if let Ok(raw) = env::var("GATEWAY_MAX_RETRIES") {
            gateway.max_retries = raw
                .parse()
                .map_err(|err| AppError::Config(format!("invalid GATEWAY_MAX_RETRIES: {err}")))?;
        }

        if let Ok(raw) = env::var("GATEWAY_FALLBACK") {
            gateway.fallback = raw.parse()?;
        }

        Ok(Self {
            listen_addr,
            identity_store_path,
            gateway,
        })
    }
}
