use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use gatekey::auth::{AuthService, AuthSettings, AuthStores, LogMailer, PasswordHasher, TokenService};
use gatekey::config::AuthConfig;
use gatekey::handlers::auth_routes;
use gatekey::security_logger::{SecurityEvent, SecurityLogger};
use gatekey::storage::{
    MemoryCredentialStore, MemoryOneTimeTokenStore, MemoryRefreshTokenStore,
    MemoryTokenRevocationStore,
};

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    let security_log = Arc::new(SecurityLogger::new());
    security_log.clone().start_cleanup_task();

    // Load config from the environment; the secret is fixed for the process lifetime
    let config = match AuthConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            security_log
                .log_event(SecurityEvent::ConfigurationError {
                    component: "config".to_string(),
                    error: e.to_string(),
                })
                .await;
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, access_token_expiry={}s",
        config.host, config.port, config.access_token_expiry_secs
    );
    if config.development_mode {
        warn!("Development mode is enabled");
    }

    let tokens = match TokenService::new(&config.jwt_secret, config.access_token_expiry_secs) {
        Ok(tokens) => Arc::new(tokens),
        Err(e) => {
            error!("Failed to initialize token service: {}", e);
            std::process::exit(1);
        }
    };

    let stores = AuthStores {
        credentials: Arc::new(MemoryCredentialStore::new()),
        refresh_tokens: Arc::new(MemoryRefreshTokenStore::new()),
        one_time_tokens: Arc::new(MemoryOneTimeTokenStore::new()),
        revocations: Arc::new(MemoryTokenRevocationStore::new()),
    };
    if !config.admin_emails.is_empty() {
        info!("{} administrator address(es) configured", config.admin_emails.len());
    }

    let auth = match AuthService::new(
        stores,
        tokens,
        PasswordHasher::new(),
        Arc::new(LogMailer::new(config.development_mode)),
        security_log,
        AuthSettings::from(&config),
    ) {
        Ok(auth) => Arc::new(auth),
        Err(e) => {
            error!("Failed to initialize auth service: {}", e);
            std::process::exit(1);
        }
    };
    auth.clone().start_cleanup_task(config.cleanup_interval);

    let routes = auth_routes(auth);

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Gatekey server on {}", addr);
    warp::serve(routes).run(addr).await;
}
