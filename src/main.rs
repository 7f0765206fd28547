use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use awardvote::{
    allowlist::Allowlist,
    broadcast,
    config::{AppConfig, VotingConfig},
    state::AppState,
    store::MemoryStore,
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "awardvote=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting awardvote...");

    let app_config = AppConfig::from_env();
    let voting_config = VotingConfig::load_or_default(app_config.voting_config_path.as_deref());

    let local_allowlist = match &app_config.allowed_emails_path {
        Some(path) => match Allowlist::load_local_file(path) {
            Ok(emails) => {
                tracing::info!("Loaded {} allowed emails from {}", emails.len(), path.display());
                emails
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read allowlist {}: {}. Nobody is allowed until a remote list is synced.",
                    path.display(),
                    e
                );
                Vec::new()
            }
        },
        None => {
            tracing::warn!("ALLOWED_EMAILS_PATH not set, local allowlist is empty");
            Vec::new()
        }
    };

    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(AppState::new(
        voting_config,
        store,
        &app_config,
        local_allowlist,
    ));

    if !state.admin.is_enabled() {
        tracing::warn!("Neither ADMIN_EMAILS nor ADMIN_SECURITY_CODE is set; admin operations are disabled");
    }

    // Push standings and status changes to dashboard clients
    broadcast::spawn_dashboard_broadcaster(state.clone());

    let app = awardvote::router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = match tokio::net::TcpListener::bind(app_config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", app_config.bind_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on http://{}", app_config.bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
