use std::sync::Arc;

use keel_api::config::AppConfig;
use keel_api::routes::{app_router, AppState};
use keel_api::store::ServerStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keel_api=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting keel-api with config: {:?}", config);

    let store = ServerStore::open(&config.database_path).await?;
    let state = AppState::new(config, store);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("keel-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
