//! Bastion Server - Main Entry Point
//!
//! Identity and access management backend.

use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;

use bastion_server::rbac::{AccessControl, PgStore, RedisPermissionCache};
use bastion_server::{api, config, db, email, notify};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bastion_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Bastion Server"
    );

    // Initialize database
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    // Initialize Redis
    let redis = db::create_redis_client(&config.redis_url).await?;

    // Initialize email service (optional - delivery is skipped if not configured)
    let email_service = if config.has_smtp() {
        match email::EmailService::new(&config) {
            Ok(service) => {
                if let Err(e) = service.test_connection().await {
                    tracing::warn!("SMTP connection test failed: {e}. Continuing anyway.");
                }
                info!("Email delivery configured");
                Some(service)
            }
            Err(e) => {
                tracing::warn!("Email service initialization failed: {e}. Email delivery disabled.");
                None
            }
        }
    } else {
        info!("SMTP not configured, email delivery disabled");
        None
    };

    // Start the notification outbox worker
    let _outbox_worker = notify::spawn_delivery_task(
        db_pool.clone(),
        email_service,
        config.notify_poll_secs,
    );

    // Wire the access-control service (single composition root)
    let access = AccessControl::with_cache(
        PgStore::new(db_pool.clone()),
        RedisPermissionCache::new(redis.clone()),
        config.permission_cache_ttl,
    );

    // Build application state and router
    let state = api::AppState::new(db_pool, redis, config.clone(), access);
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    info!("Server shutdown complete");

    Ok(())
}
