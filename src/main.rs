use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use mockable::DefaultClock;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{error, info, warn};

use library_circulation::{
    AppState, Config, router,
    store::{LibraryStore, MemoryStore, PgStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,library_circulation=debug,sqlx=warn".into()),
        )
        .json()
        .init();

    info!("Starting library circulation service v{}", env!("CARGO_PKG_VERSION"));

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let store: Arc<dyn LibraryStore> = match &config.database_url {
        Some(url) => {
            let db = connect_with_retry(url)
                .await
                .context("Failed to connect to PostgreSQL after retries")?;

            info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&db)
                .await
                .context("Migration failed")?;
            info!("Database migrations completed successfully");
            Arc::new(PgStore::new(db))
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store, data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };

    let state = Arc::new(AppState::new(store, Arc::new(DefaultClock), config.clone()));
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn connect_with_retry(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let mut delay = Duration::from_millis(500);
    let max_attempts = 30;
    let mut attempt = 1;

    loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                info!("Connected to PostgreSQL on attempt {attempt}");
                return Ok(pool);
            }
            Err(e) if attempt >= max_attempts => {
                error!("All connection attempts failed");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "Database connection failed (attempt {}/{}): {e}, retrying in {:?}",
                    attempt, max_attempts, delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
                attempt += 1;
            }
        }
    }
}

// ───── Graceful shutdown on Ctrl+C (SIGINT) or Docker SIGTERM ─────
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }

    info!("Shutdown signal received, closing server...");
}
