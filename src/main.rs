use std::sync::Arc;

use chrono::Duration;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use taquilla_server::config::Config;
use taquilla_server::report::PlainTextRenderer;
use taquilla_server::routes::{create_routes, AppState};
use taquilla_server::services::{NoopMailer, SimulatedProcessor, SmtpMailer, TicketMailer};
use taquilla_server::store::PgStore;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let mailer: Arc<dyn TicketMailer> = match &config.smtp {
        Some(smtp) => match SmtpMailer::new(smtp) {
            Ok(mailer) => Arc::new(mailer),
            Err(e) => {
                tracing::warn!(error = %e, "SMTP misconfigured, email disabled");
                Arc::new(NoopMailer)
            }
        },
        None => Arc::new(NoopMailer),
    };

    let state = AppState::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(SimulatedProcessor::new()),
        mailer,
        Arc::new(PlainTextRenderer),
        Duration::seconds(config.scan_window_secs),
    );
    let app = create_routes(state);

    tracing::info!("🎟️ Server running at http://{}", config.bind_addr);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
