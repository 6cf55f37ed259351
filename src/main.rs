use axum::extract::DefaultBodyLimit;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lessonflow::{db, routes, Academy, Config, MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::connect(url, config.db_max_connections).await?;
            serve(&config, PgStore::new(pool)).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store, nothing will persist");
            serve(&config, MemoryStore::new()).await
        }
    }
}

async fn serve<S: Store>(config: &Config, store: S) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(Academy::new(store)))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
