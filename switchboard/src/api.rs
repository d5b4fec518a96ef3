use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use pipeline::handler::App;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Serves the resolver: `POST /resolve` takes the trigger payload as-is
/// and answers with the handler's status and body.
pub async fn serve(app: App, host: &str, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let router = Router::new()
        .route("/resolve", post(resolve))
        .route("/health", get(health))
        .with_state(Arc::new(app));

    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!("listening on {host}:{port}");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn resolve(
    State(app): State<Arc<App>>,
    Json(event): Json<Value>,
) -> (axum::http::StatusCode, Json<Value>) {
    let reply = app.handle(event).await;
    (reply.status, Json(reply.body))
}

async fn health() -> &'static str {
    "ok"
}
