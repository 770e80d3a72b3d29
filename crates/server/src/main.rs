mod api;
mod broker;
mod config;
mod connection;
mod cors;
mod db;
mod error;
mod history;
mod registry;
mod store;
mod ws;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header::HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

use crate::broker::MessageBroker;
use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::db::migrations::run_migrations;
use crate::db::pool::{check_pool_health, create_pg_pool, PoolConfig};
use crate::error::{with_request_id_scope, REQUEST_ID_HEADER};
use crate::history::HistoryService;
use crate::registry::RoomRegistry;
use crate::store::MessageStore;

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .init();

    let database_url = config
        .database_url
        .clone()
        .context("COMMUNE_SERVER_DATABASE_URL must be set for the durable message store")?;
    let pool = create_pg_pool(&database_url, PoolConfig::from_env()).await?;
    run_migrations(&pool).await?;
    check_pool_health(&pool).await?;

    let store = MessageStore::Postgres(pool);
    let registry = Arc::new(RoomRegistry::new());
    let connections = Arc::new(ConnectionManager::new(Arc::clone(&registry)));
    let broker = Arc::new(MessageBroker::new(
        store.clone(),
        Arc::clone(&registry),
        Arc::clone(&connections),
        config.persist_timeout,
    ));
    let history = HistoryService::new(store);

    let app = build_router(connections, broker, history);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind chat listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting chat server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("chat server exited unexpectedly")
}

fn build_router(
    connections: Arc<ConnectionManager>,
    broker: Arc<MessageBroker>,
    history: HistoryService,
) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(connections, broker, history.clone()))
            .merge(api::router(history)),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(cors::cors_layer())
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

// A panicking handler must cost one request, never the process: every other
// connection's session stays up.
async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, MAX_REQUEST_BODY_BYTES};
    use crate::broker::{MessageBroker, DEFAULT_PERSIST_TIMEOUT};
    use crate::connection::ConnectionManager;
    use crate::history::HistoryService;
    use crate::registry::RoomRegistry;
    use crate::store::MessageStore;

    fn test_router() -> Router {
        let store = MessageStore::for_tests();
        let registry = Arc::new(RoomRegistry::new());
        let connections = Arc::new(ConnectionManager::new(Arc::clone(&registry)));
        let broker = Arc::new(MessageBroker::new(
            store.clone(),
            registry,
            Arc::clone(&connections),
            DEFAULT_PERSIST_TIMEOUT,
        ));
        build_router(connections, broker, HistoryService::new(store))
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn incoming_request_id_is_echoed_back() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-roundtrip-1")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-roundtrip-1");
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
