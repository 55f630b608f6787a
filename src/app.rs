use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware,
    routing::get,
    Json, Router,
};
use time::OffsetDateTime;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::auth;
use crate::auth::dto::HealthResponse;
use crate::error::expose_error_detail;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.frontend_url);
    let development = state.config.environment.is_development();

    let app = Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .route("/health", get(health)),
        )
        .with_state(state);

    let app = if development {
        app.layer(middleware::from_fn(expose_error_detail))
    } else {
        app
    };

    app.layer(cors).layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method().clone();
                let uri = req.uri().clone();
                tracing::info_span!(
                    "http_request",
                    %method,
                    uri = %uri,
                    status = tracing::field::Empty
                )
            })
            .on_response(
                |res: &axum::http::Response<_>,
                 _latency: std::time::Duration,
                 span: &tracing::Span| {
                    let status = res.status();
                    span.record("status", tracing::field::display(status));
                    if status.is_server_error() {
                        tracing::error!(%status, "response");
                    } else {
                        tracing::info!(%status, "response");
                    }
                },
            ),
    )
}

/// The portal frontend is the only cross-origin caller and sends credentials.
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    match frontend_url.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!(
                error = %e,
                frontend_url,
                "FRONTEND_URL is not a valid origin; cross-origin requests disabled"
            );
            layer
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: "Healthcare Claims API is running",
        timestamp: OffsetDateTime::now_utc(),
        environment: state.config.environment,
    })
}

pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use crate::auth::repo::UserStore;
    use crate::auth::repo_types::{Role, User};
    use crate::config::{AppConfig, RuntimeMode};
    use crate::error::StoreError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    /// Store whose backend cannot be reached.
    struct OfflineStore;

    fn offline() -> StoreError {
        StoreError::Unavailable("conn refused".into())
    }

    #[async_trait]
    impl UserStore for OfflineStore {
        async fn insert(&self, _user: &User) -> Result<(), StoreError> {
            Err(offline())
        }

        async fn update_details(&self, _user: &User) -> Result<(), StoreError> {
            Err(offline())
        }

        async fn update_password(
            &self,
            _id: Uuid,
            _password_hash: &str,
            _at: OffsetDateTime,
        ) -> Result<(), StoreError> {
            Err(offline())
        }

        async fn record_login(&self, _id: Uuid, _at: OffsetDateTime) -> Result<bool, StoreError> {
            Err(offline())
        }

        async fn find_by_id(&self, _id: Uuid) -> Result<Option<User>, StoreError> {
            Err(offline())
        }

        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
            Err(offline())
        }

        async fn find_active_by_email_and_role(
            &self,
            _email: &str,
            _role: Role,
        ) -> Result<Option<User>, StoreError> {
            Err(offline())
        }

        async fn set_active(
            &self,
            _id: Uuid,
            _active: bool,
            _at: OffsetDateTime,
        ) -> Result<bool, StoreError> {
            Err(offline())
        }

        async fn count(&self) -> Result<i64, StoreError> {
            Err(offline())
        }

        async fn close(&self) {}
    }

    async fn login_against_offline_store(mode: RuntimeMode) -> (StatusCode, Value) {
        let mut config = AppConfig::for_tests();
        config.environment = mode;
        let app = build_app(AppState::from_parts(Arc::new(OfflineStore), Arc::new(config)));

        let req = Request::post("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"email": "patient@demo.com", "password": "demo123", "role": "patient"})
                    .to_string(),
            ))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn store_outage_detail_only_in_development() {
        let (status, body) = login_against_offline_store(RuntimeMode::Development).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body,
            json!({
                "success": false,
                "message": "Service temporarily unavailable",
                "detail": "conn refused"
            })
        );

        let (status, body) = login_against_offline_store(RuntimeMode::Production).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body,
            json!({"success": false, "message": "Service temporarily unavailable"})
        );
    }

    #[tokio::test]
    async fn health_reports_environment() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["environment"], "development");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn cors_preflight_allows_frontend_origin() {
        let app = build_app(AppState::fake());
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/api/auth/login")
            .header(header::ORIGIN, "http://localhost:3002")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(
            res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3002"
        );
        assert_eq!(
            res.headers().get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
