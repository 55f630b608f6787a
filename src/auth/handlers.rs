use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{error, info, instrument};

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, LoginRequest, MessageResponse, RegisterRequest,
            UpdateProfileRequest, UserResponse,
        },
        extractors::CurrentUser,
        jwt::JwtKeys,
        services,
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(get_me))
        .route("/auth/profile", put(update_profile))
        .route("/auth/change-password", put(change_password))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let Json(payload) = payload?;
    let user = services::register(state.store.as_ref(), payload).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, user.role()).map_err(|e| {
        error!(error = %e, "jwt sign failed");
        AppError::Internal(e.to_string())
    })?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            message: "User registered successfully".into(),
            token,
            user: user.safe_view(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(payload) = payload?;
    let keys = JwtKeys::from_ref(&state);
    let (token, user) = services::login(
        state.store.as_ref(),
        &keys,
        &payload.email,
        &payload.password,
        &payload.role,
    )
    .await?;

    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful".into(),
        token,
        user: user.safe_view(),
    }))
}

#[instrument(skip_all)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse {
        success: true,
        message: None,
        user: user.safe_view(),
    })
}

/// Tokens are stateless; logout is an acknowledgement the client can log
/// against before it drops its local session.
#[instrument(skip_all)]
pub async fn logout(CurrentUser(user): CurrentUser) -> Json<MessageResponse> {
    info!(user_id = %user.id, "user logged out");
    Json(MessageResponse::ok("Logged out successfully"))
}

#[instrument(skip_all)]
pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, AppError> {
    let Json(payload) = payload?;
    let user =
        services::update_profile(state.store.as_ref(), user, payload.name, payload.profile)
            .await?;
    Ok(Json(UserResponse {
        success: true,
        message: Some("Profile updated successfully".into()),
        user: user.safe_view(),
    }))
}

#[instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(payload) = payload?;
    services::change_password(
        state.store.as_ref(),
        user,
        &payload.current_password,
        &payload.new_password,
    )
    .await?;
    Ok(Json(MessageResponse::ok("Password changed successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::build_app;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn payor_registration() -> Value {
        json!({
            "email": "payor@demo.com",
            "password": "payor123",
            "name": "Lisa Thompson",
            "role": "payor",
            "profile": {
                "firstName": "Lisa",
                "lastName": "Thompson",
                "title": "Claims Administrator",
                "employeeId": "EMP789012",
                "department": "Claims Processing"
            }
        })
    }

    #[tokio::test]
    async fn register_login_me_flow() {
        let app = build_app(AppState::fake());

        let (status, body) =
            call(&app, "POST", "/api/auth/register", None, Some(payor_registration())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["role"], "payor");
        assert_eq!(body["user"]["profile"]["employeeId"], "EMP789012");
        assert!(body["user"].get("password").is_none());
        assert!(body["user"].get("passwordHash").is_none());

        let (status, body) = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "payor@demo.com", "password": "payor123", "role": "payor"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();
        assert!(body["user"]["lastLogin"].is_string());

        let (status, body) = call(&app, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "payor@demo.com");

        let (status, body) = call(&app, "POST", "/api/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn register_reports_missing_profile_field() {
        let app = build_app(AppState::fake());
        let mut payload = payor_registration();
        payload["profile"].as_object_mut().unwrap().remove("employeeId");

        let (status, body) =
            call(&app, "POST", "/api/auth/register", None, Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "employeeId is required for payor profile");
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let app = build_app(AppState::fake());
        call(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(payor_registration()),
        )
        .await;

        let attempts = [
            json!({"email": "payor@demo.com", "password": "wrong-pass", "role": "payor"}),
            json!({"email": "payor@demo.com", "password": "payor123", "role": "patient"}),
            json!({"email": "ghost@demo.com", "password": "payor123", "role": "payor"}),
        ];
        for attempt in attempts {
            let (status, body) =
                call(&app, "POST", "/api/auth/login", None, Some(attempt)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body, json!({"success": false, "message": "Invalid credentials"}));
        }
    }

    #[tokio::test]
    async fn malformed_json_uses_failure_envelope() {
        let app = build_app(AppState::fake());
        let req = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn me_requires_valid_bearer_token() {
        let app = build_app(AppState::fake());
        let (status, _) = call(&app, "GET", "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = call(&app, "GET", "/api/auth/me", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn profile_update_and_password_change() {
        let app = build_app(AppState::fake());
        let (_, body) =
            call(&app, "POST", "/api/auth/register", None, Some(payor_registration())).await;
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "PUT",
            "/api/auth/profile",
            Some(&token),
            Some(json!({"profile": {"region": "Northeast"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["profile"]["region"], "Northeast");
        assert_eq!(body["user"]["profile"]["employeeId"], "EMP789012");

        let (status, body) = call(
            &app,
            "PUT",
            "/api/auth/change-password",
            Some(&token),
            Some(json!({"currentPassword": "bad-guess", "newPassword": "another1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Current password is incorrect");

        let (status, _) = call(
            &app,
            "PUT",
            "/api/auth/change-password",
            Some(&token),
            Some(json!({"currentPassword": "payor123", "newPassword": "another1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "payor@demo.com", "password": "another1", "role": "payor"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
