//! JSON endpoints under `/api/auth`.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::instrument;

use super::{AuthService, AuthUser, RegisterData};
use crate::{
    AppState,
    errors::{Error, Result},
    http::ApiResponse,
    routing::{Blueprint, Router},
    validation::validate_into,
};

#[derive(Debug, Deserialize)]
struct LoginData {
    email: String,
    password: String,
}

fn service(state: &AppState) -> Result<Arc<AuthService>> {
    state.auth.clone().ok_or_else(|| Error::Internal {
        operation: "handle auth request: auth service is not registered".to_string(),
    })
}

fn signed_in(auth: &AuthService, user: &super::User, token: &str, status: StatusCode, message: &str) -> ApiResponse {
    ApiResponse::success(json!({ "user": user, "token": token }))
        .status(status)
        .message(message)
        .cookie_raw(auth.auth_cookie(token))
}

#[instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(body): Json<Value>) -> Result<ApiResponse> {
    let auth = service(&state)?;
    let data: RegisterData = validate_into(body, [
        ("name", "required|string|max:255"),
        ("email", "required|email"),
        ("password", "required|string|min:8|confirmed"),
    ])?;

    let (user, token) = auth.register(data).await?;
    Ok(signed_in(&auth, &user, &token, StatusCode::CREATED, "Registration successful"))
}

#[instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(body): Json<Value>) -> Result<ApiResponse> {
    let auth = service(&state)?;
    let data: LoginData = validate_into(body, [("email", "required|email"), ("password", "required")])?;

    let (user, token) = auth.attempt(&data.email, &data.password).await?;
    Ok(signed_in(&auth, &user, &token, StatusCode::OK, "Login successful"))
}

/// Revoke the presented token and clear the cookie.
#[instrument(skip_all, fields(user_id = user.id))]
pub async fn logout(State(state): State<AppState>, AuthUser(user): AuthUser, headers: HeaderMap) -> Result<ApiResponse> {
    let auth = service(&state)?;
    if let Some(token) = auth.token_from_headers(&headers) {
        auth.revoke(&token).await?;
    }
    Ok(ApiResponse::success(Value::Null)
        .message("Logged out")
        .cookie_raw(auth.logout_cookie()))
}

pub async fn me(AuthUser(user): AuthUser) -> ApiResponse {
    ApiResponse::success(json!({ "user": user }))
}

/// Add the auth endpoints, named `auth.*`.
pub fn register_routes(router: &mut Router, allow_registration: bool) {
    router.blueprint(Blueprint::Api).prefix("/api/auth").name("auth.").group(|router| {
        if allow_registration {
            router.post("/register", register).name("register");
        }
        router.post("/login", login).name("login");
        router.post("/logout", logout).name("logout").middleware(["auth"]);
        router.get("/me", me).name("me").middleware(["auth"]);
    });
}
