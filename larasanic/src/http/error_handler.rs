//! Centralized error rendering.
//!
//! Every [`Error`] turns itself into the JSON envelope and tags the response with an
//! [`ErrorContext`]. The router-level [`error_pages`] layer picks those responses up on the
//! way out and, for browser requests, swaps the body for the `errors.{status}` view when
//! the application ships one. In debug mode JSON errors also get a `debug` object.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode, Uri,
        header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use super::wants_json;
use crate::{
    AppState,
    errors::{Error, ErrorContext},
    view::ViewEngine,
};

/// Largest error body that is re-parsed to add debug details
const MAX_DEBUG_BODY: usize = 64 * 1024;

/// What the error renderer needs to know about the request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
    pub wants_json: bool,
}

impl RequestInfo {
    pub fn new(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        Self {
            method: method.clone(),
            path: uri.path().to_string(),
            wants_json: wants_json(headers, uri.path()),
        }
    }

    pub fn from_request(request: &Request) -> Self {
        Self::new(request.method(), request.uri(), request.headers())
    }
}

/// Render an error for the given request.
pub async fn render_error(error: Error, info: &RequestInfo, views: Option<&ViewEngine>, debug: bool) -> Response {
    decorate(error.into_response(), info, views, debug).await
}

/// Post-process an error response: HTML error pages for browsers, debug details for JSON.
pub async fn decorate(response: Response, info: &RequestInfo, views: Option<&ViewEngine>, debug: bool) -> Response {
    let Some(context) = response.extensions().get::<ErrorContext>().cloned() else {
        return response;
    };

    if !info.wants_json
        && let Some(views) = views
    {
        let name = views.error_view(context.status);
        if views.view_exists(&name) {
            let data = json!({
                "message": context.message,
                "path": info.path,
                "status": context.status.as_u16(),
            });
            match views.render(&name, data).await {
                Ok(html) => return replace_body(response, Body::from(html), "text/html; charset=utf-8"),
                Err(e) => tracing::warn!(view = %name, error = %e, "Failed to render error view"),
            }
        }
    }

    if debug {
        return with_debug(response, info).await;
    }
    response
}

fn replace_body(response: Response, body: Body, content_type: &'static str) -> Response {
    let (mut parts, _) = response.into_parts();
    parts.headers.remove(CONTENT_LENGTH);
    parts.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    Response::from_parts(parts, body)
}

async fn with_debug(response: Response, info: &RequestInfo) -> Response {
    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_DEBUG_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Could not buffer error body for debug details");
            return Response::from_parts(parts, Body::empty());
        }
    };

    let Ok(Value::Object(mut envelope)) = serde_json::from_slice::<Value>(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };
    envelope.insert(
        "debug".to_string(),
        json!({"path": info.path, "method": info.method.as_str()}),
    );
    let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| bytes.to_vec());
    replace_body(Response::from_parts(parts, Body::empty()), Body::from(body), "application/json")
}

/// Router-level layer that turns error responses into error pages.
///
/// It also gives axum's bare `405 Method Not Allowed` responses the standard envelope.
pub async fn error_pages(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let info = RequestInfo::from_request(&request);
    let mut response = next.run(request).await;

    if response.status() == StatusCode::METHOD_NOT_ALLOWED && response.extensions().get::<ErrorContext>().is_none() {
        let allow = response.headers().get(ALLOW).cloned();
        response = Error::MethodNotAllowed {
            method: info.method.to_string(),
            path: info.path.clone(),
        }
        .into_response();
        if let Some(allow) = allow {
            response.headers_mut().insert(ALLOW, allow);
        }
    }

    decorate(response, &info, state.view.as_deref(), state.config.app.debug).await
}
