//! Response builder producing the framework's standard JSON envelope.
//!
//! Success bodies look like `{"success": true, "data": ..., "message"?, "meta"?}` and error
//! bodies like `{"success": false, "message": ..., "errors"?, "code"?}`. The builder also
//! covers HTML and redirect responses so handlers can chain headers and cookies onto any
//! of them.
//!
//! ```
//! use larasanic::http::ApiResponse;
//! use serde_json::json;
//!
//! let response = ApiResponse::created(json!({"id": 1}))
//!     .header("Location", "/users/1")
//!     .cookie_raw("seen=1; Path=/");
//! ```

use axum::{
    Json,
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};

use super::cookie::{CookieOptions, expire_cookie, set_cookie};

#[derive(Debug, Clone)]
enum Body {
    Success {
        data: Value,
        message: Option<String>,
        meta: Option<Value>,
    },
    Error {
        message: String,
        errors: Option<Value>,
        code: Option<String>,
    },
    Html(String),
    Redirect(String),
    Empty,
}

#[derive(Debug, Clone)]
#[must_use]
pub struct ApiResponse {
    status: StatusCode,
    body: Body,
    headers: Vec<(String, String)>,
    cookies: Vec<String>,
}

impl ApiResponse {
    fn with_body(status: StatusCode, body: Body) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
            cookies: Vec::new(),
        }
    }

    /// 200 response wrapping `data`.
    pub fn success(data: impl Serialize) -> Self {
        Self::with_body(
            StatusCode::OK,
            Body::Success {
                data: serde_json::to_value(data).unwrap_or(Value::Null),
                message: None,
                meta: None,
            },
        )
    }

    /// 400 error response; chain `.status()` and `.code()` for other failures.
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_body(
            StatusCode::BAD_REQUEST,
            Body::Error {
                message: message.into(),
                errors: None,
                code: None,
            },
        )
    }

    pub fn created(data: impl Serialize) -> Self {
        Self::success(data)
            .status(StatusCode::CREATED)
            .message("Resource created successfully")
    }

    pub fn no_content() -> Self {
        Self::with_body(StatusCode::NO_CONTENT, Body::Empty)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::error(message).status(StatusCode::UNAUTHORIZED).code("UNAUTHORIZED")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::error(message).status(StatusCode::FORBIDDEN).code("FORBIDDEN")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::error(message).status(StatusCode::NOT_FOUND).code("NOT_FOUND")
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::error(message)
            .status(StatusCode::TOO_MANY_REQUESTS)
            .code("RATE_LIMIT_EXCEEDED")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::error(message).status(StatusCode::BAD_REQUEST).code("BAD_REQUEST")
    }

    pub fn validation_error(errors: Value) -> Self {
        Self::error("Validation failed")
            .status(StatusCode::UNPROCESSABLE_ENTITY)
            .code("VALIDATION_ERROR")
            .errors(errors)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::error(message)
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .code("SERVER_ERROR")
    }

    /// Redirect to `url`. Non-redirect statuses fall back to 302.
    pub fn redirect(url: impl Into<String>, status: StatusCode) -> Self {
        let status = if status.is_redirection() { status } else { StatusCode::FOUND };
        Self::with_body(status, Body::Redirect(url.into()))
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::with_body(StatusCode::OK, Body::Html(body.into()))
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn message(mut self, text: impl Into<String>) -> Self {
        match &mut self.body {
            Body::Success { message, .. } => *message = Some(text.into()),
            Body::Error { message, .. } => *message = text.into(),
            _ => {}
        }
        self
    }

    pub fn meta(mut self, value: Value) -> Self {
        if let Body::Success { meta, .. } = &mut self.body {
            *meta = Some(value);
        }
        self
    }

    pub fn errors(mut self, value: Value) -> Self {
        if let Body::Error { errors, .. } = &mut self.body {
            *errors = Some(value);
        }
        self
    }

    pub fn code(mut self, value: &str) -> Self {
        if let Body::Error { code, .. } = &mut self.body {
            *code = Some(value.to_string());
        }
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cookie(mut self, name: &str, value: &str, options: &CookieOptions) -> Self {
        self.cookies.push(set_cookie(name, value, options));
        self
    }

    /// Attach a pre-built `Set-Cookie` value.
    pub fn cookie_raw(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    pub fn without_cookie(mut self, name: &str) -> Self {
        self.cookies.push(expire_cookie(name));
        self
    }

    /// The JSON body this response would render, if it is an envelope
    pub fn body_json(&self) -> Option<Value> {
        match &self.body {
            Body::Success { data, message, meta } => {
                let mut body = Map::new();
                body.insert("success".into(), Value::Bool(true));
                body.insert("data".into(), data.clone());
                if let Some(message) = message {
                    body.insert("message".into(), Value::String(message.clone()));
                }
                if let Some(meta) = meta {
                    body.insert("meta".into(), meta.clone());
                }
                Some(Value::Object(body))
            }
            Body::Error { message, errors, code } => {
                let mut body = Map::new();
                body.insert("success".into(), Value::Bool(false));
                body.insert("message".into(), Value::String(message.clone()));
                if let Some(errors) = errors {
                    body.insert("errors".into(), errors.clone());
                }
                if let Some(code) = code {
                    body.insert("code".into(), Value::String(code.clone()));
                }
                Some(Value::Object(body))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let json = self.body_json();
        let mut response = match self.body {
            Body::Success { .. } | Body::Error { .. } => Json(json.unwrap_or(Value::Null)).into_response(),
            Body::Html(html) => Html(html).into_response(),
            Body::Redirect(url) => {
                let mut response = StatusCode::FOUND.into_response();
                match HeaderValue::from_str(&url) {
                    Ok(location) => {
                        response.headers_mut().insert(header::LOCATION, location);
                    }
                    Err(e) => tracing::warn!(url = %url, error = %e, "Invalid redirect location"),
                }
                response
            }
            Body::Empty => ().into_response(),
        };
        *response.status_mut() = self.status;

        for (name, value) in self.headers {
            match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(&value)) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => tracing::warn!(header = %name, "Skipping invalid response header"),
            }
        }
        for cookie in self.cookies {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
                Err(_) => tracing::warn!("Skipping invalid Set-Cookie value"),
            }
        }
        response
    }
}
