//! HTTP helpers: the response envelope, cookies, error rendering and the outbound client.

pub mod client;
pub mod cookie;
pub mod error_handler;
pub mod response;

pub use client::HttpClient;
pub use response::ApiResponse;

use axum::http::{
    HeaderMap,
    header::{ACCEPT, HeaderName},
};

static X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");

/// Whether the client expects a JSON response rather than HTML.
///
/// True for `Accept: application/json`, `X-Requested-With: XMLHttpRequest`, or any path
/// under `/api/`.
pub fn wants_json(headers: &HeaderMap, path: &str) -> bool {
    let accepts_json = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"));
    let ajax = headers
        .get(&X_REQUESTED_WITH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));

    accepts_json || ajax || path.starts_with("/api/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_wants_json() {
        let empty = HeaderMap::new();
        assert!(!wants_json(&empty, "/dashboard"));
        assert!(wants_json(&empty, "/api/users"));

        let mut accept = HeaderMap::new();
        accept.insert(ACCEPT, HeaderValue::from_static("text/html, application/json;q=0.9"));
        assert!(wants_json(&accept, "/dashboard"));

        let mut ajax = HeaderMap::new();
        ajax.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
        assert!(wants_json(&ajax, "/dashboard"));
    }
}
