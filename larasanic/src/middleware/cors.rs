//! CORS layer built from `security.cors`.

use anyhow::{Context, bail};
use axum::http::{HeaderName, HeaderValue, Method, header, request::Parts};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::{Config, CorsOrigin};

/// Whether `origin` matches a `https://*.example.com` style pattern.
pub fn origin_matches_pattern(pattern: &str, origin: &str) -> bool {
    let Some((prefix, suffix)) = pattern.split_once('*') else {
        return pattern == origin;
    };
    origin.len() > prefix.len() + suffix.len()
        && origin.starts_with(prefix)
        && origin.ends_with(suffix)
        && !origin[prefix.len()..origin.len() - suffix.len()].contains('/')
}

fn origin_allowed(origins: &[CorsOrigin], origin: &str) -> bool {
    origins.iter().any(|allowed| match allowed {
        CorsOrigin::Wildcard => true,
        CorsOrigin::Exact(exact) => exact.trim_end_matches('/') == origin,
        CorsOrigin::Pattern(pattern) => origin_matches_pattern(pattern, origin),
    })
}

/// Create the CORS layer from configuration
pub fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors = &config.security.cors;
    let wildcard = cors.allowed_origins.contains(&CorsOrigin::Wildcard);
    if wildcard && cors.allow_credentials {
        bail!("wildcard CORS origin cannot be combined with allow_credentials");
    }

    let allow_origin = if wildcard {
        AllowOrigin::any()
    } else {
        let origins = cors.allowed_origins.clone();
        AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &Parts| {
            origin.to_str().map(|o| origin_allowed(&origins, o)).unwrap_or(false)
        })
    };

    let methods = cors
        .allowed_methods
        .iter()
        .map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).with_context(|| format!("invalid CORS method '{m}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let headers = cors
        .allowed_headers
        .iter()
        .map(|h| HeaderName::try_from(h.as_str()).with_context(|| format!("invalid CORS header '{h}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mut exposed = vec![header::LOCATION, HeaderName::from_static("x-csrf-token")];
    for h in &cors.exposed_headers {
        exposed.push(HeaderName::try_from(h.as_str()).with_context(|| format!("invalid exposed header '{h}'"))?);
    }

    let mut layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(cors.allow_credentials)
        .expose_headers(exposed);

    if let Some(max_age) = cors.max_age {
        layer = layer.max_age(Duration::from_secs(max_age));
    }

    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use axum_test::TestServer;

    #[test]
    fn test_pattern_matching() {
        assert!(origin_matches_pattern("https://*.example.com", "https://app.example.com"));
        assert!(!origin_matches_pattern("https://*.example.com", "https://example.com"));
        assert!(!origin_matches_pattern("https://*.example.com", "http://app.example.com"));
        assert!(!origin_matches_pattern("https://*.example.com", "https://evil.com/.example.com"));
    }

    #[test]
    fn test_wildcard_with_credentials_rejected() {
        let config = Config::default();
        assert!(cors_layer(&config).is_err());
    }

    #[tokio::test]
    async fn test_allowed_and_rejected_origins() {
        let mut config = Config::default();
        config.security.cors.allowed_origins = vec![
            CorsOrigin::Exact("https://app.test".to_string()),
            CorsOrigin::Pattern("https://*.example.com".to_string()),
        ];
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(cors_layer(&config).unwrap());
        let server = TestServer::new(app).unwrap();

        let allowed = server.get("/").add_header("origin", "https://api.example.com").await;
        allowed.assert_status(StatusCode::OK);
        assert_eq!(
            allowed.headers()["access-control-allow-origin"],
            "https://api.example.com"
        );
        assert_eq!(allowed.headers()["access-control-allow-credentials"], "true");

        let rejected = server.get("/").add_header("origin", "https://other.test").await;
        assert!(rejected.headers().get("access-control-allow-origin").is_none());
    }
}
