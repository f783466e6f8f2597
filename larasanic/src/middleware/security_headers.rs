use async_trait::async_trait;
use axum::{
    http::{HeaderName, HeaderValue},
    response::Response,
};
use tracing::warn;

use super::{Middleware, RequestSnapshot};
use crate::config::SecurityHeadersConfig;

pub const DEFAULT_CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self' 'unsafe-eval' 'unsafe-inline'; \
style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; font-src 'self'; connect-src 'self'; \
frame-ancestors 'none'; base-uri 'self'; form-action 'self'";

pub const DEFAULT_PERMISSIONS_POLICY: &str = "geolocation=(), microphone=(), camera=(), payment=(), usb=(), \
magnetometer=(), gyroscope=(), accelerometer=()";

/// Adds the configured security headers to every response.
///
/// The header list is computed once; invalid custom headers are dropped with a warning.
pub struct SecurityHeadersMiddleware {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeadersMiddleware {
    pub fn new(config: &SecurityHeadersConfig) -> Self {
        let mut pairs: Vec<(String, String)> = Vec::new();
        let mut push = |name: &str, value: Option<&str>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                pairs.push((name.to_string(), value.to_string()));
            }
        };

        push("x-frame-options", config.x_frame_options.as_deref());
        push("x-content-type-options", config.x_content_type_options.as_deref());
        push("x-xss-protection", config.x_xss_protection.as_deref());
        if config.csp_enabled {
            push(
                "content-security-policy",
                Some(
                    config
                        .content_security_policy
                        .as_deref()
                        .unwrap_or(DEFAULT_CONTENT_SECURITY_POLICY),
                ),
            );
        }
        if config.hsts_enabled {
            push("strict-transport-security", Some(&hsts_value(config)));
        }
        push("referrer-policy", config.referrer_policy.as_deref());
        push(
            "permissions-policy",
            Some(config.permissions_policy.as_deref().unwrap_or(DEFAULT_PERMISSIONS_POLICY)),
        );
        for (name, value) in &config.custom_headers {
            push(name, Some(value));
        }

        let headers = pairs
            .into_iter()
            .filter_map(|(name, value)| {
                match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(&value)) {
                    (Ok(name), Ok(value)) => Some((name, value)),
                    _ => {
                        warn!(header = %name, "Ignoring invalid security header");
                        None
                    }
                }
            })
            .collect();

        Self { headers }
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }
}

fn hsts_value(config: &SecurityHeadersConfig) -> String {
    let mut value = format!("max-age={}", config.hsts_max_age);
    if config.hsts_include_subdomains {
        value.push_str("; includeSubDomains");
    }
    if config.hsts_preload {
        value.push_str("; preload");
    }
    value
}

#[async_trait]
impl Middleware for SecurityHeadersMiddleware {
    fn name(&self) -> &str {
        "security_headers"
    }

    async fn after_response(&self, _request: &RequestSnapshot, mut response: Response) -> Response {
        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn header<'a>(middleware: &'a SecurityHeadersMiddleware, name: &str) -> Option<&'a str> {
        middleware
            .headers()
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .and_then(|(_, v)| v.to_str().ok())
    }

    #[test]
    fn test_defaults() {
        let middleware = SecurityHeadersMiddleware::new(&SecurityHeadersConfig::default());
        assert_eq!(header(&middleware, "x-frame-options"), Some("DENY"));
        assert_eq!(header(&middleware, "x-content-type-options"), Some("nosniff"));
        assert_eq!(
            header(&middleware, "content-security-policy"),
            Some(DEFAULT_CONTENT_SECURITY_POLICY)
        );
        assert_eq!(header(&middleware, "permissions-policy"), Some(DEFAULT_PERMISSIONS_POLICY));
        assert_eq!(header(&middleware, "strict-transport-security"), None);
    }

    #[test]
    fn test_hsts_and_custom_headers() {
        let config = SecurityHeadersConfig {
            hsts_enabled: true,
            hsts_max_age: 600,
            hsts_include_subdomains: true,
            hsts_preload: true,
            csp_enabled: false,
            x_frame_options: None,
            custom_headers: HashMap::from([
                ("X-Powered-By".to_string(), "larasanic".to_string()),
                ("bad header".to_string(), "x".to_string()),
            ]),
            ..Default::default()
        };
        let middleware = SecurityHeadersMiddleware::new(&config);
        assert_eq!(
            header(&middleware, "strict-transport-security"),
            Some("max-age=600; includeSubDomains; preload")
        );
        assert_eq!(header(&middleware, "x-powered-by"), Some("larasanic"));
        assert_eq!(header(&middleware, "content-security-policy"), None);
        assert_eq!(header(&middleware, "x-frame-options"), None);
        assert!(middleware.headers().iter().all(|(n, _)| n.as_str() != "bad header"));
    }
}
