//! Outbound HTTP client with URL safety checks.
//!
//! Wraps a `reqwest::Client` configured from `http_client` settings. Every request URL is
//! sanitized and validated first: only `http`/`https` are allowed, and loopback, link-local
//! or private network hosts are refused unless `allow_private` is set. Redirect targets go
//! through the same check on every hop. An optional client-side budget delays requests that
//! would exceed `max_requests` per window.

use reqwest::{
    Client, Response,
    header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue},
    redirect,
};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    net::{Ipv4Addr, Ipv6Addr},
    path::Path,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use url::{Host, Url};

use crate::{
    config::{HttpClientConfig, RateLimit},
    errors::{Error, Result},
    middleware::rate_limit::{RateDecision, SlidingWindowLimiter},
};

const BLOCKED_PREFIXES: &[&str] = &["file:", "ftp:", "gopher:", "javascript:", "data:"];

const LIMITER_KEY: &str = "outbound";

/// Strip control characters and default to `https://` when no scheme is given.
pub fn sanitize_url(url: &str) -> String {
    let cleaned: String = url.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.starts_with("//") {
        return format!("https:{cleaned}");
    }
    let has_scheme = cleaned
        .split_once(':')
        .is_some_and(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)));
    if has_scheme && (cleaned.contains("://") || BLOCKED_PREFIXES.iter().any(|p| cleaned.to_ascii_lowercase().starts_with(p))) {
        cleaned.to_string()
    } else {
        format!("https://{cleaned}")
    }
}

/// Check a URL against the scheme and host rules.
pub fn validate_url(url: &str, allow_private: bool) -> Result<Url> {
    let lower = url.to_ascii_lowercase();
    if let Some(prefix) = BLOCKED_PREFIXES.iter().find(|p| lower.starts_with(*p)) {
        warn!(url = %url, scheme = %prefix, "Blocked outbound URL scheme");
        return Err(Error::BadRequest {
            message: format!("URL scheme '{prefix}' is not allowed"),
        });
    }

    let parsed = Url::parse(url).map_err(|e| Error::BadRequest {
        message: format!("Invalid URL '{url}': {e}"),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        warn!(url = %url, scheme = %parsed.scheme(), "Blocked outbound URL scheme");
        return Err(Error::BadRequest {
            message: format!("URL scheme '{}' is not allowed", parsed.scheme()),
        });
    }

    if !allow_private && let Some(host) = parsed.host() {
        if is_private_host(&host) {
            warn!(url = %url, host = %host, "Blocked outbound request to private host");
            return Err(Error::BadRequest {
                message: format!("Requests to private host '{host}' are not allowed"),
            });
        }
    }

    Ok(parsed)
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_private_ipv4(ip),
        Host::Ipv6(ip) => is_private_ipv6(ip),
    }
}

fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10, carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local, fe80::/10 link-local
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
        || ip.to_ipv4_mapped().is_some_and(|v4| is_private_ipv4(&v4))
}

/// Decide whether to follow a redirect to `next` after `hops` earlier redirects.
fn check_redirect(next: &Url, hops: usize, max_redirects: usize, allow_private: bool) -> Result<()> {
    if hops >= max_redirects {
        return Err(Error::BadRequest {
            message: format!("Too many redirects (limit {max_redirects})"),
        });
    }
    validate_url(next.as_str(), allow_private).map(|_| ())
}

fn redirect_policy(max_redirects: usize, allow_private: bool) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        match check_redirect(attempt.url(), attempt.previous().len(), max_redirects, allow_private) {
            Ok(()) => attempt.follow(),
            Err(e) => attempt.error(e.to_string()),
        }
    })
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    allow_private: bool,
    budget: Option<RateLimit>,
    limiter: std::sync::Arc<SlidingWindowLimiter>,
}

impl HttpClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        // reqwest is built without a default crypto provider
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .redirect(redirect_policy(config.max_redirects, config.allow_private))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Internal {
                operation: format!("build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            allow_private: config.allow_private,
            budget: config.rate_limit,
            limiter: Default::default(),
        })
    }

    /// The underlying reqwest client, for requests the helpers do not cover
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn validate(&self, url: &str) -> Result<Url> {
        validate_url(&sanitize_url(url), self.allow_private)
    }

    async fn wait_for_budget(&self) {
        let Some(budget) = self.budget else { return };
        loop {
            match self.limiter.check(LIMITER_KEY, budget) {
                RateDecision::Allowed { .. } => return,
                RateDecision::Limited { retry_after, .. } => {
                    debug!(wait_ms = retry_after.as_millis() as u64, "Outbound request budget exhausted, waiting");
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<Response> {
        self.wait_for_budget().await;
        let response = request.send().await.map_err(|e| {
            Error::Other(anyhow::anyhow!("Request to {url} failed: {e}"))
        })?;
        check_status(response, url).await
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self, url: &str) -> Result<Response> {
        let url = self.validate(url)?;
        self.send(self.client.get(url.clone()), &url).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("Invalid JSON response: {e}")))
    }

    #[instrument(skip(self, body), err)]
    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Response> {
        let url = self.validate(url)?;
        self.send(self.client.post(url.clone()).json(body), &url).await
    }

    pub async fn post_json_for<T: DeserializeOwned, B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<T> {
        let response = self.post_json(url, body).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("Invalid JSON response: {e}")))
    }

    /// Stream a response body to `path`, returning the number of bytes written.
    #[instrument(skip(self, path), err)]
    pub async fn download(&self, url: &str, path: &Path) -> Result<u64> {
        let mut response = self.get(url).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Error::Internal {
                operation: format!("create download directory {}: {e}", parent.display()),
            })?;
        }
        let mut file = tokio::fs::File::create(path).await.map_err(|e| Error::Internal {
            operation: format!("create {}: {e}", path.display()),
        })?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("Download interrupted: {e}")))?
        {
            file.write_all(&chunk).await.map_err(|e| Error::Internal {
                operation: format!("write {}: {e}", path.display()),
            })?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| Error::Internal {
            operation: format!("flush {}: {e}", path.display()),
        })?;

        debug!(bytes = written, path = %path.display(), "Download complete");
        Ok(written)
    }
}

async fn check_status(response: Response, url: &Url) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        Err(Error::BadRequest {
            message: format!("Upstream request to {url} failed with status {status}: {body}"),
        })
    } else {
        Err(Error::Other(anyhow::anyhow!(
            "Upstream request to {url} failed with status {status}: {body}"
        )))
    }
}
