//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `LARASANIC_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **`.env` file** - Read from `app.base_path`, with the same variable names as the
//!    environment. This is where `key:generate` writes the secret.
//! 3. **Environment variables** - Variables prefixed with `LARASANIC_` override YAML values
//! 4. **APP_SECRET_KEY / APP_ENV** - Conventional variables that map onto `secret_key` and `app.env`
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `LARASANIC_SESSION__DRIVER=cookie` sets the `session.driver` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use larasanic::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `log_level`
//! - **Application**: `app.name`, `app.env`, `app.debug`, `app.url`, `app.base_path`
//! - **Security**: `secret_key`, `security.csrf`, `security.rate_limit`, `security.headers`, `security.cors`
//! - **Sessions**: `session.driver` (`file`, `cookie`, `array`), `session.lifetime`, cookie settings
//! - **Cache**: `cache.driver` (`file`, `memory`, `array`), `cache.ttl`
//! - **Views**: `view.directory`, `view.extension`, render cache settings
//! - **Auth**: `auth.login_url`, `auth.home_url`, token lifetime and cookie name
//! - **Outbound HTTP**: `http_client.*`
//! - **WebSockets**: `websocket.enabled`, `websocket.path`
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! LARASANIC_PORT=8080
//! APP_SECRET_KEY="a-very-long-random-secret-of-at-least-32-chars"
//! LARASANIC_SESSION__DRIVER=cookie
//! LARASANIC_APP__DEBUG=true
//! ```

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
    value::Value as FigmentValue,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::errors::Error;

/// Secret values that must never be used outside development.
const PLACEHOLDER_SECRETS: &[&str] = &["change-this-in-production", "secret", "changeme"];

pub const SESSION_DRIVERS: &[&str] = &["file", "cookie", "array"];
pub const CACHE_DRIVERS: &[&str] = &["file", "memory", "array"];

/// CLI args: config file, validation flag and an optional console command
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "LARASANIC_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,

    /// Console command to run (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Console commands available from the `larasanic` binary.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the HTTP server
    Serve {
        /// Override the configured host
        #[arg(long)]
        host: Option<String>,
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// List all registered routes
    #[command(name = "route:list")]
    RouteList {
        /// Only show routes accepting this method
        #[arg(long)]
        method: Option<String>,
        /// Only show routes whose name contains this value
        #[arg(long)]
        name: Option<String>,
    },
    /// List all service container bindings
    Container,
    /// Flush the application cache and compiled views
    #[command(name = "cache:clear")]
    CacheClear,
    /// Generate the application secret key
    #[command(name = "key:generate")]
    KeyGenerate {
        /// Print the key instead of writing it to .env
        #[arg(long)]
        show: bool,
    },
    /// Generate random secrets for use in configuration
    #[command(name = "secrets:generate")]
    SecretsGenerate {
        /// Number of random bytes
        #[arg(long, default_value_t = 32)]
        length: usize,
    },
    /// Create the storage directory structure
    Setup,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Default tracing filter when RUST_LOG is not set
    pub log_level: String,
    /// Secret used for CSRF tokens, signed cookies, signed URLs and JWTs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    /// Application identity and environment
    pub app: AppConfig,
    /// CSRF, rate limiting, security headers and CORS
    pub security: SecurityConfig,
    /// Session driver and cookie settings
    pub session: SessionConfig,
    /// Cache driver settings
    pub cache: CacheConfig,
    /// Template engine settings
    pub view: ViewConfig,
    /// Authentication settings
    pub auth: AuthConfig,
    /// Response compression
    pub compression: CompressionConfig,
    /// Outbound HTTP client
    pub http_client: HttpClientConfig,
    /// WebSocket endpoint
    pub websocket: WebSocketConfig,
    /// Pagination defaults
    pub pagination: PaginationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Application name, exposed to views as `app_name`
    pub name: String,
    /// Environment name (`development`, `production`, ...)
    pub env: String,
    /// Debug mode adds request details to error responses
    pub debug: bool,
    /// Public root URL used for URL generation
    pub url: String,
    /// Base directory holding `resources/`, `storage/`, `public/`
    pub base_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Larasanic".to_string(),
            env: "development".to_string(),
            debug: false,
            url: "http://localhost:8000".to_string(),
            base_path: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    pub csrf: CsrfConfig,
    pub rate_limit: RateLimitConfig,
    pub headers: SecurityHeadersConfig,
    pub cors: CorsConfig,
}

/// CSRF double-submit cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CsrfConfig {
    pub enabled: bool,
    /// Name of the cookie carrying the random CSRF value
    pub cookie_name: String,
    /// Header clients send the token in
    pub header_name: String,
    /// Path prefixes that are never checked
    pub excluded_prefixes: Vec<String>,
    /// Also check state-changing requests on `web` routes
    pub protect_web: bool,
    /// Mark the CSRF cookie `Secure`
    pub cookie_secure: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cookie_name: "csrf_token".to_string(),
            header_name: "X-CSRF-Token".to_string(),
            excluded_prefixes: vec!["/api/auth".to_string()],
            protect_web: false,
            cookie_secure: false,
        }
    }
}

/// A request budget over a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimit {
    pub max_requests: usize,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Budget for ordinary API routes
    pub api: RateLimit,
    /// Tighter budget for authentication routes
    pub auth: RateLimit,
    /// Paths under this prefix use the `auth` budget
    pub auth_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api: RateLimit {
                max_requests: 100,
                window: Duration::from_secs(60),
            },
            auth: RateLimit {
                max_requests: 20,
                window: Duration::from_secs(60),
            },
            auth_prefix: "/api/auth".to_string(),
        }
    }
}

/// Response security headers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityHeadersConfig {
    pub x_frame_options: Option<String>,
    pub x_content_type_options: Option<String>,
    pub x_xss_protection: Option<String>,
    pub csp_enabled: bool,
    /// Custom Content-Security-Policy; the built-in policy is used when unset
    pub content_security_policy: Option<String>,
    pub hsts_enabled: bool,
    pub hsts_max_age: u64,
    pub hsts_include_subdomains: bool,
    pub hsts_preload: bool,
    pub referrer_policy: Option<String>,
    /// Custom Permissions-Policy; the restrictive built-in policy is used when unset
    pub permissions_policy: Option<String>,
    pub custom_headers: HashMap<String, String>,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            x_frame_options: Some("DENY".to_string()),
            x_content_type_options: Some("nosniff".to_string()),
            x_xss_protection: Some("1; mode=block".to_string()),
            csp_enabled: true,
            content_security_policy: None,
            hsts_enabled: false,
            hsts_max_age: 31_536_000,
            hsts_include_subdomains: true,
            hsts_preload: false,
            referrer_policy: Some("strict-origin-when-cross-origin".to_string()),
            permissions_policy: None,
            custom_headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// CORS is also switched on whenever `app.debug` is set
    pub enabled: bool,
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    /// Custom headers to expose to the browser (in addition to CORS-safelisted headers)
    pub exposed_headers: Vec<String>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: vec![CorsOrigin::Wildcard],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_headers: ["content-type", "authorization", "x-csrf-token"]
                .into_iter()
                .map(String::from)
                .collect(),
            exposed_headers: Vec::new(),
            allow_credentials: true,
            max_age: Some(3600),
        }
    }
}

/// CORS origin specification.
///
/// Either a wildcard (`*`), a pattern with a `*` in the host (`https://*.example.com`),
/// or a specific origin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard", serialize_with = "serialize_wildcard")]
    Wildcard,
    /// Origin pattern with `*` wildcards
    #[serde(deserialize_with = "parse_pattern")]
    Pattern(String),
    /// Specific origin (e.g., `https://app.example.com`)
    Exact(String),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn serialize_wildcard<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("*")
}

fn parse_pattern<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s.contains('*') && s != "*" {
        Ok(s)
    } else {
        Err(serde::de::Error::custom("Expected an origin pattern containing '*'"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Storage driver: `file`, `cookie` or `array`
    pub driver: String,
    /// Idle lifetime of a session
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
    /// Cookie carrying the session id (or payload for the cookie driver)
    pub cookie_name: String,
    pub cookie_secure: bool,
    /// SameSite attribute (`Lax`, `Strict`, `None`)
    pub same_site: String,
    /// Garbage collection odds: `[numerator, denominator]`
    pub lottery: [u32; 2],
    /// Directory for the file driver; defaults to `storage/framework/sessions`
    pub files: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: "file".to_string(),
            lifetime: Duration::from_secs(7200),
            cookie_name: "framework_session".to_string(),
            cookie_secure: false,
            same_site: "Lax".to_string(),
            lottery: [2, 100],
            files: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Storage driver: `file`, `memory` or `array`
    pub driver: String,
    /// TTL applied when `put` is called without one
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Directory for the file driver; defaults to `storage/framework/cache/data`
    pub path: Option<PathBuf>,
    /// Maximum entries held by the memory driver
    pub max_capacity: u64,
    /// How often expired entries are swept in the background
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            driver: "file".to_string(),
            ttl: Duration::from_secs(3600),
            path: None,
            max_capacity: 10_000,
            sweep_interval: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewConfig {
    /// Template directory, relative to `app.base_path` when not absolute
    pub directory: PathBuf,
    /// File extension appended to dotted view names
    pub extension: String,
    pub cache_enabled: bool,
    pub cache_max_size: u64,
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Views named `{prefix}.{status}` are used as error pages
    pub error_template_prefix: String,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("resources/views"),
            extension: ".html".to_string(),
            cache_enabled: true,
            cache_max_size: 1000,
            cache_ttl: Duration::from_secs(3600),
            error_template_prefix: "errors".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Where unauthenticated browser requests are redirected
    pub login_url: String,
    /// Where authenticated users are sent away from guest pages
    pub home_url: String,
    /// Lifetime of issued access tokens
    #[serde(with = "humantime_serde")]
    pub token_lifetime: Duration,
    /// Cookie carrying the access token
    pub cookie_name: String,
    pub cookie_secure: bool,
    /// Register the `/api/auth/*` routes
    pub routes_enabled: bool,
    /// Allow self-service registration
    pub allow_registration: bool,
    pub password: PasswordConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_url: "/login".to_string(),
            home_url: "/dashboard".to_string(),
            token_lifetime: Duration::from_secs(2_592_000),
            cookie_name: "access_token".to_string(),
            cookie_secure: false,
            routes_enabled: true,
            allow_registration: true,
            password: PasswordConfig::default(),
        }
    }
}

/// Argon2 parameters for password hashing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            argon2_memory_kib: 19456,
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Bodies smaller than this are sent uncompressed
    pub min_size: u16,
    /// gzip level, 1-9
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1024,
            level: 6,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpClientConfig {
    pub user_agent: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub max_redirects: usize,
    /// Permit requests to loopback and private network hosts
    pub allow_private: bool,
    /// Client-side request budget; unlimited when unset
    pub rate_limit: Option<RateLimit>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "LarasanicFramework/1.0".to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            allow_private: false,
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/ws".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaginationConfig {
    pub per_page: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { per_page: 20 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            secret_key: None,
            app: AppConfig::default(),
            security: SecurityConfig::default(),
            session: SessionConfig::default(),
            cache: CacheConfig::default(),
            view: ViewConfig::default(),
            auth: AuthConfig::default(),
            compression: CompressionConfig::default(),
            http_client: HttpClientConfig::default(),
            websocket: WebSocketConfig::default(),
            pagination: PaginationConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        // Load base config file
        let file = Figment::new().merge(Yaml::file(&args.config));
        // Environment variables can still override specific values
        let environment = Figment::new()
            .merge(Env::prefixed("LARASANIC_").split("__"))
            .merge(Env::raw().only(&["APP_SECRET_KEY"]).map(|_| "secret_key".into()))
            .merge(Env::raw().only(&["APP_ENV"]).map(|_| "app.env".into()));

        let base_path = file
            .clone()
            .merge(environment.clone())
            .extract_inner::<PathBuf>("app.base_path")
            .unwrap_or_else(|_| AppConfig::default().base_path);

        file.merge(dotenv_file(&base_path.join(".env"))).merge(environment)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let needs_secret = self.security.csrf.enabled || self.session.driver == "cookie" || self.auth.routes_enabled;
        match self.secret_key.as_deref() {
            None if needs_secret => {
                return Err(Error::Internal {
                    operation: "Config validation: secret_key is not configured but CSRF, cookie sessions or auth require it. \
                     Set APP_SECRET_KEY or add secret_key to the config file."
                        .to_string(),
                });
            }
            Some(secret) if secret.chars().count() < 32 => {
                return Err(Error::Internal {
                    operation: "Config validation: secret_key must be at least 32 characters".to_string(),
                });
            }
            _ => {}
        }

        if !SESSION_DRIVERS.contains(&self.session.driver.as_str()) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: unknown session driver '{}' (expected one of: {})",
                    self.session.driver,
                    SESSION_DRIVERS.join(", ")
                ),
            });
        }

        if !CACHE_DRIVERS.contains(&self.cache.driver.as_str()) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: unknown cache driver '{}' (expected one of: {})",
                    self.cache.driver,
                    CACHE_DRIVERS.join(", ")
                ),
            });
        }

        if self.session.lifetime.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: session lifetime must be positive".to_string(),
            });
        }

        let [chances, out_of] = self.session.lottery;
        if out_of == 0 || chances > out_of {
            return Err(Error::Internal {
                operation: format!("Config validation: invalid session lottery [{chances}, {out_of}]"),
            });
        }

        if self.cors_enabled() && self.security.cors.allow_credentials && self.security.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
            return Err(Error::Internal {
                operation: "Config validation: wildcard CORS origin cannot be combined with allow_credentials. \
                 List explicit origins or disable credentials."
                    .to_string(),
            });
        }

        if !(1..=9).contains(&self.compression.level) {
            return Err(Error::Internal {
                operation: format!("Config validation: compression level must be 1-9, got {}", self.compression.level),
            });
        }

        if self.app.is_production() {
            if self.app.debug {
                tracing::warn!("Debug mode is enabled in production");
            }
            if let Some(secret) = self.secret_key.as_deref()
                && PLACEHOLDER_SECRETS.iter().any(|p| secret.starts_with(p))
            {
                tracing::warn!("secret_key appears to be a placeholder value in production");
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// CORS is switched on explicitly or implicitly in debug mode
    pub fn cors_enabled(&self) -> bool {
        self.security.cors.enabled || self.app.debug
    }

    /// The configured secret, or an internal error naming the feature that needs it
    pub fn secret(&self, feature: &str) -> Result<&str, Error> {
        self.secret_key.as_deref().ok_or_else(|| Error::Internal {
            operation: format!("{feature}: secret_key is required"),
        })
    }
}

/// Config key an environment variable maps onto, if any.
fn env_key(name: &str) -> Option<String> {
    match name {
        "APP_SECRET_KEY" => Some("secret_key".to_string()),
        "APP_ENV" => Some("app.env".to_string()),
        "LARASANIC_CONFIG" => None,
        _ => name
            .strip_prefix("LARASANIC_")
            .map(|key| key.to_ascii_lowercase().replace("__", ".")),
    }
}

/// Values from a `.env` file, keyed the way the environment providers key them. A missing
/// file contributes nothing.
fn dotenv_file(path: &Path) -> Figment {
    let mut figment = Figment::new();
    let Ok(entries) = dotenvy::from_path_iter(path) else {
        return figment;
    };
    for entry in entries {
        let (name, value) = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping malformed .env line");
                continue;
            }
        };
        if let Some(key) = env_key(&name) {
            let value = match value.parse::<FigmentValue>() {
                Ok(value) => value,
                Err(never) => match never {},
            };
            figment = figment.merge(Serialized::default(&key, value));
        }
    }
    figment
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn args(file: &str) -> Args {
        Args {
            config: file.to_string(),
            validate: false,
            command: None,
        }
    }

    #[test]
    fn test_defaults_from_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", &format!("secret_key: {SECRET}\n"))?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.port, 8000);
            assert_eq!(config.session.cookie_name, "framework_session");
            assert_eq!(config.session.lifetime, Duration::from_secs(7200));
            assert_eq!(config.session.lottery, [2, 100]);
            assert_eq!(config.cache.ttl, Duration::from_secs(3600));
            assert_eq!(config.security.rate_limit.auth.max_requests, 20);
            assert_eq!(config.security.rate_limit.api.max_requests, 100);
            assert_eq!(config.http_client.user_agent, "LarasanicFramework/1.0");
            Ok(())
        });
    }

    #[test]
    fn test_dotenv_file_below_environment() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 7000\nsecret_key: from-yaml-but-long-enough-0123456789\n")?;
            jail.create_file(
                ".env",
                &format!("# local settings\nAPP_SECRET_KEY={SECRET}\nLARASANIC_PORT=9000\nLARASANIC_SESSION__DRIVER=array\nOTHER=1\n"),
            )?;

            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.secret_key.as_deref(), Some(SECRET));
            assert_eq!(config.port, 9000);
            assert_eq!(config.session.driver, "array");

            jail.set_env("LARASANIC_PORT", "8080");
            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.port, 8080);
            Ok(())
        });
    }

    #[test]
    fn test_dotenv_follows_base_path() {
        Jail::expect_with(|jail| {
            jail.create_dir("site")?;
            jail.create_file("site/.env", &format!("APP_SECRET_KEY={SECRET}\n"))?;
            jail.create_file("test.yaml", "app:\n  base_path: site\n")?;

            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.secret_key.as_deref(), Some(SECRET));
            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
session:
  driver: file
  lifetime: 30m
"#,
            )?;

            jail.set_env("LARASANIC_PORT", "8080");
            jail.set_env("LARASANIC_SESSION__DRIVER", "array");
            jail.set_env("APP_SECRET_KEY", SECRET);
            jail.set_env("APP_ENV", "staging");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.port, 8080);
            assert_eq!(config.session.driver, "array");
            assert_eq!(config.session.lifetime, Duration::from_secs(1800));
            assert_eq!(config.secret_key.as_deref(), Some(SECRET));
            assert_eq!(config.app.env, "staging");
            Ok(())
        });
    }

    #[test]
    fn test_missing_secret_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 9000\n")?;
            let result = Config::load(&args("test.yaml"));
            assert!(result.is_err());
            Ok(())
        });
    }

    #[test]
    fn test_short_secret_rejected() {
        let config = Config {
            secret_key: Some("short".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_drivers_rejected() {
        let mut config = Config {
            secret_key: Some(SECRET.to_string()),
            ..Default::default()
        };
        config.session.driver = "redis".to_string();
        assert!(config.validate().is_err());

        config.session.driver = "file".to_string();
        config.cache.driver = "memcached".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_cors_with_credentials_rejected() {
        let mut config = Config {
            secret_key: Some(SECRET.to_string()),
            ..Default::default()
        };
        config.security.cors.enabled = true;
        assert!(config.validate().is_err());

        config.security.cors.allow_credentials = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cors_origin_variants() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                &format!(
                    r#"
secret_key: {SECRET}
security:
  cors:
    enabled: true
    allow_credentials: true
    allowed_origins:
      - https://app.example.com
      - https://*.example.org
"#
                ),
            )?;
            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(
                config.security.cors.allowed_origins,
                vec![
                    CorsOrigin::Exact("https://app.example.com".to_string()),
                    CorsOrigin::Pattern("https://*.example.org".to_string()),
                ]
            );
            Ok(())
        });
    }

    #[test]
    fn test_invalid_lottery_rejected() {
        let mut config = Config {
            secret_key: Some(SECRET.to_string()),
            ..Default::default()
        };
        config.session.lottery = [5, 2];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", &format!("secret_key: {SECRET}\nnot_a_field: 1\n"))?;
            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }
}
