//! Builders shared by the unit tests.

use axum_test::TestServer;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;

use crate::{
    AppState, Application, Container,
    auth::{AuthService, InMemoryUserProvider},
    cache::{Cache, array::ArrayCacheStore},
    config::{AuthConfig, Config, PasswordConfig},
    providers::default_providers,
    routing::UrlGenerator,
    support::ConfigRepository,
};

pub const TEST_SECRET: &str = "test-secret-key-0123456789abcdef-0123456789";

pub fn test_config() -> Config {
    let mut config = Config {
        secret_key: Some(TEST_SECRET.to_string()),
        ..Default::default()
    };
    config.app.debug = false;
    config.auth.password = fast_password_config();
    config
}

/// Config rooted at a temporary base path, with array drivers so nothing touches disk
/// outside it.
pub fn test_config_in(dir: &TempDir) -> Config {
    let mut config = test_config();
    config.app.base_path = dir.path().to_path_buf();
    config.session.driver = "array".to_string();
    config.cache.driver = "array".to_string();
    config
}

fn fast_password_config() -> PasswordConfig {
    PasswordConfig {
        argon2_memory_kib: 1024,
        argon2_iterations: 1,
        argon2_parallelism: 1,
    }
}

pub fn test_state() -> AppState {
    let config = test_config();
    let settings = Arc::new(ConfigRepository::from_config(&config));
    let url = Arc::new(UrlGenerator::new(&config.app.url, config.secret_key.clone()));
    AppState::builder()
        .config(Arc::new(config))
        .container(Arc::new(Container::new()))
        .settings(settings)
        .url(url)
        .build()
}

/// Auth service with cheap hashing and an in-memory revocation list.
pub fn test_auth_service() -> Arc<AuthService> {
    let config = AuthConfig {
        password: fast_password_config(),
        ..Default::default()
    };
    let denylist = Cache::new(Arc::new(ArrayCacheStore::new(Duration::from_secs(3600))));
    Arc::new(AuthService::new(Arc::new(InMemoryUserProvider::new()), config, TEST_SECRET).with_denylist(denylist))
}

/// Application with the default providers registered, not yet booted.
pub async fn test_application(dir: &TempDir) -> Application {
    let mut app = Application::new(test_config_in(dir));
    for provider in default_providers() {
        app.register_boxed(provider).await.expect("Failed to register provider");
    }
    app
}

pub async fn test_server(app: &mut Application) -> TestServer {
    let router = app.into_router().await.expect("Failed to compile router");
    TestServer::new(router).expect("Failed to create test server")
}
