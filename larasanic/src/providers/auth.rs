use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::{Registration, ServiceProvider};
use crate::{
    Application,
    auth::{AuthService, InMemoryUserProvider, UserProvider, handlers},
    cache::{ArrayCacheStore, Cache},
    errors::Result,
    run_periodic,
};

/// The auth service and, when `auth.routes_enabled` is set, the `/api/auth` routes.
///
/// Users come from the provider given to [`AuthServiceProvider::with_users`], else from an
/// `Arc<dyn UserProvider>` bound as `auth.users`, else an in-memory store.
#[derive(Default)]
pub struct AuthServiceProvider {
    users: Option<Arc<dyn UserProvider>>,
}

impl AuthServiceProvider {
    pub fn with_users(users: Arc<dyn UserProvider>) -> Self {
        Self { users: Some(users) }
    }
}

impl std::fmt::Debug for AuthServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServiceProvider")
            .field("custom_users", &self.users.is_some())
            .finish()
    }
}

#[async_trait]
impl ServiceProvider for AuthServiceProvider {
    fn name(&self) -> &str {
        "auth"
    }

    async fn register(&self, app: &mut Application) -> Result<Registration> {
        let config = app.config().clone();
        let secret = match config.secret("sign access tokens") {
            Ok(secret) => secret,
            Err(e) if config.auth.routes_enabled => return Err(e),
            Err(_) => {
                warn!("No secret_key configured; authentication is disabled");
                return Ok(Registration::Skipped);
            }
        };

        let users = match &self.users {
            Some(users) => users.clone(),
            None => match app.container().try_make::<Arc<dyn UserProvider>>("auth.users") {
                Some(users) => (*users).clone(),
                None => Arc::new(InMemoryUserProvider::new()),
            },
        };

        let mut service = AuthService::new(users, config.auth.clone(), secret);
        match app.state().cache.clone() {
            // The memory store is bounded and may evict revocations before they expire
            Some(cache) if cache.store().name() == "memory" => {
                let denylist = Cache::new(Arc::new(ArrayCacheStore::new(config.cache.ttl)));
                app.container().instance("auth.denylist", denylist.clone());
                service = service.with_denylist(denylist);
            }
            Some(cache) => service = service.with_denylist(cache),
            None => warn!("No cache registered; logged out tokens stay valid until they expire"),
        }

        let service = Arc::new(service);
        app.container().instance_arc("auth", service.clone());
        app.state_mut().auth = Some(service);
        Ok(Registration::Active)
    }

    async fn boot(&self, app: &mut Application) -> Result<()> {
        let auth = &app.config().auth;
        if auth.routes_enabled {
            let allow_registration = auth.allow_registration;
            handlers::register_routes(app.router_mut(), allow_registration);
        }

        let interval = app.config().cache.sweep_interval;
        if let Some(denylist) = app.container().try_make::<Cache>("auth.denylist")
            && !interval.is_zero()
        {
            app.background_services().spawn("auth-denylist-sweep", move |token| async move {
                run_periodic(token, interval, || {
                    let denylist = denylist.clone();
                    async move {
                        if let Err(e) = denylist.purge_expired().await {
                            warn!(error = %e, "Revoked token sweep failed");
                        }
                    }
                })
                .await;
            });
        }
        Ok(())
    }
}
