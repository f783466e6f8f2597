use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Registration, ServiceProvider};
use crate::{Application, cache::CacheManager, errors::Result, run_periodic};

/// The cache manager and the default store, plus a sweep of expired entries.
#[derive(Debug, Default)]
pub struct CacheServiceProvider;

#[async_trait]
impl ServiceProvider for CacheServiceProvider {
    fn name(&self) -> &str {
        "cache"
    }

    async fn register(&self, app: &mut Application) -> Result<Registration> {
        let manager = Arc::new(CacheManager::new(app.config().cache.clone(), app.paths().cache_data()));
        let cache = manager.cache()?;

        app.container().instance_arc("cache.manager", manager);
        app.container().instance("cache", cache.clone());
        app.state_mut().cache = Some(cache);
        Ok(Registration::Active)
    }

    async fn boot(&self, app: &mut Application) -> Result<()> {
        let Some(cache) = app.state().cache.clone() else {
            return Ok(());
        };
        let interval = app.config().cache.sweep_interval;
        if interval.is_zero() {
            return Ok(());
        }

        app.background_services().spawn("cache-sweep", move |token| async move {
            run_periodic(token, interval, || {
                let cache = cache.clone();
                async move {
                    match cache.purge_expired().await {
                        Ok(removed) => debug!(removed, "Purged expired cache entries"),
                        Err(e) => warn!(error = %e, "Cache sweep failed"),
                    }
                }
            })
            .await;
        });
        Ok(())
    }
}
