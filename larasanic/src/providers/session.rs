use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use super::{Registration, ServiceProvider};
use crate::{
    Application,
    errors::Result,
    run_periodic,
    session::{SessionStore, create_store},
};

const GC_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// The session store for `session.driver`, bound as `session.store`, and a periodic GC.
#[derive(Debug, Default)]
pub struct SessionServiceProvider;

#[async_trait]
impl ServiceProvider for SessionServiceProvider {
    fn name(&self) -> &str {
        "session"
    }

    async fn register(&self, app: &mut Application) -> Result<Registration> {
        let store = create_store(app.config(), app.paths())?;
        app.container().instance("session.store", store);
        Ok(Registration::Active)
    }

    async fn boot(&self, app: &mut Application) -> Result<()> {
        let store = app.container().make::<Arc<dyn SessionStore>>("session.store")?;
        let store = (*store).clone();
        let lifetime = app.config().session.lifetime;

        app.background_services().spawn("session-gc", move |token| async move {
            run_periodic(token, GC_INTERVAL, || {
                let store = store.clone();
                async move {
                    match store.gc(lifetime).await {
                        Ok(0) => {}
                        Ok(removed) => info!(driver = store.name(), removed, "Expired sessions removed"),
                        Err(e) => warn!(driver = store.name(), error = %e, "Session GC failed"),
                    }
                }
            })
            .await;
        });
        Ok(())
    }
}
