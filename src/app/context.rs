use std::{sync::Arc, time::Duration};

use crate::{config::Config, enrichment::EnrichmentService};

use super::{
    backend::RemoteIndex, dispatcher::QueryDispatcher, reconciler::Reconciler, state::SyncStore,
};

/// Shared handles every entry point builds its services from.
pub struct AppContext {
    config: Config,
    store: SyncStore,
    remote: Arc<dyn RemoteIndex>,
    enrichment: Arc<dyn EnrichmentService>,
}

impl AppContext {
    pub fn new(
        config: Config,
        store: SyncStore,
        remote: Arc<dyn RemoteIndex>,
        enrichment: Arc<dyn EnrichmentService>,
    ) -> Self {
        Self {
            config,
            store,
            remote,
            enrichment,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    /// A fresh reconciler. Each one is its own sync session.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.remote.clone(),
            self.enrichment.clone(),
            Duration::from_millis(self.config.sync.inter_record_delay_ms),
        )
    }

    pub fn dispatcher(&self) -> QueryDispatcher {
        QueryDispatcher::new(
            self.enrichment.clone(),
            self.remote.clone(),
            self.config.search.match_count,
        )
    }
}
