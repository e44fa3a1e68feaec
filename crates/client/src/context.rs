//! Shared client state
//!
//! Everything one [`crate::RelayClient`] knows lives here, behind one `Arc`.

use std::sync::Arc;

use mterelay_cache::StateStore;
use mterelay_core::Origin;
use mterelay_crypto::{EngineFactory, EnginePool};
use mterelay_settings::RelaySettings;

use crate::codec::{SessionRunner, StateLocks};
use crate::origin::OriginTable;
use crate::pairs::PairRegistry;
use crate::transport::Transport;

pub struct RelayContext {
    pub settings: RelaySettings,
    pub origins: OriginTable,
    pub pairs: PairRegistry,
    pub pool: EnginePool,
    pub store: Arc<dyn StateStore>,
    pub locks: StateLocks,
    pub transport: Arc<dyn Transport>,
}

impl RelayContext {
    pub fn new(
        settings: RelaySettings,
        factory: Arc<dyn EngineFactory>,
        store: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let pool = EnginePool::new(factory, settings.pool_size);
        Self {
            settings,
            origins: OriginTable::new(),
            pairs: PairRegistry::new(),
            pool,
            store,
            locks: StateLocks::new(),
            transport,
        }
    }

    /// Engine driver bound to this context's pool and store
    pub fn runner(&self) -> SessionRunner<'_> {
        SessionRunner::new(&self.pool, self.store.as_ref(), &self.locks)
    }

    pub fn relay_url(&self, origin: &Origin) -> String {
        format!("{}{}", origin, self.settings.relay_path)
    }

    pub fn pair_url(&self, origin: &Origin) -> String {
        format!("{}{}", origin, self.settings.pair_path)
    }
}
