//! Bounded pool of unbound engine handles
//!
//! Creating a handle can be expensive (the real engine loads a module and
//! allocates DRBG state), so handles are reused across calls. A handle is
//! always uninstantiated before it goes back into the pool, and the pool
//! never holds more than `max_size` idle handles per (role, mode).

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use mterelay_core::{Mode, Role};
use parking_lot::Mutex;
use tracing::debug;

use crate::engine::{EngineFactory, SessionEngine};

/// Default number of idle handles kept per (role, mode)
pub const DEFAULT_POOL_SIZE: usize = 5;

pub struct EnginePool {
    factory: Arc<dyn EngineFactory>,
    max_size: usize,
    idle: Mutex<HashMap<(Role, Mode), Vec<Box<dyn SessionEngine>>>>,
}

impl EnginePool {
    pub fn new(factory: Arc<dyn EngineFactory>, max_size: usize) -> Self {
        Self {
            factory,
            max_size,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// The factory handles and keypairs come from
    pub fn factory(&self) -> &Arc<dyn EngineFactory> {
        &self.factory
    }

    /// Take an idle handle, or create one if none is available
    pub fn acquire(&self, role: Role, mode: Mode) -> PooledEngine<'_> {
        let reused = self
            .idle
            .lock()
            .get_mut(&(role, mode))
            .and_then(Vec::pop);

        let engine = reused.unwrap_or_else(|| {
            debug!("Creating new {} handle ({:?})", role, mode);
            self.factory.create(role, mode)
        });

        PooledEngine {
            engine: Some(engine),
            pool: self,
        }
    }

    /// Return a handle, dropping it when the pool is full
    fn release(&self, mut engine: Box<dyn SessionEngine>) {
        engine.uninstantiate();
        let mut idle = self.idle.lock();
        let slot = idle.entry((engine.role(), engine.mode())).or_default();
        if slot.len() < self.max_size {
            slot.push(engine);
        }
    }

    /// Number of idle handles for a (role, mode)
    pub fn idle_count(&self, role: Role, mode: Mode) -> usize {
        self.idle
            .lock()
            .get(&(role, mode))
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

/// Handle checked out of an [`EnginePool`], returned on drop
pub struct PooledEngine<'a> {
    engine: Option<Box<dyn SessionEngine>>,
    pool: &'a EnginePool,
}

impl Deref for PooledEngine<'_> {
    type Target = dyn SessionEngine;

    fn deref(&self) -> &Self::Target {
        // Only `drop` takes the engine out
        match &self.engine {
            Some(engine) => engine.as_ref(),
            None => unreachable!("pooled engine used after release"),
        }
    }
}

impl DerefMut for PooledEngine<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.engine {
            Some(engine) => engine.as_mut(),
            None => unreachable!("pooled engine used after release"),
        }
    }
}

impl Drop for PooledEngine<'_> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.release(engine);
        }
    }
}
