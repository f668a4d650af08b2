use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use sign_proxy_base_hsm::{DriverLoader, TokenDriver};
use tracing::{debug, info};

use crate::{
    BResult, BrokerError,
    module_registry::ModuleRegistry,
    params::BrokerParams,
    session_cache::SessionCache,
    session_pool::{SessionManager, SessionPool},
    slot_resolver::resolve_label,
};

/// Everything one worker owns: its loaded modules, its sessions and its pools.
///
/// Nothing in a context is shared with another context; a server builds one per worker.
pub struct WorkerContext {
    params: BrokerParams,
    modules: ModuleRegistry,
    sessions: Arc<SessionCache>,
    pools: Mutex<HashMap<String, Arc<SessionPool>>>,
}

impl WorkerContext {
    pub fn new(params: BrokerParams, loader: Arc<dyn DriverLoader>) -> Self {
        Self {
            params,
            modules: ModuleRegistry::new(loader),
            sessions: Arc::new(SessionCache::default()),
            pools: Mutex::new(HashMap::new()),
        }
    }

    pub const fn params(&self) -> &BrokerParams {
        &self.params
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// The module of this context, loaded on first use
    pub fn driver(&self) -> BResult<Arc<dyn TokenDriver>> {
        self.modules.get(&self.params.module_path)
    }

    fn pools(&self) -> BResult<MutexGuard<'_, HashMap<String, Arc<SessionPool>>>> {
        self.pools
            .lock()
            .map_err(|_| BrokerError::Default("Failed to acquire lock on pools".to_owned()))
    }

    /// The session pool of `label`.
    ///
    /// The pool is created on first use, sized to the number of slots presenting the label
    /// at that time.
    pub fn pool(&self, label: &str) -> BResult<Arc<SessionPool>> {
        let mut pools = self.pools()?;
        if let Some(pool) = pools.get(label) {
            return Ok(pool.clone());
        }
        let driver = self.driver()?;
        // an enumeration failure is a token failure, retried like a failed session open
        let slots = resolve_label(label, driver.as_ref()).map_err(|e| match e {
            BrokerError::Driver(e) => BrokerError::SessionOpen {
                slot: None,
                reason: e.to_string(),
            },
            e => e,
        })?;
        if slots.is_empty() {
            return Err(BrokerError::NoSlotForLabel(label.to_owned()));
        }
        info!(
            "creating the session pool of label {label} with {} slots",
            slots.len()
        );
        let manager = SessionManager::new(
            label,
            driver,
            self.sessions.clone(),
            self.params.pin.clone(),
            self.params.max_open_attempts,
            self.params.backoff,
        );
        let pool = Arc::new(SessionPool::new(manager, slots.len()));
        pools.insert(label.to_owned(), pool.clone());
        Ok(pool)
    }

    /// Drop every pool, close every session and forget the loaded modules
    pub fn reset(&self) -> BResult<()> {
        debug!("resetting the worker context");
        self.pools()?.clear();
        self.sessions.clear()?;
        self.modules.clear()
    }
}
