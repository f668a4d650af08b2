use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use sign_proxy_base_hsm::{DriverLoader, TokenDriver};
use tracing::{debug, info};

use crate::{BResult, BrokerError};

/// The modules loaded by one worker, by path.
/// A module is loaded, and initialised, at most once per registry.
pub struct ModuleRegistry {
    loader: Arc<dyn DriverLoader>,
    modules: Mutex<HashMap<String, Arc<dyn TokenDriver>>>,
}

impl ModuleRegistry {
    pub fn new(loader: Arc<dyn DriverLoader>) -> Self {
        Self {
            loader,
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &str) -> BResult<Arc<dyn TokenDriver>> {
        let mut modules = self
            .modules
            .lock()
            .map_err(|_| BrokerError::Default("Failed to acquire lock on modules".to_owned()))?;
        if let Some(driver) = modules.get(path) {
            return Ok(driver.clone());
        }
        debug!("loading library {path}");
        let driver = self
            .loader
            .load(path)
            .map_err(|e| BrokerError::DriverLoad {
                path: path.to_owned(),
                reason: e.to_string(),
            })?;
        info!("library {path} loaded");
        modules.insert(path.to_owned(), driver.clone());
        Ok(driver)
    }

    /// Forget every loaded module
    pub fn clear(&self) -> BResult<()> {
        self.modules
            .lock()
            .map_err(|_| BrokerError::Default("Failed to acquire lock on modules".to_owned()))?
            .clear();
        Ok(())
    }
}
