use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{HsmConfig, HttpConfig, LoggingConfig, RetryConfig};
use crate::result::{SResult, SResultHelper};

/// The environment variable naming the configuration file
pub const SIGN_PROXY_CONF_ENV: &str = "SIGN_PROXY_CONF";
/// The configuration file used when present and no other is named
pub const DEFAULT_SIGN_PROXY_CONF: &str = "/etc/sign_proxy/sign_proxy.toml";

#[derive(Parser, Default, Serialize, Deserialize)]
#[clap(version, about, long_about = None)]
#[serde(default)]
pub struct ClapConfig {
    #[clap(flatten)]
    pub http: HttpConfig,

    #[clap(flatten)]
    pub hsm: HsmConfig,

    #[clap(flatten)]
    pub retry: RetryConfig,

    #[clap(flatten)]
    pub logging: LoggingConfig,
}

impl ClapConfig {
    /// Load the configuration from the file named by `SIGN_PROXY_CONF`,
    /// or from [`DEFAULT_SIGN_PROXY_CONF`] when it exists.
    /// The command line is parsed when there is no configuration file.
    ///
    /// # Errors
    /// Fails when the configuration file cannot be read or parsed
    pub fn load_from_file() -> SResult<Self> {
        let conf_path = std::env::var(SIGN_PROXY_CONF_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                let default_path = PathBuf::from(DEFAULT_SIGN_PROXY_CONF);
                default_path.exists().then_some(default_path)
            });
        match conf_path {
            Some(conf_path) => {
                info!(
                    "Configuration file {} found, the command line arguments are ignored",
                    conf_path.display()
                );
                Self::from_toml_file(&conf_path)
            }
            None => Ok(Self::parse()),
        }
    }

    /// Parse a TOML configuration file. Missing sections and fields take their default value.
    ///
    /// # Errors
    /// Fails when the file cannot be read or is not a valid configuration
    pub fn from_toml_file(path: &Path) -> SResult<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read the configuration file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid configuration file {}", path.display()))
    }
}

impl fmt::Debug for ClapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("")
            .field("sign proxy http", &self.http)
            .field("hsm", &self.hsm)
            .field("retry", &self.retry)
            .field("logging", &self.logging)
            .finish()
    }
}
