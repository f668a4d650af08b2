use std::fmt::Display;

use clap::Args;
use serde::{Deserialize, Serialize};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_HOSTNAME: &str = "0.0.0.0";

#[derive(Args, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// The signing proxy port
    #[clap(long, env = "SIGN_PROXY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The signing proxy hostname
    #[clap(long, env = "SIGN_PROXY_HOSTNAME", default_value = DEFAULT_HOSTNAME)]
    pub hostname: String,

    /// The number of HTTP workers.
    /// Each worker loads the PKCS#11 module and opens its own sessions.
    /// Defaults to the number of physical CPU cores
    #[clap(long, env = "SIGN_PROXY_WORKERS", verbatim_doc_comment)]
    pub workers: Option<usize>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            hostname: DEFAULT_HOSTNAME.to_owned(),
            workers: None,
        }
    }
}

impl Display for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "http://{}:{}", self.hostname, self.port)?;
        if let Some(workers) = self.workers {
            write!(f, ", {workers} workers")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}", &self))
    }
}
