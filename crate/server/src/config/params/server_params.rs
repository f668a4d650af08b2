use std::{fmt, time::Duration};

use sign_proxy_broker::{Backoff, BrokerParams};

use crate::{config::ClapConfig, error::ServerError, sign_proxy_ensure};

/// This structure is the context used by the server
/// while it is running. Every worker builds its broker from a copy of it.
#[derive(Clone)]
pub struct ServerParams {
    pub hostname: String,

    pub port: u16,

    /// The number of HTTP workers; the `actix-web` default when not set
    pub workers: Option<usize>,

    /// The module, PIN and retry policy handed to the broker of every worker
    pub broker: BrokerParams,
}

impl TryFrom<ClapConfig> for ServerParams {
    type Error = ServerError;

    fn try_from(conf: ClapConfig) -> Result<Self, Self::Error> {
        let module_path = conf
            .hsm
            .pkcs11_module
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| {
                ServerError::ConfigurationError(
                    "the path of the PKCS#11 module is required (--pkcs11-module)".to_owned(),
                )
            })?;
        sign_proxy_ensure!(
            conf.retry.max_retry > 0,
            "the maximum number of attempts must be at least 1"
        );
        sign_proxy_ensure!(
            conf.retry.max_open_attempts > 0,
            "the maximum number of session opening attempts must be at least 1"
        );
        sign_proxy_ensure!(
            conf.retry.backoff_min_ms <= conf.retry.backoff_max_ms,
            "the minimum backoff ({} ms) exceeds the maximum backoff ({} ms)",
            conf.retry.backoff_min_ms,
            conf.retry.backoff_max_ms
        );
        sign_proxy_ensure!(
            conf.http.workers != Some(0),
            "the number of workers must be at least 1"
        );

        let mut broker = BrokerParams::new(&module_path);
        broker.pin = conf.hsm.pkcs11_pin;
        broker.max_retry = conf.retry.max_retry;
        broker.max_open_attempts = conf.retry.max_open_attempts;
        broker.backoff = Backoff {
            min: Duration::from_millis(conf.retry.backoff_min_ms),
            max: Duration::from_millis(conf.retry.backoff_max_ms),
        };

        Ok(Self {
            hostname: conf.http.hostname,
            port: conf.http.port,
            workers: conf.http.workers,
            broker,
        })
    }
}

impl fmt::Debug for ServerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("")
            .field(
                "sign_proxy_url",
                &format!("http://{}:{}", self.hostname, self.port),
            )
            .field("workers", &self.workers)
            .field("broker", &self.broker)
            .finish()
    }
}
