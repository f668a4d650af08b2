mod clap_config;
mod hsm_config;
mod http_config;
mod logging;
mod retry_config;

pub use clap_config::{ClapConfig, DEFAULT_SIGN_PROXY_CONF, SIGN_PROXY_CONF_ENV};
pub use hsm_config::HsmConfig;
pub use http_config::HttpConfig;
pub use logging::LoggingConfig;
pub use retry_config::RetryConfig;
