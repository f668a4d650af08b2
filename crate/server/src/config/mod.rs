mod command_line;
mod params;

pub use command_line::{
    ClapConfig, DEFAULT_SIGN_PROXY_CONF, HsmConfig, HttpConfig, LoggingConfig, RetryConfig,
    SIGN_PROXY_CONF_ENV,
};
pub use params::ServerParams;
