use clap::Args;
use serde::{Deserialize, Serialize};
use sign_proxy_broker::{
    DEFAULT_BACKOFF_MAX, DEFAULT_BACKOFF_MIN, DEFAULT_MAX_OPEN_ATTEMPTS, DEFAULT_MAX_RETRY,
};

#[allow(clippy::cast_possible_truncation)]
const DEFAULT_BACKOFF_MIN_MS: u64 = DEFAULT_BACKOFF_MIN.as_millis() as u64;
#[allow(clippy::cast_possible_truncation)]
const DEFAULT_BACKOFF_MAX_MS: u64 = DEFAULT_BACKOFF_MAX.as_millis() as u64;

#[derive(Args, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// The number of attempts of a signature before giving up.
    /// Every attempt runs on a fresh session when the previous one failed
    #[clap(verbatim_doc_comment, long, env = "SIGN_PROXY_MAX_RETRY", default_value_t = DEFAULT_MAX_RETRY)]
    pub max_retry: usize,

    /// The number of session opening attempts within one signature attempt
    #[clap(long, env = "SIGN_PROXY_MAX_OPEN_ATTEMPTS", default_value_t = DEFAULT_MAX_OPEN_ATTEMPTS)]
    pub max_open_attempts: usize,

    /// The lower bound of the random delay between two attempts, in milliseconds
    #[clap(long, env = "SIGN_PROXY_BACKOFF_MIN_MS", default_value_t = DEFAULT_BACKOFF_MIN_MS)]
    pub backoff_min_ms: u64,

    /// The upper bound of the random delay between two attempts, in milliseconds
    #[clap(long, env = "SIGN_PROXY_BACKOFF_MAX_MS", default_value_t = DEFAULT_BACKOFF_MAX_MS)]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            max_open_attempts: DEFAULT_MAX_OPEN_ATTEMPTS,
            backoff_min_ms: DEFAULT_BACKOFF_MIN_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}
