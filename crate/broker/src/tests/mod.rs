use std::sync::Arc;

use sign_proxy_base_hsm::test_helpers::{SOFT_TOKEN_PATH, SoftToken};
use sign_proxy_logger::log_init;

use crate::{Backoff, BrokerParams, WorkerContext};

mod failover;
mod signing;

/// A context on the soft token, retrying without delay
fn soft_context(token: &SoftToken, max_retry: usize) -> WorkerContext {
    log_init(option_env!("RUST_LOG"));
    let mut params = BrokerParams::new(SOFT_TOKEN_PATH);
    params.max_retry = max_retry;
    params.backoff = Backoff::none();
    WorkerContext::new(params, Arc::new(token.loader()))
}
