//! Copyright 2024 Cosmian Tech SAS
//!
//! The session broker of the signing proxy.
//!
//! A [`WorkerContext`] owns, for one worker, the loaded module, the open sessions
//! (at most one per slot) and one session pool per token label. Signing requests
//! check a session out of the pool of their label, look the key up through the key
//! cache of the session and sign, failing over to a fresh session when the hardware
//! misbehaves.

mod context;
mod error;
pub mod introspection;
mod module_registry;
mod object_pool;
mod params;
mod session_cache;
mod session_pool;
mod signer;
mod slot_resolver;

#[cfg(test)]
mod tests;

pub use context::WorkerContext;
pub use error::{BResult, BrokerError};
pub use module_registry::ModuleRegistry;
pub use object_pool::{Allocation, ObjectPool, PoolManager};
pub use params::{
    Backoff, BrokerParams, DEFAULT_BACKOFF_MAX, DEFAULT_BACKOFF_MIN, DEFAULT_MAX_OPEN_ATTEMPTS,
    DEFAULT_MAX_RETRY,
};
pub use session_cache::{KeyCertEntry, SessionCache, SessionInfo, SharedSession};
pub use session_pool::{PooledSession, SessionManager, SessionPool};
pub use signer::{SignRequest, SignResponse};
pub use slot_resolver::resolve_label;
