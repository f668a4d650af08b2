use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rand::seq::IndexedRandom;
use sign_proxy_base_hsm::{SlotId, TokenDriver};
use tracing::{debug, info, warn};

use crate::{
    BResult, BrokerError,
    object_pool::{ObjectPool, PoolManager},
    params::Backoff,
    session_cache::{SessionCache, SessionInfo, SharedSession},
    slot_resolver::resolve_label,
};

pub type SessionPool = ObjectPool<SessionManager>;

/// A session checked out of a [`SessionPool`]
pub struct PooledSession {
    slot: SlotId,
    session: SharedSession,
}

impl PooledSession {
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn lock(&self) -> BResult<MutexGuard<'_, SessionInfo>> {
        self.session
            .lock()
            .map_err(|_| BrokerError::Default("Failed to acquire lock on session".to_owned()))
    }

    pub const fn shared(&self) -> &SharedSession {
        &self.session
    }
}

/// Builds the sessions of the pool of one label, spreading them over the slots presenting it
pub struct SessionManager {
    label: String,
    driver: Arc<dyn TokenDriver>,
    sessions: Arc<SessionCache>,
    pin: Option<String>,
    max_open_attempts: usize,
    backoff: Backoff,
    /// slots with a session in this pool
    pooled: Mutex<HashSet<SlotId>>,
}

impl SessionManager {
    pub fn new(
        label: &str,
        driver: Arc<dyn TokenDriver>,
        sessions: Arc<SessionCache>,
        pin: Option<String>,
        max_open_attempts: usize,
        backoff: Backoff,
    ) -> Self {
        Self {
            label: label.to_owned(),
            driver,
            sessions,
            pin,
            max_open_attempts,
            backoff,
            pooled: Mutex::new(HashSet::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn pooled(&self) -> MutexGuard<'_, HashSet<SlotId>> {
        self.pooled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The slots presenting the label right now, without a session in this pool,
    /// and not failed yet during this creation
    fn candidates(&self, failed: &HashSet<SlotId>) -> BResult<Vec<SlotId>> {
        let slots = resolve_label(&self.label, self.driver.as_ref())?;
        let pooled = self.pooled();
        Ok(slots
            .into_iter()
            .filter(|slot| !pooled.contains(slot) && !failed.contains(slot))
            .collect())
    }
}

impl PoolManager for SessionManager {
    type Error = BrokerError;
    type Resource = PooledSession;

    fn create(&self) -> BResult<PooledSession> {
        let max_attempts = self.max_open_attempts.max(1);
        let mut failed = HashSet::new();
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            let candidates = match self.candidates(&failed) {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(
                        "label {}: attempt {attempt} failed resolving slots: {e}",
                        self.label
                    );
                    last_error = Some(BrokerError::SessionOpen {
                        slot: None,
                        reason: e.to_string(),
                    });
                    if attempt < max_attempts {
                        self.backoff.sleep();
                    }
                    continue;
                }
            };
            let Some(&slot) = candidates.choose(&mut rand::rng()) else {
                debug!("label {}: no candidate slot left", self.label);
                break;
            };
            match self
                .sessions
                .open(self.driver.as_ref(), slot, self.pin.as_deref())
            {
                Ok(session) => {
                    self.pooled().insert(slot);
                    info!("label {}: session ready on slot {slot}", self.label);
                    return Ok(PooledSession { slot, session });
                }
                Err(e) => {
                    warn!(
                        "label {}: attempt {attempt} to open a session on slot {slot} failed: {e}",
                        self.label
                    );
                    self.sessions.close(slot)?;
                    failed.insert(slot);
                    last_error = Some(e);
                    if attempt < max_attempts {
                        self.backoff.sleep();
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| BrokerError::SessionOpen {
            slot: None,
            reason: format!("no free slot presents the label {}", self.label),
        }))
    }

    fn destroy(&self, resource: PooledSession) {
        debug!(
            "label {}: discarding the session of slot {}",
            self.label, resource.slot
        );
        self.pooled().remove(&resource.slot);
        if let Err(e) = self.sessions.discard(&resource.session) {
            warn!(
                "label {}: failed discarding the session of slot {}: {e}",
                self.label, resource.slot
            );
        }
    }

    fn bump(&self, resource: &PooledSession) {
        resource
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .bump();
    }

    fn priority(&self, resource: &PooledSession) -> u64 {
        resource
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .use_count()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use sign_proxy_base_hsm::test_helpers::{SoftSlot, SoftToken};

    use super::{SessionManager, SessionPool};
    use crate::{BResult, BrokerError, params::Backoff, session_cache::SessionCache};

    fn pool(token: &SoftToken, label: &str, size: usize) -> (SessionPool, Arc<SessionCache>) {
        let sessions = Arc::new(SessionCache::default());
        let manager = SessionManager::new(
            label,
            Arc::new(token.clone()),
            sessions.clone(),
            None,
            3,
            Backoff::none(),
        );
        (SessionPool::new(manager, size), sessions)
    }

    #[test]
    fn sessions_are_spread_over_the_mirrored_slots() -> BResult<()> {
        let token = SoftToken::mirrored("mirror", 3);
        let (pool, sessions) = pool(&token, "mirror", 3);
        let a = pool.alloc()?;
        let b = pool.alloc()?;
        let c = pool.alloc()?;
        let slots: HashSet<_> = [a.slot(), b.slot(), c.slot()].into_iter().collect();
        assert_eq!(slots.len(), 3);
        assert_eq!(sessions.len()?, 3);
        for session in [a, b, c] {
            pool.free(session);
        }
        assert_eq!(token.stats().opened_sessions, 3);
        Ok(())
    }

    #[test]
    fn an_invalidated_session_is_replaced_by_a_fresh_one() -> BResult<()> {
        let token = SoftToken::test_token();
        let (pool, sessions) = pool(&token, "test", 1);
        let first = pool.alloc()?;
        let stale = first.shared().clone();
        pool.invalidate(first);
        assert!(!sessions.contains(0)?);
        assert!(!stale.lock().unwrap().is_open());
        assert!(token.live_sessions().is_empty());

        let second = pool.alloc()?;
        assert_eq!(second.slot(), 0);
        assert!(!Arc::ptr_eq(&stale, second.shared()));
        assert_eq!(token.stats().opened_sessions, 2);
        pool.free(second);
        Ok(())
    }

    #[test]
    fn failing_slots_are_skipped() -> BResult<()> {
        let token = SoftToken::mirrored("mirror", 2);
        token.fail_open_session(|slot| slot == 0);
        let (pool, _) = pool(&token, "mirror", 2);
        // slot 0 never opens: the pool runs with the session of slot 1 only
        for _ in 0..10 {
            let session = pool.alloc()?;
            assert_eq!(session.slot(), 1);
            pool.free(session);
        }
        assert_eq!(pool.size(), 1);
        Ok(())
    }

    #[test]
    fn open_attempts_are_bounded() {
        let token = SoftToken::mirrored("mirror", 5);
        token.fail_open_session(|_| true);
        let (pool, _) = pool(&token, "mirror", 1);
        assert!(matches!(
            pool.alloc(),
            Err(BrokerError::SessionOpen { slot: Some(_), .. })
        ));
        // each attempt tried another slot
        assert_eq!(token.stats().failed_opens, 3);
    }

    #[test]
    fn a_label_without_slots_cannot_open_sessions() {
        let token = SoftToken::new(vec![SoftSlot::new(0, "other")]);
        let (pool, _) = pool(&token, "missing", 1);
        assert!(matches!(
            pool.alloc(),
            Err(BrokerError::SessionOpen { slot: None, .. })
        ));
        assert_eq!(token.stats().opened_sessions, 0);
    }

    #[test]
    fn use_counts_grow_with_each_return() -> BResult<()> {
        let token = SoftToken::test_token();
        let (pool, _) = pool(&token, "test", 1);
        for _ in 0..4 {
            let _allocation = pool.allocation()?;
        }
        let allocation = pool.allocation()?;
        assert_eq!(allocation.lock()?.use_count(), 4);
        Ok(())
    }
}
