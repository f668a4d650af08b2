use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use pkcs11_sys::{CKA_ID, CKA_VALUE, CKO_CERTIFICATE, CKO_PRIVATE_KEY};
use sign_proxy_base_hsm::{
    Attribute, HError, ObjectHandle, SigningMechanism, SlotId, TokenDriver, TokenSession,
    der_to_pem,
};
use tracing::{debug, trace, warn};

use crate::{BResult, BrokerError};

/// A session shared between the cache and the pools using its slot
pub type SharedSession = Arc<Mutex<SessionInfo>>;

/// A resolved signing key and the certificate stored with the same id.
/// An absent key is a valid, cached, answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCertEntry {
    pub key: Option<ObjectHandle>,
    pub certificate: Option<String>,
}

/// An open, logged in, session on one slot and the keys already looked up through it
pub struct SessionInfo {
    slot: SlotId,
    session: Option<Box<dyn TokenSession>>,
    use_count: u64,
    keys: HashMap<String, KeyCertEntry>,
}

impl SessionInfo {
    pub fn new(session: Box<dyn TokenSession>) -> Self {
        Self {
            slot: session.slot(),
            session: Some(session),
            use_count: 0,
            keys: HashMap::new(),
        }
    }

    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    pub const fn use_count(&self) -> u64 {
        self.use_count
    }

    pub fn bump(&mut self) {
        self.use_count += 1;
    }

    pub const fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// The native session; fails once the session has been closed
    pub fn session(&self) -> BResult<&dyn TokenSession> {
        self.session
            .as_deref()
            .ok_or_else(|| BrokerError::SessionOpen {
                slot: Some(self.slot),
                reason: "the session has been closed".to_owned(),
            })
    }

    /// Log out and close the native session, dropping the cached keys
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            debug!("closing session on slot {}", self.slot);
        }
        self.keys.clear();
    }

    /// Look the key `name` up, and its certificate when `include_cert` is set.
    ///
    /// The first answer for a name is cached for the life of the session and returned
    /// unchanged afterwards, whatever `include_cert`.
    pub fn find_key(&mut self, name: &str, include_cert: bool) -> BResult<KeyCertEntry> {
        if let Some(entry) = self.keys.get(name) {
            trace!("key {name} found in the cache of slot {}", self.slot);
            return Ok(entry.clone());
        }
        let entry = self.lookup_key(name, include_cert)?;
        self.keys.insert(name.to_owned(), entry.clone());
        Ok(entry)
    }

    fn lookup_key(&self, name: &str, include_cert: bool) -> BResult<KeyCertEntry> {
        let slot = self.slot;
        let search_error = |e: HError| BrokerError::ObjectSearch {
            slot,
            reason: e.to_string(),
        };
        let session = self.session()?;

        let keys = session
            .find_objects(&[
                Attribute::Label(name.to_owned()),
                Attribute::Class(CKO_PRIVATE_KEY),
                Attribute::KeyType(SigningMechanism::default().key_type()),
            ])
            .map_err(search_error)?;
        let Some(&key) = keys.first() else {
            debug!("no key {name} on slot {slot}");
            return Ok(KeyCertEntry {
                key: None,
                certificate: None,
            });
        };
        if !include_cert {
            return Ok(KeyCertEntry {
                key: Some(key),
                certificate: None,
            });
        }

        let Some(Some(id)) = session
            .get_attributes(key, &[CKA_ID])
            .map_err(search_error)?
            .pop()
        else {
            warn!("key {name} on slot {slot} has no id, its certificate cannot be found");
            return Ok(KeyCertEntry {
                key: Some(key),
                certificate: None,
            });
        };
        let certificates = session
            .find_objects(&[Attribute::Id(id), Attribute::Class(CKO_CERTIFICATE)])
            .map_err(search_error)?;
        let certificate = match certificates.first() {
            Some(&certificate) => session
                .get_attributes(certificate, &[CKA_VALUE])
                .map_err(search_error)?
                .pop()
                .flatten()
                .map(|der| der_to_pem(&der)),
            None => None,
        };
        debug!(
            "key {name} found on slot {slot}, with{} certificate",
            if certificate.is_some() { "" } else { "out" }
        );
        Ok(KeyCertEntry {
            key: Some(key),
            certificate,
        })
    }

    pub fn sign(
        &self,
        key: ObjectHandle,
        data: &[u8],
        mechanism: SigningMechanism,
    ) -> BResult<Vec<u8>> {
        self.session()?
            .sign(key, data, mechanism)
            .map_err(|e| BrokerError::Signing {
                slot: self.slot,
                reason: e.to_string(),
            })
    }
}

/// The open sessions of one worker, at most one per slot
#[derive(Default)]
pub struct SessionCache {
    sessions: Mutex<HashMap<SlotId, SharedSession>>,
}

impl SessionCache {
    fn lock(&self) -> BResult<MutexGuard<'_, HashMap<SlotId, SharedSession>>> {
        self.sessions
            .lock()
            .map_err(|_| BrokerError::Default("Failed to acquire lock on sessions".to_owned()))
    }

    /// The session of `slot`, opened, and logged in when a `pin` is given, on first use.
    ///
    /// An existing session is returned as is, without logging in again.
    /// A token reporting that the user is already logged in is not an error.
    pub fn open(
        &self,
        driver: &dyn TokenDriver,
        slot: SlotId,
        pin: Option<&str>,
    ) -> BResult<SharedSession> {
        let mut sessions = self.lock()?;
        if let Some(session) = sessions.get(&slot) {
            return Ok(session.clone());
        }
        let open_error = |e: HError| BrokerError::SessionOpen {
            slot: Some(slot),
            reason: e.to_string(),
        };
        let mut session = driver.open_session(slot).map_err(open_error)?;
        if let Some(pin) = pin {
            match session.login(pin) {
                Ok(()) => {}
                Err(HError::UserAlreadyLoggedIn) => {
                    warn!("user already logged in on slot {slot}, ignoring logging");
                }
                Err(e) => return Err(open_error(e)),
            }
        }
        debug!("session opened on slot {slot}");
        let session = Arc::new(Mutex::new(SessionInfo::new(session)));
        sessions.insert(slot, session.clone());
        Ok(session)
    }

    /// Close the session of `slot`, if any
    pub fn close(&self, slot: SlotId) -> BResult<()> {
        let removed = self.lock()?.remove(&slot);
        if let Some(session) = removed {
            close_shared(&session);
        }
        Ok(())
    }

    /// Close `session` and forget it, unless the cache already holds another session for its slot
    pub fn discard(&self, session: &SharedSession) -> BResult<()> {
        let slot = {
            let mut info = session
                .lock()
                .map_err(|_| BrokerError::Default("Failed to acquire lock on session".to_owned()))?;
            info.close();
            info.slot()
        };
        let mut sessions = self.lock()?;
        if sessions
            .get(&slot)
            .is_some_and(|cached| Arc::ptr_eq(cached, session))
        {
            sessions.remove(&slot);
        }
        Ok(())
    }

    /// Close every session
    pub fn clear(&self) -> BResult<()> {
        let sessions: Vec<SharedSession> = self.lock()?.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            close_shared(session);
        }
        Ok(())
    }

    pub fn contains(&self, slot: SlotId) -> BResult<bool> {
        Ok(self.lock()?.contains_key(&slot))
    }

    pub fn len(&self) -> BResult<usize> {
        Ok(self.lock()?.len())
    }
}

fn close_shared(session: &SharedSession) {
    match session.lock() {
        Ok(mut info) => info.close(),
        Err(_) => warn!("a session lock is poisoned, the session is left to its last owner"),
    }
}

#[cfg(test)]
mod tests {
    use sign_proxy_base_hsm::{
        SigningMechanism, TokenDriver,
        test_helpers::{SoftSlot, SoftToken, TEST_CERTIFICATE_DER},
    };

    use super::{SessionCache, SessionInfo};
    use crate::{BResult, BrokerError};

    #[test]
    fn sessions_are_opened_once_per_slot() -> BResult<()> {
        let token = SoftToken::test_token().with_pin("1234");
        let cache = SessionCache::default();
        let first = cache.open(&token, 0, Some("1234"))?;
        let second = cache.open(&token, 0, Some("1234"))?;
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        let stats = token.stats();
        assert_eq!(stats.opened_sessions, 1);
        assert_eq!(stats.logins, 1);
        assert!(cache.contains(0)?);

        cache.close(0)?;
        cache.close(0)?;
        assert!(!cache.contains(0)?);
        assert_eq!(token.stats().closed_sessions, 1);
        assert!(!first.lock().unwrap().is_open());
        Ok(())
    }

    #[test]
    fn login_failures_fail_the_open() -> BResult<()> {
        let token = SoftToken::new(vec![
            SoftSlot::new(0, "a"),
            SoftSlot::new(1, "b").already_logged_in(),
        ])
        .with_pin("1234");
        let cache = SessionCache::default();
        assert!(matches!(
            cache.open(&token, 0, Some("0000")),
            Err(BrokerError::SessionOpen { slot: Some(0), .. })
        ));
        assert!(!cache.contains(0)?);
        // the partially opened session is closed
        assert!(token.live_sessions().is_empty());

        // already logged in is fine
        cache.open(&token, 1, Some("1234"))?;
        assert!(cache.contains(1)?);
        Ok(())
    }

    #[test]
    fn discarding_a_stale_session_keeps_the_live_one() -> BResult<()> {
        let token = SoftToken::test_token();
        let cache = SessionCache::default();
        let stale = cache.open(&token, 0, None)?;
        cache.close(0)?;
        let live = cache.open(&token, 0, None)?;
        cache.discard(&stale)?;
        assert!(cache.contains(0)?);
        assert!(live.lock().unwrap().is_open());
        cache.discard(&live)?;
        assert!(!cache.contains(0)?);
        assert!(token.live_sessions().is_empty());
        Ok(())
    }

    #[test]
    fn keys_and_certificates_are_cached() -> BResult<()> {
        let token = SoftToken::test_token();
        let mut info = SessionInfo::new(token.open_session(0)?);
        let first = info.find_key("test", true)?;
        let searches = token.stats().object_searches;
        let second = info.find_key("test", true)?;
        assert_eq!(first, second);
        assert_eq!(token.stats().object_searches, searches);

        assert!(first.key.is_some());
        let pem = first.certificate.unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
        let der = pem::parse(pem).unwrap();
        assert_eq!(der.contents(), TEST_CERTIFICATE_DER);
        Ok(())
    }

    #[test]
    fn a_single_search_resolves_a_key_without_certificate() -> BResult<()> {
        let token = SoftToken::test_token();
        let mut info = SessionInfo::new(token.open_session(0)?);
        let entry = info.find_key("test", false)?;
        assert!(entry.key.is_some());
        assert_eq!(entry.certificate, None);
        assert_eq!(token.stats().object_searches, 1);
        // the first answer sticks
        assert_eq!(info.find_key("test", true)?, entry);
        assert_eq!(token.stats().object_searches, 1);
        Ok(())
    }

    #[test]
    fn missing_keys_and_certificates_are_cached_too() -> BResult<()> {
        let token = SoftToken::new(vec![
            SoftSlot::new(0, "test")
                .with_key("nocert", b"\x02")
                .with_ec_key("ec", b"\x03"),
        ]);
        let mut info = SessionInfo::new(token.open_session(0)?);
        let missing = info.find_key("missing", true)?;
        assert_eq!(missing.key, None);
        assert_eq!(missing.certificate, None);
        info.find_key("missing", true)?;
        assert_eq!(token.stats().object_searches, 1);

        let nocert = info.find_key("nocert", true)?;
        assert!(nocert.key.is_some());
        assert_eq!(nocert.certificate, None);

        // only RSA keys are signing keys
        assert_eq!(info.find_key("ec", true)?.key, None);
        Ok(())
    }

    #[test]
    fn transport_failures_are_object_search_errors() -> BResult<()> {
        let token = SoftToken::test_token();
        token.fail_find_objects(|_| true);
        let mut info = SessionInfo::new(token.open_session(0)?);
        let err = info.find_key("test", true).unwrap_err();
        assert!(matches!(err, BrokerError::ObjectSearch { slot: 0, .. }));
        assert!(err.is_retryable());

        // nothing was cached
        token.clear_faults();
        assert!(info.find_key("test", true)?.key.is_some());
        Ok(())
    }

    #[test]
    fn closed_sessions_refuse_to_work() -> BResult<()> {
        let token = SoftToken::test_token();
        let mut info = SessionInfo::new(token.open_session(0)?);
        let key = info.find_key("test", false)?.key.unwrap();
        assert!(!info.sign(key, b"data", SigningMechanism::RSAPKCS1)?.is_empty());
        info.close();
        assert!(matches!(
            info.sign(key, b"data", SigningMechanism::RSAPKCS1),
            Err(BrokerError::SessionOpen { .. })
        ));
        assert!(token.live_sessions().is_empty());
        Ok(())
    }
}
