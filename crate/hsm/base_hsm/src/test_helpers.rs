//! An in-memory token driver with scriptable faults and call counters.
//!
//! The soft token exposes slots carrying a token label and a set of objects.
//! Private keys sign by echoing a deterministic signature; faults are closures
//! deciding, per slot, whether the next call fails.
#![allow(clippy::missing_panics_doc)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_KEY_TYPE, CK_MECHANISM_TYPE, CK_RV, CK_ULONG, CKA_CERTIFICATE_TYPE,
    CKA_CLASS, CKA_ID, CKA_KEY_TYPE, CKA_LABEL, CKA_MODULUS_BITS, CKA_PRIVATE, CKA_SENSITIVE,
    CKA_SIGN, CKA_TOKEN, CKA_VALUE, CKC_X_509, CKF_TOKEN_INITIALIZED, CKF_TOKEN_PRESENT, CKK_EC,
    CKK_RSA, CKM_RSA_PKCS, CKM_RSA_X_509, CKM_SHA256_RSA_PKCS, CKO_CERTIFICATE, CKO_PRIVATE_KEY,
    CKR_DEVICE_ERROR, CKR_KEY_HANDLE_INVALID, CKR_OBJECT_HANDLE_INVALID, CKR_PIN_INCORRECT,
    CKR_SESSION_HANDLE_INVALID, CKR_SLOT_ID_INVALID, CKF_SERIAL_SESSION, CKR_TOKEN_NOT_PRESENT,
};

use crate::{
    Attribute, DriverLoader, HError, HResult, LibraryInfo, ObjectHandle, SessionDetails,
    SigningMechanism, SlotId, SlotInfo, TokenDriver, TokenInfo, TokenSession,
};

pub const SOFT_TOKEN_PATH: &str = "soft-token.so";

/// Decides whether a call on the given slot fails
pub type Fault = Arc<dyn Fn(SlotId) -> bool + Send + Sync>;

struct SoftObject {
    handle: ObjectHandle,
    attributes: HashMap<CK_ATTRIBUTE_TYPE, Vec<u8>>,
}

impl SoftObject {
    fn matches(&self, template: &[Attribute]) -> bool {
        template.iter().all(|attribute| {
            self.attributes.get(&attribute.attribute_type()) == Some(&attribute.value())
        })
    }
}

/// A slot of the soft token and the objects stored on its token
pub struct SoftSlot {
    id: SlotId,
    label: String,
    token_present: bool,
    already_logged_in: bool,
    objects: Vec<Vec<(CK_ATTRIBUTE_TYPE, Vec<u8>)>>,
}

impl SoftSlot {
    #[must_use]
    pub fn new(id: SlotId, label: &str) -> Self {
        Self {
            id,
            label: label.to_owned(),
            token_present: true,
            already_logged_in: false,
            objects: Vec::new(),
        }
    }

    /// A slot without a token: token info and mechanisms cannot be read
    #[must_use]
    pub fn without_token(mut self) -> Self {
        self.token_present = false;
        self
    }

    /// Logins on this slot report that the user is already logged in
    #[must_use]
    pub fn already_logged_in(mut self) -> Self {
        self.already_logged_in = true;
        self
    }

    /// An RSA private key with the given label and id
    #[must_use]
    pub fn with_key(self, label: &str, id: &[u8]) -> Self {
        self.with_private_key(label, id, CKK_RSA)
    }

    /// An EC private key, which RSA mechanisms cannot use
    #[must_use]
    pub fn with_ec_key(self, label: &str, id: &[u8]) -> Self {
        self.with_private_key(label, id, CKK_EC)
    }

    fn with_private_key(mut self, label: &str, id: &[u8], key_type: CK_KEY_TYPE) -> Self {
        self.objects.push(vec![
            (CKA_CLASS, CKO_PRIVATE_KEY.to_ne_bytes().to_vec()),
            (CKA_KEY_TYPE, key_type.to_ne_bytes().to_vec()),
            (CKA_LABEL, label.as_bytes().to_vec()),
            (CKA_ID, id.to_vec()),
            (CKA_TOKEN, vec![1]),
            (CKA_PRIVATE, vec![1]),
            (CKA_SENSITIVE, vec![1]),
            (CKA_SIGN, vec![1]),
            (CKA_MODULUS_BITS, CK_ULONG::from(2048_u32).to_ne_bytes().to_vec()),
        ]);
        self
    }

    /// An X.509 certificate with the given id and DER value
    #[must_use]
    pub fn with_certificate(mut self, label: &str, id: &[u8], der: &[u8]) -> Self {
        self.objects.push(vec![
            (CKA_CLASS, CKO_CERTIFICATE.to_ne_bytes().to_vec()),
            (CKA_CERTIFICATE_TYPE, CKC_X_509.to_ne_bytes().to_vec()),
            (CKA_LABEL, label.as_bytes().to_vec()),
            (CKA_ID, id.to_vec()),
            (CKA_TOKEN, vec![1]),
            (CKA_PRIVATE, vec![0]),
            (CKA_VALUE, der.to_vec()),
        ]);
        self
    }
}

#[derive(Default)]
struct Faults {
    // number of upcoming `slot_list` calls that fail
    slot_list: usize,
    open_session: Option<Fault>,
    find_objects: Option<Fault>,
    get_attributes: Option<Arc<dyn Fn(ObjectHandle) -> bool + Send + Sync>>,
    sign: Option<Fault>,
}

/// Call counters of a soft token
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SoftTokenStats {
    pub loads: usize,
    pub opened_sessions: usize,
    pub failed_opens: usize,
    pub closed_sessions: usize,
    pub logins: usize,
    pub object_searches: usize,
    pub signatures: HashMap<SlotId, usize>,
    pub failed_signatures: usize,
}

impl SoftTokenStats {
    #[must_use]
    pub fn signatures_on(&self, slot: SlotId) -> usize {
        self.signatures.get(&slot).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn total_signatures(&self) -> usize {
        self.signatures.values().sum()
    }
}

struct SlotState {
    id: SlotId,
    label: String,
    token_present: bool,
    already_logged_in: bool,
    objects: Vec<SoftObject>,
}

#[derive(Default)]
struct State {
    slots: Vec<SlotState>,
    pin: Option<String>,
    next_session: u64,
    live_sessions: HashMap<u64, SlotId>,
    faults: Faults,
    stats: SoftTokenStats,
}

impl State {
    fn slot(&self, slot: SlotId) -> HResult<&SlotState> {
        self.slots
            .iter()
            .find(|s| s.id == slot)
            .ok_or(HError::Pkcs11 {
                function: "C_GetSlotInfo",
                rv: CKR_SLOT_ID_INVALID,
            })
    }

    fn check_live(&self, handle: u64, function: &'static str) -> HResult<()> {
        if self.live_sessions.contains_key(&handle) {
            Ok(())
        } else {
            Err(HError::Pkcs11 {
                function,
                rv: CKR_SESSION_HANDLE_INVALID,
            })
        }
    }
}

/// The in-memory token driver.
/// Clones share the same token, so a test keeps a handle on the counters
/// after handing the driver to the code under test.
#[derive(Clone, Default)]
pub struct SoftToken {
    state: Arc<Mutex<State>>,
}

fn fails(fault: Option<&Fault>, slot: SlotId) -> bool {
    fault.is_some_and(|fault| fault(slot))
}

fn device_error(function: &'static str) -> HError {
    HError::Pkcs11 {
        function,
        rv: CKR_DEVICE_ERROR,
    }
}

impl SoftToken {
    #[must_use]
    pub fn new(slots: Vec<SoftSlot>) -> Self {
        let mut next_handle: ObjectHandle = 1;
        let slots = slots
            .into_iter()
            .map(|slot| SlotState {
                id: slot.id,
                label: slot.label,
                token_present: slot.token_present,
                already_logged_in: slot.already_logged_in,
                objects: slot
                    .objects
                    .into_iter()
                    .map(|attributes| {
                        let handle = next_handle;
                        next_handle += 1;
                        SoftObject {
                            handle,
                            attributes: attributes.into_iter().collect(),
                        }
                    })
                    .collect(),
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(State {
                slots,
                next_session: 1,
                ..State::default()
            })),
        }
    }

    /// A token with one slot `0` labelled `test`, holding the `test` key and its certificate
    #[must_use]
    pub fn test_token() -> Self {
        Self::new(vec![
            SoftSlot::new(0, "test")
                .with_key("test", b"\x01")
                .with_certificate("test", b"\x01", TEST_CERTIFICATE_DER),
        ])
    }

    /// `count` slots labelled `label`, each with the `test` key and its certificate
    #[must_use]
    pub fn mirrored(label: &str, count: SlotId) -> Self {
        Self::new(
            (0..count)
                .map(|id| {
                    SoftSlot::new(id, label)
                        .with_key("test", b"\x01")
                        .with_certificate("test", b"\x01", TEST_CERTIFICATE_DER)
                })
                .collect(),
        )
    }

    /// Require `pin` on login
    #[must_use]
    pub fn with_pin(self, pin: &str) -> Self {
        self.lock().pin = Some(pin.to_owned());
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_open_session(&self, fault: impl Fn(SlotId) -> bool + Send + Sync + 'static) {
        self.lock().faults.open_session = Some(Arc::new(fault));
    }

    pub fn fail_find_objects(&self, fault: impl Fn(SlotId) -> bool + Send + Sync + 'static) {
        self.lock().faults.find_objects = Some(Arc::new(fault));
    }

    /// Fail the next `times` slot enumerations
    pub fn fail_slot_list(&self, times: usize) {
        self.lock().faults.slot_list = times;
    }

    /// Fail attribute reads of the objects selected by `fault`
    pub fn fail_get_attributes(
        &self,
        fault: impl Fn(ObjectHandle) -> bool + Send + Sync + 'static,
    ) {
        self.lock().faults.get_attributes = Some(Arc::new(fault));
    }

    pub fn fail_sign(&self, fault: impl Fn(SlotId) -> bool + Send + Sync + 'static) {
        self.lock().faults.sign = Some(Arc::new(fault));
    }

    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }

    /// Invalidate every open session, as a device reset would
    pub fn drop_all_sessions(&self) {
        self.lock().live_sessions.clear();
    }

    #[must_use]
    pub fn stats(&self) -> SoftTokenStats {
        self.lock().stats.clone()
    }

    /// Number of sessions currently open, per slot
    #[must_use]
    pub fn live_sessions(&self) -> HashMap<SlotId, usize> {
        let mut live = HashMap::new();
        for slot in self.lock().live_sessions.values() {
            *live.entry(*slot).or_insert(0) += 1;
        }
        live
    }

    /// A loader handing out this token for [`SOFT_TOKEN_PATH`]
    #[must_use]
    pub fn loader(&self) -> SoftLoader {
        SoftLoader {
            token: self.clone(),
        }
    }
}

impl TokenDriver for SoftToken {
    fn path(&self) -> &str {
        SOFT_TOKEN_PATH
    }

    fn library_info(&self) -> HResult<LibraryInfo> {
        Ok(LibraryInfo {
            cryptoki_version: "2.40".to_owned(),
            manufacturer_id: "Soft Token".to_owned(),
            flags: 0,
            library_description: "In-memory token".to_owned(),
            library_version: "1.0".to_owned(),
        })
    }

    fn slot_list(&self) -> HResult<Vec<SlotId>> {
        let mut state = self.lock();
        if state.faults.slot_list > 0 {
            state.faults.slot_list -= 1;
            return Err(device_error("C_GetSlotList"));
        }
        Ok(state.slots.iter().map(|s| s.id).collect())
    }

    fn slot_info(&self, slot: SlotId) -> HResult<SlotInfo> {
        let state = self.lock();
        let slot = state.slot(slot)?;
        Ok(SlotInfo {
            slot_description: format!("Soft slot {}", slot.id),
            manufacturer_id: "Soft Token".to_owned(),
            flags: if slot.token_present {
                u64::from(CKF_TOKEN_PRESENT)
            } else {
                0
            },
            hardware_version: "1.0".to_owned(),
            firmware_version: "1.0".to_owned(),
        })
    }

    fn token_info(&self, slot: SlotId) -> HResult<TokenInfo> {
        let state = self.lock();
        let slot = state.slot(slot)?;
        if !slot.token_present {
            return Err(HError::Pkcs11 {
                function: "C_GetTokenInfo",
                rv: CKR_TOKEN_NOT_PRESENT,
            });
        }
        // labels are blank padded on real tokens
        Ok(TokenInfo {
            label: format!("{:<32}", slot.label),
            manufacturer_id: "Soft Token".to_owned(),
            model: "Soft".to_owned(),
            serial_number: format!("{:016}", slot.id),
            flags: u64::from(CKF_TOKEN_INITIALIZED),
            ..TokenInfo::default()
        })
    }

    fn mechanism_list(&self, slot: SlotId) -> HResult<Vec<CK_MECHANISM_TYPE>> {
        let state = self.lock();
        if !state.slot(slot)?.token_present {
            return Err(HError::Pkcs11 {
                function: "C_GetMechanismList",
                rv: CKR_TOKEN_NOT_PRESENT,
            });
        }
        Ok(vec![CKM_RSA_PKCS, CKM_RSA_X_509, CKM_SHA256_RSA_PKCS])
    }

    fn open_session(&self, slot: SlotId) -> HResult<Box<dyn TokenSession>> {
        let mut state = self.lock();
        state.slot(slot)?;
        if fails(state.faults.open_session.as_ref(), slot) {
            state.stats.failed_opens += 1;
            return Err(device_error("C_OpenSession"));
        }
        let handle = state.next_session;
        state.next_session += 1;
        state.live_sessions.insert(handle, slot);
        state.stats.opened_sessions += 1;
        Ok(Box::new(SoftSession {
            token: self.clone(),
            slot,
            handle,
            logged_in: false,
        }))
    }
}

/// Hands out a [`SoftToken`] for [`SOFT_TOKEN_PATH`]; every other path fails to load
#[derive(Clone)]
pub struct SoftLoader {
    token: SoftToken,
}

impl DriverLoader for SoftLoader {
    fn load(&self, path: &str) -> HResult<Arc<dyn TokenDriver>> {
        if path != SOFT_TOKEN_PATH {
            return Err(HError::Default(format!("{path}: cannot open shared object file")));
        }
        self.token.lock().stats.loads += 1;
        Ok(Arc::new(self.token.clone()))
    }
}

struct SoftSession {
    token: SoftToken,
    slot: SlotId,
    handle: u64,
    logged_in: bool,
}

impl SoftSession {
    fn pkcs11_error(function: &'static str, rv: CK_RV) -> HError {
        HError::Pkcs11 { function, rv }
    }
}

impl TokenSession for SoftSession {
    fn slot(&self) -> SlotId {
        self.slot
    }

    fn login(&mut self, pin: &str) -> HResult<()> {
        let mut state = self.token.lock();
        state.check_live(self.handle, "C_Login")?;
        if state.slot(self.slot)?.already_logged_in {
            return Err(HError::UserAlreadyLoggedIn);
        }
        if state.pin.as_deref().is_some_and(|expected| expected != pin) {
            return Err(Self::pkcs11_error("C_Login", CKR_PIN_INCORRECT));
        }
        state.stats.logins += 1;
        self.logged_in = true;
        Ok(())
    }

    fn session_info(&self) -> HResult<SessionDetails> {
        let state = self.token.lock();
        state.check_live(self.handle, "C_GetSessionInfo")?;
        Ok(SessionDetails {
            slot_id: u64::from(self.slot),
            state: if self.logged_in {
                "CKS_RO_USER_FUNCTIONS".to_owned()
            } else {
                "CKS_RO_PUBLIC_SESSION".to_owned()
            },
            flags: u64::from(CKF_SERIAL_SESSION),
            device_error: 0,
        })
    }

    fn find_objects(&self, template: &[Attribute]) -> HResult<Vec<ObjectHandle>> {
        let mut state = self.token.lock();
        state.check_live(self.handle, "C_FindObjectsInit")?;
        state.stats.object_searches += 1;
        if fails(state.faults.find_objects.as_ref(), self.slot) {
            return Err(device_error("C_FindObjects"));
        }
        Ok(state
            .slot(self.slot)?
            .objects
            .iter()
            .filter(|object| object.matches(template))
            .map(|object| object.handle)
            .collect())
    }

    fn get_attributes(
        &self,
        object: ObjectHandle,
        attributes: &[CK_ATTRIBUTE_TYPE],
    ) -> HResult<Vec<Option<Vec<u8>>>> {
        let state = self.token.lock();
        state.check_live(self.handle, "C_GetAttributeValue")?;
        if state
            .faults
            .get_attributes
            .as_ref()
            .is_some_and(|fault| fault(object))
        {
            return Err(device_error("C_GetAttributeValue"));
        }
        let object = state
            .slot(self.slot)?
            .objects
            .iter()
            .find(|o| o.handle == object)
            .ok_or_else(|| Self::pkcs11_error("C_GetAttributeValue", CKR_OBJECT_HANDLE_INVALID))?;
        Ok(attributes
            .iter()
            .map(|attribute| object.attributes.get(attribute).cloned())
            .collect())
    }

    fn sign(
        &self,
        key: ObjectHandle,
        data: &[u8],
        mechanism: SigningMechanism,
    ) -> HResult<Vec<u8>> {
        let mut state = self.token.lock();
        state.check_live(self.handle, "C_SignInit")?;
        if fails(state.faults.sign.as_ref(), self.slot) {
            state.stats.failed_signatures += 1;
            return Err(device_error("C_Sign"));
        }
        let label = state
            .slot(self.slot)?
            .objects
            .iter()
            .find(|o| {
                o.handle == key
                    && o.attributes.get(&CKA_CLASS)
                        == Some(&CKO_PRIVATE_KEY.to_ne_bytes().to_vec())
            })
            .and_then(|o| o.attributes.get(&CKA_LABEL).cloned())
            .ok_or_else(|| Self::pkcs11_error("C_SignInit", CKR_KEY_HANDLE_INVALID))?;
        *state.stats.signatures.entry(self.slot).or_insert(0) += 1;
        let mut signature = format!(
            "{mechanism}/{}/{}/",
            self.slot,
            String::from_utf8_lossy(&label)
        )
        .into_bytes();
        signature.extend_from_slice(data);
        Ok(signature)
    }
}

impl Drop for SoftSession {
    fn drop(&mut self) {
        let mut state = self.token.lock();
        if state.live_sessions.remove(&self.handle).is_some() {
            state.stats.closed_sessions += 1;
        }
    }
}

/// A self-signed test certificate, DER encoded
pub const TEST_CERTIFICATE_DER: &[u8] = &[
    0x30, 0x82, 0x01, 0x0a, 0x30, 0x81, 0xb5, 0xa0, 0x03, 0x02, 0x01, 0x02, 0x02, 0x01, 0x01,
    0x30, 0x0d, 0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b, 0x05, 0x00,
    0x30, 0x0f, 0x31, 0x0d, 0x30, 0x0b, 0x06, 0x03, 0x55, 0x04, 0x03, 0x0c, 0x04, 0x74, 0x65,
    0x73, 0x74,
];

/// The user PIN of the HSM used by the ignored integration tests
pub fn get_hsm_password() -> HResult<String> {
    let user_password = option_env!("HSM_USER_PASSWORD")
        .ok_or_else(|| {
            HError::Default(
                "The user password for the HSM is not set. Please set the HSM_USER_PASSWORD \
                 environment variable"
                    .to_owned(),
            )
        })?
        .to_owned();
    Ok(user_password)
}
