//! The token driver seam.
//!
//! The broker only talks to a security module through these traits. The native
//! implementation lives in [`crate::Pkcs11Driver`]; tests use the in-memory soft token.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_INFO, CK_MECHANISM_TYPE, CK_OBJECT_HANDLE, CK_SESSION_INFO, CK_SLOT_ID,
    CK_SLOT_INFO, CK_TOKEN_INFO, CK_VERSION,
};
use serde::Serialize;

use crate::{HResult, SigningMechanism, attribute::Attribute};

pub type SlotId = CK_SLOT_ID;
pub type ObjectHandle = CK_OBJECT_HANDLE;

/// Loads a token driver from a module path.
pub trait DriverLoader: Send + Sync {
    /// Load and initialise the module found at `path`
    fn load(&self, path: &str) -> HResult<Arc<dyn TokenDriver>>;
}

/// A loaded and initialised security module.
pub trait TokenDriver: Send + Sync {
    /// The path the module was loaded from
    fn path(&self) -> &str;

    fn library_info(&self) -> HResult<LibraryInfo>;

    /// All the slots of the module, with or without a token, in enumeration order
    fn slot_list(&self) -> HResult<Vec<SlotId>>;

    fn slot_info(&self, slot: SlotId) -> HResult<SlotInfo>;

    fn token_info(&self, slot: SlotId) -> HResult<TokenInfo>;

    fn mechanism_list(&self, slot: SlotId) -> HResult<Vec<CK_MECHANISM_TYPE>>;

    /// Open a serial, read-only session on `slot`
    fn open_session(&self, slot: SlotId) -> HResult<Box<dyn TokenSession>>;
}

/// An open session on one slot.
///
/// Dropping the session logs out (when logged in) and closes it.
pub trait TokenSession: Send + Sync {
    fn slot(&self) -> SlotId;

    /// Log the normal user in.
    ///
    /// # Errors
    /// `HError::UserAlreadyLoggedIn` when the token reports an existing login
    fn login(&mut self, pin: &str) -> HResult<()>;

    fn session_info(&self) -> HResult<SessionDetails>;

    /// The handles of all the objects matching `template`
    fn find_objects(&self, template: &[Attribute]) -> HResult<Vec<ObjectHandle>>;

    /// The raw values of the requested attributes, in request order.
    /// An attribute which is sensitive or not defined for the object is `None`.
    fn get_attributes(
        &self,
        object: ObjectHandle,
        attributes: &[CK_ATTRIBUTE_TYPE],
    ) -> HResult<Vec<Option<Vec<u8>>>>;

    fn sign(
        &self,
        key: ObjectHandle,
        data: &[u8],
        mechanism: SigningMechanism,
    ) -> HResult<Vec<u8>>;
}

/// PKCS#11 text fields are blank padded and may or may not be NUL terminated
pub(crate) fn padded_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_owned()
}

fn version(v: CK_VERSION) -> String {
    format!("{}.{}", v.major, v.minor)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LibraryInfo {
    pub cryptoki_version: String,
    pub manufacturer_id: String,
    pub flags: u64,
    pub library_description: String,
    pub library_version: String,
}

impl From<CK_INFO> for LibraryInfo {
    fn from(info: CK_INFO) -> Self {
        Self {
            cryptoki_version: version(info.cryptokiVersion),
            manufacturer_id: padded_string(&info.manufacturerID),
            flags: u64::from(info.flags),
            library_description: padded_string(&info.libraryDescription),
            library_version: version(info.libraryVersion),
        }
    }
}

impl Display for LibraryInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cryptoki Version: {}\nManufacturer ID: {}\nFlags: {}\nLibrary Description: \
             {}\nLibrary Version: {}",
            self.cryptoki_version,
            self.manufacturer_id,
            self.flags,
            self.library_description,
            self.library_version
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub slot_description: String,
    pub manufacturer_id: String,
    pub flags: u64,
    pub hardware_version: String,
    pub firmware_version: String,
}

impl From<CK_SLOT_INFO> for SlotInfo {
    fn from(info: CK_SLOT_INFO) -> Self {
        Self {
            slot_description: padded_string(&info.slotDescription),
            manufacturer_id: padded_string(&info.manufacturerID),
            flags: u64::from(info.flags),
            hardware_version: version(info.hardwareVersion),
            firmware_version: version(info.firmwareVersion),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub label: String,
    pub manufacturer_id: String,
    pub model: String,
    pub serial_number: String,
    pub flags: u64,
    pub max_session_count: u64,
    pub session_count: u64,
    pub max_rw_session_count: u64,
    pub rw_session_count: u64,
    pub max_pin_len: u64,
    pub min_pin_len: u64,
    pub hardware_version: String,
    pub firmware_version: String,
}

impl From<CK_TOKEN_INFO> for TokenInfo {
    fn from(info: CK_TOKEN_INFO) -> Self {
        Self {
            label: padded_string(&info.label),
            manufacturer_id: padded_string(&info.manufacturerID),
            model: padded_string(&info.model),
            serial_number: padded_string(&info.serialNumber),
            flags: u64::from(info.flags),
            max_session_count: u64::from(info.ulMaxSessionCount),
            session_count: u64::from(info.ulSessionCount),
            max_rw_session_count: u64::from(info.ulMaxRwSessionCount),
            rw_session_count: u64::from(info.ulRwSessionCount),
            max_pin_len: u64::from(info.ulMaxPinLen),
            min_pin_len: u64::from(info.ulMinPinLen),
            hardware_version: version(info.hardwareVersion),
            firmware_version: version(info.firmwareVersion),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionDetails {
    pub slot_id: u64,
    pub state: String,
    pub flags: u64,
    pub device_error: u64,
}

impl From<CK_SESSION_INFO> for SessionDetails {
    fn from(info: CK_SESSION_INFO) -> Self {
        use pkcs11_sys::{
            CKS_RO_PUBLIC_SESSION, CKS_RO_USER_FUNCTIONS, CKS_RW_PUBLIC_SESSION,
            CKS_RW_SO_FUNCTIONS, CKS_RW_USER_FUNCTIONS,
        };
        let state = match info.state {
            CKS_RO_PUBLIC_SESSION => "CKS_RO_PUBLIC_SESSION".to_owned(),
            CKS_RO_USER_FUNCTIONS => "CKS_RO_USER_FUNCTIONS".to_owned(),
            CKS_RW_PUBLIC_SESSION => "CKS_RW_PUBLIC_SESSION".to_owned(),
            CKS_RW_USER_FUNCTIONS => "CKS_RW_USER_FUNCTIONS".to_owned(),
            CKS_RW_SO_FUNCTIONS => "CKS_RW_SO_FUNCTIONS".to_owned(),
            other => format!("0x{other:X}"),
        };
        Self {
            slot_id: u64::from(info.slotID),
            state,
            flags: u64::from(info.flags),
            device_error: u64::from(info.ulDeviceError),
        }
    }
}

#[cfg(test)]
mod tests {
    use pkcs11_sys::{CK_INFO, CK_TOKEN_INFO, CK_VERSION};

    use super::{LibraryInfo, TokenInfo, padded_string};

    fn field<const N: usize>(text: &str) -> [u8; N] {
        let mut out = [b' '; N];
        out[..text.len()].copy_from_slice(text.as_bytes());
        out
    }

    #[test]
    fn blank_padded_fields_are_trimmed() {
        assert_eq!(padded_string(b"test    "), "test");
        assert_eq!(padded_string(b"test\0garbage"), "test");
        assert_eq!(padded_string(b"   "), "");
    }

    #[test]
    fn token_info_is_decoded() {
        let info = CK_TOKEN_INFO {
            label: field("mirror"),
            model: field("SoftHSM v2"),
            hardwareVersion: CK_VERSION { major: 2, minor: 6 },
            ulMaxPinLen: 255,
            ..CK_TOKEN_INFO::default()
        };
        let info = TokenInfo::from(info);
        assert_eq!(info.label, "mirror");
        assert_eq!(info.model, "SoftHSM v2");
        assert_eq!(info.hardware_version, "2.6");
        assert_eq!(info.max_pin_len, 255);
    }

    #[test]
    fn library_info_is_decoded() {
        let info = LibraryInfo::from(CK_INFO {
            cryptokiVersion: CK_VERSION { major: 2, minor: 40 },
            manufacturerID: field("SoftHSM"),
            libraryDescription: field("Implementation of PKCS11"),
            ..CK_INFO::default()
        });
        assert_eq!(info.cryptoki_version, "2.40");
        assert_eq!(info.manufacturer_id, "SoftHSM");
        assert!(info.to_string().contains("Library Description: Implementation of PKCS11"));
    }
}
