use std::ptr;

use libloading::Library;
use pkcs11_sys::{
    CK_C_CloseSession, CK_C_FindObjects, CK_C_FindObjectsFinal, CK_C_FindObjectsInit,
    CK_C_GetAttributeValue, CK_C_GetInfo, CK_C_GetMechanismList, CK_C_GetSessionInfo,
    CK_C_GetSlotInfo, CK_C_GetSlotList, CK_C_GetTokenInfo, CK_C_INITIALIZE_ARGS, CK_C_Initialize,
    CK_C_Login, CK_C_Logout, CK_C_OpenSession, CK_C_Sign, CK_C_SignInit, CKF_OS_LOCKING_OK,
    CKR_CRYPTOKI_ALREADY_INITIALIZED, CKR_OK,
};
use tracing::{debug, warn};

use crate::{HError, HResult};

/// The PKCS#11 entry points used by the proxy, resolved from a module loaded with `libloading`.
///
/// The module is initialised once, when loaded. It is never finalised:
/// `C_Finalize` is process wide and would invalidate the sessions of every other
/// worker holding the same module.
pub(crate) struct HsmLib {
    path: String,
    pub(crate) C_Initialize: CK_C_Initialize,
    pub(crate) C_GetInfo: CK_C_GetInfo,

    pub(crate) C_GetSlotList: CK_C_GetSlotList,
    pub(crate) C_GetSlotInfo: CK_C_GetSlotInfo,
    pub(crate) C_GetTokenInfo: CK_C_GetTokenInfo,
    pub(crate) C_GetMechanismList: CK_C_GetMechanismList,

    pub(crate) C_OpenSession: CK_C_OpenSession,
    pub(crate) C_CloseSession: CK_C_CloseSession,
    pub(crate) C_GetSessionInfo: CK_C_GetSessionInfo,

    pub(crate) C_Login: CK_C_Login,
    pub(crate) C_Logout: CK_C_Logout,

    pub(crate) C_FindObjectsInit: CK_C_FindObjectsInit,
    pub(crate) C_FindObjects: CK_C_FindObjects,
    pub(crate) C_FindObjectsFinal: CK_C_FindObjectsFinal,

    pub(crate) C_GetAttributeValue: CK_C_GetAttributeValue,

    pub(crate) C_SignInit: CK_C_SignInit,
    pub(crate) C_Sign: CK_C_Sign,

    // must outlive the function pointers above
    _library: Library,
}

impl HsmLib {
    pub(crate) fn instantiate(path: &str) -> HResult<Self> {
        debug!("loading PKCS#11 library {path}");
        #[allow(unsafe_code)]
        let hsm_lib = unsafe {
            let library = Library::new(path)?;
            Self {
                path: path.to_owned(),
                C_Initialize: Some(*library.get(b"C_Initialize")?),
                C_GetInfo: Some(*library.get(b"C_GetInfo")?),
                C_GetSlotList: Some(*library.get(b"C_GetSlotList")?),
                C_GetSlotInfo: Some(*library.get(b"C_GetSlotInfo")?),
                C_GetTokenInfo: Some(*library.get(b"C_GetTokenInfo")?),
                C_GetMechanismList: Some(*library.get(b"C_GetMechanismList")?),
                C_OpenSession: Some(*library.get(b"C_OpenSession")?),
                C_CloseSession: Some(*library.get(b"C_CloseSession")?),
                C_GetSessionInfo: Some(*library.get(b"C_GetSessionInfo")?),
                C_Login: Some(*library.get(b"C_Login")?),
                C_Logout: Some(*library.get(b"C_Logout")?),
                C_FindObjectsInit: Some(*library.get(b"C_FindObjectsInit")?),
                C_FindObjects: Some(*library.get(b"C_FindObjects")?),
                C_FindObjectsFinal: Some(*library.get(b"C_FindObjectsFinal")?),
                C_GetAttributeValue: Some(*library.get(b"C_GetAttributeValue")?),
                C_SignInit: Some(*library.get(b"C_SignInit")?),
                C_Sign: Some(*library.get(b"C_Sign")?),
                _library: library,
            }
        };
        hsm_lib.initialize()?;
        Ok(hsm_lib)
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    fn initialize(&self) -> HResult<()> {
        let mut init_args = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: CKF_OS_LOCKING_OK,
            pReserved: ptr::null_mut(),
        };
        let rv = hsm_rv!(
            self,
            C_Initialize,
            (&raw mut init_args).cast::<std::ffi::c_void>()
        );
        match rv {
            CKR_OK => Ok(()),
            // another worker of this process already initialised the module
            CKR_CRYPTOKI_ALREADY_INITIALIZED => {
                warn!("PKCS#11 library {} already initialized", self.path);
                Ok(())
            }
            rv => Err(HError::Pkcs11 {
                function: "C_Initialize",
                rv,
            }),
        }
    }
}
