//! The native token driver: a PKCS#11 module loaded with `libloading`.

use std::{ptr, sync::Arc};

use pkcs11_sys::{
    CK_FALSE, CK_INFO, CK_MECHANISM_TYPE, CK_SLOT_ID, CK_SLOT_INFO, CK_TOKEN_INFO, CK_ULONG,
};
use tracing::{debug, info};

pub use self::session::Pkcs11Session;
use crate::{
    HResult,
    driver::{DriverLoader, LibraryInfo, SlotId, SlotInfo, TokenDriver, TokenInfo, TokenSession},
    hsm_lib::HsmLib,
};

mod session;
mod slots;

/// Loads [`Pkcs11Driver`]s from the file system
#[derive(Debug, Default, Clone, Copy)]
pub struct Pkcs11Loader;

impl DriverLoader for Pkcs11Loader {
    fn load(&self, path: &str) -> HResult<Arc<dyn TokenDriver>> {
        Ok(Arc::new(Pkcs11Driver::instantiate(path)?))
    }
}

pub struct Pkcs11Driver {
    hsm_lib: Arc<HsmLib>,
}

impl Pkcs11Driver {
    /// Load the PKCS#11 module at `path` and initialise it
    pub fn instantiate(path: &str) -> HResult<Self> {
        let hsm_lib = Arc::new(HsmLib::instantiate(path)?);
        info!("PKCS#11 library {path} loaded");
        Ok(Self { hsm_lib })
    }
}

impl TokenDriver for Pkcs11Driver {
    fn path(&self) -> &str {
        self.hsm_lib.path()
    }

    fn library_info(&self) -> HResult<LibraryInfo> {
        let mut info = CK_INFO::default();
        hsm_call!(self.hsm_lib, C_GetInfo, &raw mut info);
        Ok(info.into())
    }

    fn slot_list(&self) -> HResult<Vec<SlotId>> {
        let mut count: CK_ULONG = 0;
        hsm_call!(
            self.hsm_lib,
            C_GetSlotList,
            CK_FALSE,
            ptr::null_mut(),
            &raw mut count
        );
        let mut slots: Vec<CK_SLOT_ID> = vec![0; usize::try_from(count)?];
        hsm_call!(
            self.hsm_lib,
            C_GetSlotList,
            CK_FALSE,
            slots.as_mut_ptr(),
            &raw mut count
        );
        slots.truncate(usize::try_from(count)?);
        debug!("{} slots found", slots.len());
        Ok(slots)
    }

    fn slot_info(&self, slot: SlotId) -> HResult<SlotInfo> {
        let mut info = CK_SLOT_INFO::default();
        hsm_call!(self.hsm_lib, C_GetSlotInfo, slot, &raw mut info);
        Ok(info.into())
    }

    fn token_info(&self, slot: SlotId) -> HResult<TokenInfo> {
        let mut info = CK_TOKEN_INFO::default();
        hsm_call!(self.hsm_lib, C_GetTokenInfo, slot, &raw mut info);
        Ok(info.into())
    }

    fn mechanism_list(&self, slot: SlotId) -> HResult<Vec<CK_MECHANISM_TYPE>> {
        let mut count: CK_ULONG = 0;
        hsm_call!(
            self.hsm_lib,
            C_GetMechanismList,
            slot,
            ptr::null_mut(),
            &raw mut count
        );
        let mut mechanisms: Vec<CK_MECHANISM_TYPE> = vec![0; usize::try_from(count)?];
        hsm_call!(
            self.hsm_lib,
            C_GetMechanismList,
            slot,
            mechanisms.as_mut_ptr(),
            &raw mut count
        );
        mechanisms.truncate(usize::try_from(count)?);
        Ok(mechanisms)
    }

    fn open_session(&self, slot: SlotId) -> HResult<Box<dyn TokenSession>> {
        Ok(Box::new(slots::open_session(&self.hsm_lib, slot)?))
    }
}
