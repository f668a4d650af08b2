use std::{ptr, sync::Arc};

use pkcs11_sys::{CK_FLAGS, CK_SESSION_HANDLE, CKF_SERIAL_SESSION};
use tracing::debug;

use super::Pkcs11Session;
use crate::{HResult, driver::SlotId, hsm_lib::HsmLib};

/// Open a read-only serial session on `slot_id`.
/// Signing never writes to the token.
pub(super) fn open_session(hsm_lib: &Arc<HsmLib>, slot_id: SlotId) -> HResult<Pkcs11Session> {
    let flags: CK_FLAGS = CKF_SERIAL_SESSION;
    let mut session_handle: CK_SESSION_HANDLE = 0;
    hsm_call!(
        hsm_lib,
        C_OpenSession,
        slot_id,
        flags,
        ptr::null_mut(),
        None,
        &raw mut session_handle
    );
    debug!("opened session {session_handle} on slot {slot_id}");
    Ok(Pkcs11Session::new(hsm_lib.clone(), slot_id, session_handle))
}
