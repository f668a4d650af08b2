use std::{ffi::c_void, ptr, sync::Arc};

use pkcs11_sys::{
    CK_ATTRIBUTE, CK_ATTRIBUTE_TYPE, CK_MECHANISM, CK_OBJECT_HANDLE, CK_SESSION_HANDLE,
    CK_SESSION_INFO, CK_ULONG, CK_UNAVAILABLE_INFORMATION, CKR_ATTRIBUTE_SENSITIVE,
    CKR_ATTRIBUTE_TYPE_INVALID, CKR_OK, CKR_USER_ALREADY_LOGGED_IN, CKU_USER,
};
use tracing::{debug, trace, warn};

use crate::{
    HError, HResult, SigningMechanism,
    attribute::Attribute,
    driver::{ObjectHandle, SessionDetails, SlotId, TokenSession},
    hsm_lib::HsmLib,
};

/// Number of handles fetched per `C_FindObjects` call
const FIND_MAX_OBJECT_COUNT: CK_ULONG = 64;

/// A PKCS#11 session.
/// It is logged out, if this session logged in, and closed on drop.
pub struct Pkcs11Session {
    hsm: Arc<HsmLib>,
    slot: SlotId,
    handle: CK_SESSION_HANDLE,
    logged_in: bool,
}

impl Pkcs11Session {
    pub(super) fn new(hsm: Arc<HsmLib>, slot: SlotId, handle: CK_SESSION_HANDLE) -> Self {
        Self {
            hsm,
            slot,
            handle,
            logged_in: false,
        }
    }

    fn close(&self) -> HResult<()> {
        if self.logged_in {
            hsm_call!(self.hsm, C_Logout, self.handle);
        }
        hsm_call!(self.hsm, C_CloseSession, self.handle);
        Ok(())
    }

    /// Read one attribute: query its length, then its value
    fn get_attribute(
        &self,
        object: CK_OBJECT_HANDLE,
        attribute: CK_ATTRIBUTE_TYPE,
    ) -> HResult<Option<Vec<u8>>> {
        let mut template = CK_ATTRIBUTE {
            type_: attribute,
            pValue: ptr::null_mut(),
            ulValueLen: 0,
        };
        let rv = hsm_rv!(
            self.hsm,
            C_GetAttributeValue,
            self.handle,
            object,
            &raw mut template,
            1
        );
        match rv {
            CKR_OK => {}
            CKR_ATTRIBUTE_SENSITIVE | CKR_ATTRIBUTE_TYPE_INVALID => return Ok(None),
            rv => {
                return Err(HError::Pkcs11 {
                    function: "C_GetAttributeValue",
                    rv,
                });
            }
        }
        if template.ulValueLen == CK_UNAVAILABLE_INFORMATION {
            return Ok(None);
        }
        let mut value = vec![0_u8; usize::try_from(template.ulValueLen)?];
        template.pValue = value.as_mut_ptr().cast::<c_void>();
        hsm_call!(
            self.hsm,
            C_GetAttributeValue,
            self.handle,
            object,
            &raw mut template,
            1
        );
        value.truncate(usize::try_from(template.ulValueLen)?);
        Ok(Some(value))
    }
}

impl TokenSession for Pkcs11Session {
    fn slot(&self) -> SlotId {
        self.slot
    }

    fn login(&mut self, pin: &str) -> HResult<()> {
        let mut pin_bytes = pin.as_bytes().to_vec();
        let rv = hsm_rv!(
            self.hsm,
            C_Login,
            self.handle,
            CKU_USER,
            pin_bytes.as_mut_ptr(),
            CK_ULONG::try_from(pin_bytes.len())?
        );
        match rv {
            CKR_OK => {
                self.logged_in = true;
                Ok(())
            }
            // the login belongs to another session of this process: it is left alone on close
            CKR_USER_ALREADY_LOGGED_IN => Err(HError::UserAlreadyLoggedIn),
            rv => Err(HError::Pkcs11 {
                function: "C_Login",
                rv,
            }),
        }
    }

    fn session_info(&self) -> HResult<SessionDetails> {
        let mut info = CK_SESSION_INFO::default();
        hsm_call!(self.hsm, C_GetSessionInfo, self.handle, &raw mut info);
        Ok(info.into())
    }

    fn find_objects(&self, template: &[Attribute]) -> HResult<Vec<ObjectHandle>> {
        // the values must outlive the raw template
        let mut values: Vec<Vec<u8>> = template.iter().map(Attribute::value).collect();
        let mut raw_template = template
            .iter()
            .zip(values.iter_mut())
            .map(|(attribute, value)| {
                Ok(CK_ATTRIBUTE {
                    type_: attribute.attribute_type(),
                    pValue: value.as_mut_ptr().cast::<c_void>(),
                    ulValueLen: CK_ULONG::try_from(value.len())?,
                })
            })
            .collect::<HResult<Vec<_>>>()?;

        hsm_call!(
            self.hsm,
            C_FindObjectsInit,
            self.handle,
            raw_template.as_mut_ptr(),
            CK_ULONG::try_from(raw_template.len())?
        );

        let mut object_handles: Vec<ObjectHandle> = Vec::new();
        let mut handles_buf =
            vec![CK_OBJECT_HANDLE::default(); usize::try_from(FIND_MAX_OBJECT_COUNT)?];
        let mut object_count: CK_ULONG = 0;
        let search = loop {
            let rv = hsm_rv!(
                self.hsm,
                C_FindObjects,
                self.handle,
                handles_buf.as_mut_ptr(),
                FIND_MAX_OBJECT_COUNT,
                &raw mut object_count
            );
            if rv != CKR_OK {
                break Err(HError::Pkcs11 {
                    function: "C_FindObjects",
                    rv,
                });
            }
            if object_count == 0 {
                break Ok(());
            }
            trace!("found {object_count} objects");
            let Some(found) = handles_buf.get(..usize::try_from(object_count)?) else {
                break Err(HError::Default(
                    "more objects returned than requested".to_owned(),
                ));
            };
            object_handles.extend_from_slice(found);
        };
        // the search must be finalised even when it failed
        hsm_call!(self.hsm, C_FindObjectsFinal, self.handle);
        search?;
        Ok(object_handles)
    }

    fn get_attributes(
        &self,
        object: ObjectHandle,
        attributes: &[CK_ATTRIBUTE_TYPE],
    ) -> HResult<Vec<Option<Vec<u8>>>> {
        attributes
            .iter()
            .map(|attribute| self.get_attribute(object, *attribute))
            .collect()
    }

    fn sign(
        &self,
        key: ObjectHandle,
        data: &[u8],
        mechanism: SigningMechanism,
    ) -> HResult<Vec<u8>> {
        let mut ck_mechanism = CK_MECHANISM {
            mechanism: mechanism.mechanism_type(),
            pParameter: ptr::null_mut(),
            ulParameterLen: 0,
        };
        hsm_call!(self.hsm, C_SignInit, self.handle, &raw mut ck_mechanism, key);

        let mut data = data.to_vec();
        let data_len = CK_ULONG::try_from(data.len())?;
        let mut signature_len: CK_ULONG = 0;
        hsm_call!(
            self.hsm,
            C_Sign,
            self.handle,
            data.as_mut_ptr(),
            data_len,
            ptr::null_mut(),
            &raw mut signature_len
        );
        let mut signature = vec![0_u8; usize::try_from(signature_len)?];
        hsm_call!(
            self.hsm,
            C_Sign,
            self.handle,
            data.as_mut_ptr(),
            data_len,
            signature.as_mut_ptr(),
            &raw mut signature_len
        );
        signature.truncate(usize::try_from(signature_len)?);
        debug!(
            "signed {} bytes with {mechanism} on slot {}",
            data.len(),
            self.slot
        );
        Ok(signature)
    }
}

impl Drop for Pkcs11Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed closing session {} on slot {}: {e}", self.handle, self.slot);
        }
    }
}
