//! Copyright 2024 Cosmian Tech SAS

#![allow(non_snake_case)]

/// Call a PKCS#11 function of an `HsmLib` and return its raw `CK_RV`
macro_rules! hsm_rv {
    ($hsm:expr, $function:ident $(, $arg:expr)* $(,)?) => {{
        let function = $hsm
            .$function
            .ok_or($crate::HError::MissingFunction(stringify!($function)))?;
        #[allow(unsafe_code)]
        let rv = unsafe { function($($arg),*) };
        rv
    }};
}

/// Call a PKCS#11 function of an `HsmLib`, returning an `HError::Pkcs11` on failure
macro_rules! hsm_call {
    ($hsm:expr, $function:ident $(, $arg:expr)* $(,)?) => {{
        let rv = hsm_rv!($hsm, $function $(, $arg)*);
        if rv != pkcs11_sys::CKR_OK {
            return Err($crate::HError::Pkcs11 {
                function: stringify!($function),
                rv,
            });
        }
    }};
}

mod attribute;
mod certificate;
mod driver;
mod error;
mod hsm_lib;
mod mechanism;
mod pkcs11;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;


pub use attribute::{ATTRIBUTES_TO_DISPLAY, Attribute, attribute_name, render_attribute};
pub use certificate::der_to_pem;
pub use driver::{
    DriverLoader, LibraryInfo, ObjectHandle, SessionDetails, SlotId, SlotInfo, TokenDriver,
    TokenInfo, TokenSession,
};
pub use error::{HError, HResult};
pub use mechanism::{SigningMechanism, mechanism_name};
pub use pkcs11::{Pkcs11Driver, Pkcs11Loader, Pkcs11Session};
