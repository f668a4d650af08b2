use std::fmt;

use clap::Args;
use serde::{Deserialize, Serialize};

#[derive(Args, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HsmConfig {
    /// The path of the PKCS#11 module,
    /// e.g. `/usr/lib/softhsm/libsofthsm2.so`
    #[clap(verbatim_doc_comment, long, env = "SIGN_PROXY_PKCS11_MODULE")]
    pub pkcs11_module: Option<String>,

    /// The user PIN of the tokens.
    /// Sessions are not logged in when no PIN is given
    #[clap(verbatim_doc_comment, long, env = "SIGN_PROXY_PKCS11_PIN")]
    pub pkcs11_pin: Option<String>,
}

impl fmt::Debug for HsmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsmConfig")
            .field("pkcs11_module", &self.pkcs11_module)
            .field("pkcs11_pin", &self.pkcs11_pin.as_ref().map(|_| "****"))
            .finish()
    }
}
