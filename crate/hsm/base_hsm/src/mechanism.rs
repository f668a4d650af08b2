use std::str::FromStr;

use pkcs11_sys::{
    CK_KEY_TYPE, CK_MECHANISM_TYPE, CKK_RSA, CKM_AES_CBC, CKM_AES_GCM, CKM_AES_KEY_GEN,
    CKM_EC_KEY_PAIR_GEN, CKM_ECDSA, CKM_ECDSA_SHA1, CKM_MD5_RSA_PKCS, CKM_RSA_9796, CKM_RSA_PKCS,
    CKM_RSA_PKCS_KEY_PAIR_GEN, CKM_RSA_PKCS_OAEP, CKM_RSA_PKCS_PSS, CKM_RSA_X_509, CKM_SHA_1,
    CKM_SHA1_RSA_PKCS, CKM_SHA1_RSA_PKCS_PSS, CKM_SHA224_RSA_PKCS, CKM_SHA256, CKM_SHA256_RSA_PKCS,
    CKM_SHA256_RSA_PKCS_PSS, CKM_SHA384, CKM_SHA384_RSA_PKCS, CKM_SHA384_RSA_PKCS_PSS, CKM_SHA512,
    CKM_SHA512_RSA_PKCS, CKM_SHA512_RSA_PKCS_PSS,
};
use serde::Serialize;
use strum::{Display, EnumIter, EnumString};

use crate::{HError, HResult};

/// The signing mechanisms a client may name.
///
/// The names are those accepted on the wire: `RSAPKCS1` signs a pre-computed
/// `DigestInfo`, the `SHA*` variants hash the payload on the token.
#[allow(clippy::upper_case_acronyms)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter, Serialize,
)]
pub enum SigningMechanism {
    #[default]
    RSAPKCS1,
    RSAX509,
    SHA1RSAPKCS1,
    SHA224RSAPKCS1,
    SHA256RSAPKCS1,
    SHA384RSAPKCS1,
    SHA512RSAPKCS1,
}

impl SigningMechanism {
    /// Look a mechanism up by name; unknown names are refused
    pub fn resolve(name: &str) -> HResult<Self> {
        Self::from_str(name).map_err(|_| HError::UnknownMechanism(name.to_owned()))
    }

    #[must_use]
    pub const fn mechanism_type(self) -> CK_MECHANISM_TYPE {
        match self {
            Self::RSAPKCS1 => CKM_RSA_PKCS,
            Self::RSAX509 => CKM_RSA_X_509,
            Self::SHA1RSAPKCS1 => CKM_SHA1_RSA_PKCS,
            Self::SHA224RSAPKCS1 => CKM_SHA224_RSA_PKCS,
            Self::SHA256RSAPKCS1 => CKM_SHA256_RSA_PKCS,
            Self::SHA384RSAPKCS1 => CKM_SHA384_RSA_PKCS,
            Self::SHA512RSAPKCS1 => CKM_SHA512_RSA_PKCS,
        }
    }

    /// The type of key this mechanism signs with
    #[must_use]
    pub const fn key_type(self) -> CK_KEY_TYPE {
        CKK_RSA
    }
}

/// Symbolic `CKM_*` name of a mechanism reported by a token
#[must_use]
pub fn mechanism_name(mechanism: CK_MECHANISM_TYPE) -> String {
    let name = match mechanism {
        CKM_RSA_PKCS_KEY_PAIR_GEN => "CKM_RSA_PKCS_KEY_PAIR_GEN",
        CKM_RSA_PKCS => "CKM_RSA_PKCS",
        CKM_RSA_9796 => "CKM_RSA_9796",
        CKM_RSA_X_509 => "CKM_RSA_X_509",
        CKM_MD5_RSA_PKCS => "CKM_MD5_RSA_PKCS",
        CKM_SHA1_RSA_PKCS => "CKM_SHA1_RSA_PKCS",
        CKM_RSA_PKCS_OAEP => "CKM_RSA_PKCS_OAEP",
        CKM_RSA_PKCS_PSS => "CKM_RSA_PKCS_PSS",
        CKM_SHA1_RSA_PKCS_PSS => "CKM_SHA1_RSA_PKCS_PSS",
        CKM_SHA256_RSA_PKCS => "CKM_SHA256_RSA_PKCS",
        CKM_SHA384_RSA_PKCS => "CKM_SHA384_RSA_PKCS",
        CKM_SHA512_RSA_PKCS => "CKM_SHA512_RSA_PKCS",
        CKM_SHA256_RSA_PKCS_PSS => "CKM_SHA256_RSA_PKCS_PSS",
        CKM_SHA384_RSA_PKCS_PSS => "CKM_SHA384_RSA_PKCS_PSS",
        CKM_SHA512_RSA_PKCS_PSS => "CKM_SHA512_RSA_PKCS_PSS",
        CKM_SHA224_RSA_PKCS => "CKM_SHA224_RSA_PKCS",
        CKM_SHA_1 => "CKM_SHA_1",
        CKM_SHA256 => "CKM_SHA256",
        CKM_SHA384 => "CKM_SHA384",
        CKM_SHA512 => "CKM_SHA512",
        CKM_EC_KEY_PAIR_GEN => "CKM_EC_KEY_PAIR_GEN",
        CKM_ECDSA => "CKM_ECDSA",
        CKM_ECDSA_SHA1 => "CKM_ECDSA_SHA1",
        CKM_AES_KEY_GEN => "CKM_AES_KEY_GEN",
        CKM_AES_CBC => "CKM_AES_CBC",
        CKM_AES_GCM => "CKM_AES_GCM",
        other => return format!("CKM_0x{other:08X}"),
    };
    name.to_owned()
}

#[cfg(test)]
mod tests {
    use pkcs11_sys::{CKK_RSA, CKM_RSA_PKCS, CKM_SHA256_RSA_PKCS};
    use strum::IntoEnumIterator;

    use super::{SigningMechanism, mechanism_name};
    use crate::HError;

    #[test]
    fn names_resolve_to_mechanisms() {
        let mechanism = SigningMechanism::resolve("RSAPKCS1").unwrap();
        assert_eq!(mechanism, SigningMechanism::RSAPKCS1);
        assert_eq!(mechanism.mechanism_type(), CKM_RSA_PKCS);
        assert_eq!(
            SigningMechanism::resolve("SHA256RSAPKCS1")
                .unwrap()
                .mechanism_type(),
            CKM_SHA256_RSA_PKCS
        );
        assert_eq!(SigningMechanism::default(), SigningMechanism::RSAPKCS1);
    }

    #[test]
    fn unknown_names_fail_closed() {
        for name in ["", "rsapkcs1", "ECDSA", "RSAPKCS1 "] {
            assert!(matches!(
                SigningMechanism::resolve(name),
                Err(HError::UnknownMechanism(n)) if n == name
            ));
        }
    }

    #[test]
    fn every_mechanism_round_trips_its_name_and_signs_with_rsa() {
        for mechanism in SigningMechanism::iter() {
            assert_eq!(
                SigningMechanism::resolve(&mechanism.to_string()).unwrap(),
                mechanism
            );
            assert_eq!(mechanism.key_type(), CKK_RSA);
            assert!(mechanism_name(mechanism.mechanism_type()).starts_with("CKM_"));
        }
    }
}
