//! Search templates and human readable rendering of object attributes.

use std::{mem::size_of, os::raw::c_ulong};

use pkcs11_sys::{
    CK_ATTRIBUTE_TYPE, CK_CERTIFICATE_TYPE, CK_KEY_TYPE, CK_OBJECT_CLASS, CK_ULONG,
    CKA_ALWAYS_SENSITIVE, CKA_APPLICATION, CKA_CERTIFICATE_TYPE, CKA_CLASS, CKA_DECRYPT,
    CKA_ENCRYPT, CKA_EXTRACTABLE, CKA_ID, CKA_ISSUER, CKA_KEY_TYPE, CKA_LABEL, CKA_LOCAL,
    CKA_MODIFIABLE, CKA_MODULUS, CKA_MODULUS_BITS, CKA_NEVER_EXTRACTABLE, CKA_PRIVATE,
    CKA_PUBLIC_EXPONENT, CKA_SENSITIVE, CKA_SERIAL_NUMBER, CKA_SIGN, CKA_SUBJECT, CKA_TOKEN,
    CKA_UNWRAP, CKA_VALUE, CKA_VERIFY, CKA_WRAP, CKC_WTLS, CKC_X_509, CKC_X_509_ATTR_CERT,
    CKK_AES, CKK_DES3, CKK_DH, CKK_DSA, CKK_EC, CKK_GENERIC_SECRET, CKK_RSA, CKO_CERTIFICATE,
    CKO_DATA, CKO_PRIVATE_KEY, CKO_PUBLIC_KEY, CKO_SECRET_KEY,
};

/// One entry of an object search template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Class(CK_OBJECT_CLASS),
    KeyType(CK_KEY_TYPE),
    Label(String),
    Id(Vec<u8>),
}

impl Attribute {
    #[must_use]
    pub const fn attribute_type(&self) -> CK_ATTRIBUTE_TYPE {
        match self {
            Self::Class(_) => CKA_CLASS,
            Self::KeyType(_) => CKA_KEY_TYPE,
            Self::Label(_) => CKA_LABEL,
            Self::Id(_) => CKA_ID,
        }
    }

    /// The value as laid out in a `CK_ATTRIBUTE` buffer
    #[must_use]
    pub fn value(&self) -> Vec<u8> {
        match self {
            Self::Class(v) | Self::KeyType(v) => v.to_ne_bytes().to_vec(),
            Self::Label(label) => label.as_bytes().to_vec(),
            Self::Id(id) => id.clone(),
        }
    }
}

/// Attributes read by object introspection.
/// The private key components are left out: tokens refuse to reveal them.
pub const ATTRIBUTES_TO_DISPLAY: &[CK_ATTRIBUTE_TYPE] = &[
    CKA_CLASS,
    CKA_TOKEN,
    CKA_PRIVATE,
    CKA_LABEL,
    CKA_APPLICATION,
    CKA_VALUE,
    CKA_CERTIFICATE_TYPE,
    CKA_ISSUER,
    CKA_SERIAL_NUMBER,
    CKA_KEY_TYPE,
    CKA_SUBJECT,
    CKA_ID,
    CKA_SENSITIVE,
    CKA_ENCRYPT,
    CKA_DECRYPT,
    CKA_WRAP,
    CKA_UNWRAP,
    CKA_SIGN,
    CKA_VERIFY,
    CKA_MODULUS,
    CKA_MODULUS_BITS,
    CKA_PUBLIC_EXPONENT,
    CKA_EXTRACTABLE,
    CKA_LOCAL,
    CKA_NEVER_EXTRACTABLE,
    CKA_ALWAYS_SENSITIVE,
    CKA_MODIFIABLE,
];

#[must_use]
pub fn attribute_name(attribute: CK_ATTRIBUTE_TYPE) -> String {
    let name = match attribute {
        CKA_CLASS => "CKA_CLASS",
        CKA_TOKEN => "CKA_TOKEN",
        CKA_PRIVATE => "CKA_PRIVATE",
        CKA_LABEL => "CKA_LABEL",
        CKA_APPLICATION => "CKA_APPLICATION",
        CKA_VALUE => "CKA_VALUE",
        CKA_CERTIFICATE_TYPE => "CKA_CERTIFICATE_TYPE",
        CKA_ISSUER => "CKA_ISSUER",
        CKA_SERIAL_NUMBER => "CKA_SERIAL_NUMBER",
        CKA_KEY_TYPE => "CKA_KEY_TYPE",
        CKA_SUBJECT => "CKA_SUBJECT",
        CKA_ID => "CKA_ID",
        CKA_SENSITIVE => "CKA_SENSITIVE",
        CKA_ENCRYPT => "CKA_ENCRYPT",
        CKA_DECRYPT => "CKA_DECRYPT",
        CKA_WRAP => "CKA_WRAP",
        CKA_UNWRAP => "CKA_UNWRAP",
        CKA_SIGN => "CKA_SIGN",
        CKA_VERIFY => "CKA_VERIFY",
        CKA_MODULUS => "CKA_MODULUS",
        CKA_MODULUS_BITS => "CKA_MODULUS_BITS",
        CKA_PUBLIC_EXPONENT => "CKA_PUBLIC_EXPONENT",
        CKA_EXTRACTABLE => "CKA_EXTRACTABLE",
        CKA_LOCAL => "CKA_LOCAL",
        CKA_NEVER_EXTRACTABLE => "CKA_NEVER_EXTRACTABLE",
        CKA_ALWAYS_SENSITIVE => "CKA_ALWAYS_SENSITIVE",
        CKA_MODIFIABLE => "CKA_MODIFIABLE",
        other => return format!("CKA_0x{other:08X}"),
    };
    name.to_owned()
}

fn object_class_name(class: CK_OBJECT_CLASS) -> String {
    match class {
        CKO_DATA => "CKO_DATA".to_owned(),
        CKO_CERTIFICATE => "CKO_CERTIFICATE".to_owned(),
        CKO_PUBLIC_KEY => "CKO_PUBLIC_KEY".to_owned(),
        CKO_PRIVATE_KEY => "CKO_PRIVATE_KEY".to_owned(),
        CKO_SECRET_KEY => "CKO_SECRET_KEY".to_owned(),
        other => format!("CKO_0x{other:08X}"),
    }
}

fn key_type_name(key_type: CK_KEY_TYPE) -> String {
    match key_type {
        CKK_RSA => "CKK_RSA".to_owned(),
        CKK_DSA => "CKK_DSA".to_owned(),
        CKK_DH => "CKK_DH".to_owned(),
        CKK_EC => "CKK_EC".to_owned(),
        CKK_GENERIC_SECRET => "CKK_GENERIC_SECRET".to_owned(),
        CKK_DES3 => "CKK_DES3".to_owned(),
        CKK_AES => "CKK_AES".to_owned(),
        other => format!("CKK_0x{other:08X}"),
    }
}

fn certificate_type_name(certificate_type: CK_CERTIFICATE_TYPE) -> String {
    match certificate_type {
        CKC_X_509 => "CKC_X_509".to_owned(),
        CKC_X_509_ATTR_CERT => "CKC_X_509_ATTR_CERT".to_owned(),
        CKC_WTLS => "CKC_WTLS".to_owned(),
        other => format!("CKC_0x{other:08X}"),
    }
}

fn as_ulong(value: &[u8]) -> Option<CK_ULONG> {
    let bytes: [u8; size_of::<c_ulong>()] = value.try_into().ok()?;
    Some(CK_ULONG::from_ne_bytes(bytes))
}

/// Render a raw attribute value the way a human would read it:
/// booleans, symbolic class and key type names, UTF-8 labels and hex for the rest.
#[must_use]
pub fn render_attribute(attribute: CK_ATTRIBUTE_TYPE, value: &[u8]) -> String {
    match attribute {
        CKA_TOKEN | CKA_PRIVATE | CKA_SENSITIVE | CKA_ENCRYPT | CKA_DECRYPT | CKA_WRAP
        | CKA_UNWRAP | CKA_SIGN | CKA_VERIFY | CKA_EXTRACTABLE | CKA_LOCAL
        | CKA_NEVER_EXTRACTABLE | CKA_ALWAYS_SENSITIVE | CKA_MODIFIABLE => match value {
            [0] => "false".to_owned(),
            [_] => "true".to_owned(),
            _ => hex::encode(value),
        },
        CKA_CLASS => as_ulong(value).map_or_else(|| hex::encode(value), object_class_name),
        CKA_KEY_TYPE => as_ulong(value).map_or_else(|| hex::encode(value), key_type_name),
        CKA_CERTIFICATE_TYPE => {
            as_ulong(value).map_or_else(|| hex::encode(value), certificate_type_name)
        }
        CKA_MODULUS_BITS => {
            as_ulong(value).map_or_else(|| hex::encode(value), |bits| bits.to_string())
        }
        CKA_LABEL | CKA_APPLICATION => String::from_utf8(value.to_vec())
            .unwrap_or_else(|_| hex::encode(value)),
        _ => hex::encode(value),
    }
}

#[cfg(test)]
mod tests {
    use pkcs11_sys::{
        CK_ULONG, CKA_CLASS, CKA_ID, CKA_KEY_TYPE, CKA_LABEL, CKA_MODULUS_BITS, CKA_SIGN,
        CKK_RSA, CKO_PRIVATE_KEY,
    };

    use super::{Attribute, attribute_name, render_attribute};

    #[test]
    fn template_values_use_native_layout() {
        let class = Attribute::Class(CKO_PRIVATE_KEY);
        assert_eq!(class.attribute_type(), CKA_CLASS);
        assert_eq!(class.value(), CKO_PRIVATE_KEY.to_ne_bytes().to_vec());
        assert_eq!(Attribute::Label("test".to_owned()).value(), b"test".to_vec());
        assert_eq!(Attribute::Id(vec![1, 2]).attribute_type(), CKA_ID);
    }

    #[test]
    fn attributes_are_rendered_for_humans() {
        assert_eq!(
            render_attribute(CKA_CLASS, &CKO_PRIVATE_KEY.to_ne_bytes()),
            "CKO_PRIVATE_KEY"
        );
        assert_eq!(render_attribute(CKA_KEY_TYPE, &CKK_RSA.to_ne_bytes()), "CKK_RSA");
        assert_eq!(render_attribute(CKA_SIGN, &[1]), "true");
        assert_eq!(render_attribute(CKA_SIGN, &[0]), "false");
        assert_eq!(render_attribute(CKA_LABEL, b"test"), "test");
        assert_eq!(render_attribute(CKA_ID, &[0xca, 0xfe]), "cafe");
        assert_eq!(
            render_attribute(CKA_MODULUS_BITS, &CK_ULONG::from(2048_u32).to_ne_bytes()),
            "2048"
        );
        // a truncated numeric value falls back to hex
        assert_eq!(render_attribute(CKA_CLASS, &[3]), "03");
    }

    #[test]
    fn unknown_attributes_have_a_hex_name() {
        assert_eq!(attribute_name(CKA_LABEL), "CKA_LABEL");
        assert_eq!(attribute_name(0x8000_0000), "CKA_0x80000000");
    }
}
