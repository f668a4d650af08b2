use pem::{EncodeConfig, LineEnding, Pem};

/// Encode a DER certificate as PEM: base64 on 64 character lines between the
/// `-----BEGIN CERTIFICATE-----` and `-----END CERTIFICATE-----` markers, without a final newline.
#[must_use]
pub fn der_to_pem(der: &[u8]) -> String {
    let pem = Pem::new("CERTIFICATE", der.to_vec());
    let encoded = pem::encode_config(&pem, EncodeConfig::new().set_line_ending(LineEnding::LF));
    encoded.trim_end().to_owned()
}
