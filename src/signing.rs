use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::Webhook;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the signature header value: `sha256=` + hex HMAC-SHA256 of the
/// exact payload bytes.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Signature header for a delivery, or `None` when the webhook has no
/// usable secret. Never signs with an empty key.
pub fn signature_header(webhook: &Webhook, payload: &[u8]) -> Option<(&'static str, String)> {
    webhook
        .signing_secret()
        .map(|secret| (SIGNATURE_HEADER, sign(payload, secret)))
}

/// Verify a received `X-Webhook-Signature` value in constant time.
pub fn verify_signature(payload: &[u8], secret: &str, header_value: &str) -> bool {
    let Some(signature_hex) = header_value.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}
