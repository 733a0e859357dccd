use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Checks an `X-Gateway-Signature` header (`sha256=<hex>`, prefix optional) against the
/// HMAC-SHA256 of the raw request body. Comparison is constant time.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let header = signature_header.trim();
    let hex_signature = header.strip_prefix(SIGNATURE_PREFIX).unwrap_or(header);

    let Ok(provided) = hex::decode(hex_signature) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

/// Header value the gateway would send for `payload`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    )
}
