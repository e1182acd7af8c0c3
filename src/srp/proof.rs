//! Assembly of the `PASSWORD_CLAIM_SIGNATURE` challenge response.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::Mac;

use crate::error::SrpError;
use crate::srp::HmacSha256;

/// HMAC-SHA256 the claim over `realm || identifier || secret_block ||
/// timestamp` and base64 the digest.
///
/// The secret block arrives base64-encoded and is covered in its decoded
/// form; the realm, identifier and timestamp are covered as UTF-8.
pub(crate) fn claim_signature(
    hkdf_key: &[u8],
    realm: &str,
    identifier: &str,
    secret_block: &str,
    timestamp: &str,
) -> Result<String, SrpError> {
    let mut msg: Vec<u8> = vec![];
    msg.extend_from_slice(realm.as_bytes());
    msg.extend_from_slice(identifier.as_bytes());
    msg.extend_from_slice(&BASE64.decode(secret_block).map_err(|err| {
        SrpError::InvalidArgument(format!("Invalid base64 secret block. Received '{err}'"))
    })?);
    msg.extend_from_slice(timestamp.as_bytes());

    let mut mac = HmacSha256::new_from_slice(hkdf_key)?;
    mac.update(&msg);

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}
