//! secp256k1 signature checks against source-chain public keys
//!
//! Public keys are `STM` followed by base58 of the 33-byte compressed point
//! and the first 4 bytes of its RIPEMD-160. Signatures are hex of 65 bytes:
//! a recovery byte, then `r` and `s`.

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};
use ripemd::{Digest, Ripemd160};

use crate::hashing::sha256_hex;
use crate::value::Value;

pub const PUBLIC_KEY_PREFIX: &str = "STM";

const COMPRESSED_KEY_LEN: usize = 33;
const CHECKSUM_LEN: usize = 4;
const SIGNATURE_LEN: usize = 65;

/// `api.checkSignature`: `false` for malformed input, never an error.
///
/// String payloads are signed as-is, anything else as canonical JSON. With
/// `is_payload_sha256` the payload already is the hex digest.
pub fn check(payload: &Value, signature: &Value, public_key: &Value, is_payload_sha256: bool) -> bool {
    let message = match payload {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) | Value::Null => payload.to_canonical_json(),
        _ => return false,
    };
    let (Some(signature), Some(public_key)) = (signature.as_str(), public_key.as_str()) else {
        return false;
    };
    verify(&message, signature, public_key, is_payload_sha256).unwrap_or(false)
}

fn verify(message: &str, signature: &str, public_key: &str, is_payload_sha256: bool) -> Option<bool> {
    let digest_hex = if is_payload_sha256 {
        message.to_string()
    } else {
        sha256_hex(message)
    };
    let digest = hex::decode(digest_hex).ok()?;
    if digest.len() != 32 {
        return None;
    }
    let key = decode_public_key(public_key)?;
    let signature = decode_signature(signature)?;
    Some(key.verify_prehash(&digest, &signature).is_ok())
}

/// Parse an `STM…` public key, checking its checksum
pub fn decode_public_key(text: &str) -> Option<VerifyingKey> {
    let encoded = text.strip_prefix(PUBLIC_KEY_PREFIX)?;
    let bytes = bs58::decode(encoded).into_vec().ok()?;
    if bytes.len() != COMPRESSED_KEY_LEN + CHECKSUM_LEN {
        return None;
    }
    let (key, checksum) = bytes.split_at(COMPRESSED_KEY_LEN);
    if Ripemd160::digest(key)[..CHECKSUM_LEN] != *checksum {
        return None;
    }
    VerifyingKey::from_sec1_bytes(key).ok()
}

fn decode_signature(text: &str) -> Option<Signature> {
    let bytes = hex::decode(text).ok()?;
    if bytes.len() != SIGNATURE_LEN {
        return None;
    }
    Signature::from_slice(&bytes[1..]).ok()
}
