//! Thin wrappers over the crypto primitives the server treats as external
//! collaborators: password/digest hashing, constant-time comparison and
//! random id generation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hash algorithm tag carried alongside a stored password or a digest
/// challenge, per the route/user configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Md5,
}

impl Algorithm {
    pub(crate) fn from_bytes(value: &[u8]) -> Option<Self> {
        match value {
            b"SHA-256" | b"sha-256" => Some(Algorithm::Sha256),
            b"MD5" | b"md5" => Some(Algorithm::Md5),
            _ => None,
        }
    }

    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "SHA-256",
            Algorithm::Md5 => "MD5",
        }
    }

    /// Hex digest of `input` under this algorithm.
    pub(crate) fn hex_digest(self, input: &[u8]) -> String {
        match self {
            Algorithm::Sha256 => hex(&Sha256::digest(input)),
            Algorithm::Md5 => hex(&Md5::digest(input)),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Constant-time comparison of two byte strings (passwords, digest
/// responses, XSRF tokens).
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}

/// Raw 32-byte HMAC-SHA256 over `data` keyed by `key`.
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Random 256-bit identifier, base64url-encoded (no padding). Used for
/// session ids and digest nonce ids.
pub(crate) fn random_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn b64_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub(crate) fn b64_decode(data: &[u8]) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(data).ok()
}

/// Decode a standard (padded) base64 blob, as used by the HTTP Basic
/// `Authorization` header per RFC 7617.
pub(crate) fn b64_decode_standard(data: &[u8]) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    STANDARD.decode(data).ok()
}

/// Encode a standard (padded) base64 blob, the counterpart to
/// [`b64_decode_standard`].
#[cfg(test)]
pub(crate) fn b64_encode_standard(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    STANDARD.encode(data)
}
