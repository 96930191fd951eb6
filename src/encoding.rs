//! # Secret Encoding
//!
//! Kubernetes stores `Secret.data` values pre-encoded as standard base64. The
//! credential read from the bootstrap secret arrives decoded, so it is re-encoded
//! before being handed to the resource graph.

use crate::credential::{Credential, EncodedCredential};
use base64::{engine::general_purpose, Engine as _};

/// Encode raw credential bytes with the standard base64 alphabet (padded).
///
/// Never fails; the empty input encodes to the empty string.
pub fn encode(raw: &[u8]) -> String {
    general_purpose::STANDARD.encode(raw)
}

/// Decode a standard base64 string back into bytes.
pub fn decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::STANDARD.decode(encoded)
}

/// Encode a located credential for injection into the resource graph.
pub fn encode_credential(credential: &Credential) -> EncodedCredential {
    EncodedCredential::new(encode(credential.as_bytes()))
}
