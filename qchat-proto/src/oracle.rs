//! JSON wire contract of the remote encryption oracle.
//!
//! The oracle is an external service; only its request/response shapes are
//! defined here. Field names are fixed by that service.

use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::bits::BitString;

/// Body of `POST {base}/encrypt`. The key copy is wiped on drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct EncryptRequest {
    /// Bits to encrypt.
    #[zeroize(skip)]
    pub binary: BitString,
    /// Negotiated key bits; may be empty.
    pub shared_key: BitString,
}

/// Successful response of `POST {base}/encrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptResponse {
    /// Ciphertext bits.
    pub encrypted: BitString,
}

/// Body of `POST {base}/decrypt`. The key copy is wiped on drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct DecryptRequest {
    /// Ciphertext bits.
    #[zeroize(skip)]
    pub encrypted_binary: BitString,
    /// Negotiated key bits; may be empty.
    pub shared_key: BitString,
}

/// Successful response of `POST {base}/decrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptResponse {
    /// Recovered bits.
    pub decrypted: BitString,
}

/// Error body returned by the oracle (and by the QChat API) on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Short error summary.
    pub error: String,
    /// Optional detail text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
