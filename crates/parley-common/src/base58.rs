//! Base58 helpers for wallet-address identifiers.
//!
//! Wallet addresses are base58 text encoding a 32-byte public key. The relay
//! treats identifiers as opaque, but the `wallet` identity policy uses these
//! helpers to reject strings that cannot be an address.

use thiserror::Error;

pub use bs58::decode::Error as DecodeError;

/// Shortest base58 text that can encode 32 bytes.
pub const MIN_ADDRESS_LEN: usize = 32;
/// Longest base58 text that can encode 32 bytes.
pub const MAX_ADDRESS_LEN: usize = 44;

/// Errors that can occur when decoding a wallet address.
///
/// # Examples
///
/// ```
/// use parley_common::base58;
/// let short = base58::encode(&[1u8; 16]);
/// assert!(base58::decode_address(&short).is_err());
/// ```
#[derive(Debug, Error)]
pub enum AddressDecodeError {
    /// The text length is outside the possible range for a 32-byte key.
    #[error("address must be {MIN_ADDRESS_LEN}-{MAX_ADDRESS_LEN} characters, got {0}")]
    BadLength(usize),
    /// The input is not valid base58.
    #[error("invalid base58: {0}")]
    Base58(#[from] DecodeError),
    /// The decoded bytes are not exactly 32 bytes.
    #[error("address must decode to exactly 32 bytes, got {0}")]
    WrongLength(usize),
}

/// Encodes raw bytes to a base58 string.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

/// Decodes a base58 string to raw bytes.
///
/// # Errors
///
/// Returns `DecodeError` if the input is not valid base58.
pub fn decode(s: &str) -> Result<Vec<u8>, DecodeError> {
    bs58::decode(s).into_vec()
}

/// Decodes a wallet address to its 32-byte public key.
///
/// # Errors
///
/// Returns [`AddressDecodeError`] if the text has an impossible length, is
/// not valid base58, or does not decode to exactly 32 bytes.
///
/// # Examples
///
/// ```
/// let key = [0x42u8; 32];
/// let addr = parley_common::base58::encode(&key);
/// assert_eq!(parley_common::base58::decode_address(&addr).unwrap(), key);
/// ```
pub fn decode_address(s: &str) -> Result<[u8; 32], AddressDecodeError> {
    if !(MIN_ADDRESS_LEN..=MAX_ADDRESS_LEN).contains(&s.len()) {
        return Err(AddressDecodeError::BadLength(s.len()));
    }
    let bytes = decode(s)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_: Vec<u8>| AddressDecodeError::WrongLength(len))
}
