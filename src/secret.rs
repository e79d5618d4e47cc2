//! Fixed-width integer encoding of a secret key
//!
//! A key of 1..=32 bytes is framed as a single header byte followed by a 64-byte body and
//! read as one big-endian unsigned integer:
//!
//! ```text
//! [version:2 | pad_len:6][key bytes][zero padding up to 64 bytes]
//! ```
//!
//! `pad_len = 64 - key_len`, so the decoder knows how many body bytes belong to the key.
//! The integer is always below 2^520 and therefore a valid element of the 2^521 - 1 field.

use num_bigint::{BigInt, Sign};

use crate::error::{Result, UnsealError};

/// Secret encoding version written by this crate
pub const SECRET_VERSION: u8 = 1;

/// Largest version the two header bits can carry
pub const MAX_SECRET_VERSION: u8 = 3;

/// Longest key the encoding accepts
pub const MAX_SECRET_LEN: usize = 32;

const BODY_LEN: usize = 64;
const ENCODED_LEN: usize = BODY_LEN + 1;

/// A key recovered from its integer encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSecret {
    pub key: Vec<u8>,
    pub version: u8,
}

/// Encodes `key` as the constant term of a sharing polynomial
///
/// # Errors
/// `InvalidSecretLength` unless `1 <= key.len() <= 32`, `MalformedSecret` if `version`
/// does not fit the two header bits.
///
/// # Example
/// ```
/// use shamir_unseal::secret::{decode_secret, encode_secret, SECRET_VERSION};
///
/// let encoded = encode_secret(&[5, 6, 7, 8], SECRET_VERSION).unwrap();
/// assert_eq!(decode_secret(&encoded).unwrap().key, vec![5, 6, 7, 8]);
/// ```
pub fn encode_secret(key: &[u8], version: u8) -> Result<BigInt> {
    if key.is_empty() || key.len() > MAX_SECRET_LEN {
        return Err(UnsealError::InvalidSecretLength(key.len()));
    }
    if version > MAX_SECRET_VERSION {
        return Err(UnsealError::MalformedSecret(format!(
            "version {version} does not fit the header, maximum is {MAX_SECRET_VERSION}"
        )));
    }

    let pad_len = (BODY_LEN - key.len()) as u8;
    let mut data = [0u8; ENCODED_LEN];
    data[0] = (version << 6) | pad_len;
    data[1..=key.len()].copy_from_slice(key);

    Ok(BigInt::from_bytes_be(Sign::Plus, &data))
}

/// Recovers the key and version from an encoded secret integer
///
/// Big-integer serialization drops leading zero bytes, so the integer is left-padded back
/// to the full 65-byte frame before the header is read.
///
/// # Errors
/// `MalformedSecret` if the integer is negative, wider than the frame, announces a key
/// longer than 32 bytes, or carries non-zero padding.
pub fn decode_secret(value: &BigInt) -> Result<DecodedSecret> {
    let (sign, bytes) = value.to_bytes_be();
    if sign == Sign::Minus {
        return Err(UnsealError::MalformedSecret(
            "negative secret integer".to_string(),
        ));
    }
    if bytes.len() > ENCODED_LEN {
        return Err(UnsealError::MalformedSecret(format!(
            "encoded secret is {} bytes, frame is {ENCODED_LEN}",
            bytes.len()
        )));
    }

    let mut data = [0u8; ENCODED_LEN];
    data[ENCODED_LEN - bytes.len()..].copy_from_slice(&bytes);

    let version = data[0] >> 6;
    let pad_len = (data[0] & 0x3F) as usize;
    let key_len = BODY_LEN - pad_len;
    if key_len > MAX_SECRET_LEN {
        return Err(UnsealError::MalformedSecret(format!(
            "header announces a {key_len} byte key"
        )));
    }

    if data[key_len + 1..].iter().any(|&b| b != 0) {
        return Err(UnsealError::MalformedSecret(
            "non-zero bytes in secret padding".to_string(),
        ));
    }

    Ok(DecodedSecret {
        key: data[1..=key_len].to_vec(),
        version,
    })
}
