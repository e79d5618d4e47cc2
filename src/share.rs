use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use num_bigint::{BigInt, Sign};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, UnsealError};

/// Share format version written by this crate
///
/// Shares already handed out to operators carry version 0, so it stays 0.
pub const SHARE_VERSION: u8 = 0;

/// Shortest valid share blob: header, index and at least one magnitude byte
pub const MIN_SHARE_LEN: usize = 3;

const SIGN_BIT: u8 = 0x20;
const RESERVED_MASK: u8 = 0x1F;

/// One point `(index, value)` on a sharing polynomial
///
/// Wire format:
/// ```text
/// [version:2 | sign:1 | reserved:5][index][big-endian magnitude...]
/// ```
///
/// Shares produced by [`crate::ShamirEngine::split`] are always non-negative. The sign bit
/// is still honoured on input so externally produced, unreduced shares interpolate
/// correctly.
///
/// # Example
/// ```
/// use num_bigint::BigInt;
/// use shamir_unseal::Share;
///
/// let share = Share::new(3, &BigInt::from(-258));
/// let blob = share.to_bytes();
/// assert_eq!(blob, vec![0x20, 3, 1, 2]);
/// assert_eq!(Share::from_bytes(&blob).unwrap().value(), BigInt::from(-258));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// x-coordinate, 1..=127 for shares produced by split
    pub index: u8,
    /// Absolute value of the y-coordinate, big-endian
    pub magnitude: Vec<u8>,
    /// Whether the y-coordinate is negative
    pub negative: bool,
    /// Format version from the header's top two bits
    pub version: u8,
    /// Low five header bits, unused but carried through unchanged
    pub reserved: u8,
}

impl Share {
    /// Creates a share for `value` at x = `index`
    pub fn new(index: u8, value: &BigInt) -> Self {
        let (sign, magnitude) = value.to_bytes_be();
        Self {
            index,
            magnitude,
            negative: sign == Sign::Minus,
            version: SHARE_VERSION,
            reserved: 0,
        }
    }

    /// The signed y-coordinate
    pub fn value(&self) -> BigInt {
        let sign = if self.negative { Sign::Minus } else { Sign::Plus };
        BigInt::from_bytes_be(sign, &self.magnitude)
    }

    /// Serializes the share into its wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = ((self.version & 0x03) << 6) | (self.reserved & RESERVED_MASK);
        if self.negative {
            header |= SIGN_BIT;
        }
        let mut out = Vec::with_capacity(self.magnitude.len() + 2);
        out.push(header);
        out.push(self.index);
        out.extend_from_slice(&self.magnitude);
        out
    }

    /// Parses a share from its wire format
    ///
    /// Every blob of at least [`MIN_SHARE_LEN`] bytes parses, and [`Share::to_bytes`] gives
    /// the same bytes back.
    ///
    /// # Errors
    /// `MalformedShare` if the blob is shorter than [`MIN_SHARE_LEN`].
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_SHARE_LEN {
            return Err(UnsealError::MalformedShare(format!(
                "share is {} bytes, need at least {MIN_SHARE_LEN}",
                data.len()
            )));
        }
        Ok(Self {
            version: data[0] >> 6,
            negative: data[0] & SIGN_BIT != 0,
            reserved: data[0] & RESERVED_MASK,
            index: data[1],
            magnitude: data[2..].to_vec(),
        })
    }

    /// Standard base64 text, the form handed out to operators
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Parses operator-supplied base64 text, ignoring surrounding whitespace
    pub fn from_base64(text: &str) -> Result<Self> {
        let mut raw = BASE64
            .decode(text.trim())
            .map_err(|e| UnsealError::MalformedShare(format!("invalid base64: {e}")))?;
        let share = Self::from_bytes(&raw);
        raw.zeroize();
        share
    }
}
