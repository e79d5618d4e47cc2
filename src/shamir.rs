use std::collections::HashSet;

use num_bigint::{BigInt, Sign};
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::RngCore;
use rand_core::{SeedableRng, TryRngCore};
use rayon::prelude::*;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Result, UnsealError};
use crate::field::{MERSENNE_EXPONENT, PrimeField};
use crate::secret::{MAX_SECRET_LEN, SECRET_VERSION, decode_secret, encode_secret};
use crate::share::Share;

/// Largest threshold and share count; share indices must fit in 7 bits
pub const MAX_SHARES: u8 = 127;

/// Smallest threshold the scheme accepts
pub const MIN_THRESHOLD: u8 = 2;

/// Length of keys drawn by [`ShamirEngine::generate_master_shares`]
pub const MASTER_KEY_LEN: usize = 32;

const COEFFICIENT_BYTES: usize = MERSENNE_EXPONENT.div_ceil(8);

/// Shamir's Secret Sharing over the 2^521 - 1 prime field
///
/// The secret is encoded into a single field element and used as the constant term of a
/// random polynomial of degree `threshold - 1`. Each share is that polynomial evaluated at
/// x = 1..=n; any `threshold` shares recover the constant term by Lagrange interpolation.
///
/// # Security
///
/// - Polynomial coefficients come from ChaCha20Rng seeded from OsRng
/// - A failing OS random source is reported, never replaced by a weaker one
/// - The polynomial exists only for the duration of [`ShamirEngine::split`]
///
/// # Example
/// ```
/// use shamir_unseal::ShamirEngine;
///
/// let mut engine = ShamirEngine::new().unwrap();
/// let shares = engine.split(&[5, 6, 7, 8], 3, 5).unwrap();
/// assert_eq!(shares.len(), 5);
///
/// let secret = ShamirEngine::combine(&shares[1..4]).unwrap();
/// assert_eq!(secret, vec![5, 6, 7, 8]);
/// ```
pub struct ShamirEngine {
    field: PrimeField,
    /// Cryptographically secure random number generator
    rng: ChaCha20Rng,
}

impl ShamirEngine {
    /// Creates an engine with a freshly seeded CSPRNG
    ///
    /// # Errors
    /// `RandomSource` if the operating system cannot provide a seed.
    pub fn new() -> Result<Self> {
        let rng = ChaCha20Rng::try_from_rng(&mut OsRng)
            .map_err(|e| UnsealError::RandomSource(e.to_string()))?;
        Ok(Self {
            field: PrimeField::mersenne_521(),
            rng,
        })
    }

    /// Splits `secret` into `total_shares` shares, any `threshold` of which recover it
    ///
    /// Shares are returned in ascending index order, starting at 1.
    ///
    /// # Errors
    /// - `InvalidSecretLength` unless `1 <= secret.len() <= 32`
    /// - `InvalidThreshold` unless `2 <= threshold <= 127`
    /// - `InvalidShareCount` unless `threshold <= total_shares <= 127`
    pub fn split(&mut self, secret: &[u8], threshold: u8, total_shares: u8) -> Result<Vec<Share>> {
        validate_parameters(secret.len(), threshold, total_shares)?;

        let mut coefficients = Vec::with_capacity(threshold as usize);
        coefficients.push(encode_secret(secret, SECRET_VERSION)?);
        for _ in 1..threshold {
            coefficients.push(self.random_coefficient());
        }

        let field = &self.field;
        let shares: Vec<Share> = (1..=total_shares)
            .into_par_iter()
            .map(|x| Share::new(x, &evaluate(field, &coefficients, x)))
            .collect();

        debug!(threshold, total_shares, "secret split into shares");
        Ok(shares)
    }

    /// Splits `secret` and encodes each share as base64 text
    pub fn split_to_strings(
        &mut self,
        secret: &[u8],
        threshold: u8,
        total_shares: u8,
    ) -> Result<Vec<String>> {
        let shares = self.split(secret, threshold, total_shares)?;
        Ok(shares.iter().map(Share::to_base64).collect())
    }

    /// Draws a fresh 32-byte master key from the OS and returns only its base64 shares
    ///
    /// The key never leaves this function; it exists afterwards only as the shares.
    pub fn generate_master_shares(total_shares: u8, threshold: u8) -> Result<Vec<String>> {
        let mut key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
        OsRng
            .try_fill_bytes(key.as_mut_slice())
            .map_err(|e| UnsealError::RandomSource(e.to_string()))?;

        let mut engine = Self::new()?;
        engine.split_to_strings(key.as_slice(), threshold, total_shares)
    }

    /// Recovers the secret from two or more shares using Lagrange interpolation at x = 0
    ///
    /// Order of the shares does not matter. Supplying fewer shares than the threshold used
    /// at split time yields a wrong key or a `MalformedSecret` error; the scheme cannot tell
    /// the difference between an incomplete set and a different secret.
    ///
    /// # Errors
    /// - `InsufficientShares` for fewer than two shares
    /// - `DuplicateShareIndex` if two shares share an x-coordinate
    /// - `MalformedSecret` if the interpolated value is not a valid secret encoding
    pub fn combine(shares: &[Share]) -> Result<Vec<u8>> {
        if shares.len() < MIN_THRESHOLD as usize {
            return Err(UnsealError::InsufficientShares {
                needed: MIN_THRESHOLD as usize,
                got: shares.len(),
            });
        }

        let mut seen = HashSet::with_capacity(shares.len());
        for share in shares {
            if !seen.insert(share.index) {
                return Err(UnsealError::DuplicateShareIndex(share.index));
            }
        }

        let field = PrimeField::mersenne_521();
        let points: Vec<(BigInt, BigInt)> = shares
            .iter()
            .map(|s| (BigInt::from(s.index), s.value()))
            .collect();

        let constant = interpolate_at_zero(&field, &points)?;
        Ok(decode_secret(&constant)?.key)
    }

    /// Decodes raw share blobs and combines them
    pub fn combine_bytes<B: AsRef<[u8]>>(shares: &[B]) -> Result<Vec<u8>> {
        let decoded = shares
            .iter()
            .map(|s| Share::from_bytes(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::combine(&decoded)
    }

    /// Decodes base64 share text and combines it
    pub fn combine_strings<S: AsRef<str>>(shares: &[S]) -> Result<Vec<u8>> {
        let decoded = shares
            .iter()
            .map(|s| Share::from_base64(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::combine(&decoded)
    }

    /// Uniform value in `[0, p + 1)`
    ///
    /// p + 1 is exactly 2^521, so masking 521 random bits is already uniform.
    fn random_coefficient(&mut self) -> BigInt {
        let mut bytes = Zeroizing::new([0u8; COEFFICIENT_BYTES]);
        self.rng.fill_bytes(bytes.as_mut_slice());
        bytes[0] &= 0xFF >> (COEFFICIENT_BYTES * 8 - MERSENNE_EXPONENT);
        BigInt::from_bytes_be(Sign::Plus, bytes.as_slice())
    }
}

fn validate_parameters(secret_len: usize, threshold: u8, total_shares: u8) -> Result<()> {
    if secret_len == 0 || secret_len > MAX_SECRET_LEN {
        return Err(UnsealError::InvalidSecretLength(secret_len));
    }
    if !(MIN_THRESHOLD..=MAX_SHARES).contains(&threshold) {
        return Err(UnsealError::InvalidThreshold(threshold));
    }
    if total_shares < threshold || total_shares > MAX_SHARES {
        return Err(UnsealError::InvalidShareCount {
            total_shares,
            threshold,
        });
    }
    Ok(())
}

/// Horner evaluation of the polynomial at `x`, reducing at every step
fn evaluate(field: &PrimeField, coefficients: &[BigInt], x: u8) -> BigInt {
    let x = BigInt::from(x);
    coefficients
        .iter()
        .rev()
        .fold(BigInt::zero(), |acc, coeff| field.reduce(&(acc * &x + coeff)))
}

/// Lagrange interpolation at x = 0 with a single modular inverse
///
/// With `num_i = Π(0 - x_j)` and `den_i = Π(x_i - x_j)` over `j != i`, and `D = Π den_i`:
///
/// ```text
/// f(0) = Σ y_i * num_i / den_i = (Σ y_i * num_i * (D / den_i)) / D
/// ```
///
/// `D / den_i` is the product of the other denominators, built from prefix and suffix
/// products, so only `D` is ever inverted. Share values may be negative or unreduced.
fn interpolate_at_zero(field: &PrimeField, points: &[(BigInt, BigInt)]) -> Result<BigInt> {
    let count = points.len();
    let mut numerators = Vec::with_capacity(count);
    let mut denominators = Vec::with_capacity(count);

    for (i, (x_i, _)) in points.iter().enumerate() {
        let mut num = BigInt::one();
        let mut den = BigInt::one();
        for (j, (x_j, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            num = field.mul(&num, &-x_j);
            den = field.mul(&den, &(x_i - x_j));
        }
        numerators.push(num);
        denominators.push(den);
    }

    // prefix[i] = Π den_0..den_{i-1}, suffix[i] = Π den_{i+1}..den_{n-1}
    let mut prefix = Vec::with_capacity(count);
    let mut acc = BigInt::one();
    for den in &denominators {
        prefix.push(acc.clone());
        acc = field.mul(&acc, den);
    }
    let aggregate = acc;

    let mut suffix = vec![BigInt::one(); count];
    let mut acc = BigInt::one();
    for i in (0..count).rev() {
        suffix[i] = acc.clone();
        acc = field.mul(&acc, &denominators[i]);
    }

    let mut sum = BigInt::zero();
    for (i, (_, y_i)) in points.iter().enumerate() {
        let others = field.mul(&prefix[i], &suffix[i]);
        let term = field.mul(&field.mul(y_i, &numerators[i]), &others);
        sum = field.add(&sum, &term);
    }

    let quotient = field.div(&sum, &aggregate).ok_or_else(|| {
        UnsealError::MalformedShare("share indices are not distinct in the field".to_string())
    })?;
    Ok(field.reduce(&(quotient + field.modulus())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; 4] = [5, 6, 7, 8];

    fn pick(shares: &[Share], indices: &[usize]) -> Vec<Share> {
        indices.iter().map(|&i| shares[i].clone()).collect()
    }

    #[test]
    fn test_split_and_combine() {
        let mut engine = ShamirEngine::new().unwrap();
        let shares = engine.split(&SECRET, 3, 5).unwrap();
        assert_eq!(shares.len(), 5);

        for (i, share) in shares.iter().enumerate() {
            assert_eq!(share.index as usize, i + 1);
            assert!(!share.negative);
        }

        assert_eq!(ShamirEngine::combine(&shares[0..3]).unwrap(), SECRET);
        assert_eq!(ShamirEngine::combine(&shares).unwrap(), SECRET);
    }

    #[test]
    fn test_every_three_subset_in_any_order() {
        let mut engine = ShamirEngine::new().unwrap();
        let shares = engine.split(&SECRET, 3, 5).unwrap();

        for a in 0..5 {
            for b in (a + 1)..5 {
                for c in (b + 1)..5 {
                    let forward = pick(&shares, &[a, b, c]);
                    let backward = pick(&shares, &[c, a, b]);
                    assert_eq!(ShamirEngine::combine(&forward).unwrap(), SECRET);
                    assert_eq!(ShamirEngine::combine(&backward).unwrap(), SECRET);
                }
            }
        }
    }

    #[test]
    fn test_two_shares_do_not_recover_three_threshold() {
        let mut engine = ShamirEngine::new().unwrap();
        let shares = engine.split(&SECRET, 3, 5).unwrap();

        for a in 0..5 {
            for b in (a + 1)..5 {
                match ShamirEngine::combine(&pick(&shares, &[a, b])) {
                    Ok(key) => assert_ne!(key, SECRET),
                    Err(e) => assert!(matches!(e, UnsealError::MalformedSecret(_))),
                }
            }
        }
    }

    #[test]
    fn test_split_parameter_bounds() {
        let mut engine = ShamirEngine::new().unwrap();
        assert!(matches!(
            engine.split(&[], 2, 3),
            Err(UnsealError::InvalidSecretLength(0))
        ));
        assert!(matches!(
            engine.split(&[1u8; 33], 2, 3),
            Err(UnsealError::InvalidSecretLength(33))
        ));
        assert!(matches!(
            engine.split(&SECRET, 1, 3),
            Err(UnsealError::InvalidThreshold(1))
        ));
        assert!(matches!(
            engine.split(&SECRET, 128, 128),
            Err(UnsealError::InvalidThreshold(128))
        ));
        assert!(matches!(
            engine.split(&SECRET, 4, 3),
            Err(UnsealError::InvalidShareCount { total_shares: 3, threshold: 4 })
        ));
        assert!(matches!(
            engine.split(&SECRET, 3, 128),
            Err(UnsealError::InvalidShareCount { total_shares: 128, threshold: 3 })
        ));
    }

    #[test]
    fn test_threshold_equals_share_count() {
        let mut engine = ShamirEngine::new().unwrap();
        let secret = [0xA5u8; 32];
        let shares = engine.split(&secret, 4, 4).unwrap();
        assert_eq!(ShamirEngine::combine(&shares).unwrap(), secret);
    }

    #[test]
    fn test_maximum_share_count() {
        let mut engine = ShamirEngine::new().unwrap();
        let secret: Vec<u8> = (1..=32).collect();
        let shares = engine.split(&secret, MAX_SHARES, MAX_SHARES).unwrap();
        assert_eq!(shares.last().unwrap().index, 127);
        assert_eq!(ShamirEngine::combine(&shares).unwrap(), secret);
    }

    #[test]
    fn test_combine_rejects_duplicates() {
        let mut engine = ShamirEngine::new().unwrap();
        let shares = engine.split(&SECRET, 3, 5).unwrap();
        let duplicated = pick(&shares, &[0, 1, 1]);
        assert!(matches!(
            ShamirEngine::combine(&duplicated),
            Err(UnsealError::DuplicateShareIndex(2))
        ));
    }

    #[test]
    fn test_combine_needs_two_shares() {
        let mut engine = ShamirEngine::new().unwrap();
        let shares = engine.split(&SECRET, 2, 3).unwrap();
        assert!(matches!(
            ShamirEngine::combine(&shares[0..1]),
            Err(UnsealError::InsufficientShares { needed: 2, got: 1 })
        ));
        assert!(ShamirEngine::combine(&[]).is_err());
    }

    #[test]
    fn test_negative_share_values_are_honoured() {
        let mut engine = ShamirEngine::new().unwrap();
        let shares = engine.split(&SECRET, 3, 5).unwrap();
        let modulus = PrimeField::mersenne_521().modulus().clone();

        // y - p is the same field element, carried with the sign bit set
        let shifted: Vec<Share> = shares[0..3]
            .iter()
            .map(|s| Share::new(s.index, &(s.value() - &modulus)))
            .collect();
        assert!(shifted.iter().all(|s| s.negative));

        let blobs: Vec<Vec<u8>> = shifted.iter().map(Share::to_bytes).collect();
        assert!(blobs.iter().all(|b| b[0] & 0x20 != 0));
        assert_eq!(ShamirEngine::combine_bytes(&blobs).unwrap(), SECRET);
    }

    #[test]
    fn test_combine_bytes_rejects_short_blobs() {
        let mut engine = ShamirEngine::new().unwrap();
        let mut blobs: Vec<Vec<u8>> = engine
            .split(&SECRET, 2, 3)
            .unwrap()
            .iter()
            .map(Share::to_bytes)
            .collect();
        blobs[1] = vec![0, 2];
        assert!(matches!(
            ShamirEngine::combine_bytes(&blobs),
            Err(UnsealError::MalformedShare(_))
        ));
    }

    #[test]
    fn test_string_roundtrip() {
        let mut engine = ShamirEngine::new().unwrap();
        let secret = [1u8, 2, 3, 4, 5, 6];
        let shares = engine.split_to_strings(&secret, 3, 5).unwrap();
        assert_eq!(ShamirEngine::combine_strings(&shares[2..5]).unwrap(), secret);
    }

    #[test]
    fn test_generate_master_shares() {
        let shares = ShamirEngine::generate_master_shares(5, 3).unwrap();
        assert_eq!(shares.len(), 5);

        let first = ShamirEngine::combine_strings(&shares[0..3]).unwrap();
        let second = ShamirEngine::combine_strings(&shares[2..5]).unwrap();
        assert_eq!(first.len(), MASTER_KEY_LEN);
        assert_eq!(first, second);
    }

    #[test]
    fn test_random_coefficient_below_bound() {
        let mut engine = ShamirEngine::new().unwrap();
        let bound = engine.field.coefficient_bound();
        for _ in 0..64 {
            assert!(engine.random_coefficient() < bound);
        }
    }

    #[test]
    fn test_evaluate_horner() {
        let field = PrimeField::new(BigInt::from(97));
        // 3 + 2x + x^2 at x = 5 is 38
        let coefficients = [BigInt::from(3), BigInt::from(2), BigInt::from(1)];
        assert_eq!(evaluate(&field, &coefficients, 5), BigInt::from(38));
    }
}
