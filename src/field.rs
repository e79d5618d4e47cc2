use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Zero};
use once_cell::sync::Lazy;

/// Exponent of the Mersenne prime used for all share arithmetic
pub const MERSENNE_EXPONENT: usize = 521;

static MERSENNE_521: Lazy<BigInt> =
    Lazy::new(|| (BigInt::one() << MERSENNE_EXPONENT) - BigInt::one());

/// Floor division (rounds towards negative infinity)
#[inline]
pub fn floor_div(a: &BigInt, b: &BigInt) -> BigInt {
    a.div_floor(b)
}

/// Euclidean remainder, always in `[0, modulus)` for a positive modulus
#[inline]
pub fn euclid_mod(a: &BigInt, modulus: &BigInt) -> BigInt {
    a.mod_floor(modulus)
}

/// Extended Euclidean algorithm
///
/// Returns Bézout coefficients `(x, y)` such that `a*x + b*y = gcd(a, b)`.
/// The coefficients are not reduced; callers reduce them into the field.
///
/// # Example
/// ```
/// use num_bigint::BigInt;
/// use shamir_unseal::field::extended_gcd;
///
/// let (a, b) = (BigInt::from(240), BigInt::from(46));
/// let (x, y) = extended_gcd(&a, &b);
/// assert_eq!(&a * x + &b * y, BigInt::from(2));
/// ```
pub fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt) {
    let (mut a, mut b) = (a.clone(), b.clone());
    let (mut x, mut last_x) = (BigInt::zero(), BigInt::one());
    let (mut y, mut last_y) = (BigInt::one(), BigInt::zero());

    while !b.is_zero() {
        let quot = floor_div(&a, &b);
        let rem = euclid_mod(&a, &b);
        a = std::mem::replace(&mut b, rem);

        let next_x = &last_x - &quot * &x;
        last_x = std::mem::replace(&mut x, next_x);
        let next_y = &last_y - &quot * &y;
        last_y = std::mem::replace(&mut y, next_y);
    }

    (last_x, last_y)
}

/// Arithmetic in the prime field Z_p
///
/// Every method returns a value already reduced into `[0, p)`, so operands may be
/// negative or larger than the modulus.
///
/// # Example
/// ```
/// use num_bigint::BigInt;
/// use shamir_unseal::field::PrimeField;
///
/// let field = PrimeField::new(BigInt::from(7));
/// assert_eq!(field.add(&BigInt::from(5), &BigInt::from(4)), BigInt::from(2));
/// assert_eq!(field.inverse(&BigInt::from(3)), Some(BigInt::from(5)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimeField {
    modulus: BigInt,
}

impl PrimeField {
    /// Creates a field over the given (positive, prime) modulus
    pub fn new(modulus: BigInt) -> Self {
        Self { modulus }
    }

    /// The field over the 13th Mersenne prime, 2^521 - 1
    pub fn mersenne_521() -> Self {
        Self::new(MERSENNE_521.clone())
    }

    #[inline]
    pub fn modulus(&self) -> &BigInt {
        &self.modulus
    }

    /// Exclusive upper bound for uniformly drawn polynomial coefficients (p + 1)
    pub fn coefficient_bound(&self) -> BigInt {
        &self.modulus + BigInt::one()
    }

    #[inline]
    pub fn reduce(&self, a: &BigInt) -> BigInt {
        euclid_mod(a, &self.modulus)
    }

    #[inline]
    pub fn add(&self, a: &BigInt, b: &BigInt) -> BigInt {
        self.reduce(&(a + b))
    }

    #[inline]
    pub fn sub(&self, a: &BigInt, b: &BigInt) -> BigInt {
        self.reduce(&(a - b))
    }

    #[inline]
    pub fn mul(&self, a: &BigInt, b: &BigInt) -> BigInt {
        self.reduce(&(a * b))
    }

    /// Multiplicative inverse via the extended Euclidean algorithm
    ///
    /// Returns None when `a` shares a factor with the modulus (zero in a prime field).
    pub fn inverse(&self, a: &BigInt) -> Option<BigInt> {
        let a = self.reduce(a);
        if a.is_zero() {
            return None;
        }
        let (x, _) = extended_gcd(&a, &self.modulus);
        let inv = self.reduce(&x);
        if self.mul(&a, &inv).is_one() {
            Some(inv)
        } else {
            None
        }
    }

    /// Field division `a / b`, None when `b` has no inverse
    pub fn div(&self, a: &BigInt, b: &BigInt) -> Option<BigInt> {
        self.inverse(b).map(|inv| self.mul(a, &inv))
    }
}
