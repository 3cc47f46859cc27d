//! BN254 scalar field arithmetic.
//!
//! Every value that flows through the batch polynomials is a [`FieldElement`],
//! an arbitrary-precision integer kept in the range `0 <= v < P`. The
//! constructor reduces its input, so no operation can observe an unreduced
//! value.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Decimal representation of the BN254 scalar field order.
pub const MODULUS_DECIMAL: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

static MODULUS: LazyLock<BigUint> = LazyLock::new(|| {
    BigUint::parse_bytes(MODULUS_DECIMAL.as_bytes(), 10).unwrap_or_else(BigUint::zero)
});

/// Returns the field modulus `P`.
#[inline]
#[must_use]
pub fn modulus() -> &'static BigUint {
    &MODULUS
}

/// Errors raised when decoding a field element from its storage form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("'{0}' is not a decimal integer")]
    InvalidDecimal(String),

    #[error("{0} is not a canonical field element (must be below the field modulus)")]
    NonCanonical(String),
}

/// An element of the BN254 scalar field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldElement(BigUint);

impl FieldElement {
    /// Builds a field element, reducing `value` modulo `P`.
    #[must_use]
    pub fn new(value: BigUint) -> Self {
        if &value < modulus() {
            Self(value)
        } else {
            Self(value % modulus())
        }
    }

    #[must_use]
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    #[must_use]
    pub fn one() -> Self {
        Self(BigUint::one())
    }

    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self::new(BigUint::from(value))
    }

    /// Interprets `bytes` as a big-endian unsigned integer and reduces it.
    #[must_use]
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        Self::new(BigUint::from_bytes_be(bytes))
    }

    /// Parses the canonical decimal form used at the storage boundary.
    ///
    /// Unlike [`FieldElement::new`], values at or above the modulus are
    /// rejected instead of reduced: a stored coefficient that large means the
    /// record was written by something other than this crate.
    pub fn from_decimal(s: &str) -> Result<Self, FieldError> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FieldError::InvalidDecimal(s.to_string()));
        }
        let value = BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| FieldError::InvalidDecimal(s.to_string()))?;
        if &value >= modulus() {
            return Err(FieldError::NonCanonical(s.to_string()));
        }
        Ok(Self(value))
    }

    /// Canonical decimal form, with no leading zeros.
    #[must_use]
    pub fn to_decimal(&self) -> String {
        self.0.to_str_radix(10)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[must_use]
    pub fn is_one(&self) -> bool {
        self.0.is_one()
    }

    #[must_use]
    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

/// `(a + b) mod P`.
#[must_use]
pub fn add(a: &FieldElement, b: &FieldElement) -> FieldElement {
    FieldElement::new(&a.0 + &b.0)
}

/// `(a - b) mod P`, lifted by `P` when `a < b` so the result is never negative.
#[must_use]
pub fn sub(a: &FieldElement, b: &FieldElement) -> FieldElement {
    if a.0 >= b.0 {
        FieldElement::new(&a.0 - &b.0)
    } else {
        FieldElement::new(&a.0 + modulus() - &b.0)
    }
}

/// `(a * b) mod P`.
#[must_use]
pub fn mul(a: &FieldElement, b: &FieldElement) -> FieldElement {
    FieldElement::new(&a.0 * &b.0)
}

/// `(-a) mod P`.
#[must_use]
pub fn neg(a: &FieldElement) -> FieldElement {
    sub(&FieldElement::zero(), a)
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $func:ident) => {
        impl $trait<&FieldElement> for &FieldElement {
            type Output = FieldElement;
            fn $method(self, rhs: &FieldElement) -> FieldElement {
                $func(self, rhs)
            }
        }

        impl $trait for FieldElement {
            type Output = FieldElement;
            fn $method(self, rhs: FieldElement) -> FieldElement {
                $func(&self, &rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, add);
impl_binary_op!(Sub, sub, sub);
impl_binary_op!(Mul, mul, mul);

impl Neg for &FieldElement {
    type Output = FieldElement;
    fn neg(self) -> FieldElement {
        neg(self)
    }
}

impl Neg for FieldElement {
    type Output = FieldElement;
    fn neg(self) -> FieldElement {
        neg(&self)
    }
}

impl Default for FieldElement {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<BigUint> for FieldElement {
    fn from(value: BigUint) -> Self {
        Self::new(value)
    }
}

impl FromStr for FieldElement {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_decimal(s)
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_decimal(&s).map_err(serde::de::Error::custom)
    }
}
