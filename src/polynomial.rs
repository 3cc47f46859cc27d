//! Batch polynomials and root algebra.
//!
//! A batch with members `s_1..s_n` is represented by `(x - s_1)...(x - s_n)`.
//! Adding a member multiplies by `(x - s)`, removing one divides it back out,
//! and membership is an evaluation that lands on zero.

use crate::field::{self, FieldElement, FieldError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while decoding a stored polynomial.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolynomialError {
    #[error("polynomial has no coefficients")]
    Empty,

    #[error("coefficient {index} is invalid: {source}")]
    Coefficient {
        index: usize,
        #[source]
        source: FieldError,
    },
}

/// Coefficients in ascending degree order: index 0 is the constant term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldElement>", into = "Vec<FieldElement>")]
pub struct Polynomial {
    coefficients: Vec<FieldElement>,
}

impl Polynomial {
    pub fn new(coefficients: Vec<FieldElement>) -> Result<Self, PolynomialError> {
        if coefficients.is_empty() {
            return Err(PolynomialError::Empty);
        }
        Ok(Self { coefficients })
    }

    /// The zero-member polynomial `[1]`.
    #[must_use]
    pub fn empty_batch() -> Self {
        Self {
            coefficients: vec![FieldElement::one()],
        }
    }

    /// Builds `(x - r_1)...(x - r_n)`.
    #[must_use]
    pub fn from_roots<'a, I>(roots: I) -> Self
    where
        I: IntoIterator<Item = &'a FieldElement>,
    {
        roots
            .into_iter()
            .fold(Self::empty_batch(), |poly, root| poly.add_root(root))
    }

    #[must_use]
    pub fn coefficients(&self) -> &[FieldElement] {
        &self.coefficients
    }

    #[must_use]
    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    /// Number of members implied by the degree of a batch polynomial.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.degree()
    }

    #[must_use]
    pub fn leading_coefficient(&self) -> &FieldElement {
        &self.coefficients[self.coefficients.len() - 1]
    }

    #[must_use]
    pub fn is_monic(&self) -> bool {
        self.leading_coefficient().is_one()
    }

    /// Computes `self(x) * (x - root)` by synthetic multiplication.
    ///
    /// Result coefficient `k` is `self[k-1] - root * self[k]`, with
    /// out-of-range indices read as zero.
    #[must_use]
    pub fn add_root(&self, root: &FieldElement) -> Polynomial {
        let n = self.coefficients.len();
        let zero = FieldElement::zero();
        let mut result = Vec::with_capacity(n + 1);

        for k in 0..=n {
            let shifted = if k > 0 { &self.coefficients[k - 1] } else { &zero };
            let current = self.coefficients.get(k).unwrap_or(&zero);
            result.push(field::sub(shifted, &field::mul(root, current)));
        }

        Polynomial {
            coefficients: result,
        }
    }

    /// Divides `self(x)` by `(x - root)`.
    ///
    /// Returns `None` when `root` is not a root of `self`, including the case
    /// of a constant polynomial, which has no roots to divide out.
    #[must_use]
    pub fn remove_root(&self, root: &FieldElement) -> Option<Polynomial> {
        let n = self.coefficients.len();
        if n < 2 {
            return None;
        }

        // Synthetic division from the leading coefficient down. quotient[k-1]
        // is the running Horner value after consuming coefficient k.
        let mut quotient = vec![FieldElement::zero(); n - 1];
        let mut carry = FieldElement::zero();
        for k in (1..n).rev() {
            carry = field::add(&self.coefficients[k], &field::mul(root, &carry));
            quotient[k - 1] = carry.clone();
        }

        let remainder = field::add(&self.coefficients[0], &field::mul(root, &carry));
        if !remainder.is_zero() {
            return None;
        }

        Some(Polynomial {
            coefficients: quotient,
        })
    }

    /// Evaluates the polynomial at `x` with Horner's method.
    #[must_use]
    pub fn evaluate(&self, x: &FieldElement) -> FieldElement {
        self.coefficients
            .iter()
            .rev()
            .fold(FieldElement::zero(), |acc, coefficient| {
                field::add(&field::mul(&acc, x), coefficient)
            })
    }

    /// True iff `self(root) == 0`.
    #[must_use]
    pub fn verify_root(&self, root: &FieldElement) -> bool {
        self.evaluate(root).is_zero()
    }

    /// Storage form: one decimal string per coefficient, ascending degree.
    #[must_use]
    pub fn to_decimal_strings(&self) -> Vec<String> {
        self.coefficients
            .iter()
            .map(FieldElement::to_decimal)
            .collect()
    }

    pub fn from_decimal_strings<S: AsRef<str>>(values: &[S]) -> Result<Self, PolynomialError> {
        let coefficients = values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                FieldElement::from_decimal(value.as_ref())
                    .map_err(|source| PolynomialError::Coefficient { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(coefficients)
    }
}

impl Default for Polynomial {
    fn default() -> Self {
        Self::empty_batch()
    }
}

impl TryFrom<Vec<FieldElement>> for Polynomial {
    type Error = PolynomialError;

    fn try_from(coefficients: Vec<FieldElement>) -> Result<Self, Self::Error> {
        Self::new(coefficients)
    }
}

impl From<Polynomial> for Vec<FieldElement> {
    fn from(poly: Polynomial) -> Self {
        poly.coefficients
    }
}

impl fmt::Display for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Polynomial(degree {}): [{}]",
            self.degree(),
            self.to_decimal_strings().join(", ")
        )
    }
}
