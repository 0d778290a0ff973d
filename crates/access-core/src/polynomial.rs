//! Sparse polynomials over the protocol modulus
//!
//! A polynomial is an ordered list of `{degree, coefficient}` terms. Canonical form:
//! terms sorted by ascending degree, no two terms sharing a degree. Zero coefficients
//! are kept as explicit terms; they do not change any evaluation.

use crate::bigfield::{decimal, random_bounded, Modulus};
use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A single `coefficient * x^degree` term
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    /// Exponent of x
    #[serde(with = "decimal")]
    pub degree: BigUint,
    /// Coefficient
    #[serde(with = "decimal")]
    pub coefficient: BigUint,
}

impl Term {
    /// Create a new term
    pub fn new(degree: impl Into<BigUint>, coefficient: impl Into<BigUint>) -> Self {
        Term {
            degree: degree.into(),
            coefficient: coefficient.into(),
        }
    }
}

/// Sparse polynomial in canonical form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Term>", into = "Vec<Term>")]
pub struct Polynomial {
    terms: Vec<Term>,
}

impl Polynomial {
    /// The zero polynomial (no terms)
    pub fn zero() -> Self {
        Polynomial { terms: Vec::new() }
    }

    /// Build from an arbitrary term list, canonicalizing it
    pub fn from_terms(terms: Vec<Term>) -> Self {
        Polynomial {
            terms: canonicalize(terms),
        }
    }

    /// Random polynomial with `num_terms` draws; degrees and coefficients are at most
    /// `bits` bits wide. Colliding degrees merge, so the result may hold fewer terms.
    pub fn random<R: Rng + ?Sized>(num_terms: usize, bits: u64, rng: &mut R) -> Self {
        let terms = (0..num_terms)
            .map(|_| Term {
                degree: random_bounded(bits, rng),
                coefficient: random_bounded(bits, rng),
            })
            .collect();
        Self::from_terms(terms)
    }

    /// Canonical terms
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Number of terms
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// True for the zero polynomial
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Coefficient of `x^degree`, if such a term exists
    pub fn coefficient(&self, degree: &BigUint) -> Option<&BigUint> {
        self.terms
            .binary_search_by(|t| t.degree.cmp(degree))
            .ok()
            .map(|i| &self.terms[i].coefficient)
    }

    /// `p + q`: concatenate, sort, merge equal degrees, reduce coefficients
    pub fn add(&self, other: &Polynomial, modulus: &Modulus) -> Polynomial {
        let mut terms = Vec::with_capacity(self.terms.len() + other.terms.len());
        terms.extend(self.terms.iter().cloned());
        terms.extend(other.terms.iter().cloned());
        Polynomial::from_terms(terms).reduce(modulus)
    }

    /// Reduce every coefficient modulo `modulus`
    pub fn reduce(mut self, modulus: &Modulus) -> Polynomial {
        for term in &mut self.terms {
            term.coefficient = modulus.reduce(&term.coefficient);
        }
        self
    }

    /// `Σ coefficient_i * x^degree_i mod m`, each power computed with `modpow`
    pub fn evaluate(&self, x: &BigUint, modulus: &Modulus) -> BigUint {
        self.terms.iter().fold(BigUint::zero(), |acc, term| {
            let power = modulus.pow(x, &term.degree);
            let product = modulus.mul(&power, &term.coefficient);
            modulus.add(&acc, &product)
        })
    }
}

impl From<Vec<Term>> for Polynomial {
    fn from(terms: Vec<Term>) -> Self {
        Polynomial::from_terms(terms)
    }
}

impl From<Polynomial> for Vec<Term> {
    fn from(poly: Polynomial) -> Self {
        poly.terms
    }
}

/// Sort by degree and merge equal-degree terms by summing coefficients.
///
/// Idempotent; the output never contains two terms with the same degree.
pub fn canonicalize(mut terms: Vec<Term>) -> Vec<Term> {
    terms.sort_by(|a, b| a.degree.cmp(&b.degree));

    let mut merged: Vec<Term> = Vec::with_capacity(terms.len());
    for term in terms {
        match merged.last_mut() {
            Some(last) if last.degree == term.degree => {
                last.coefficient += term.coefficient;
            }
            _ => merged.push(term),
        }
    }
    merged
}
