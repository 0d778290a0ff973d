//! RSA blinding for the anonymous scheme
//!
//! The user raises its value to the public exponent before sending it to the
//! Dealers and raises the combined signature to the private exponent afterwards:
//!
//! ```text
//! ((m^e)^S)^d = (m^(e·d))^S = m^S  (mod n)
//! ```
//!
//! so Dealers only ever see `m^e`, yet the user ends up holding `m^S`. The key pair
//! is generated once per launch; `n` is handed to Dealers and Guards, `(e, d)` stay
//! with the user.

use crate::bigfield::{decimal, Modulus};
use crate::{AccessError, AccessResult};
use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Conventional public exponent
pub const PUBLIC_EXPONENT: u32 = 65_537;

/// Smallest modulus size accepted by [`BlindingKey::generate`]
pub const MIN_MODULUS_BITS: u64 = 16;

const MILLER_RABIN_ROUNDS: usize = 40;

const SMALL_PRIMES: [u32; 15] = [3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53];

/// RSA key pair used for blinding; held by the user only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindingKey {
    /// Modulus `n = p·q`
    #[serde(with = "decimal")]
    pub n: BigUint,
    /// Public exponent
    #[serde(with = "decimal")]
    pub e: BigUint,
    /// Private exponent, `e·d ≡ 1 (mod λ(n))`
    #[serde(with = "decimal")]
    pub d: BigUint,
}

impl BlindingKey {
    /// Generate a fresh key pair with a modulus of about `bits` bits
    pub fn generate<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> AccessResult<Self> {
        if bits < MIN_MODULUS_BITS {
            return Err(AccessError::KeyGeneration(format!(
                "modulus of {} bits is too small, need at least {}",
                bits, MIN_MODULUS_BITS
            )));
        }

        let e = BigUint::from(PUBLIC_EXPONENT);
        let p_bits = bits / 2;
        let q_bits = bits - p_bits;

        loop {
            let p = generate_prime(p_bits, rng);
            let q = generate_prime(q_bits, rng);
            if p == q {
                continue;
            }

            let lambda = (&p - 1u32).lcm(&(&q - 1u32));
            // Small moduli may have λ(n) < e; fall back to the smallest usable exponent
            let e = if lambda > e { e.clone() } else { smallest_coprime(&lambda) };
            let d = match mod_inverse(&e, &lambda) {
                Some(d) => d,
                None => continue,
            };

            log::debug!("generated {}-bit blinding modulus", (&p * &q).bits());
            return Ok(BlindingKey { n: p * q, e, d });
        }
    }

    /// Assemble from known parts, checking `e·d ≡ 1` on a sample value
    pub fn from_parts(n: BigUint, e: BigUint, d: BigUint) -> AccessResult<Self> {
        let key = BlindingKey { n, e, d };
        Modulus::new(key.n.clone())?;
        let probe = BigUint::from(2u32) % &key.n;
        if key.unblind(&key.blind(&probe)) != probe {
            return Err(AccessError::KeyGeneration(
                "exponents are not inverse modulo λ(n)".to_string(),
            ));
        }
        Ok(key)
    }

    /// Modulus shared with Dealers and Guards
    pub fn modulus(&self) -> AccessResult<Modulus> {
        Modulus::new(self.n.clone())
    }

    /// `value^e mod n`
    pub fn blind(&self, value: &BigUint) -> BigUint {
        value.modpow(&self.e, &self.n)
    }

    /// `signature^d mod n`
    pub fn unblind(&self, signature: &BigUint) -> BigUint {
        signature.modpow(&self.d, &self.n)
    }
}

/// Random probable prime with exactly `bits` bits
pub fn generate_prime<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    loop {
        let mut candidate = rng.gen_biguint(bits);
        // Force the top bit (exact size) and the low bit (odd)
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, MILLER_RABIN_ROUNDS, rng) {
            return candidate;
        }
    }
}

/// Miller–Rabin probabilistic primality test
pub fn is_probable_prime<R: Rng + ?Sized>(n: &BigUint, rounds: usize, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    for p in SMALL_PRIMES.iter().map(|p| BigUint::from(*p)).chain(std::iter::once(two.clone())) {
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// `a⁻¹ mod m` via the extended Euclidean algorithm
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a = BigInt::from_biguint(Sign::Plus, a.clone());
    let m = BigInt::from_biguint(Sign::Plus, m.clone());
    let gcd = a.extended_gcd(&m);
    if !gcd.gcd.is_one() {
        return None;
    }
    gcd.x.mod_floor(&m).to_biguint()
}

fn smallest_coprime(lambda: &BigUint) -> BigUint {
    let mut e = BigUint::from(3u32);
    while !e.gcd(lambda).is_one() {
        e += 2u32;
    }
    e
}
