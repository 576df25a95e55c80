#![crate_name = "gendb_util"]
#![crate_type = "lib"]
#![warn(missing_docs, unused_imports)]

//! Modular arithmetic utilities for the gendb crates.

#[cfg(test)]
#[macro_use]
extern crate proptest;

use num_bigint_dig::{prime::probably_prime, BigUint, ModInverse};
use num_traits::cast::ToPrimitive;

/// Returns whether the modulus p is prime; this function is 100% accurate.
pub fn is_prime(p: u64) -> bool {
    probably_prime(&BigUint::from(p), 0)
}

/// Computes the modular multiplicative inverse of `a` modulo `p`. Returns
/// `None` if `a` is not invertible modulo `p`.
pub fn inverse(a: u64, p: u64) -> Option<u64> {
    let p = BigUint::from(p);
    let a = BigUint::from(a);
    a.mod_inverse(p)?.to_u64()
}

/// Returns `(a + b) mod p`. Both inputs must already be reduced.
pub fn add_mod(a: u64, b: u64, p: u64) -> u64 {
    ((a as u128 + b as u128) % p as u128) as u64
}

/// Returns `(a - b) mod p`. Both inputs must already be reduced.
pub fn sub_mod(a: u64, b: u64, p: u64) -> u64 {
    ((a as u128 + p as u128 - b as u128) % p as u128) as u64
}

/// Returns `(a * b) mod p`.
pub fn mul_mod(a: u64, b: u64, p: u64) -> u64 {
    ((a as u128 * b as u128) % p as u128) as u64
}

/// Maps a signed integer to its representative in `[0, p)`.
pub fn reduce_signed(a: i64, p: u64) -> u64 {
    a.rem_euclid(p as i64) as u64
}

/// Maps a residue in `[0, p)` to the centered interval `(-p/2, p/2]`.
pub fn center(a: u64, p: u64) -> i64 {
    if a > p / 2 {
        -((p - a) as i64)
    } else {
        a as i64
    }
}

/// Returns the largest power of two smaller than or equal to `n`.
/// Panics when `n` is 0.
pub fn prev_power_of_two(n: usize) -> usize {
    assert!(n > 0);
    1 << n.ilog2()
}

/// Lagrange interpolation over the points `0, 1, ..., n - 1` modulo `p`.
///
/// The quantities that only depend on the points are computed once, so that
/// interpolating many value vectors over the same points cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpolator {
    p: u64,
    // (x - 0)(x - 1)...(x - (n - 1)), from the constant term upwards.
    full: Vec<u64>,
    // inverse of prod_{j != i} (i - j), for every point i.
    inverse_denominators: Vec<u64>,
}

impl Interpolator {
    /// Prepare the interpolation over `n` points modulo `p`. Returns `None`
    /// when the points are not distinct modulo `p`, or when their pairwise
    /// differences are not invertible modulo `p`.
    pub fn new(n: usize, p: u64) -> Option<Self> {
        if p < 2 || n as u64 > p {
            return None;
        }

        let mut full = vec![0u64; n + 1];
        full[0] = 1;
        for j in 0..n as u64 {
            let neg_j = (p - j % p) % p;
            for k in (0..=n).rev() {
                let shifted = if k > 0 { full[k - 1] } else { 0 };
                full[k] = add_mod(shifted, mul_mod(full[k], neg_j, p), p);
            }
        }

        // prod_{j != i} (i - j) = i! (n - 1 - i)! (-1)^(n - 1 - i).
        let mut factorials = vec![1u64; n.max(1)];
        for i in 1..n {
            factorials[i] = mul_mod(factorials[i - 1], i as u64 % p, p);
        }
        let inverse_denominators = (0..n)
            .map(|i| {
                let d = mul_mod(factorials[i], factorials[n - 1 - i], p);
                let d = if (n - 1 - i) % 2 == 1 { sub_mod(0, d, p) } else { d };
                inverse(d, p)
            })
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            p,
            full,
            inverse_denominators,
        })
    }

    /// Returns the number of interpolation points.
    pub fn points(&self) -> usize {
        self.inverse_denominators.len()
    }

    /// Returns the modulus.
    pub fn modulus(&self) -> u64 {
        self.p
    }

    /// Computes the coefficients, from the constant term upwards, of the
    /// unique polynomial of degree smaller than [`Self::points`] taking value
    /// `values[x]` at every point `x`. Missing values are taken to be zero,
    /// and extra values are ignored.
    pub fn interpolate(&self, values: &[u64]) -> Vec<u64> {
        let (p, n) = (self.p, self.points());
        let mut coefficients = vec![0u64; n];
        for (i, &y) in values.iter().take(n).enumerate() {
            let y = y % p;
            if y == 0 {
                continue;
            }

            // Synthetic division of full by (x - i).
            let mut quotient = vec![0u64; n];
            let mut carry = 0u64;
            for k in (1..=n).rev() {
                carry = add_mod(self.full[k], mul_mod(carry, i as u64, p), p);
                quotient[k - 1] = carry;
            }

            let scale = mul_mod(y, self.inverse_denominators[i], p);
            for (c, q) in coefficients.iter_mut().zip(quotient) {
                *c = add_mod(*c, mul_mod(q, scale, p), p);
            }
        }
        coefficients
    }
}

/// Computes the coefficients, from the constant term upwards, of the unique
/// polynomial of degree smaller than `values.len()` taking value `values[x]`
/// at every `x` in `0..values.len()`, modulo the prime `p`.
///
/// Returns `None` when the interpolation points are not distinct modulo `p`.
pub fn interpolate(values: &[u64], p: u64) -> Option<Vec<u64>> {
    Interpolator::new(values.len(), p).map(|i| i.interpolate(values))
}

/// Evaluates the polynomial with the given coefficients at `x` modulo `p`.
pub fn evaluate(coefficients: &[u64], x: u64, p: u64) -> u64 {
    coefficients
        .iter()
        .rev()
        .fold(0, |acc, c| add_mod(mul_mod(acc, x, p), *c % p, p))
}
