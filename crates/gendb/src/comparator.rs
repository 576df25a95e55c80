//! Comparison of encrypted integers against a public threshold.

use gendb_traits::{Comparator, HomomorphicBackend};
use gendb_util::{is_prime, Interpolator};

use crate::{Error, ParametersError, Result};

/// Comparator evaluating the interpolation polynomial of the step function
/// `x <= t` over `[0, 2^bits)`.
///
/// The polynomial has degree `2^bits - 1`. Its powers are computed with a
/// product tree, so that the multiplicative depth is `bits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpolationComparator {
    bits: usize,
    interpolator: Interpolator,
}

impl InterpolationComparator {
    /// Create a comparator for inputs of `bits` bits, with `1 <= bits <= 16`,
    /// evaluated modulo the prime `plaintext_modulus`.
    pub fn new(bits: usize, plaintext_modulus: u64) -> Result<Self> {
        if !(1..=16).contains(&bits) {
            return Err(Error::ParametersError(ParametersError::InvalidComparatorBits(bits)));
        }
        if !is_prime(plaintext_modulus) {
            return Err(Error::ParametersError(ParametersError::InvalidPlaintext(format!(
                "Comparisons require a prime plaintext modulus, not {plaintext_modulus}"
            ))));
        }
        let interpolator = Interpolator::new(1 << bits, plaintext_modulus).ok_or_else(|| {
            Error::ParametersError(ParametersError::InvalidPlaintext(format!(
                "The plaintext modulus {plaintext_modulus} is too small for {bits}-bit comparisons"
            )))
        })?;
        Ok(Self { bits, interpolator })
    }

    /// Returns the bit width of the inputs.
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Coefficients of the step polynomial, from the constant term upwards.
    fn coefficients(&self, threshold: u64) -> Vec<u64> {
        let values = (0..1u64 << self.bits)
            .map(|x| (x <= threshold) as u64)
            .collect::<Vec<_>>();
        self.interpolator.interpolate(&values)
    }
}

impl<B: HomomorphicBackend> Comparator<B> for InterpolationComparator {
    fn input_bound(&self) -> u64 {
        1 << self.bits
    }

    fn supports(&self, plaintext_modulus: u64) -> bool {
        self.interpolator.modulus() == plaintext_modulus
    }

    fn less_or_equal(
        &self,
        backend: &B,
        x: &B::Ciphertext,
        threshold: u64,
    ) -> std::result::Result<B::Ciphertext, B::Error> {
        let coefficients = self.coefficients(threshold);
        let constant = |c: u64| backend.encode(&vec![c; backend.num_slots()]);

        // powers[i - 1] = x^i, the product of x^(i/2) and x^(i - i/2).
        let degree = coefficients.len().saturating_sub(1);
        let mut powers: Vec<B::Ciphertext> = Vec::with_capacity(degree);
        for i in 1..=degree {
            if i == 1 {
                powers.push(x.clone());
                continue;
            }
            let half = i / 2;
            let mut power = powers[half - 1].clone();
            if half == i - half {
                backend.square_assign(&mut power)?;
            } else {
                backend.multiply_assign(&mut power, &powers[i - half - 1])?;
            }
            powers.push(power);
        }

        let mut result = backend.zero()?;
        for (power, c) in powers.iter_mut().zip(coefficients.iter().skip(1)) {
            if *c != 0 {
                backend.multiply_plain_assign(power, &constant(*c)?)?;
                backend.add_assign(&mut result, power)?;
            }
        }
        if let Some(c) = coefficients.first() {
            backend.add_plain_assign(&mut result, &constant(*c)?)?;
        }
        Ok(result)
    }
}
