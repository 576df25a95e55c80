//! Parameters of the encryption scheme backing an encrypted table.

use crate::{Error, ParametersError, Result};
use gendb_util::is_prime;

/// Parameters of the encryption scheme.
///
/// The slot count and the capacity of fresh ciphertexts are derived from the
/// ring degree and the modulus chain. Only the first of the two SIMD rows is
/// used, so a ciphertext packs `degree / 2` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeParameters {
    degree: usize,
    plaintext: u64,
    lifting: usize,
    moduli_sizes: Box<[usize]>,
}

impl SchemeParameters {
    /// Returns the ring degree.
    pub const fn degree(&self) -> usize {
        self.degree
    }

    /// Returns the plaintext modulus.
    pub const fn plaintext(&self) -> u64 {
        self.plaintext
    }

    /// Returns the Hensel lifting exponent.
    pub const fn lifting(&self) -> usize {
        self.lifting
    }

    /// Returns the bit sizes of the moduli in the modulus chain.
    pub fn moduli_sizes(&self) -> &[usize] {
        &self.moduli_sizes
    }

    /// Returns the number of values packed in a ciphertext.
    pub const fn num_slots(&self) -> usize {
        self.degree / 2
    }

    /// Returns the total bit size of the modulus chain.
    pub fn modulus_budget(&self) -> usize {
        self.moduli_sizes.iter().sum()
    }

    /// Returns the number of digits used when switching keys. The key
    /// switching decomposes along the modulus chain, one digit per modulus.
    pub fn key_switch_columns(&self) -> usize {
        self.moduli_sizes.len()
    }
}

/// Builder for parameters of the encryption scheme.
#[derive(Debug)]
pub struct SchemeParametersBuilder {
    degree: usize,
    plaintext: u64,
    lifting: usize,
    moduli_sizes: Vec<usize>,
}

impl SchemeParametersBuilder {
    /// Creates a new instance of the builder
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            degree: Default::default(),
            plaintext: Default::default(),
            lifting: 1,
            moduli_sizes: Default::default(),
        }
    }

    /// Sets the ring degree. It must be a power of two larger or equal to 16.
    pub fn set_degree(&mut self, degree: usize) -> &mut Self {
        self.degree = degree;
        self
    }

    /// Sets the plaintext modulus. It must be a prime congruent to 1 modulo
    /// twice the degree, and coprime with 2 and 3.
    pub fn set_plaintext_modulus(&mut self, plaintext: u64) -> &mut Self {
        self.plaintext = plaintext;
        self
    }

    /// Sets the Hensel lifting exponent. Only 1 is supported.
    pub fn set_lifting(&mut self, lifting: usize) -> &mut Self {
        self.lifting = lifting;
        self
    }

    /// Sets the sizes of the moduli in the modulus chain.
    pub fn set_moduli_sizes(&mut self, sizes: &[usize]) -> &mut Self {
        self.moduli_sizes = sizes.to_vec();
        self
    }

    /// Build a new `SchemeParameters`.
    pub fn build(&self) -> Result<SchemeParameters> {
        if self.degree < 16 || !self.degree.is_power_of_two() {
            return Err(Error::ParametersError(ParametersError::InvalidDegree(
                self.degree,
            )));
        }

        if self.plaintext == 0 {
            return Err(Error::ParametersError(ParametersError::TooFewSpecified(
                "The plaintext modulus must be specified".to_string(),
            )));
        }
        // The equality polynomials divide by 2 and 3.
        if self.plaintext % 2 == 0 || self.plaintext % 3 == 0 {
            return Err(Error::ParametersError(ParametersError::InvalidPlaintext(
                format!(
                    "The plaintext modulus {} must be coprime with 2 and 3",
                    self.plaintext
                ),
            )));
        }
        if self.plaintext >> 62 != 0 || !is_prime(self.plaintext) {
            return Err(Error::ParametersError(ParametersError::InvalidPlaintext(
                format!("The plaintext modulus {} is not a prime", self.plaintext),
            )));
        }
        if self.plaintext % (2 * self.degree as u64) != 1 {
            return Err(Error::ParametersError(ParametersError::InvalidPlaintext(
                format!(
                    "The plaintext modulus {} does not support batching with degree {}",
                    self.plaintext, self.degree
                ),
            )));
        }

        if self.lifting != 1 {
            return Err(Error::ParametersError(
                ParametersError::UnsupportedLifting(self.lifting),
            ));
        }

        if self.moduli_sizes.is_empty() {
            return Err(Error::ParametersError(ParametersError::TooFewSpecified(
                "The sizes of the moduli must be specified".to_string(),
            )));
        }
        for size in &self.moduli_sizes {
            if !(10..=62).contains(size) {
                return Err(Error::ParametersError(
                    ParametersError::InvalidModulusSize(*size, 10, 62),
                ));
            }
        }

        Ok(SchemeParameters {
            degree: self.degree,
            plaintext: self.plaintext,
            lifting: self.lifting,
            moduli_sizes: self.moduli_sizes.clone().into_boxed_slice(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SchemeParametersBuilder;
    use crate::{Error, ParametersError};
    use std::error::Error as StdError;

    #[test]
    fn builder() -> Result<(), Box<dyn StdError>> {
        let params = SchemeParametersBuilder::new()
            .set_degree(2048)
            .set_plaintext_modulus(12289)
            .set_moduli_sizes(&[50, 50, 55])
            .build()?;
        assert_eq!(params.degree(), 2048);
        assert_eq!(params.plaintext(), 12289);
        assert_eq!(params.lifting(), 1);
        assert_eq!(params.num_slots(), 1024);
        assert_eq!(params.modulus_budget(), 155);
        assert_eq!(params.key_switch_columns(), 3);
        assert_eq!(params.moduli_sizes(), &[50, 50, 55]);
        Ok(())
    }

    #[test]
    fn invalid_degree() {
        for degree in [0, 8, 100] {
            let e = SchemeParametersBuilder::new()
                .set_degree(degree)
                .set_plaintext_modulus(65537)
                .set_moduli_sizes(&[62])
                .build();
            assert!(matches!(
                e,
                Err(Error::ParametersError(ParametersError::InvalidDegree(d))) if d == degree
            ));
        }
    }

    #[test]
    fn invalid_plaintext() {
        // Not coprime with 3, not prime, and not batching-friendly.
        for plaintext in [0, 3, 65535, 65539, 65536] {
            let e = SchemeParametersBuilder::new()
                .set_degree(2048)
                .set_plaintext_modulus(plaintext)
                .set_moduli_sizes(&[62])
                .build();
            assert!(e.is_err(), "plaintext modulus {plaintext} was accepted");
        }
    }

    #[test]
    fn invalid_lifting() {
        let e = SchemeParametersBuilder::new()
            .set_degree(2048)
            .set_plaintext_modulus(65537)
            .set_lifting(2)
            .set_moduli_sizes(&[62])
            .build();
        assert!(matches!(
            e,
            Err(Error::ParametersError(ParametersError::UnsupportedLifting(
                2
            )))
        ));
    }

    #[test]
    fn invalid_moduli() {
        let e = SchemeParametersBuilder::new()
            .set_degree(2048)
            .set_plaintext_modulus(65537)
            .build();
        assert!(matches!(
            e,
            Err(Error::ParametersError(ParametersError::TooFewSpecified(_)))
        ));

        let e = SchemeParametersBuilder::new()
            .set_degree(2048)
            .set_plaintext_modulus(65537)
            .set_moduli_sizes(&[62, 63])
            .build();
        assert!(matches!(
            e,
            Err(Error::ParametersError(ParametersError::InvalidModulusSize(
                63, 10, 62
            )))
        ));
    }
}
