//! Scheme context: the backend together with the constants every query
//! relies on.

use gendb_traits::HomomorphicBackend;
use gendb_util::{inverse, mul_mod, reduce_signed};
use log::debug;

use crate::{Error, ParametersError, Result};

/// Constants of the equality polynomials on `{0, 1, 2}`, reduced modulo the
/// plaintext modulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EqualityConstants {
    pub(crate) one_half: u64,
    pub(crate) minus_three_halves: u64,
}

/// The scheme context owns the homomorphic backend and exposes encryption and
/// masking helpers on top of it.
pub struct SchemeContext<B: HomomorphicBackend> {
    backend: B,
    constants: EqualityConstants,
}

impl<B: HomomorphicBackend> SchemeContext<B> {
    /// Wrap a backend. Fails when the plaintext modulus is not coprime with
    /// 2 and 3.
    pub fn new(backend: B) -> Result<Self> {
        let p = backend.plaintext_modulus();
        let invalid = || {
            Error::ParametersError(ParametersError::InvalidPlaintext(format!(
                "The plaintext modulus {p} must be coprime with 2 and 3"
            )))
        };
        if p <= 3 {
            return Err(invalid());
        }
        let one_half = inverse(2, p).ok_or_else(invalid)?;
        inverse(3, p).ok_or_else(invalid)?;
        let minus_three_halves = mul_mod(reduce_signed(-3, p), one_half, p);

        debug!(
            "Scheme context with {} slots modulo {}",
            backend.num_slots(),
            p
        );
        Ok(Self {
            backend,
            constants: EqualityConstants {
                one_half,
                minus_three_halves,
            },
        })
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the number of rows packed in one ciphertext.
    pub fn num_slots(&self) -> usize {
        self.backend.num_slots()
    }

    /// Returns the plaintext modulus.
    pub fn plaintext_modulus(&self) -> u64 {
        self.backend.plaintext_modulus()
    }

    /// Encrypt `value` in every slot.
    pub fn encrypt_value(&self, value: u64) -> Result<B::Ciphertext> {
        let pt = self.constant(value)?;
        self.backend.encrypt(&pt).map_err(Error::backend)
    }

    /// Encrypt the query vector of a similarity query: one ciphertext per
    /// value, holding the value in every slot.
    pub fn encrypt_query(&self, values: &[u64]) -> Result<Vec<B::Ciphertext>> {
        values.iter().map(|v| self.encrypt_value(*v)).collect()
    }

    /// Encrypt `values` in the first slots, the remaining slots being zero.
    pub fn encrypt_vector(&self, values: &[u64]) -> Result<B::Ciphertext> {
        if values.len() > self.num_slots() {
            return Err(Error::TooManyValues(values.len(), self.num_slots()));
        }
        let p = self.plaintext_modulus();
        if let Some(v) = values.iter().find(|v| **v >= p) {
            return Err(Error::ValueOutOfRange(*v, p));
        }
        let pt = self.backend.encode(values).map_err(Error::backend)?;
        self.backend.encrypt(&pt).map_err(Error::backend)
    }

    /// Decrypt a ciphertext with the server secret key. Meant for debugging.
    pub fn decrypt(&self, ct: &B::Ciphertext) -> Result<Vec<u64>> {
        self.backend.decrypt(ct).map_err(Error::backend)
    }

    /// Returns the remaining capacity of a ciphertext, in bits.
    pub fn capacity(&self, ct: &B::Ciphertext) -> Result<usize> {
        self.backend.capacity(ct).map_err(Error::backend)
    }

    /// Summary of the context: slot count, modulus, and capacity of a fresh
    /// encryption.
    pub fn describe(&self) -> Result<String> {
        let fresh = self.zero()?;
        Ok(format!(
            "{} slots, plaintext modulus {}, fresh capacity {} bits",
            self.num_slots(),
            self.plaintext_modulus(),
            self.capacity(&fresh)?
        ))
    }

    pub(crate) fn constants(&self) -> &EqualityConstants {
        &self.constants
    }

    /// Maps a signed integer into the plaintext space.
    pub(crate) fn reduce(&self, value: i64) -> u64 {
        reduce_signed(value, self.plaintext_modulus())
    }

    pub(crate) fn zero(&self) -> Result<B::Ciphertext> {
        self.backend.zero().map_err(Error::backend)
    }

    /// Plaintext holding `value` in every slot.
    pub(crate) fn constant(&self, value: u64) -> Result<B::Plaintext> {
        let value = value % self.plaintext_modulus();
        self.backend
            .encode(&vec![value; self.num_slots()])
            .map_err(Error::backend)
    }

    /// Plaintext holding 1 in the first `len` slots and 0 elsewhere.
    pub(crate) fn prefix_mask(&self, len: usize) -> Result<B::Plaintext> {
        let len = len.min(self.num_slots());
        self.backend.encode(&vec![1; len]).map_err(Error::backend)
    }

    /// Plaintext holding 1 in the slots of `range` and 0 elsewhere.
    pub(crate) fn range_mask(&self, range: std::ops::Range<usize>) -> Result<B::Plaintext> {
        let mut mask = vec![0; range.end.min(self.num_slots())];
        mask.iter_mut()
            .skip(range.start)
            .for_each(|slot| *slot = 1);
        self.backend.encode(&mask).map_err(Error::backend)
    }

    /// Plaintext holding 1 in slot `lane` and 0 elsewhere.
    pub(crate) fn one_hot(&self, lane: usize) -> Result<B::Plaintext> {
        self.range_mask(lane..lane + 1)
    }

    /// Plaintext holding 0 in slot `lane` and 1 elsewhere.
    pub(crate) fn one_hot_complement(&self, lane: usize) -> Result<B::Plaintext> {
        let mut mask = vec![1; self.num_slots()];
        if let Some(slot) = mask.get_mut(lane) {
            *slot = 0;
        }
        self.backend.encode(&mask).map_err(Error::backend)
    }

    pub(crate) fn add_assign(&self, lhs: &mut B::Ciphertext, rhs: &B::Ciphertext) -> Result<()> {
        self.backend.add_assign(lhs, rhs).map_err(Error::backend)
    }

    pub(crate) fn sub_assign(&self, lhs: &mut B::Ciphertext, rhs: &B::Ciphertext) -> Result<()> {
        self.backend.sub_assign(lhs, rhs).map_err(Error::backend)
    }

    pub(crate) fn negate_assign(&self, ct: &mut B::Ciphertext) -> Result<()> {
        self.backend.negate_assign(ct).map_err(Error::backend)
    }

    pub(crate) fn add_plain_assign(&self, ct: &mut B::Ciphertext, pt: &B::Plaintext) -> Result<()> {
        self.backend.add_plain_assign(ct, pt).map_err(Error::backend)
    }

    pub(crate) fn multiply_plain_assign(
        &self,
        ct: &mut B::Ciphertext,
        pt: &B::Plaintext,
    ) -> Result<()> {
        self.backend
            .multiply_plain_assign(ct, pt)
            .map_err(Error::backend)
    }

    pub(crate) fn multiply_assign(
        &self,
        lhs: &mut B::Ciphertext,
        rhs: &B::Ciphertext,
    ) -> Result<()> {
        self.backend.multiply_assign(lhs, rhs).map_err(Error::backend)
    }

    pub(crate) fn square_assign(&self, ct: &mut B::Ciphertext) -> Result<()> {
        self.backend.square_assign(ct).map_err(Error::backend)
    }

    /// Slot `i` receives slot `i + steps`.
    pub(crate) fn rotate_left(&self, ct: &mut B::Ciphertext, steps: usize) -> Result<()> {
        self.backend
            .rotate_assign(ct, steps % self.num_slots())
            .map_err(Error::backend)
    }

    /// Slot `i + steps` receives slot `i`.
    pub(crate) fn rotate_right(&self, ct: &mut B::Ciphertext, steps: usize) -> Result<()> {
        let n = self.num_slots();
        self.rotate_left(ct, (n - steps % n) % n)
    }
}

#[cfg(test)]
mod tests {
    use super::SchemeContext;
    use crate::backend::SimulatedBackend;
    use gendb_util::mul_mod;
    use std::error::Error;

    #[test]
    fn constants() -> Result<(), Box<dyn Error>> {
        let context = SchemeContext::new(SimulatedBackend::new(8, 65537)?)?;
        let constants = context.constants();
        assert_eq!(mul_mod(constants.one_half, 2, 65537), 1);
        assert_eq!(mul_mod(constants.minus_three_halves, 2, 65537), 65537 - 3);
        assert_eq!(context.reduce(-1), 65536);
        Ok(())
    }

    #[test]
    fn invalid_modulus() -> Result<(), Box<dyn Error>> {
        for p in [2, 3, 9, 16, 65535] {
            assert!(SchemeContext::new(SimulatedBackend::new(8, p)?).is_err());
        }
        Ok(())
    }

    #[test]
    fn encryption() -> Result<(), Box<dyn Error>> {
        let context = SchemeContext::new(SimulatedBackend::new(6, 17)?)?;
        assert_eq!(context.decrypt(&context.encrypt_value(3)?)?, vec![3; 6]);
        assert_eq!(
            context.decrypt(&context.encrypt_vector(&[1, 2])?)?,
            vec![1, 2, 0, 0, 0, 0]
        );
        assert!(context.encrypt_vector(&[0; 7]).is_err());
        assert!(context.encrypt_vector(&[17]).is_err());
        assert!(context.describe()?.starts_with("6 slots, plaintext modulus 17"));
        Ok(())
    }

    #[test]
    fn masks_and_rotations() -> Result<(), Box<dyn Error>> {
        let context = SchemeContext::new(SimulatedBackend::new(6, 17)?)?;
        let mut ct = context.encrypt_vector(&[1, 2, 3, 4, 5, 6])?;
        context.rotate_right(&mut ct, 2)?;
        assert_eq!(context.decrypt(&ct)?, vec![5, 6, 1, 2, 3, 4]);
        context.rotate_left(&mut ct, 8)?;
        assert_eq!(context.decrypt(&ct)?, vec![1, 2, 3, 4, 5, 6]);

        let mut masked = ct.clone();
        context.multiply_plain_assign(&mut masked, &context.range_mask(2..4)?)?;
        assert_eq!(context.decrypt(&masked)?, vec![0, 0, 3, 4, 0, 0]);

        let mut masked = ct.clone();
        context.multiply_plain_assign(&mut masked, &context.one_hot_complement(5)?)?;
        assert_eq!(context.decrypt(&masked)?, vec![1, 2, 3, 4, 5, 0]);

        let mut masked = ct;
        context.multiply_plain_assign(&mut masked, &context.prefix_mask(3)?)?;
        context.multiply_plain_assign(&mut masked, &context.one_hot(1)?)?;
        assert_eq!(context.decrypt(&masked)?, vec![0, 2, 0, 0, 0, 0]);
        Ok(())
    }
}
