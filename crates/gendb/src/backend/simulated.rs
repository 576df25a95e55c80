//! Exact simulation of a SIMD homomorphic backend.
//!
//! Ciphertexts carry their slots in the clear together with a capacity
//! estimate and the identifier of the key they are encrypted under. The slot
//! count is arbitrary, which allows exercising the packing algorithms on
//! widths no lattice scheme produces. A ciphertext whose capacity reached zero
//! decrypts to pseudo-random values, without any error being reported.

use gendb_traits::{CiphertextCodec, HomomorphicBackend, KeySwitching};
use gendb_util::{add_mod, mul_mod, sub_mod};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::SchemeParameters;

/// Errors of the simulated backend.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimulationError {
    /// Indicates that too many values were provided.
    #[error("Too many values provided: {0} exceeds limit {1}")]
    TooManyValues(usize, usize),

    /// Indicates that the simulation parameters are invalid.
    #[error("Invalid simulation parameters: {0}")]
    InvalidParameters(String),

    /// Indicates that a ciphertext is used with a key it is not encrypted
    /// under.
    #[error("Ciphertext encrypted under key {found:#x}, expected {expected:#x}")]
    KeyMismatch {
        /// Key of the ciphertext.
        found: u64,
        /// Key expected by the operation.
        expected: u64,
    },

    /// Indicates that the two operands of a binary operation have different
    /// slot counts.
    #[error("Slot count mismatch: {0} and {1}")]
    SlotMismatch(usize, usize),

    /// Indicates a serialization error.
    #[error("Serialization error")]
    SerializationError,
}

/// Capacity consumed by each operation, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseModel {
    /// Capacity of a fresh encryption.
    pub fresh: usize,
    /// Cost of a ciphertext-ciphertext multiplication or a squaring.
    pub multiplication: usize,
    /// Cost of a ciphertext-plaintext multiplication.
    pub plaintext_multiplication: usize,
    /// Cost of a rotation.
    pub rotation: usize,
    /// Cost of a key switch towards a client.
    pub key_switch: usize,
}

impl Default for NoiseModel {
    fn default() -> Self {
        Self {
            fresh: 1000,
            multiplication: 30,
            plaintext_multiplication: 15,
            rotation: 1,
            key_switch: 2,
        }
    }
}

impl NoiseModel {
    /// A noise model approximating BFV with the given parameters.
    pub fn from_parameters(params: &SchemeParameters) -> Self {
        let plaintext_bits = 64 - params.plaintext().leading_zeros() as usize;
        let degree_bits = params.degree().ilog2() as usize;
        Self {
            fresh: params
                .modulus_budget()
                .saturating_sub(plaintext_bits + degree_bits + 6),
            multiplication: plaintext_bits + degree_bits + 4,
            plaintext_multiplication: plaintext_bits + degree_bits,
            rotation: 1,
            key_switch: 1,
        }
    }
}

/// A simulated ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCiphertext {
    slots: Vec<u64>,
    capacity: usize,
    key_id: u64,
}

/// A simulated plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedPlaintext(Vec<u64>);

/// The public key of a simulated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedPublicKey {
    key_id: u64,
}

/// Key switching from the backend key towards a client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedSwitchingKey {
    from: u64,
    to: u64,
}

/// A backend evaluating homomorphic operations in the clear.
#[derive(Debug)]
pub struct SimulatedBackend {
    num_slots: usize,
    plaintext: u64,
    model: NoiseModel,
    key_id: u64,
}

impl SimulatedBackend {
    /// Create a backend with `num_slots` slots modulo `plaintext`.
    pub fn new(num_slots: usize, plaintext: u64) -> Result<Self, SimulationError> {
        if num_slots == 0 {
            return Err(SimulationError::InvalidParameters(
                "The number of slots must be positive".to_string(),
            ));
        }
        if plaintext < 2 || plaintext >> 62 != 0 {
            return Err(SimulationError::InvalidParameters(format!(
                "Unsupported plaintext modulus {plaintext}"
            )));
        }
        Ok(Self {
            num_slots,
            plaintext,
            model: NoiseModel::default(),
            key_id: rand::rng().next_u64(),
        })
    }

    /// Create a backend mimicking the slot count and the capacity of BFV with
    /// the given parameters.
    pub fn from_parameters(params: &SchemeParameters) -> Result<Self, SimulationError> {
        Ok(Self::new(params.num_slots(), params.plaintext())?
            .with_noise_model(NoiseModel::from_parameters(params)))
    }

    /// Replace the noise model.
    pub fn with_noise_model(mut self, model: NoiseModel) -> Self {
        self.model = model;
        self
    }

    /// Returns the noise model.
    pub fn noise_model(&self) -> &NoiseModel {
        &self.model
    }

    fn check_key(&self, ct: &SimulatedCiphertext) -> Result<(), SimulationError> {
        if ct.key_id != self.key_id {
            return Err(SimulationError::KeyMismatch {
                found: ct.key_id,
                expected: self.key_id,
            });
        }
        Ok(())
    }

    fn zip_with(
        &self,
        lhs: &mut SimulatedCiphertext,
        rhs: &[u64],
        f: impl Fn(u64, u64, u64) -> u64,
    ) -> Result<(), SimulationError> {
        if lhs.slots.len() != rhs.len() {
            return Err(SimulationError::SlotMismatch(lhs.slots.len(), rhs.len()));
        }
        lhs.slots
            .iter_mut()
            .zip(rhs)
            .for_each(|(l, r)| *l = f(*l, *r, self.plaintext));
        Ok(())
    }
}

fn reveal(
    ct: &SimulatedCiphertext,
    key_id: u64,
    plaintext: u64,
) -> Result<Vec<u64>, SimulationError> {
    if ct.key_id != key_id {
        return Err(SimulationError::KeyMismatch {
            found: ct.key_id,
            expected: key_id,
        });
    }
    if ct.capacity > 0 {
        return Ok(ct.slots.clone());
    }
    let seed = ct
        .slots
        .iter()
        .fold(ct.slots.len() as u64, |acc, v| acc.rotate_left(7) ^ v);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Ok((0..ct.slots.len())
        .map(|_| rng.random_range(0..plaintext))
        .collect())
}

impl HomomorphicBackend for SimulatedBackend {
    type Ciphertext = SimulatedCiphertext;
    type Plaintext = SimulatedPlaintext;
    type Error = SimulationError;

    fn num_slots(&self) -> usize {
        self.num_slots
    }

    fn plaintext_modulus(&self) -> u64 {
        self.plaintext
    }

    fn encode(&self, values: &[u64]) -> Result<SimulatedPlaintext, SimulationError> {
        if values.len() > self.num_slots {
            return Err(SimulationError::TooManyValues(values.len(), self.num_slots));
        }
        let mut slots = values.iter().map(|v| v % self.plaintext).collect::<Vec<_>>();
        slots.resize(self.num_slots, 0);
        Ok(SimulatedPlaintext(slots))
    }

    fn encrypt(&self, pt: &SimulatedPlaintext) -> Result<SimulatedCiphertext, SimulationError> {
        Ok(SimulatedCiphertext {
            slots: pt.0.clone(),
            capacity: self.model.fresh,
            key_id: self.key_id,
        })
    }

    fn decrypt(&self, ct: &SimulatedCiphertext) -> Result<Vec<u64>, SimulationError> {
        reveal(ct, self.key_id, self.plaintext)
    }

    fn add_assign(
        &self,
        lhs: &mut SimulatedCiphertext,
        rhs: &SimulatedCiphertext,
    ) -> Result<(), SimulationError> {
        self.check_key(rhs)?;
        self.zip_with(lhs, &rhs.slots, add_mod)?;
        lhs.capacity = lhs.capacity.min(rhs.capacity);
        Ok(())
    }

    fn sub_assign(
        &self,
        lhs: &mut SimulatedCiphertext,
        rhs: &SimulatedCiphertext,
    ) -> Result<(), SimulationError> {
        self.check_key(rhs)?;
        self.zip_with(lhs, &rhs.slots, sub_mod)?;
        lhs.capacity = lhs.capacity.min(rhs.capacity);
        Ok(())
    }

    fn negate_assign(&self, ct: &mut SimulatedCiphertext) -> Result<(), SimulationError> {
        let p = self.plaintext;
        ct.slots.iter_mut().for_each(|v| *v = (p - *v) % p);
        Ok(())
    }

    fn add_plain_assign(
        &self,
        ct: &mut SimulatedCiphertext,
        pt: &SimulatedPlaintext,
    ) -> Result<(), SimulationError> {
        self.zip_with(ct, &pt.0, add_mod)
    }

    fn multiply_plain_assign(
        &self,
        ct: &mut SimulatedCiphertext,
        pt: &SimulatedPlaintext,
    ) -> Result<(), SimulationError> {
        self.zip_with(ct, &pt.0, mul_mod)?;
        ct.capacity = ct
            .capacity
            .saturating_sub(self.model.plaintext_multiplication);
        Ok(())
    }

    fn multiply_assign(
        &self,
        lhs: &mut SimulatedCiphertext,
        rhs: &SimulatedCiphertext,
    ) -> Result<(), SimulationError> {
        self.check_key(rhs)?;
        self.zip_with(lhs, &rhs.slots, mul_mod)?;
        lhs.capacity = lhs
            .capacity
            .min(rhs.capacity)
            .saturating_sub(self.model.multiplication);
        Ok(())
    }

    fn square_assign(&self, ct: &mut SimulatedCiphertext) -> Result<(), SimulationError> {
        let p = self.plaintext;
        ct.slots.iter_mut().for_each(|v| *v = mul_mod(*v, *v, p));
        ct.capacity = ct.capacity.saturating_sub(self.model.multiplication);
        Ok(())
    }

    fn rotate_assign(
        &self,
        ct: &mut SimulatedCiphertext,
        steps: usize,
    ) -> Result<(), SimulationError> {
        let steps = steps % self.num_slots;
        if steps > 0 {
            ct.slots.rotate_left(steps);
            ct.capacity = ct.capacity.saturating_sub(self.model.rotation);
        }
        Ok(())
    }

    fn capacity(&self, ct: &SimulatedCiphertext) -> Result<usize, SimulationError> {
        Ok(ct.capacity)
    }
}

impl KeySwitching for SimulatedBackend {
    type ClientKey = SimulatedPublicKey;
    type SwitchingKey = SimulatedSwitchingKey;

    fn derive_switching_key(
        &self,
        client_key: &SimulatedPublicKey,
    ) -> Result<SimulatedSwitchingKey, SimulationError> {
        Ok(SimulatedSwitchingKey {
            from: self.key_id,
            to: client_key.key_id,
        })
    }

    fn switch_key(
        &self,
        key: &SimulatedSwitchingKey,
        ct: &SimulatedCiphertext,
    ) -> Result<SimulatedCiphertext, SimulationError> {
        if ct.key_id != key.from {
            return Err(SimulationError::KeyMismatch {
                found: ct.key_id,
                expected: key.from,
            });
        }
        Ok(SimulatedCiphertext {
            slots: ct.slots.clone(),
            capacity: ct.capacity.saturating_sub(self.model.key_switch),
            key_id: key.to,
        })
    }
}

impl CiphertextCodec for SimulatedBackend {
    fn serialize(&self, ct: &SimulatedCiphertext) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 * (ct.slots.len() + 2));
        bytes.extend_from_slice(&ct.key_id.to_le_bytes());
        bytes.extend_from_slice(&(ct.capacity as u64).to_le_bytes());
        ct.slots
            .iter()
            .for_each(|v| bytes.extend_from_slice(&v.to_le_bytes()));
        bytes
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<SimulatedCiphertext, SimulationError> {
        if bytes.len() != 8 * (self.num_slots + 2) {
            return Err(SimulationError::SerializationError);
        }
        let mut words = bytes.chunks_exact(8).map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        });
        let key_id = words.next().ok_or(SimulationError::SerializationError)?;
        let capacity = words.next().ok_or(SimulationError::SerializationError)? as usize;
        let slots = words.collect::<Vec<_>>();
        if slots.iter().any(|v| *v >= self.plaintext) {
            return Err(SimulationError::SerializationError);
        }
        Ok(SimulatedCiphertext {
            slots,
            capacity,
            key_id,
        })
    }
}

/// A simulated data analyst.
#[derive(Debug)]
pub struct SimulatedClient {
    key_id: u64,
    plaintext: u64,
}

impl SimulatedClient {
    /// Create a client with a fresh key for the given backend.
    pub fn new(backend: &SimulatedBackend) -> Self {
        Self {
            key_id: rand::rng().next_u64(),
            plaintext: backend.plaintext,
        }
    }

    /// Returns the client public key.
    pub fn public_key(&self) -> SimulatedPublicKey {
        SimulatedPublicKey {
            key_id: self.key_id,
        }
    }

    /// Decrypt a delegated result.
    pub fn decrypt(&self, ct: &SimulatedCiphertext) -> Result<Vec<u64>, SimulationError> {
        reveal(ct, self.key_id, self.plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::{NoiseModel, SimulatedBackend, SimulatedClient, SimulationError};
    use crate::SchemeParametersBuilder;
    use gendb_traits::{CiphertextCodec, HomomorphicBackend, KeySwitching};
    use std::error::Error;

    #[test]
    fn invalid_parameters() {
        assert!(SimulatedBackend::new(0, 17).is_err());
        assert!(SimulatedBackend::new(4, 1).is_err());
        assert!(SimulatedBackend::new(4, 1 << 62).is_err());
    }

    #[test]
    fn arithmetic_and_rotation() -> Result<(), Box<dyn Error>> {
        let backend = SimulatedBackend::new(6, 17)?;
        let a = backend.encrypt(&backend.encode(&[1, 2, 3, 4, 5, 6])?)?;
        let b = backend.encrypt(&backend.encode(&[16, 16])?)?;

        let mut c = a.clone();
        backend.add_assign(&mut c, &b)?;
        assert_eq!(backend.decrypt(&c)?, vec![0, 1, 3, 4, 5, 6]);

        let mut c = a.clone();
        backend.multiply_assign(&mut c, &b)?;
        assert_eq!(backend.decrypt(&c)?, vec![16, 15, 0, 0, 0, 0]);

        let mut c = a.clone();
        backend.rotate_assign(&mut c, 2)?;
        assert_eq!(backend.decrypt(&c)?, vec![3, 4, 5, 6, 1, 2]);
        backend.rotate_assign(&mut c, 10)?;
        assert_eq!(backend.decrypt(&c)?, vec![1, 2, 3, 4, 5, 6]);

        let mut c = a;
        backend.negate_assign(&mut c)?;
        backend.square_assign(&mut c)?;
        assert_eq!(backend.decrypt(&c)?, vec![1, 4, 9, 16, 8, 2]);

        assert_eq!(
            backend.encode(&[0; 7]),
            Err(SimulationError::TooManyValues(7, 6))
        );
        Ok(())
    }

    #[test]
    fn exhausted_capacity_corrupts_silently() -> Result<(), Box<dyn Error>> {
        let backend = SimulatedBackend::new(64, 65537)?.with_noise_model(NoiseModel {
            fresh: 50,
            multiplication: 30,
            ..NoiseModel::default()
        });
        let values = (0..64u64).collect::<Vec<_>>();
        let mut ct = backend.encrypt(&backend.encode(&values)?)?;
        let one = backend.encrypt(&backend.encode(&[1; 64])?)?;

        backend.multiply_assign(&mut ct, &one)?;
        assert_eq!(backend.capacity(&ct)?, 20);
        assert_eq!(backend.decrypt(&ct)?, values);

        backend.multiply_assign(&mut ct, &one)?;
        assert_eq!(backend.capacity(&ct)?, 0);
        assert_ne!(backend.decrypt(&ct)?, values);
        Ok(())
    }

    #[test]
    fn key_switching() -> Result<(), Box<dyn Error>> {
        let backend = SimulatedBackend::new(8, 12289)?;
        let client = SimulatedClient::new(&backend);
        let other = SimulatedClient::new(&backend);
        let key = backend.derive_switching_key(&client.public_key())?;

        let ct = backend.encrypt(&backend.encode(&[5, 0, 7])?)?;
        assert!(client.decrypt(&ct).is_err());

        let switched = backend.switch_key(&key, &ct)?;
        assert_eq!(client.decrypt(&switched)?, backend.decrypt(&ct)?);
        assert!(other.decrypt(&switched).is_err());
        assert!(backend.decrypt(&switched).is_err());
        assert!(backend.switch_key(&key, &switched).is_err());
        Ok(())
    }

    #[test]
    fn serialization() -> Result<(), Box<dyn Error>> {
        let backend = SimulatedBackend::new(5, 17)?;
        let ct = backend.encrypt(&backend.encode(&[1, 2, 3, 4, 16])?)?;
        let bytes = backend.serialize(&ct);
        assert_eq!(bytes.len(), 56);
        assert_eq!(backend.deserialize(&bytes)?, ct);
        assert!(backend.deserialize(&bytes[1..]).is_err());
        Ok(())
    }

    #[test]
    fn parameters() -> Result<(), Box<dyn Error>> {
        let params = SchemeParametersBuilder::new()
            .set_degree(4096)
            .set_plaintext_modulus(65537)
            .set_moduli_sizes(&[36, 36, 37])
            .build()?;
        let backend = SimulatedBackend::from_parameters(&params)?;
        assert_eq!(backend.num_slots(), 2048);
        assert_eq!(backend.plaintext_modulus(), 65537);
        assert_eq!(backend.noise_model().fresh, 109 - 17 - 12 - 6);
        Ok(())
    }
}
