//! Backend implemented with the Brakerski-Fan-Vercauteren scheme.

use std::sync::Arc;

use fhe::bfv::{
    BfvParameters, BfvParametersBuilder, Ciphertext, Encoding, EvaluationKey,
    EvaluationKeyBuilder, Plaintext, PublicKey, RelinearizationKey, SecretKey,
};
use fhe::mbfv::{Aggregate, PublicKeySwitchShare};
use fhe_traits::{
    DeserializeParametrized, FheDecoder, FheDecrypter, FheEncoder, FheEncrypter, Serialize,
};
use gendb_traits::{CiphertextCodec, HomomorphicBackend, KeySwitching};
use log::debug;

use crate::{Error, Result, SchemeParameters};

/// A BFV backend holding the server key material.
///
/// The evaluation key supports every column rotation by a power of two, so
/// that any rotation is performed with at most `log2(num_slots)` key
/// switchings.
pub struct BfvBackend {
    par: Arc<BfvParameters>,
    num_slots: usize,
    sk: SecretKey,
    pk: PublicKey,
    rk: RelinearizationKey,
    ek: EvaluationKey,
}

impl BfvBackend {
    /// Generate the server key material for the given parameters.
    pub fn new(params: &SchemeParameters) -> Result<Self> {
        let par = BfvParametersBuilder::new()
            .set_degree(params.degree())
            .set_plaintext_modulus(params.plaintext())
            .set_moduli_sizes(params.moduli_sizes())
            .build_arc()
            .map_err(Error::backend)?;
        let num_slots = params.num_slots();

        let mut rng = rand::rng();
        let sk = SecretKey::random(&par, &mut rng);
        let pk = PublicKey::new(&sk, &mut rng);
        let rk = RelinearizationKey::new(&sk, &mut rng).map_err(Error::backend)?;

        let mut builder = EvaluationKeyBuilder::new(&sk).map_err(Error::backend)?;
        let mut shift = 1;
        while shift < num_slots {
            builder
                .enable_column_rotation(shift)
                .map_err(Error::backend)?;
            shift <<= 1;
        }
        let ek = builder.build(&mut rng).map_err(Error::backend)?;
        debug!(
            "Generated BFV keys: degree {}, plaintext modulus {}, {} rotation keys",
            params.degree(),
            params.plaintext(),
            num_slots.ilog2()
        );

        Ok(Self {
            par,
            num_slots,
            sk,
            pk,
            rk,
            ek,
        })
    }

    /// Returns the BFV parameters shared with clients.
    pub fn parameters(&self) -> &Arc<BfvParameters> {
        &self.par
    }

    /// Returns the server public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.pk
    }

    fn modulus_bits(&self) -> usize {
        self.par.moduli_sizes().iter().sum()
    }
}

impl HomomorphicBackend for BfvBackend {
    type Ciphertext = Ciphertext;
    type Plaintext = Plaintext;
    type Error = fhe::Error;

    fn num_slots(&self) -> usize {
        self.num_slots
    }

    fn plaintext_modulus(&self) -> u64 {
        self.par.plaintext()
    }

    fn encode(&self, values: &[u64]) -> fhe::Result<Plaintext> {
        if values.len() > self.num_slots {
            return Err(fhe::Error::TooManyValues {
                actual: values.len(),
                limit: self.num_slots,
            });
        }
        Plaintext::try_encode(values, Encoding::simd(), &self.par)
    }

    fn encrypt(&self, pt: &Plaintext) -> fhe::Result<Ciphertext> {
        self.pk.try_encrypt(pt, &mut rand::rng())
    }

    fn decrypt(&self, ct: &Ciphertext) -> fhe::Result<Vec<u64>> {
        let pt = self.sk.try_decrypt(ct)?;
        let mut values = Vec::<u64>::try_decode(&pt, Encoding::simd())?;
        values.truncate(self.num_slots);
        Ok(values)
    }

    fn add_assign(&self, lhs: &mut Ciphertext, rhs: &Ciphertext) -> fhe::Result<()> {
        *lhs += rhs;
        Ok(())
    }

    fn sub_assign(&self, lhs: &mut Ciphertext, rhs: &Ciphertext) -> fhe::Result<()> {
        *lhs -= rhs;
        Ok(())
    }

    fn negate_assign(&self, ct: &mut Ciphertext) -> fhe::Result<()> {
        *ct = -&*ct;
        Ok(())
    }

    fn add_plain_assign(&self, ct: &mut Ciphertext, pt: &Plaintext) -> fhe::Result<()> {
        *ct += pt;
        Ok(())
    }

    fn multiply_plain_assign(&self, ct: &mut Ciphertext, pt: &Plaintext) -> fhe::Result<()> {
        *ct *= pt;
        Ok(())
    }

    fn multiply_assign(&self, lhs: &mut Ciphertext, rhs: &Ciphertext) -> fhe::Result<()> {
        let mut product = &*lhs * rhs;
        self.rk.relinearizes(&mut product)?;
        *lhs = product;
        Ok(())
    }

    fn square_assign(&self, ct: &mut Ciphertext) -> fhe::Result<()> {
        let mut product = &*ct * &*ct;
        self.rk.relinearizes(&mut product)?;
        *ct = product;
        Ok(())
    }

    fn rotate_assign(&self, ct: &mut Ciphertext, steps: usize) -> fhe::Result<()> {
        let mut steps = steps % self.num_slots;
        let mut shift = 1;
        while steps > 0 {
            if steps & 1 == 1 {
                *ct = self.ek.rotates_columns_by(ct, shift)?;
            }
            steps >>= 1;
            shift <<= 1;
        }
        Ok(())
    }

    fn capacity(&self, ct: &Ciphertext) -> fhe::Result<usize> {
        // SAFETY: the noise measurement is variable time in the secret key;
        // it only drives the server-side capacity checks.
        let noise = unsafe { self.sk.measure_noise(ct)? };
        let plaintext_bits = 64 - self.par.plaintext().leading_zeros() as usize;
        Ok(self
            .modulus_bits()
            .saturating_sub(plaintext_bits + 1)
            .saturating_sub(noise))
    }
}

/// Key used to switch ciphertexts towards one client: the client public key,
/// checked against the server parameters.
pub struct BfvSwitchingKey(PublicKey);

impl KeySwitching for BfvBackend {
    type ClientKey = PublicKey;
    type SwitchingKey = BfvSwitchingKey;

    fn derive_switching_key(&self, client_key: &PublicKey) -> fhe::Result<BfvSwitchingKey> {
        // Switching a fresh encryption of zero checks that the client key
        // lives in the same parameters.
        let zero = self.zero()?;
        PublicKeySwitchShare::new(&self.sk, client_key, &zero, &mut rand::rng())?;
        Ok(BfvSwitchingKey(client_key.clone()))
    }

    fn switch_key(&self, key: &BfvSwitchingKey, ct: &Ciphertext) -> fhe::Result<Ciphertext> {
        let share = PublicKeySwitchShare::new(&self.sk, &key.0, ct, &mut rand::rng())?;
        Ciphertext::from_shares([share])
    }
}

impl CiphertextCodec for BfvBackend {
    fn serialize(&self, ct: &Ciphertext) -> Vec<u8> {
        ct.to_bytes()
    }

    fn deserialize(&self, bytes: &[u8]) -> fhe::Result<Ciphertext> {
        Ciphertext::from_bytes(bytes, &self.par)
    }
}

/// A data analyst holding a secret key, to whom the server delegates query
/// results.
pub struct BfvClient {
    par: Arc<BfvParameters>,
    num_slots: usize,
    sk: SecretKey,
    pk: PublicKey,
}

impl BfvClient {
    /// Generate a client key pair for the parameters of a server.
    pub fn new(par: &Arc<BfvParameters>) -> Self {
        let mut rng = rand::rng();
        let sk = SecretKey::random(par, &mut rng);
        let pk = PublicKey::new(&sk, &mut rng);
        Self {
            par: par.clone(),
            num_slots: par.degree() / 2,
            sk,
            pk,
        }
    }

    /// Returns the client public key, to be sent at authorization.
    pub fn public_key(&self) -> &PublicKey {
        &self.pk
    }

    /// Returns the serialized client public key.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.pk.to_bytes()
    }

    /// Decrypt a delegated result.
    pub fn decrypt(&self, ct: &Ciphertext) -> Result<Vec<u64>> {
        let pt = self.sk.try_decrypt(ct).map_err(Error::backend)?;
        let mut values = Vec::<u64>::try_decode(&pt, Encoding::simd()).map_err(Error::backend)?;
        values.truncate(self.num_slots);
        Ok(values)
    }

    /// Deserialize and decrypt a delegated result.
    pub fn decrypt_bytes(&self, bytes: &[u8]) -> Result<Vec<u64>> {
        let ct = Ciphertext::from_bytes(bytes, &self.par).map_err(Error::backend)?;
        self.decrypt(&ct)
    }
}

/// Deserialize a client public key sent at authorization.
pub fn deserialize_public_key(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<PublicKey> {
    PublicKey::from_bytes(bytes, par).map_err(Error::backend)
}
