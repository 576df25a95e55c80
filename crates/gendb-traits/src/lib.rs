#![crate_name = "gendb_traits"]
#![crate_type = "lib"]
#![warn(missing_docs, unused_imports)]

//! Traits for the homomorphic operations consumed by the gendb query engine.
//!
//! A backend packs `num_slots` integers modulo a plaintext modulus `p` into
//! one ciphertext and evaluates slot-wise additions and multiplications on
//! them. Rotations move slots cyclically. Every multiplicative operation
//! consumes part of a finite capacity; a ciphertext whose capacity reached
//! zero decrypts to garbage without any error being reported.

use std::error::Error;

/// A SIMD homomorphic encryption backend.
///
/// Binary operations take the left operand by mutable reference and update it
/// in place; callers clone explicitly when they need to keep an operand.
pub trait HomomorphicBackend: Send + Sync {
    /// The ciphertext type.
    type Ciphertext: Clone + Send + Sync;

    /// The plaintext type.
    type Plaintext;

    /// The type of error returned.
    type Error: Error + Send + Sync + 'static;

    /// Number of integers packed in one ciphertext.
    fn num_slots(&self) -> usize;

    /// The plaintext modulus `p`.
    fn plaintext_modulus(&self) -> u64;

    /// Encode up to `num_slots` values, padding the remaining slots with
    /// zeros. The values must be reduced modulo `p`.
    fn encode(&self, values: &[u64]) -> Result<Self::Plaintext, Self::Error>;

    /// Encrypt a plaintext under the backend's public key.
    fn encrypt(&self, pt: &Self::Plaintext) -> Result<Self::Ciphertext, Self::Error>;

    /// Decrypt a ciphertext under the backend's secret key, returning exactly
    /// `num_slots` values.
    fn decrypt(&self, ct: &Self::Ciphertext) -> Result<Vec<u64>, Self::Error>;

    /// `lhs += rhs`
    fn add_assign(
        &self,
        lhs: &mut Self::Ciphertext,
        rhs: &Self::Ciphertext,
    ) -> Result<(), Self::Error>;

    /// `lhs -= rhs`
    fn sub_assign(
        &self,
        lhs: &mut Self::Ciphertext,
        rhs: &Self::Ciphertext,
    ) -> Result<(), Self::Error>;

    /// `ct = -ct`
    fn negate_assign(&self, ct: &mut Self::Ciphertext) -> Result<(), Self::Error>;

    /// `ct += pt`
    fn add_plain_assign(
        &self,
        ct: &mut Self::Ciphertext,
        pt: &Self::Plaintext,
    ) -> Result<(), Self::Error>;

    /// `ct *= pt`
    fn multiply_plain_assign(
        &self,
        ct: &mut Self::Ciphertext,
        pt: &Self::Plaintext,
    ) -> Result<(), Self::Error>;

    /// `lhs *= rhs`, relinearized.
    fn multiply_assign(
        &self,
        lhs: &mut Self::Ciphertext,
        rhs: &Self::Ciphertext,
    ) -> Result<(), Self::Error>;

    /// `ct *= ct`, relinearized.
    fn square_assign(&self, ct: &mut Self::Ciphertext) -> Result<(), Self::Error>;

    /// Cyclically rotate the slots to the left: slot `i` receives the value
    /// of slot `(i + steps) mod num_slots`.
    fn rotate_assign(&self, ct: &mut Self::Ciphertext, steps: usize) -> Result<(), Self::Error>;

    /// Remaining capacity of the ciphertext, in bits.
    fn capacity(&self, ct: &Self::Ciphertext) -> Result<usize, Self::Error>;

    /// A fresh encryption of zero in every slot.
    fn zero(&self) -> Result<Self::Ciphertext, Self::Error> {
        let pt = self.encode(&[])?;
        self.encrypt(&pt)
    }
}

/// Re-encryption of ciphertexts towards a client key.
pub trait KeySwitching: HomomorphicBackend {
    /// The public material a client hands over at authorization.
    type ClientKey;

    /// The key used to switch ciphertexts towards one client.
    type SwitchingKey: Send + Sync;

    /// Derive the switching key from the backend's secret key towards the
    /// client's key.
    fn derive_switching_key(
        &self,
        client_key: &Self::ClientKey,
    ) -> Result<Self::SwitchingKey, Self::Error>;

    /// Re-encrypt `ct` so that it decrypts under the client's secret key.
    fn switch_key(
        &self,
        key: &Self::SwitchingKey,
        ct: &Self::Ciphertext,
    ) -> Result<Self::Ciphertext, Self::Error>;
}

/// Serialization of ciphertexts.
pub trait CiphertextCodec: HomomorphicBackend {
    /// Serialize a ciphertext into a vector of bytes.
    fn serialize(&self, ct: &Self::Ciphertext) -> Vec<u8>;

    /// Attempt to deserialize a ciphertext produced by [`Self::serialize`].
    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Ciphertext, Self::Error>;
}

/// A homomorphic comparison against a public threshold.
pub trait Comparator<B: HomomorphicBackend>: Send + Sync {
    /// Exclusive upper bound on the encrypted inputs the comparator accepts.
    fn input_bound(&self) -> u64;

    /// Reports whether the comparator can be evaluated modulo
    /// `plaintext_modulus`. The result of [`Self::less_or_equal`] is
    /// unspecified otherwise.
    fn supports(&self, plaintext_modulus: u64) -> bool;

    /// Returns an encryption of `1` in every slot where the input is smaller
    /// than or equal to `threshold`, and of `0` elsewhere.
    ///
    /// Slots holding values outside `[0, input_bound)` produce unspecified
    /// results.
    fn less_or_equal(
        &self,
        backend: &B,
        x: &B::Ciphertext,
        threshold: u64,
    ) -> Result<B::Ciphertext, B::Error>;
}
