//! Homomorphic backends.
//!
//! [`BfvBackend`] evaluates the queries with the BFV scheme.
//! [`SimulatedBackend`] evaluates them in the clear while tracking capacity,
//! and is meant for tests and parameter exploration.

mod bfv;
mod simulated;

pub use bfv::{deserialize_public_key, BfvBackend, BfvClient, BfvSwitchingKey};
pub use simulated::{
    NoiseModel, SimulatedBackend, SimulatedCiphertext, SimulatedClient, SimulatedPlaintext,
    SimulatedPublicKey, SimulatedSwitchingKey, SimulationError,
};
