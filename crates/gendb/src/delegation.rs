//! Re-encryption of query results towards authorized clients.

use dashmap::DashMap;
use gendb_traits::KeySwitching;
use log::{info, warn};

use crate::{Error, Result};

/// Switching keys of the authorized clients, indexed by client identifier.
///
/// Authorizations for distinct clients may run concurrently. Authorizing a
/// client again replaces its key.
pub struct DelegationRegistry<B: KeySwitching> {
    keys: DashMap<String, B::SwitchingKey>,
}

impl<B: KeySwitching> Default for DelegationRegistry<B> {
    fn default() -> Self {
        Self {
            keys: DashMap::new(),
        }
    }
}

impl<B: KeySwitching> DelegationRegistry<B> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive and store the switching key towards `client_key`.
    pub fn authorize(
        &self,
        backend: &B,
        client_id: &str,
        client_key: &B::ClientKey,
    ) -> Result<()> {
        let key = backend
            .derive_switching_key(client_key)
            .map_err(Error::backend)?;
        if self.keys.insert(client_id.to_string(), key).is_some() {
            info!("Replaced the switching key of {client_id}");
        } else {
            info!("Authorized {client_id}");
        }
        Ok(())
    }

    /// Re-encrypt `ct` towards the key of `client_id`.
    pub fn delegate(
        &self,
        backend: &B,
        client_id: &str,
        ct: &B::Ciphertext,
    ) -> Result<B::Ciphertext> {
        let Some(key) = self.keys.get(client_id) else {
            warn!("No switching key for {client_id}");
            return Err(Error::Unauthorized(client_id.to_string()));
        };
        backend.switch_key(key.value(), ct).map_err(Error::backend)
    }

    /// Reports whether `client_id` holds a switching key.
    pub fn is_authorized(&self, client_id: &str) -> bool {
        self.keys.contains_key(client_id)
    }

    /// Returns the number of authorized clients.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Reports whether no client is authorized.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
