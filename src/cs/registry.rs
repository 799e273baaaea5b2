//! Provider Registry
//!
//! Append-only, fixed-capacity list of provider references. Providers are
//! statically allocated by their owners; the registry only borrows them.

use heapless::Vec;

use crate::core::protocol::ProviderId;
use crate::providers::Provider;

/// Registry errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// Id cannot be addressed by a request byte
    InvalidId,
    DuplicateId,
    Full,
}

pub struct ProviderRegistry<'a, const N: usize> {
    providers: Vec<&'a mut dyn Provider, N>,
    /// Union of registered ids
    ids: u8,
}

impl<const N: usize> Default for ProviderRegistry<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> ProviderRegistry<'a, N> {
    pub const fn new() -> Self {
        Self {
            providers: Vec::new(),
            ids: 0,
        }
    }

    pub fn register(&mut self, provider: &'a mut dyn Provider) -> Result<(), RegistryError> {
        let id = provider.id();
        if !id.is_addressable() {
            return Err(RegistryError::InvalidId);
        }
        if self.contains(id) {
            return Err(RegistryError::DuplicateId);
        }
        self.providers.push(provider).map_err(|_| RegistryError::Full)?;
        self.ids |= id.bits();
        Ok(())
    }

    pub fn contains(&self, id: ProviderId) -> bool {
        id.matches(self.ids)
    }

    /// Bitmask of every registered id
    pub fn ids(&self) -> u8 {
        self.ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Providers in registration order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (dyn Provider + 'a)> + '_ {
        self.providers.iter_mut().map(|p| &mut **p)
    }
}
