//! Authorized signer registry.

use std::collections::HashSet;
use std::sync::RwLock;

use claimgate_common::{Address, ClaimGateError};

/// Set of signer addresses whose resolutions the verifier accepts.
///
/// Mutations are restricted to the controller. Reads are concurrent.
#[derive(Debug)]
pub struct SignerRegistry {
    state: RwLock<RegistryState>,
}

#[derive(Debug)]
struct RegistryState {
    controller: Address,
    signers: HashSet<Address>,
}

impl SignerRegistry {
    pub fn new(controller: Address) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                controller,
                signers: HashSet::new(),
            }),
        }
    }

    pub fn with_signers(controller: Address, signers: impl IntoIterator<Item = Address>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                controller,
                signers: signers.into_iter().collect(),
            }),
        }
    }

    /// Add or remove `signer`. Only the controller may call this.
    pub fn set_authorized(
        &self,
        caller: Address,
        signer: Address,
        authorized: bool,
    ) -> Result<(), ClaimGateError> {
        let mut guard = self.state.write().expect("signer registry poisoned");
        if caller != guard.controller {
            return Err(ClaimGateError::NotController(caller));
        }

        if authorized {
            guard.signers.insert(signer);
        } else {
            guard.signers.remove(&signer);
        }
        tracing::info!(?signer, authorized, "signer registry updated");
        Ok(())
    }

    pub fn is_authorized(&self, signer: &Address) -> bool {
        self.state
            .read()
            .expect("signer registry poisoned")
            .signers
            .contains(signer)
    }

    pub fn controller(&self) -> Address {
        self.state.read().expect("signer registry poisoned").controller
    }

    pub fn transfer_control(
        &self,
        caller: Address,
        new_controller: Address,
    ) -> Result<(), ClaimGateError> {
        let mut guard = self.state.write().expect("signer registry poisoned");
        if caller != guard.controller {
            return Err(ClaimGateError::NotController(caller));
        }
        if new_controller.is_zero() {
            return Err(ClaimGateError::InvalidRequest(
                "controller cannot be the zero address".into(),
            ));
        }
        guard.controller = new_controller;
        tracing::info!(controller = ?new_controller, "registry control transferred");
        Ok(())
    }

    /// Authorized signers, sorted.
    pub fn authorized_signers(&self) -> Vec<Address> {
        let mut signers: Vec<_> = self
            .state
            .read()
            .expect("signer registry poisoned")
            .signers
            .iter()
            .copied()
            .collect();
        signers.sort();
        signers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_controller_mutates() {
        let controller = Address::repeat_byte(1);
        let stranger = Address::repeat_byte(2);
        let signer = Address::repeat_byte(3);
        let registry = SignerRegistry::new(controller);

        assert_eq!(
            registry.set_authorized(stranger, signer, true),
            Err(ClaimGateError::NotController(stranger))
        );
        assert!(!registry.is_authorized(&signer));

        registry.set_authorized(controller, signer, true).unwrap();
        assert!(registry.is_authorized(&signer));

        registry.set_authorized(controller, signer, false).unwrap();
        assert!(!registry.is_authorized(&signer));
    }

    #[test]
    fn test_transfer_control() {
        let first = Address::repeat_byte(1);
        let second = Address::repeat_byte(2);
        let registry = SignerRegistry::new(first);

        assert!(registry.transfer_control(second, second).is_err());
        assert!(registry.transfer_control(first, Address::zero()).is_err());
        registry.transfer_control(first, second).unwrap();
        assert_eq!(registry.controller(), second);

        assert!(registry.set_authorized(first, Address::repeat_byte(9), true).is_err());
        registry.set_authorized(second, Address::repeat_byte(9), true).unwrap();
    }

    #[test]
    fn test_authorized_signers_sorted() {
        let registry = SignerRegistry::with_signers(
            Address::repeat_byte(1),
            [Address::repeat_byte(9), Address::repeat_byte(4)],
        );
        assert_eq!(
            registry.authorized_signers(),
            vec![Address::repeat_byte(4), Address::repeat_byte(9)]
        );
    }
}
