//! Token collection minted from consumed claims.
//!
//! A token id can be minted at most once, ever. Burning removes the owner but
//! the id stays in the minted set, so no later claim can bring it back.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use claimgate_common::{Address, ClaimGateError, U256};
use sled::{Batch, Tree};

const MINTED_PREFIX: u8 = b'm';
const OWNER_PREFIX: u8 = b'o';

pub struct ClaimCollection {
    state: Mutex<CollectionState>,
    store: Option<Tree>,
}

#[derive(Debug, Default)]
struct CollectionState {
    owners: HashMap<U256, Address>,
    balances: HashMap<Address, u64>,
    minted: HashSet<U256>,
}

impl ClaimCollection {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CollectionState::default()),
            store: None,
        }
    }

    /// Collection backed by a sled tree, loading whatever it already holds.
    pub fn persistent(tree: Tree) -> Result<Self, ClaimGateError> {
        let mut state = CollectionState::default();

        for entry in tree.scan_prefix([MINTED_PREFIX]) {
            let (key, _) = entry.map_err(storage_err("collection scan"))?;
            state.minted.insert(token_from_key(&key)?);
        }
        for entry in tree.scan_prefix([OWNER_PREFIX]) {
            let (key, value) = entry.map_err(storage_err("collection scan"))?;
            if value.len() != 20 {
                return Err(ClaimGateError::Storage(format!(
                    "corrupt owner record of {} bytes",
                    value.len()
                )));
            }
            let owner = Address::from_slice(&value);
            state.owners.insert(token_from_key(&key)?, owner);
            *state.balances.entry(owner).or_default() += 1;
        }

        Ok(Self {
            state: Mutex::new(state),
            store: Some(tree),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    pub fn mint(&self, token_id: U256, to: Address) -> Result<(), ClaimGateError> {
        self.mint_with(token_id, to, || Ok(()))
    }

    /// Mint `token_id` to `to` once `admit` succeeds.
    ///
    /// `admit` runs under the collection lock after the mint preconditions
    /// have been checked, so a failed mint never leaves `admit`'s side effects
    /// behind and a failed `admit` never mints.
    pub fn mint_with<F>(&self, token_id: U256, to: Address, admit: F) -> Result<(), ClaimGateError>
    where
        F: FnOnce() -> Result<(), ClaimGateError>,
    {
        if to.is_zero() {
            return Err(ClaimGateError::InvalidRequest(
                "cannot mint to the zero address".into(),
            ));
        }

        let mut guard = self.state.lock().expect("claim collection poisoned");
        if guard.minted.contains(&token_id) {
            return Err(ClaimGateError::TokenAlreadyMinted(token_id));
        }

        if let Some(tree) = &self.store {
            let mut batch = Batch::default();
            batch.insert(&storage_key(MINTED_PREFIX, token_id)[..], &[] as &[u8]);
            batch.insert(&storage_key(OWNER_PREFIX, token_id)[..], to.as_bytes());
            apply(tree, batch)?;

            if let Err(err) = admit() {
                let mut undo = Batch::default();
                undo.remove(&storage_key(MINTED_PREFIX, token_id)[..]);
                undo.remove(&storage_key(OWNER_PREFIX, token_id)[..]);
                if let Err(undo_err) = apply(tree, undo) {
                    tracing::error!(%token_id, error = %undo_err, "failed to roll back mint");
                }
                return Err(err);
            }
        } else {
            admit()?;
        }

        guard.minted.insert(token_id);
        guard.owners.insert(token_id, to);
        *guard.balances.entry(to).or_default() += 1;
        tracing::debug!(%token_id, owner = ?to, "token minted");
        Ok(())
    }

    /// Destroy `token_id`. Only its owner may burn it.
    pub fn burn(&self, caller: Address, token_id: U256) -> Result<(), ClaimGateError> {
        let mut guard = self.state.lock().expect("claim collection poisoned");
        let owner = *guard
            .owners
            .get(&token_id)
            .ok_or(ClaimGateError::TokenNotFound(token_id))?;
        if owner != caller {
            return Err(ClaimGateError::NotTokenOwner { caller, token_id });
        }

        if let Some(tree) = &self.store {
            let mut batch = Batch::default();
            batch.remove(&storage_key(OWNER_PREFIX, token_id)[..]);
            apply(tree, batch)?;
        }

        guard.owners.remove(&token_id);
        if let Some(balance) = guard.balances.get_mut(&owner) {
            *balance = balance.saturating_sub(1);
        }
        tracing::debug!(%token_id, "token burned");
        Ok(())
    }

    pub fn owner_of(&self, token_id: U256) -> Result<Address, ClaimGateError> {
        self.state
            .lock()
            .expect("claim collection poisoned")
            .owners
            .get(&token_id)
            .copied()
            .ok_or(ClaimGateError::TokenNotFound(token_id))
    }

    pub fn balance_of(&self, owner: &Address) -> u64 {
        self.state
            .lock()
            .expect("claim collection poisoned")
            .balances
            .get(owner)
            .copied()
            .unwrap_or(0)
    }

    pub fn exists(&self, token_id: U256) -> bool {
        self.state
            .lock()
            .expect("claim collection poisoned")
            .owners
            .contains_key(&token_id)
    }

    /// Whether `token_id` was ever minted, burned or not.
    pub fn was_minted(&self, token_id: U256) -> bool {
        self.state
            .lock()
            .expect("claim collection poisoned")
            .minted
            .contains(&token_id)
    }
}

impl Default for ClaimCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClaimCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimCollection")
            .field("persistent", &self.is_persistent())
            .finish_non_exhaustive()
    }
}

fn storage_key(prefix: u8, token_id: U256) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[0] = prefix;
    token_id.to_big_endian(&mut key[1..]);
    key
}

fn token_from_key(key: &[u8]) -> Result<U256, ClaimGateError> {
    if key.len() != 33 {
        return Err(ClaimGateError::Storage(format!(
            "corrupt collection key of {} bytes",
            key.len()
        )));
    }
    Ok(U256::from_big_endian(&key[1..]))
}

fn apply(tree: &Tree, batch: Batch) -> Result<(), ClaimGateError> {
    tree.apply_batch(batch).map_err(storage_err("collection write"))?;
    tree.flush().map_err(storage_err("collection flush"))?;
    Ok(())
}

fn storage_err(context: &'static str) -> impl Fn(sled::Error) -> ClaimGateError {
    move |err| ClaimGateError::Storage(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_and_burn() {
        let collection = ClaimCollection::new();
        let alice = Address::repeat_byte(0xa1);
        let bob = Address::repeat_byte(0xb0);
        let token = U256::from(510u64);

        collection.mint(token, alice).unwrap();
        assert_eq!(collection.owner_of(token).unwrap(), alice);
        assert_eq!(collection.balance_of(&alice), 1);
        assert!(matches!(
            collection.mint(token, bob),
            Err(ClaimGateError::TokenAlreadyMinted(_))
        ));

        assert_eq!(
            collection.burn(bob, token),
            Err(ClaimGateError::NotTokenOwner {
                caller: bob,
                token_id: token
            })
        );
        collection.burn(alice, token).unwrap();
        assert!(!collection.exists(token));
        assert_eq!(collection.balance_of(&alice), 0);
        assert_eq!(
            collection.owner_of(token),
            Err(ClaimGateError::TokenNotFound(token))
        );
        assert_eq!(
            collection.burn(alice, token),
            Err(ClaimGateError::TokenNotFound(token))
        );
    }

    #[test]
    fn test_burned_token_cannot_be_minted_again() {
        let collection = ClaimCollection::new();
        let alice = Address::repeat_byte(0xa1);
        let token = U256::from(2u64);

        collection.mint(token, alice).unwrap();
        collection.burn(alice, token).unwrap();
        assert!(collection.was_minted(token));

        let mut admitted = false;
        let result = collection.mint_with(token, alice, || {
            admitted = true;
            Ok(())
        });
        assert_eq!(result, Err(ClaimGateError::TokenAlreadyMinted(token)));
        assert!(!admitted);
        assert!(!collection.exists(token));
    }

    #[test]
    fn test_mint_with_failed_admission_mints_nothing() {
        let collection = ClaimCollection::new();
        let token = U256::from(2u64);
        let result = collection.mint_with(token, Address::repeat_byte(1), || {
            Err(ClaimGateError::Storage("boom".into()))
        });
        assert!(result.is_err());
        assert!(!collection.exists(token));
        assert!(!collection.was_minted(token));
    }

    #[test]
    fn test_mint_with_skips_admission_when_token_exists() {
        let collection = ClaimCollection::new();
        let token = U256::from(2u64);
        collection.mint(token, Address::repeat_byte(1)).unwrap();

        let mut admitted = false;
        let result = collection.mint_with(token, Address::repeat_byte(2), || {
            admitted = true;
            Ok(())
        });
        assert!(matches!(result, Err(ClaimGateError::TokenAlreadyMinted(_))));
        assert!(!admitted);
    }

    #[test]
    fn test_zero_recipient_rejected() {
        let collection = ClaimCollection::new();
        assert!(matches!(
            collection.mint(U256::one(), Address::zero()),
            Err(ClaimGateError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_persistent_collection_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let alice = Address::repeat_byte(0xa1);
        let kept = U256::from(4u64);
        let burned = U256::from(6u64);
        let rejected = U256::from(8u64);

        {
            let db = sled::open(dir.path()).unwrap();
            let tree = db.open_tree("collection").unwrap();
            let collection = ClaimCollection::persistent(tree).unwrap();
            assert!(collection.is_persistent());
            collection.mint(kept, alice).unwrap();
            collection.mint(burned, alice).unwrap();
            collection.burn(alice, burned).unwrap();
            let _ = collection.mint_with(rejected, alice, || {
                Err(ClaimGateError::Storage("refused".into()))
            });
        }

        let db = sled::open(dir.path()).unwrap();
        let tree = db.open_tree("collection").unwrap();
        let collection = ClaimCollection::persistent(tree).unwrap();
        assert_eq!(collection.owner_of(kept).unwrap(), alice);
        assert_eq!(collection.balance_of(&alice), 1);
        assert!(!collection.exists(burned));
        assert!(collection.was_minted(burned));
        assert!(matches!(
            collection.mint(burned, alice),
            Err(ClaimGateError::TokenAlreadyMinted(_))
        ));
        assert!(!collection.was_minted(rejected));
    }
}
