//! At-most-once claim ledger.
//!
//! A claim, once consumed, stays consumed: nothing in this module removes a
//! record, and nothing downstream (burning the minted token included) is
//! wired to it.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use claimgate_common::{Address, ClaimGateError, ClaimId};
use serde::{Deserialize, Serialize};
use sled::Db;

use crate::collection::ClaimCollection;

pub const LEDGER_DB_ENV: &str = "CLAIMGATE_LEDGER_DB";
pub const DEFAULT_LEDGER_DB_PATH: &str = "data/claims.db";

/// Tree holding minted tokens, next to the claim records.
const COLLECTION_TREE: &str = "collection";

/// What was released when a claim was consumed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub owner: Address,
    pub payload: Vec<u8>,
    pub consumed_at: u64,
}

#[derive(Clone)]
pub struct ClaimLedger {
    backend: Arc<LedgerBackend>,
}

enum LedgerBackend {
    InMemory(Mutex<HashMap<ClaimId, ClaimRecord>>),
    Persistent(Db),
}

impl ClaimLedger {
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(LedgerBackend::InMemory(Mutex::new(HashMap::new()))),
        }
    }

    pub fn persistent(path: impl AsRef<Path>) -> Result<Self, ClaimGateError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    ClaimGateError::Storage(format!(
                        "failed to create directory for claim ledger at {}: {err}",
                        path_ref.display()
                    ))
                })?;
            }
        }
        let db = sled::open(path_ref).map_err(|err| {
            ClaimGateError::Storage(format!(
                "failed to open claim ledger at {}: {err}",
                path_ref.display()
            ))
        })?;
        Ok(Self {
            backend: Arc::new(LedgerBackend::Persistent(db)),
        })
    }

    pub fn from_env() -> Result<Self, ClaimGateError> {
        let path =
            env::var(LEDGER_DB_ENV).unwrap_or_else(|_| DEFAULT_LEDGER_DB_PATH.to_string());
        Self::persistent(path)
    }

    /// Token collection stored alongside this ledger: in memory for an
    /// in-memory ledger, in the same sled database for a persistent one.
    pub fn collection(&self) -> Result<ClaimCollection, ClaimGateError> {
        match &*self.backend {
            LedgerBackend::InMemory(_) => Ok(ClaimCollection::new()),
            LedgerBackend::Persistent(db) => {
                let tree = db.open_tree(COLLECTION_TREE).map_err(|err| {
                    ClaimGateError::Storage(format!("failed to open collection tree: {err}"))
                })?;
                ClaimCollection::persistent(tree)
            }
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(&*self.backend, LedgerBackend::Persistent(_))
    }

    pub fn is_consumed(&self, claim_id: &ClaimId) -> Result<bool, ClaimGateError> {
        match &*self.backend {
            LedgerBackend::InMemory(store) => Ok(store
                .lock()
                .expect("claim ledger poisoned")
                .contains_key(claim_id)),
            LedgerBackend::Persistent(db) => db
                .contains_key(claim_id.as_bytes())
                .map_err(|err| ClaimGateError::Storage(format!("claim ledger lookup: {err}"))),
        }
    }

    pub fn record(&self, claim_id: &ClaimId) -> Result<Option<ClaimRecord>, ClaimGateError> {
        match &*self.backend {
            LedgerBackend::InMemory(store) => Ok(store
                .lock()
                .expect("claim ledger poisoned")
                .get(claim_id)
                .cloned()),
            LedgerBackend::Persistent(db) => {
                let Some(bytes) = db
                    .get(claim_id.as_bytes())
                    .map_err(|err| ClaimGateError::Storage(format!("claim ledger lookup: {err}")))?
                else {
                    return Ok(None);
                };
                serde_json::from_slice(&bytes)
                    .map(Some)
                    .map_err(|err| ClaimGateError::Storage(format!("corrupt claim record: {err}")))
            }
        }
    }

    /// Atomically mark `claim_id` consumed.
    ///
    /// Exactly one of any number of concurrent calls for the same identifier
    /// succeeds; the rest get `AlreadyClaimed`.
    pub fn try_consume(
        &self,
        claim_id: &ClaimId,
        record: ClaimRecord,
    ) -> Result<(), ClaimGateError> {
        match &*self.backend {
            LedgerBackend::InMemory(store) => {
                let mut guard = store.lock().expect("claim ledger poisoned");
                if guard.contains_key(claim_id) {
                    return Err(ClaimGateError::AlreadyClaimed(claim_id.clone()));
                }
                guard.insert(claim_id.clone(), record);
                Ok(())
            }
            LedgerBackend::Persistent(db) => {
                let bytes = serde_json::to_vec(&record)
                    .map_err(|err| ClaimGateError::Storage(format!("encode claim record: {err}")))?;
                db.compare_and_swap(claim_id.as_bytes(), None::<&[u8]>, Some(bytes))
                    .map_err(|err| ClaimGateError::Storage(format!("claim ledger write: {err}")))?
                    .map_err(|_| ClaimGateError::AlreadyClaimed(claim_id.clone()))?;
                db.flush()
                    .map_err(|err| ClaimGateError::Storage(format!("claim ledger flush: {err}")))?;
                Ok(())
            }
        }
    }

    /// Number of consumed claims.
    pub fn len(&self) -> usize {
        match &*self.backend {
            LedgerBackend::InMemory(store) => store.lock().expect("claim ledger poisoned").len(),
            LedgerBackend::Persistent(db) => db.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ClaimLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimLedger")
            .field("persistent", &self.is_persistent())
            .field("consumed", &self.len())
            .finish()
    }
}
