use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, IVec, Tree};
use tracing::debug;

use super::super::domain::{ApprovalId, ContractApproval, ContractId, Page, PageRequest};
use super::super::repository::{
    inbox_order, ApprovalRepository, PendingFilter, RepositoryError, Version, Versioned,
};

const APPROVALS_TREE: &str = "approvals";
const PENDING_TREE: &str = "pending_by_contract";
const CYCLES_TREE: &str = "cycles_by_contract";

#[derive(Serialize)]
struct StoredRef<'a> {
    version: Version,
    approval: &'a ContractApproval,
}

#[derive(Deserialize)]
struct Stored {
    version: Version,
    approval: ContractApproval,
}

/// Durable store on sled.
///
/// Trees:
/// - `approvals`: approval id -> JSON `{ version, approval }`
/// - `pending_by_contract`: contract id -> approval id of the single pending cycle
/// - `cycles_by_contract`: `u32 BE length ++ contract id ++ approval id` -> empty, for
///   history scans. The length prefix keeps one contract's keys out of another's range.
///
/// Inserts and saves run as one transaction over all three trees.
#[derive(Clone)]
pub struct SledApprovalStore {
    db: Db,
    approvals: Tree,
    pending: Tree,
    cycles: Tree,
}

impl SledApprovalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let db = sled::open(path).map_err(storage_error)?;
        Self::with_db(db)
    }

    pub fn with_db(db: Db) -> Result<Self, RepositoryError> {
        let approvals = db.open_tree(APPROVALS_TREE).map_err(storage_error)?;
        let pending = db.open_tree(PENDING_TREE).map_err(storage_error)?;
        let cycles = db.open_tree(CYCLES_TREE).map_err(storage_error)?;
        Ok(Self {
            db,
            approvals,
            pending,
            cycles,
        })
    }

    pub fn flush(&self) -> Result<(), RepositoryError> {
        self.db.flush().map(|_| ()).map_err(storage_error)
    }

    fn fetch(&self, id: &[u8]) -> Result<Option<Versioned<ContractApproval>>, RepositoryError> {
        match self.approvals.get(id).map_err(storage_error)? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }
}

fn cycle_key(contract_id: &ContractId, approval_id: &ApprovalId) -> Vec<u8> {
    let mut key = cycle_prefix(contract_id);
    key.extend_from_slice(approval_id.0.as_bytes());
    key
}

fn cycle_prefix(contract_id: &ContractId) -> Vec<u8> {
    let id = contract_id.0.as_bytes();
    let mut key = Vec::with_capacity(4 + id.len());
    key.extend_from_slice(&(id.len() as u32).to_be_bytes());
    key.extend_from_slice(id);
    key
}

fn encode(approval: &ContractApproval, version: Version) -> Result<Vec<u8>, RepositoryError> {
    serde_json::to_vec(&StoredRef { version, approval })
        .map_err(|err| RepositoryError::Corrupted(err.to_string()))
}

fn decode(bytes: &IVec) -> Result<Versioned<ContractApproval>, RepositoryError> {
    let stored: Stored =
        serde_json::from_slice(bytes).map_err(|err| RepositoryError::Corrupted(err.to_string()))?;
    Ok(Versioned {
        value: stored.approval,
        version: stored.version,
    })
}

fn storage_error(err: sled::Error) -> RepositoryError {
    RepositoryError::Unavailable(err.to_string())
}

fn transaction_error(err: TransactionError<RepositoryError>) -> RepositoryError {
    match err {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(err) => storage_error(err),
    }
}

impl ApprovalRepository for SledApprovalStore {
    fn insert(
        &self,
        approval: ContractApproval,
    ) -> Result<Versioned<ContractApproval>, RepositoryError> {
        let encoded = encode(&approval, 1)?;
        let id_key = approval.id.0.as_bytes();
        let contract_key = approval.contract_id.0.as_bytes();
        let cycle = cycle_key(&approval.contract_id, &approval.id);
        let pending_cycle = approval.is_pending();

        (&self.approvals, &self.pending, &self.cycles)
            .transaction(|(approvals, pending, cycles)| {
                if approvals.get(id_key)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(RepositoryError::Conflict));
                }
                if pending_cycle {
                    if pending.get(contract_key)?.is_some() {
                        return Err(ConflictableTransactionError::Abort(
                            RepositoryError::Conflict,
                        ));
                    }
                    pending.insert(contract_key, id_key)?;
                }
                approvals.insert(id_key, encoded.as_slice())?;
                cycles.insert(cycle.as_slice(), &[] as &[u8])?;
                Ok(())
            })
            .map_err(transaction_error)?;

        debug!(approval_id = %approval.id, contract_id = %approval.contract_id, "approval inserted");
        Ok(Versioned {
            value: approval,
            version: 1,
        })
    }

    fn load(&self, id: &ApprovalId) -> Result<Option<Versioned<ContractApproval>>, RepositoryError> {
        self.fetch(id.0.as_bytes())
    }

    fn save(
        &self,
        approval: ContractApproval,
        expected: Version,
    ) -> Result<Versioned<ContractApproval>, RepositoryError> {
        let next = expected + 1;
        let encoded = encode(&approval, next)?;
        let id_key = approval.id.0.as_bytes();
        let contract_key = approval.contract_id.0.as_bytes();
        let release_pending = !approval.is_pending();

        (&self.approvals, &self.pending)
            .transaction(|(approvals, pending)| {
                let current = approvals
                    .get(id_key)?
                    .ok_or(ConflictableTransactionError::Abort(RepositoryError::NotFound))?;
                let current = decode(&current).map_err(ConflictableTransactionError::Abort)?;
                if current.version != expected {
                    return Err(ConflictableTransactionError::Abort(RepositoryError::Conflict));
                }

                if release_pending {
                    if let Some(indexed) = pending.get(contract_key)? {
                        if indexed.as_ref() == id_key {
                            pending.remove(contract_key)?;
                        }
                    }
                }
                approvals.insert(id_key, encoded.as_slice())?;
                Ok(())
            })
            .map_err(transaction_error)?;

        Ok(Versioned {
            value: approval,
            version: next,
        })
    }

    fn active_for_contract(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<Versioned<ContractApproval>>, RepositoryError> {
        match self
            .pending
            .get(contract_id.0.as_bytes())
            .map_err(storage_error)?
        {
            Some(id) => self.fetch(&id),
            None => Ok(None),
        }
    }

    fn query_pending(
        &self,
        filter: &PendingFilter,
        page: PageRequest,
    ) -> Result<Page<ContractApproval>, RepositoryError> {
        let mut matching = Vec::new();
        for entry in self.pending.iter() {
            let (_, id) = entry.map_err(storage_error)?;
            if let Some(stored) = self.fetch(&id)? {
                if filter.matches(&stored.value) {
                    matching.push(stored.value);
                }
            }
        }
        matching.sort_by(inbox_order);
        Ok(Page::from_ordered(matching, page))
    }

    fn history(&self, contract_id: &ContractId) -> Result<Vec<ContractApproval>, RepositoryError> {
        let prefix = cycle_prefix(contract_id);
        let mut cycles = Vec::new();
        for entry in self.cycles.scan_prefix(&prefix) {
            let (key, _) = entry.map_err(storage_error)?;
            let id = &key[prefix.len()..];
            match self.fetch(id)? {
                Some(stored) if stored.value.contract_id == *contract_id => {
                    cycles.push(stored.value)
                }
                Some(_) => continue,
                None => {
                    return Err(RepositoryError::Corrupted(format!(
                        "history index references missing approval for contract {contract_id}"
                    )))
                }
            }
        }
        cycles.sort_by(inbox_order);
        Ok(cycles)
    }
}
