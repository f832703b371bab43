use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::super::domain::{ApprovalId, ContractApproval, ContractId, Page, PageRequest};
use super::super::repository::{
    inbox_order, ApprovalRepository, PendingFilter, RepositoryError, Version, Versioned,
};

#[derive(Default)]
struct Tables {
    approvals: HashMap<ApprovalId, Versioned<ContractApproval>>,
    pending_by_contract: HashMap<ContractId, ApprovalId>,
}

/// Process-local store. One mutex covers every table so the pending-uniqueness check and
/// the version compare happen in the same critical section as the write.
#[derive(Default, Clone)]
pub struct InMemoryApprovalStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryApprovalStore {
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Unavailable("approval store mutex poisoned".to_string()))
    }
}

impl ApprovalRepository for InMemoryApprovalStore {
    fn insert(
        &self,
        approval: ContractApproval,
    ) -> Result<Versioned<ContractApproval>, RepositoryError> {
        let mut tables = self.lock()?;
        if tables.approvals.contains_key(&approval.id) {
            return Err(RepositoryError::Conflict);
        }
        if approval.is_pending() {
            if tables.pending_by_contract.contains_key(&approval.contract_id) {
                return Err(RepositoryError::Conflict);
            }
            tables
                .pending_by_contract
                .insert(approval.contract_id.clone(), approval.id.clone());
        }

        let stored = Versioned {
            value: approval,
            version: 1,
        };
        tables
            .approvals
            .insert(stored.value.id.clone(), stored.clone());
        Ok(stored)
    }

    fn load(&self, id: &ApprovalId) -> Result<Option<Versioned<ContractApproval>>, RepositoryError> {
        Ok(self.lock()?.approvals.get(id).cloned())
    }

    fn save(
        &self,
        approval: ContractApproval,
        expected: Version,
    ) -> Result<Versioned<ContractApproval>, RepositoryError> {
        let mut tables = self.lock()?;
        let current = tables
            .approvals
            .get(&approval.id)
            .ok_or(RepositoryError::NotFound)?;
        if current.version != expected {
            return Err(RepositoryError::Conflict);
        }

        if !approval.is_pending() {
            let indexed = tables.pending_by_contract.get(&approval.contract_id);
            if indexed == Some(&approval.id) {
                tables.pending_by_contract.remove(&approval.contract_id);
            }
        }

        let stored = Versioned {
            value: approval,
            version: expected + 1,
        };
        tables
            .approvals
            .insert(stored.value.id.clone(), stored.clone());
        Ok(stored)
    }

    fn active_for_contract(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<Versioned<ContractApproval>>, RepositoryError> {
        let tables = self.lock()?;
        Ok(tables
            .pending_by_contract
            .get(contract_id)
            .and_then(|id| tables.approvals.get(id))
            .cloned())
    }

    fn query_pending(
        &self,
        filter: &PendingFilter,
        page: PageRequest,
    ) -> Result<Page<ContractApproval>, RepositoryError> {
        let tables = self.lock()?;
        let mut matching: Vec<ContractApproval> = tables
            .pending_by_contract
            .values()
            .filter_map(|id| tables.approvals.get(id))
            .map(|stored| &stored.value)
            .filter(|approval| filter.matches(approval))
            .cloned()
            .collect();
        matching.sort_by(inbox_order);
        Ok(Page::from_ordered(matching, page))
    }

    fn history(&self, contract_id: &ContractId) -> Result<Vec<ContractApproval>, RepositoryError> {
        let tables = self.lock()?;
        let mut cycles: Vec<ContractApproval> = tables
            .approvals
            .values()
            .filter(|stored| &stored.value.contract_id == contract_id)
            .map(|stored| stored.value.clone())
            .collect();
        cycles.sort_by(inbox_order);
        Ok(cycles)
    }
}
