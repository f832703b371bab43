use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    Actor, ApprovalStatus, ContractApproval, ContractApprovalStep, ContractId, Page, PageRequest,
};
use super::policy::ApprovalStepPolicy;
use super::repository::{ApprovalRepository, PendingFilter};
use super::service::WorkflowError;

/// Read side over the same persisted model as the workflow service.
pub struct ApprovalQueryService<R> {
    repository: Arc<R>,
    policy: ApprovalStepPolicy,
    max_page_size: u32,
}

/// Step of the audit trail with the cycle it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub requested_at: DateTime<Utc>,
    pub cycle_status: ApprovalStatus,
    #[serde(flatten)]
    pub step: ContractApprovalStep,
}

impl<R> ApprovalQueryService<R>
where
    R: ApprovalRepository + 'static,
{
    pub fn new(repository: Arc<R>, policy: ApprovalStepPolicy, max_page_size: u32) -> Self {
        Self {
            repository,
            policy,
            max_page_size: max_page_size.max(1),
        }
    }

    pub fn page_request(&self, page_number: Option<u32>, page_size: Option<u32>) -> PageRequest {
        PageRequest::normalized(page_number, page_size, self.max_page_size)
    }

    /// Pending cycles whose current step this actor may act on, oldest request first.
    pub fn pending_approvals(
        &self,
        actor: &Actor,
        page: PageRequest,
    ) -> Result<Page<ContractApproval>, WorkflowError> {
        let page = PageRequest::normalized(
            Some(page.page_number),
            Some(page.page_size),
            self.max_page_size,
        );
        let filter = PendingFilter::new(actor.clone(), self.policy.clone());
        Ok(self.repository.query_pending(&filter, page)?)
    }

    /// Every step of every cycle for the contract, by submission time then level.
    pub fn approval_history(
        &self,
        contract_id: &ContractId,
    ) -> Result<Vec<ContractApprovalStep>, WorkflowError> {
        Ok(self
            .history_entries(contract_id)?
            .into_iter()
            .map(|entry| entry.step)
            .collect())
    }

    pub fn history_entries(
        &self,
        contract_id: &ContractId,
    ) -> Result<Vec<HistoryEntry>, WorkflowError> {
        let cycles = self.repository.history(contract_id)?;
        Ok(flatten_history(cycles))
    }
}

fn flatten_history(mut cycles: Vec<ContractApproval>) -> Vec<HistoryEntry> {
    cycles.sort_by(|a, b| {
        a.requested_at
            .cmp(&b.requested_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    cycles
        .into_iter()
        .flat_map(|cycle| {
            let requested_at = cycle.requested_at;
            let cycle_status = cycle.status;
            let mut steps = cycle.approval_steps;
            steps.sort_by_key(|step| step.level);
            steps.into_iter().map(move |step| HistoryEntry {
                requested_at,
                cycle_status,
                step,
            })
        })
        .collect()
}
