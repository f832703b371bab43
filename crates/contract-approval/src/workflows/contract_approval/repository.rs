use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Actor, ActorId, AdvisoryStep, ApprovalId, ApprovalStatus, ContractApproval, ContractId,
    ContractSummary, Eligibility, Page, PageRequest,
};
use super::policy::ApprovalStepPolicy;

/// Optimistic concurrency token. Starts at 1 on insert and grows by one per save.
pub type Version = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Version,
}

/// External authority for contract records.
pub trait ContractDirectory: Send + Sync {
    fn get_contract(&self, id: &ContractId) -> Result<Option<ContractSummary>, DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("contract directory unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction for approval cycles. The aggregate, steps included, is the unit of
/// concurrency control.
pub trait ApprovalRepository: Send + Sync {
    /// Fails with [`RepositoryError::Conflict`] when the contract already has a pending cycle.
    fn insert(&self, approval: ContractApproval)
        -> Result<Versioned<ContractApproval>, RepositoryError>;

    fn load(&self, id: &ApprovalId) -> Result<Option<Versioned<ContractApproval>>, RepositoryError>;

    /// Writes only if the stored version still equals `expected`.
    fn save(
        &self,
        approval: ContractApproval,
        expected: Version,
    ) -> Result<Versioned<ContractApproval>, RepositoryError>;

    fn active_for_contract(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<Versioned<ContractApproval>>, RepositoryError>;

    fn query_pending(
        &self,
        filter: &PendingFilter,
        page: PageRequest,
    ) -> Result<Page<ContractApproval>, RepositoryError>;

    /// Every cycle ever submitted for the contract, in any status.
    fn history(&self, contract_id: &ContractId) -> Result<Vec<ContractApproval>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("approval was modified concurrently")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("stored record could not be decoded: {0}")]
    Corrupted(String),
}

/// Role- and identity-aware inbox filter evaluated by the stores.
#[derive(Debug, Clone)]
pub struct PendingFilter {
    pub actor: Actor,
    pub policy: ApprovalStepPolicy,
}

impl PendingFilter {
    pub fn new(actor: Actor, policy: ApprovalStepPolicy) -> Self {
        Self { actor, policy }
    }

    pub fn matches(&self, approval: &ContractApproval) -> bool {
        self.policy.awaits(&self.actor, approval)
    }
}

/// Oldest request first so inboxes drain in submission order.
pub(crate) fn inbox_order(a: &ContractApproval, b: &ContractApproval) -> std::cmp::Ordering {
    a.requested_at
        .cmp(&b.requested_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Submitted,
    Approved,
    Rejected,
    Cancelled,
}

/// One audit record per state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub approval_id: ApprovalId,
    pub contract_id: ContractId,
    pub actor_id: ActorId,
    pub action: AuditAction,
    pub from_status: Option<ApprovalStatus>,
    pub to_status: ApprovalStatus,
    pub level: u32,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advisory_steps: Vec<AdvisoryStep>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Recipient {
    Approvers(Eligibility),
    Requester(ActorId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    AwaitingApproval { level: u32 },
    ContractApproved,
    ContractRejected { reason: String },
    ApprovalCancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalNotification {
    pub recipient: Recipient,
    pub kind: NotificationKind,
    pub approval_id: ApprovalId,
    pub contract_id: ContractId,
}

/// Outbound notification hook. Delivery is best effort.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: ApprovalNotification) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink transport unavailable: {0}")]
    Transport(String),
}
