//! Multi-level approval of employment contracts.
//!
//! A submitted contract gets a frozen chain of role-gated steps. Approvers act on the
//! lowest pending step only, every write is guarded by the aggregate version, and the
//! audit and notification sinks hear about each transition once it is persisted.

pub mod domain;
pub mod policy;
pub mod query;
pub mod repository;
pub mod router;
pub mod service;
pub mod state_machine;
pub mod store;

#[cfg(test)]
mod tests;

pub use domain::{
    Actor, ActorId, AdvisoryStep, ApprovalId, ApprovalStatus, ContractApproval,
    ContractApprovalStep, ContractId, ContractSummary, ContractType, Eligibility, EmployeeId,
    Page, PageRequest, RoleSet, StepStatus, DEFAULT_PAGE_SIZE,
};
pub use policy::{ApprovalPolicyConfig, ApprovalStepPolicy, ChainLevel};
pub use query::{ApprovalQueryService, HistoryEntry};
pub use repository::{
    ApprovalNotification, ApprovalRepository, AuditAction, AuditRecord, AuditSink,
    ContractDirectory, DirectoryError, NotificationKind, NotificationSink, PendingFilter,
    Recipient, RepositoryError, SinkError, Version, Versioned,
};
pub use router::{actor_from_headers, approval_router, ApprovalApi};
pub use service::{
    ApprovalWorkflowService, MissingEntity, StepDecision, SubmitApproval, WorkflowError,
};
pub use state_machine::{ApprovalStateMachine, Transition, TransitionError};
pub use store::{InMemoryApprovalStore, SledApprovalStore};
