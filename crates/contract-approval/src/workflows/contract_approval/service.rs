use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use super::domain::{Actor, AdvisoryStep, ApprovalId, ContractApproval, ContractId};
use super::policy::ApprovalStepPolicy;
use super::repository::{
    ApprovalNotification, ApprovalRepository, AuditAction, AuditRecord, AuditSink,
    ContractDirectory, DirectoryError, NotificationKind, NotificationSink, Recipient,
    RepositoryError, Versioned,
};
use super::state_machine::{ApprovalStateMachine, Transition, TransitionError};

/// Body of a submit request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitApproval {
    #[serde(default)]
    pub comments: Option<String>,
    /// Client proposal for the chain. Recorded, never used for eligibility.
    #[serde(default)]
    pub approval_steps: Option<Vec<AdvisoryStep>>,
}

/// Body of an approve or reject request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDecision {
    #[serde(default, alias = "reason")]
    pub comments: Option<String>,
    /// Level the caller is deciding. A level that was already decided is a conflict and a
    /// level above the current one is out of order.
    #[serde(default)]
    pub level: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingEntity {
    Contract,
    Approval,
}

impl fmt::Display for MissingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingEntity::Contract => f.write_str("contract"),
            MissingEntity::Approval => f.write_str("approval"),
        }
    }
}

/// Typed outcomes of the write path. Repository and directory failures are the unexpected kind.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{0} not found")]
    NotFound(MissingEntity),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("actor is not eligible to act on this approval")]
    UnauthorizedAction,
    #[error(transparent)]
    Repository(RepositoryError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

const ALREADY_ACTED: &str = "this approval was already acted upon; reload and try again";

impl From<RepositoryError> for WorkflowError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict => WorkflowError::Conflict(ALREADY_ACTED.to_string()),
            RepositoryError::NotFound => WorkflowError::NotFound(MissingEntity::Approval),
            other => WorkflowError::Repository(other),
        }
    }
}

impl From<TransitionError> for WorkflowError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::NotEligible => WorkflowError::UnauthorizedAction,
            TransitionError::AlreadyDecided { .. } => {
                WorkflowError::Conflict(ALREADY_ACTED.to_string())
            }
            TransitionError::Corrupt(detail) => {
                WorkflowError::Repository(RepositoryError::Corrupted(detail))
            }
            other => WorkflowError::InvalidState(other.to_string()),
        }
    }
}

impl WorkflowError {
    pub fn is_unexpected(&self) -> bool {
        matches!(self, WorkflowError::Repository(_) | WorkflowError::Directory(_))
    }
}

/// Write path: load, decide, persist, then announce.
pub struct ApprovalWorkflowService<R, C> {
    repository: Arc<R>,
    contracts: Arc<C>,
    audit: Arc<dyn AuditSink>,
    notifications: Arc<dyn NotificationSink>,
    policy: ApprovalStepPolicy,
}

impl<R, C> ApprovalWorkflowService<R, C>
where
    R: ApprovalRepository + 'static,
    C: ContractDirectory + 'static,
{
    pub fn new(
        repository: Arc<R>,
        contracts: Arc<C>,
        audit: Arc<dyn AuditSink>,
        notifications: Arc<dyn NotificationSink>,
        policy: ApprovalStepPolicy,
    ) -> Self {
        Self {
            repository,
            contracts,
            audit,
            notifications,
            policy,
        }
    }

    pub fn policy(&self) -> &ApprovalStepPolicy {
        &self.policy
    }

    /// Open a new approval cycle for a contract with no pending cycle.
    pub fn submit_for_approval(
        &self,
        contract_id: &ContractId,
        actor: &Actor,
        request: SubmitApproval,
    ) -> Result<ContractApproval, WorkflowError> {
        let result = self.try_submit(contract_id, actor, request);
        if let Err(err) = &result {
            log_failure("submit", contract_id.0.as_str(), actor, err);
        }
        result
    }

    fn try_submit(
        &self,
        contract_id: &ContractId,
        actor: &Actor,
        request: SubmitApproval,
    ) -> Result<ContractApproval, WorkflowError> {
        let contract = self
            .contracts
            .get_contract(contract_id)?
            .ok_or(WorkflowError::NotFound(MissingEntity::Contract))?;

        if self.repository.active_for_contract(contract_id)?.is_some() {
            return Err(WorkflowError::Conflict(format!(
                "contract {contract_id} already has a pending approval"
            )));
        }

        let chain = self.policy.build_chain(&contract);
        let advisory = request.approval_steps.unwrap_or_default();
        let (approval, transition) = ApprovalStateMachine::new(&self.policy).submit(
            &contract,
            actor,
            request.comments,
            chain,
            advisory,
            Utc::now(),
        )?;

        // The store's uniqueness constraint settles submits that race past the check above.
        let stored = self.repository.insert(approval).map_err(|err| match err {
            RepositoryError::Conflict => WorkflowError::Conflict(format!(
                "contract {contract_id} already has a pending approval"
            )),
            other => other.into(),
        })?;
        let approval = stored.value;

        info!(
            approval_id = %approval.id,
            contract_id = %approval.contract_id,
            actor_id = %actor.id,
            levels = approval.max_approval_level,
            "contract submitted for approval"
        );

        self.emit_audit(&approval, actor, AuditAction::Submitted, transition, None);
        self.notify_next_approvers(&approval);
        Ok(approval)
    }

    pub fn approve(
        &self,
        approval_id: &ApprovalId,
        actor: &Actor,
        decision: StepDecision,
    ) -> Result<ContractApproval, WorkflowError> {
        let result = self.decide(approval_id, actor, |machine, approval, now| {
            machine.approve(approval, actor, decision.comments.clone(), decision.level, now)
        });
        let (approval, transition) = match result {
            Ok(done) => done,
            Err(err) => {
                log_failure("approve", approval_id.0.as_str(), actor, &err);
                return Err(err);
            }
        };

        info!(
            approval_id = %approval.id,
            contract_id = %approval.contract_id,
            actor_id = %actor.id,
            level = transition.level,
            status = approval.status.label(),
            "approval step approved"
        );

        self.emit_audit(&approval, actor, AuditAction::Approved, transition, None);
        if approval.is_pending() {
            self.notify_next_approvers(&approval);
        } else {
            self.notify(ApprovalNotification {
                recipient: Recipient::Requester(approval.requested_by.clone()),
                kind: NotificationKind::ContractApproved,
                approval_id: approval.id.clone(),
                contract_id: approval.contract_id.clone(),
            });
        }
        Ok(approval)
    }

    pub fn reject(
        &self,
        approval_id: &ApprovalId,
        actor: &Actor,
        decision: StepDecision,
    ) -> Result<ContractApproval, WorkflowError> {
        let reason = decision.comments.clone().unwrap_or_default();
        let result = self.decide(approval_id, actor, |machine, approval, now| {
            machine.reject(approval, actor, reason.clone(), decision.level, now)
        });
        let (approval, transition) = match result {
            Ok(done) => done,
            Err(err) => {
                log_failure("reject", approval_id.0.as_str(), actor, &err);
                return Err(err);
            }
        };

        let reason = approval.rejection_reason.clone().unwrap_or_default();
        info!(
            approval_id = %approval.id,
            contract_id = %approval.contract_id,
            actor_id = %actor.id,
            level = transition.level,
            "approval rejected"
        );

        self.emit_audit(
            &approval,
            actor,
            AuditAction::Rejected,
            transition,
            Some(reason.clone()),
        );
        self.notify(ApprovalNotification {
            recipient: Recipient::Requester(approval.requested_by.clone()),
            kind: NotificationKind::ContractRejected { reason },
            approval_id: approval.id.clone(),
            contract_id: approval.contract_id.clone(),
        });
        Ok(approval)
    }

    /// Withdraw a pending cycle. Allowed for the requester and the admin role.
    pub fn cancel(
        &self,
        approval_id: &ApprovalId,
        actor: &Actor,
        note: Option<String>,
    ) -> Result<ContractApproval, WorkflowError> {
        let result = self.decide(approval_id, actor, |machine, approval, now| {
            machine.cancel(approval, actor, now)
        });
        let (approval, transition) = match result {
            Ok(done) => done,
            Err(err) => {
                log_failure("cancel", approval_id.0.as_str(), actor, &err);
                return Err(err);
            }
        };

        info!(
            approval_id = %approval.id,
            contract_id = %approval.contract_id,
            actor_id = %actor.id,
            "approval cancelled"
        );

        self.emit_audit(&approval, actor, AuditAction::Cancelled, transition, note);
        self.notify(ApprovalNotification {
            recipient: Recipient::Requester(approval.requested_by.clone()),
            kind: NotificationKind::ApprovalCancelled,
            approval_id: approval.id.clone(),
            contract_id: approval.contract_id.clone(),
        });
        Ok(approval)
    }

    pub fn get(&self, approval_id: &ApprovalId) -> Result<ContractApproval, WorkflowError> {
        self.repository
            .load(approval_id)?
            .map(|stored| stored.value)
            .ok_or(WorkflowError::NotFound(MissingEntity::Approval))
    }

    /// One read-decide-write cycle. A version mismatch at save time surfaces as
    /// `Conflict`; it is never retried here.
    fn decide<F>(
        &self,
        approval_id: &ApprovalId,
        actor: &Actor,
        transition: F,
    ) -> Result<(ContractApproval, Transition), WorkflowError>
    where
        F: Fn(
            &ApprovalStateMachine<'_>,
            &mut ContractApproval,
            chrono::DateTime<Utc>,
        ) -> Result<Transition, TransitionError>,
    {
        let Versioned {
            value: mut approval,
            version,
        } = self
            .repository
            .load(approval_id)?
            .ok_or(WorkflowError::NotFound(MissingEntity::Approval))?;

        let machine = ApprovalStateMachine::new(&self.policy);
        let outcome = transition(&machine, &mut approval, Utc::now())?;

        let stored = self.repository.save(approval, version).map_err(|err| {
            if matches!(err, RepositoryError::Conflict) {
                warn!(
                    approval_id = %approval_id,
                    actor_id = %actor.id,
                    expected_version = version,
                    "approval changed underneath the decision"
                );
            }
            WorkflowError::from(err)
        })?;

        Ok((stored.value, outcome))
    }

    fn emit_audit(
        &self,
        approval: &ContractApproval,
        actor: &Actor,
        action: AuditAction,
        transition: Transition,
        detail: Option<String>,
    ) {
        let advisory_steps = if action == AuditAction::Submitted {
            approval.advisory_steps.clone()
        } else {
            Vec::new()
        };
        let record = AuditRecord {
            approval_id: approval.id.clone(),
            contract_id: approval.contract_id.clone(),
            actor_id: actor.id.clone(),
            action,
            from_status: transition.from,
            to_status: transition.to,
            level: transition.level,
            occurred_at: transition.at,
            detail,
            advisory_steps,
        };

        if let Err(err) = self.audit.record(record) {
            warn!(approval_id = %approval.id, error = %err, "audit sink rejected record");
        }
    }

    fn notify_next_approvers(&self, approval: &ContractApproval) {
        if let Some(step) = approval.current_step() {
            self.notify(ApprovalNotification {
                recipient: Recipient::Approvers(step.eligibility.clone()),
                kind: NotificationKind::AwaitingApproval { level: step.level },
                approval_id: approval.id.clone(),
                contract_id: approval.contract_id.clone(),
            });
        }
    }

    fn notify(&self, notification: ApprovalNotification) {
        let approval_id = notification.approval_id.clone();
        if let Err(err) = self.notifications.notify(notification) {
            warn!(approval_id = %approval_id, error = %err, "notification dispatch failed");
        }
    }
}

fn log_failure(operation: &str, subject: &str, actor: &Actor, err: &WorkflowError) {
    if err.is_unexpected() {
        error!(operation, subject, actor_id = %actor.id, error = %err, "approval workflow failed");
    } else {
        info!(operation, subject, actor_id = %actor.id, reason = %err, "approval request refused");
    }
}
