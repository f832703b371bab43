//! Transition rules for a single approval cycle.
//!
//! Every guard runs before the aggregate is touched, so a rejected transition leaves the
//! cycle exactly as it was loaded.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    Actor, AdvisoryStep, ApprovalId, ApprovalStatus, ContractApproval, ContractApprovalStep,
    ContractSummary, StepStatus,
};
use super::policy::{ApprovalStepPolicy, ChainLevel};

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("approval is already {}", .0.label())]
    Terminal(ApprovalStatus),
    #[error("approval step {requested} is not actionable; level {current} is awaiting action")]
    OutOfOrder { requested: u32, current: u32 },
    #[error("approval step {level} was already acted upon")]
    AlreadyDecided { level: u32 },
    #[error("approval chain is empty")]
    EmptyChain,
    #[error("approval is corrupt: {0}")]
    Corrupt(String),
    #[error("a rejection reason is required")]
    MissingReason,
    #[error("actor is not eligible to act on the current approval step")]
    NotEligible,
}

/// Status change produced by a successful transition, used for audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Option<ApprovalStatus>,
    pub to: ApprovalStatus,
    pub level: u32,
    pub at: DateTime<Utc>,
}

pub struct ApprovalStateMachine<'a> {
    policy: &'a ApprovalStepPolicy,
}

impl<'a> ApprovalStateMachine<'a> {
    pub fn new(policy: &'a ApprovalStepPolicy) -> Self {
        Self { policy }
    }

    /// Materializes every level of `chain` as a pending step; the cycle starts at level 1.
    pub fn submit(
        &self,
        contract: &ContractSummary,
        actor: &Actor,
        comments: Option<String>,
        chain: Vec<ChainLevel>,
        advisory_steps: Vec<AdvisoryStep>,
        now: DateTime<Utc>,
    ) -> Result<(ContractApproval, Transition), TransitionError> {
        if chain.is_empty() {
            return Err(TransitionError::EmptyChain);
        }

        let id = ApprovalId::generate();
        let max_approval_level = chain.len() as u32;
        let approval_steps = chain
            .into_iter()
            .enumerate()
            .map(|(index, level)| ContractApprovalStep {
                approval_id: id.clone(),
                level: index as u32 + 1,
                eligibility: level.eligibility,
                status: StepStatus::Pending,
                acted_by: None,
                acted_at: None,
                comments: None,
            })
            .collect();

        let approval = ContractApproval {
            id,
            contract_id: contract.id.clone(),
            employee_id: contract.employee_id.clone(),
            status: ApprovalStatus::Pending,
            current_approval_level: 1,
            max_approval_level,
            comments,
            requested_by: actor.id.clone(),
            requested_at: now,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            approval_steps,
            advisory_steps,
        };

        Ok((
            approval,
            Transition {
                from: None,
                to: ApprovalStatus::Pending,
                level: 1,
                at: now,
            },
        ))
    }

    pub fn approve(
        &self,
        approval: &mut ContractApproval,
        actor: &Actor,
        comments: Option<String>,
        expected_level: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Transition, TransitionError> {
        let level = self.actionable_level(approval, actor, expected_level)?;
        let from = approval.status;

        mark_step(approval, level, StepStatus::Approved, actor, comments, now)?;

        if level >= approval.max_approval_level {
            approval.status = ApprovalStatus::Approved;
            approval.approved_by = Some(actor.id.clone());
            approval.approved_at = Some(now);
        } else {
            approval.current_approval_level = level + 1;
        }

        Ok(Transition {
            from: Some(from),
            to: approval.status,
            level,
            at: now,
        })
    }

    pub fn reject(
        &self,
        approval: &mut ContractApproval,
        actor: &Actor,
        reason: String,
        expected_level: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Transition, TransitionError> {
        let level = self.actionable_level(approval, actor, expected_level)?;
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(TransitionError::MissingReason);
        }
        let from = approval.status;

        mark_step(
            approval,
            level,
            StepStatus::Rejected,
            actor,
            Some(reason.clone()),
            now,
        )?;
        skip_remaining(approval);

        approval.status = ApprovalStatus::Rejected;
        approval.rejected_by = Some(actor.id.clone());
        approval.rejected_at = Some(now);
        approval.rejection_reason = Some(reason);

        Ok(Transition {
            from: Some(from),
            to: approval.status,
            level,
            at: now,
        })
    }

    /// Administrative withdrawal by the requester or an admin. Remaining steps are skipped.
    pub fn cancel(
        &self,
        approval: &mut ContractApproval,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Transition, TransitionError> {
        if approval.status.is_terminal() {
            return Err(TransitionError::Terminal(approval.status));
        }
        if !self.policy.can_cancel(actor, approval) {
            return Err(TransitionError::NotEligible);
        }

        let from = approval.status;
        let level = approval.current_approval_level;
        skip_remaining(approval);
        approval.status = ApprovalStatus::Cancelled;

        Ok(Transition {
            from: Some(from),
            to: approval.status,
            level,
            at: now,
        })
    }

    /// Resolves the level this actor may decide. A decision aimed at a step that already
    /// carries one is a conflict, never a second advance.
    fn actionable_level(
        &self,
        approval: &ContractApproval,
        actor: &Actor,
        expected_level: Option<u32>,
    ) -> Result<u32, TransitionError> {
        if let Some(requested) = expected_level {
            if approval.step(requested).is_some_and(is_decided) {
                return Err(TransitionError::AlreadyDecided { level: requested });
            }
        }

        if approval.status.is_terminal() {
            return Err(TransitionError::Terminal(approval.status));
        }

        let current = approval.current_approval_level;
        match expected_level {
            Some(requested) if requested < current => {
                return Err(TransitionError::AlreadyDecided { level: requested });
            }
            Some(requested) if requested > current => {
                return Err(TransitionError::OutOfOrder { requested, current });
            }
            Some(_) => {}
            // Without a level, a repeat from someone entitled to an earlier, decided step
            // is a replay of that decision.
            None => {
                if let Some(level) = decided_step_admitting(approval, actor) {
                    return Err(TransitionError::AlreadyDecided { level });
                }
            }
        }

        let step = approval.current_step().ok_or_else(|| {
            TransitionError::Corrupt(format!("no step materialized for level {current}"))
        })?;

        if approval.lowest_pending_level() != Some(current) {
            return Err(TransitionError::Corrupt(format!(
                "level {current} is not the lowest pending step"
            )));
        }

        if !self.policy.can_act(actor, approval, step) {
            return Err(TransitionError::NotEligible);
        }

        Ok(current)
    }
}

fn is_decided(step: &ContractApprovalStep) -> bool {
    matches!(step.status, StepStatus::Approved | StepStatus::Rejected)
}

fn decided_step_admitting(approval: &ContractApproval, actor: &Actor) -> Option<u32> {
    approval
        .approval_steps
        .iter()
        .filter(|step| step.level < approval.current_approval_level && is_decided(step))
        .filter(|step| step.eligibility.admits(actor) || step.acted_by.as_ref() == Some(&actor.id))
        .map(|step| step.level)
        .max()
}

fn mark_step(
    approval: &mut ContractApproval,
    level: u32,
    status: StepStatus,
    actor: &Actor,
    comments: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    let step = approval
        .step_mut(level)
        .ok_or_else(|| TransitionError::Corrupt(format!("missing step for level {level}")))?;
    step.status = status;
    step.acted_by = Some(actor.id.clone());
    step.acted_at = Some(now);
    step.comments = comments.filter(|text| !text.trim().is_empty());
    Ok(())
}

fn skip_remaining(approval: &mut ContractApproval) {
    for step in approval
        .approval_steps
        .iter_mut()
        .filter(|step| step.status == StepStatus::Pending)
    {
        step.status = StepStatus::Skipped;
    }
}
