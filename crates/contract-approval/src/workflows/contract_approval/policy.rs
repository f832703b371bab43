use serde::{Deserialize, Serialize};

use super::domain::{
    Actor, ContractApproval, ContractApprovalStep, ContractSummary, ContractType, Eligibility,
    StepStatus,
};

const FALLBACK_ROLE: &str = "Manager";

/// Policy dial describing how approval chains are assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicyConfig {
    /// Roles every contract passes through, lowest level first.
    pub base_chain: Vec<String>,
    /// Extra top level for executive contracts or salaries at/above the threshold.
    pub escalation_role: String,
    pub escalation_threshold: u64,
    /// Role allowed to cancel any pending cycle.
    pub admin_role: String,
}

impl Default for ApprovalPolicyConfig {
    fn default() -> Self {
        Self {
            base_chain: vec!["Manager".to_string(), "HR".to_string()],
            escalation_role: "Director".to_string(),
            escalation_threshold: 10_000,
            admin_role: "Admin".to_string(),
        }
    }
}

/// One level of a freshly built chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLevel {
    pub level: u32,
    pub eligibility: Eligibility,
}

/// Pure decision functions shared by the write and read paths.
#[derive(Debug, Clone, Default)]
pub struct ApprovalStepPolicy {
    config: ApprovalPolicyConfig,
}

impl ApprovalStepPolicy {
    pub fn new(config: ApprovalPolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ApprovalPolicyConfig {
        &self.config
    }

    /// Deterministic for a given contract. Callers must snapshot the result into the
    /// aggregate; later config changes never reach in-flight cycles.
    pub fn build_chain(&self, contract: &ContractSummary) -> Vec<ChainLevel> {
        let mut roles: Vec<&str> = self
            .config
            .base_chain
            .iter()
            .map(|role| role.trim())
            .filter(|role| !role.is_empty())
            .collect();

        if roles.is_empty() {
            roles.push(FALLBACK_ROLE);
        }

        let escalation = self.config.escalation_role.trim();
        let escalates = contract.contract_type == ContractType::Executive
            || contract.monthly_salary >= self.config.escalation_threshold;
        if escalates
            && !escalation.is_empty()
            && !roles.iter().any(|role| role.eq_ignore_ascii_case(escalation))
        {
            roles.push(escalation);
        }

        roles
            .into_iter()
            .enumerate()
            .map(|(index, role)| ChainLevel {
                level: index as u32 + 1,
                eligibility: Eligibility::Role(role.to_string()),
            })
            .collect()
    }

    /// True only for the lowest pending step of a pending cycle, and only when the
    /// actor satisfies the step's frozen eligibility.
    pub fn can_act(
        &self,
        actor: &Actor,
        approval: &ContractApproval,
        step: &ContractApprovalStep,
    ) -> bool {
        approval.is_pending()
            && step.status == StepStatus::Pending
            && approval.lowest_pending_level() == Some(step.level)
            && step.eligibility.admits(actor)
    }

    /// Inbox predicate: the cycle is currently actionable by this actor.
    pub fn awaits(&self, actor: &Actor, approval: &ContractApproval) -> bool {
        approval
            .current_step()
            .map(|step| self.can_act(actor, approval, step))
            .unwrap_or(false)
    }

    pub fn can_cancel(&self, actor: &Actor, approval: &ContractApproval) -> bool {
        approval.requested_by == actor.id || actor.roles.contains(&self.config.admin_role)
    }
}
