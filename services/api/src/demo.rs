use crate::infra::{StaticContractDirectory, TracingAuditSink, TracingNotificationSink};
use clap::Args;
use contract_approval::error::AppError;
use contract_approval::workflows::contract_approval::{
    Actor, ApprovalPolicyConfig, ApprovalQueryService, ApprovalStatus, ApprovalStepPolicy,
    ApprovalWorkflowService, ContractApproval, ContractId, Eligibility, InMemoryApprovalStore,
    PageRequest, StepDecision, SubmitApproval,
};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Contract to submit (the seeded directory knows 42, 43, 77 and 88)
    #[arg(long, default_value = "42")]
    pub(crate) contract: String,
    /// Reject at the final level with this reason instead of approving
    #[arg(long)]
    pub(crate) reject_with: Option<String>,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            contract: "42".to_string(),
            reject_with: None,
        }
    }
}

pub(crate) struct DemoOutcome {
    pub(crate) approval: ContractApproval,
    pub(crate) audit_records: usize,
    pub(crate) notifications: usize,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    println!("Contract approval demo");
    let outcome = walkthrough(&args)?;
    println!(
        "\nFinal status: {} ({} audit records, {} notifications)",
        outcome.approval.status.label(),
        outcome.audit_records,
        outcome.notifications
    );
    Ok(())
}

/// Submits the contract, then has an eligible approver act on every level in order.
pub(crate) fn walkthrough(args: &DemoArgs) -> Result<DemoOutcome, AppError> {
    let store = Arc::new(InMemoryApprovalStore::default());
    let audit = TracingAuditSink::default();
    let notifications = TracingNotificationSink::default();
    let policy = ApprovalStepPolicy::new(ApprovalPolicyConfig::default());
    let service = ApprovalWorkflowService::new(
        store.clone(),
        Arc::new(StaticContractDirectory::seeded()),
        Arc::new(audit.clone()),
        Arc::new(notifications.clone()),
        policy.clone(),
    );
    let queries = ApprovalQueryService::new(store, policy, 100);

    let requester = Actor::new("demo-recruiter", ["Recruiter"]);
    let contract_id = ContractId(args.contract.clone());
    let mut approval = service.submit_for_approval(
        &contract_id,
        &requester,
        SubmitApproval {
            comments: Some("demo submission".to_string()),
            approval_steps: None,
        },
    )?;
    println!(
        "- submitted contract {} as approval {} with {} levels",
        approval.contract_id, approval.id, approval.max_approval_level
    );

    while approval.status == ApprovalStatus::Pending {
        let Some(step) = approval.current_step().cloned() else {
            break;
        };
        let approver = approver_for(&step.eligibility, step.level);
        let inbox = queries.pending_approvals(&approver, PageRequest::default())?;
        println!(
            "  level {}: {} sees {} pending item(s)",
            step.level, approver.id, inbox.total_count
        );

        let last_level = step.level == approval.max_approval_level;
        approval = match (&args.reject_with, last_level) {
            (Some(reason), true) => {
                let rejected = service.reject(
                    &approval.id,
                    &approver,
                    StepDecision {
                        comments: Some(reason.clone()),
                        level: Some(step.level),
                    },
                )?;
                println!("  level {}: rejected ({reason})", step.level);
                rejected
            }
            _ => {
                let approved = service.approve(
                    &approval.id,
                    &approver,
                    StepDecision {
                        comments: Some("ok".to_string()),
                        level: Some(step.level),
                    },
                )?;
                println!("  level {}: approved", step.level);
                approved
            }
        };
    }

    println!("\nApproval history for contract {}", contract_id);
    for step in queries.approval_history(&contract_id)? {
        println!(
            "  - level {} {:?} by {}",
            step.level,
            step.status,
            step.acted_by
                .as_ref()
                .map(|id| id.0.as_str())
                .unwrap_or("-")
        );
    }

    Ok(DemoOutcome {
        approval,
        audit_records: audit.records().len(),
        notifications: notifications.sent().len(),
    })
}

fn approver_for(eligibility: &Eligibility, level: u32) -> Actor {
    match eligibility {
        Eligibility::Role(role) => Actor::new(
            format!("demo-{}-{level}", role.to_ascii_lowercase()),
            [role.as_str()],
        ),
        Eligibility::Approver(id) => Actor::new(id.0.clone(), Vec::<String>::new()),
    }
}
