use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::response::Response;
use serde_json::Value;

use crate::workflows::contract_approval::domain::{
    Actor, ApprovalId, ContractApproval, ContractId, ContractSummary, ContractType, EmployeeId,
    Page, PageRequest,
};
use crate::workflows::contract_approval::policy::{ApprovalPolicyConfig, ApprovalStepPolicy};
use crate::workflows::contract_approval::repository::{
    ApprovalNotification, ApprovalRepository, AuditRecord, AuditSink, ContractDirectory,
    DirectoryError, NotificationSink, PendingFilter, RepositoryError, SinkError, Version,
    Versioned,
};
use crate::workflows::contract_approval::service::{ApprovalWorkflowService, SubmitApproval};
use crate::workflows::contract_approval::store::InMemoryApprovalStore;
use crate::workflows::contract_approval::{ApprovalApi, ApprovalQueryService};

pub(super) const CONTRACT_42: &str = "42";

pub(super) fn contract(id: &str, contract_type: ContractType, salary: u64) -> ContractSummary {
    ContractSummary {
        id: ContractId(id.to_string()),
        employee_id: EmployeeId(format!("emp-{id}")),
        contract_type,
        monthly_salary: salary,
    }
}

pub(super) fn policy() -> ApprovalStepPolicy {
    ApprovalStepPolicy::new(ApprovalPolicyConfig::default())
}

pub(super) fn requester() -> Actor {
    Actor::new("u-requester", ["Recruiter"])
}

pub(super) fn manager() -> Actor {
    Actor::new("u-manager", ["Manager"])
}

pub(super) fn second_manager() -> Actor {
    Actor::new("u-manager-2", ["manager"])
}

pub(super) fn hr() -> Actor {
    Actor::new("u-hr", ["HR"])
}

pub(super) fn director() -> Actor {
    Actor::new("u-director", ["Director"])
}

pub(super) fn admin() -> Actor {
    Actor::new("u-admin", ["Admin"])
}

pub(super) fn outsider() -> Actor {
    Actor::new("u-outsider", ["Finance"])
}

#[derive(Default)]
pub(super) struct MemoryContracts {
    contracts: Mutex<HashMap<ContractId, ContractSummary>>,
}

impl MemoryContracts {
    pub(super) fn with(contracts: impl IntoIterator<Item = ContractSummary>) -> Self {
        let directory = Self::default();
        {
            let mut guard = directory.contracts.lock().expect("directory mutex poisoned");
            for contract in contracts {
                guard.insert(contract.id.clone(), contract);
            }
        }
        directory
    }
}

impl ContractDirectory for MemoryContracts {
    fn get_contract(&self, id: &ContractId) -> Result<Option<ContractSummary>, DirectoryError> {
        Ok(self
            .contracts
            .lock()
            .expect("directory mutex poisoned")
            .get(id)
            .cloned())
    }
}

pub(super) struct OfflineContracts;

impl ContractDirectory for OfflineContracts {
    fn get_contract(&self, _id: &ContractId) -> Result<Option<ContractSummary>, DirectoryError> {
        Err(DirectoryError::Unavailable("hr core offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct RecordingAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAudit {
    pub(super) fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit mutex poisoned").clone()
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, record: AuditRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .expect("audit mutex poisoned")
            .push(record);
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifications {
    sent: Mutex<Vec<ApprovalNotification>>,
}

impl RecordingNotifications {
    pub(super) fn sent(&self) -> Vec<ApprovalNotification> {
        self.sent.lock().expect("notification mutex poisoned").clone()
    }
}

impl NotificationSink for RecordingNotifications {
    fn notify(&self, notification: ApprovalNotification) -> Result<(), SinkError> {
        self.sent
            .lock()
            .expect("notification mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct BrokenSink;

impl AuditSink for BrokenSink {
    fn record(&self, _record: AuditRecord) -> Result<(), SinkError> {
        Err(SinkError::Transport("audit queue full".to_string()))
    }
}

impl NotificationSink for BrokenSink {
    fn notify(&self, _notification: ApprovalNotification) -> Result<(), SinkError> {
        Err(SinkError::Transport("smtp relay down".to_string()))
    }
}

pub(super) struct UnavailableRepository;

impl ApprovalRepository for UnavailableRepository {
    fn insert(
        &self,
        _approval: ContractApproval,
    ) -> Result<Versioned<ContractApproval>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn load(
        &self,
        _id: &ApprovalId,
    ) -> Result<Option<Versioned<ContractApproval>>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn save(
        &self,
        _approval: ContractApproval,
        _expected: Version,
    ) -> Result<Versioned<ContractApproval>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn active_for_contract(
        &self,
        _contract_id: &ContractId,
    ) -> Result<Option<Versioned<ContractApproval>>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn query_pending(
        &self,
        _filter: &PendingFilter,
        _page: PageRequest,
    ) -> Result<Page<ContractApproval>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn history(&self, _contract_id: &ContractId) -> Result<Vec<ContractApproval>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) type MemoryService = ApprovalWorkflowService<InMemoryApprovalStore, MemoryContracts>;

pub(super) struct Harness {
    pub(super) service: Arc<MemoryService>,
    pub(super) queries: Arc<ApprovalQueryService<InMemoryApprovalStore>>,
    pub(super) store: Arc<InMemoryApprovalStore>,
    pub(super) audit: Arc<RecordingAudit>,
    pub(super) notifications: Arc<RecordingNotifications>,
}

impl Harness {
    pub(super) fn api(&self) -> ApprovalApi<InMemoryApprovalStore, MemoryContracts> {
        ApprovalApi {
            workflow: self.service.clone(),
            queries: self.queries.clone(),
        }
    }
}

pub(super) fn default_contracts() -> Vec<ContractSummary> {
    vec![
        contract(CONTRACT_42, ContractType::Permanent, 5_000),
        contract("43", ContractType::FixedTerm, 4_200),
        contract("77", ContractType::Executive, 9_000),
        contract("88", ContractType::Permanent, 12_500),
    ]
}

pub(super) fn harness() -> Harness {
    harness_with(policy(), default_contracts())
}

pub(super) fn harness_with(
    policy: ApprovalStepPolicy,
    contracts: Vec<ContractSummary>,
) -> Harness {
    let store = Arc::new(InMemoryApprovalStore::default());
    let audit = Arc::new(RecordingAudit::default());
    let notifications = Arc::new(RecordingNotifications::default());
    let service = Arc::new(ApprovalWorkflowService::new(
        store.clone(),
        Arc::new(MemoryContracts::with(contracts)),
        audit.clone(),
        notifications.clone(),
        policy.clone(),
    ));
    let queries = Arc::new(ApprovalQueryService::new(store.clone(), policy, 50));

    Harness {
        service,
        queries,
        store,
        audit,
        notifications,
    }
}

pub(super) fn submit(harness: &Harness, contract_id: &str) -> ContractApproval {
    harness
        .service
        .submit_for_approval(
            &ContractId(contract_id.to_string()),
            &requester(),
            SubmitApproval {
                comments: Some("please review".to_string()),
                approval_steps: None,
            },
        )
        .expect("submission succeeds")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
