use contract_approval::error::AppError;
use contract_approval::workflows::contract_approval::{
    ApprovalNotification, AuditRecord, AuditSink, ContractDirectory, ContractId,
    ContractSummary, ContractType, DirectoryError, EmployeeId, NotificationSink, SinkError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Read-only contract lookup backed by a fixed set of records.
#[derive(Default, Clone)]
pub(crate) struct StaticContractDirectory {
    contracts: Arc<HashMap<ContractId, ContractSummary>>,
}

impl StaticContractDirectory {
    pub(crate) fn new(contracts: impl IntoIterator<Item = ContractSummary>) -> Self {
        Self {
            contracts: Arc::new(
                contracts
                    .into_iter()
                    .map(|contract| (contract.id.clone(), contract))
                    .collect(),
            ),
        }
    }

    /// Sample records used by the demo and by a server started without a contracts file.
    pub(crate) fn seeded() -> Self {
        Self::new([
            summary("42", ContractType::Permanent, 5_000),
            summary("43", ContractType::FixedTerm, 3_800),
            summary("77", ContractType::Executive, 14_000),
            summary("88", ContractType::Permanent, 11_500),
        ])
    }

    /// Loads a JSON array of contract summaries.
    pub(crate) fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read(path)?;
        let contracts: Vec<ContractSummary> = serde_json::from_slice(&raw).map_err(|err| {
            AppError::ContractDirectory(format!("{}: {err}", path.display()))
        })?;
        Ok(Self::new(contracts))
    }

    pub(crate) fn len(&self) -> usize {
        self.contracts.len()
    }
}

fn summary(id: &str, contract_type: ContractType, monthly_salary: u64) -> ContractSummary {
    ContractSummary {
        id: ContractId(id.to_string()),
        employee_id: EmployeeId(format!("emp-{id}")),
        contract_type,
        monthly_salary,
    }
}

impl ContractDirectory for StaticContractDirectory {
    fn get_contract(&self, id: &ContractId) -> Result<Option<ContractSummary>, DirectoryError> {
        Ok(self.contracts.get(id).cloned())
    }
}

/// Writes audit records to the `contract_approval::audit` target and keeps a copy.
#[derive(Default, Clone)]
pub(crate) struct TracingAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl TracingAuditSink {
    pub(crate) fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) -> Result<(), SinkError> {
        info!(
            target: "contract_approval::audit",
            approval_id = %record.approval_id,
            contract_id = %record.contract_id,
            actor_id = %record.actor_id,
            action = ?record.action,
            from = ?record.from_status,
            to = record.to_status.label(),
            level = record.level,
            "approval transition"
        );
        self.records
            .lock()
            .map_err(|_| SinkError::Transport("audit buffer poisoned".to_string()))?
            .push(record);
        Ok(())
    }
}

/// Logs outbound notifications instead of delivering them.
#[derive(Default, Clone)]
pub(crate) struct TracingNotificationSink {
    sent: Arc<Mutex<Vec<ApprovalNotification>>>,
}

impl TracingNotificationSink {
    pub(crate) fn sent(&self) -> Vec<ApprovalNotification> {
        self.sent
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, notification: ApprovalNotification) -> Result<(), SinkError> {
        info!(
            target: "contract_approval::notifications",
            approval_id = %notification.approval_id,
            contract_id = %notification.contract_id,
            recipient = ?notification.recipient,
            kind = ?notification.kind,
            "notification queued"
        );
        self.sent
            .lock()
            .map_err(|_| SinkError::Transport("notification buffer poisoned".to_string()))?
            .push(notification);
        Ok(())
    }
}
