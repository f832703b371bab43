use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of one approval cycle. Generated as a uuid v7 so ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(uuid7::uuid7().to_string())
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub String);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Case-insensitive set of role names held by an actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet(BTreeSet<String>);

impl RoleSet {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            roles
                .into_iter()
                .map(|role| normalize_role(role.as_ref()))
                .filter(|role| !role.is_empty())
                .collect(),
        )
    }

    /// Parses a comma separated claim value such as `"Manager, HR"`.
    pub fn from_header(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.contains(&normalize_role(role))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

pub(crate) fn normalize_role(role: &str) -> String {
    role.trim().to_ascii_lowercase()
}

/// The calling identity, resolved by the transport layer from request claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub roles: RoleSet,
}

impl Actor {
    pub fn new<I, S>(id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            id: ActorId(id.into()),
            roles: RoleSet::new(roles),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    pub fn label(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "Pending",
            ApprovalStatus::Approved => "Approved",
            ApprovalStatus::Rejected => "Rejected",
            ApprovalStatus::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

/// Who may act on a step, frozen from the policy when the cycle is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Eligibility {
    Role(String),
    Approver(ActorId),
}

impl Eligibility {
    pub fn admits(&self, actor: &Actor) -> bool {
        match self {
            Eligibility::Role(role) => actor.roles.contains(role),
            Eligibility::Approver(approver) => approver == &actor.id,
        }
    }

    pub fn role(&self) -> Option<&str> {
        match self {
            Eligibility::Role(role) => Some(role),
            Eligibility::Approver(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractApprovalStep {
    pub approval_id: ApprovalId,
    pub level: u32,
    pub eligibility: Eligibility,
    pub status: StepStatus,
    pub acted_by: Option<ActorId>,
    pub acted_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
}

/// Step layout a client proposed at submission. Kept for the record only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoryStep {
    pub level: u32,
    #[serde(default)]
    pub required_role: Option<String>,
    #[serde(default)]
    pub approver_id: Option<ActorId>,
}

/// Aggregate root for one approval cycle of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractApproval {
    pub id: ApprovalId,
    pub contract_id: ContractId,
    pub employee_id: EmployeeId,
    pub status: ApprovalStatus,
    pub current_approval_level: u32,
    pub max_approval_level: u32,
    pub comments: Option<String>,
    pub requested_by: ActorId,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<ActorId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<ActorId>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub approval_steps: Vec<ContractApprovalStep>,
    #[serde(default)]
    pub advisory_steps: Vec<AdvisoryStep>,
}

impl ContractApproval {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn step(&self, level: u32) -> Option<&ContractApprovalStep> {
        self.approval_steps.iter().find(|step| step.level == level)
    }

    pub(crate) fn step_mut(&mut self, level: u32) -> Option<&mut ContractApprovalStep> {
        self.approval_steps
            .iter_mut()
            .find(|step| step.level == level)
    }

    /// The actionable step, if the cycle is still pending.
    pub fn current_step(&self) -> Option<&ContractApprovalStep> {
        if !self.is_pending() {
            return None;
        }
        self.step(self.current_approval_level)
    }

    pub(crate) fn lowest_pending_level(&self) -> Option<u32> {
        self.approval_steps
            .iter()
            .filter(|step| step.status == StepStatus::Pending)
            .map(|step| step.level)
            .min()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractType {
    Permanent,
    FixedTerm,
    Probation,
    Internship,
    Executive,
}

/// The slice of the external contract record the approval policy reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSummary {
    pub id: ContractId,
    pub employee_id: EmployeeId,
    pub contract_type: ContractType,
    pub monthly_salary: u64,
}

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// 1-based page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_number: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// Missing or zero values fall back to the first page of the default size;
    /// oversized pages are clamped to `max_page_size`.
    pub fn normalized(page_number: Option<u32>, page_size: Option<u32>, max_page_size: u32) -> Self {
        let page_number = page_number.filter(|n| *n > 0).unwrap_or(1);
        let page_size = page_size
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(max_page_size.max(1));
        Self {
            page_number,
            page_size,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page_number.saturating_sub(1) as usize).saturating_mul(self.page_size as usize)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_number: u32,
    pub page_size: u32,
    pub total_count: usize,
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// Slices an already filtered and ordered result set.
    pub fn from_ordered(all: Vec<T>, request: PageRequest) -> Self {
        let total_count = all.len();
        let page_size = request.page_size.max(1);
        let total_pages = total_count.div_ceil(page_size as usize) as u32;
        let items = all
            .into_iter()
            .skip(request.offset())
            .take(page_size as usize)
            .collect();

        Self {
            items,
            page_number: request.page_number,
            page_size,
            total_count,
            total_pages,
        }
    }
}
