use crate::domain::actor::Role;
use crate::domain::record::{RecordStatus, WorkflowKind};

use RecordStatus::{AccountantApproved, DirectorApproved, ManagerApproved, Submitted};

const SALE_STAGES: &[RecordStatus] = &[Submitted, AccountantApproved, ManagerApproved];
const FUEL_ENTRY_STAGES: &[RecordStatus] = &[Submitted, AccountantApproved, ManagerApproved];
const EXPENSE_STAGES: &[RecordStatus] = &[Submitted, AccountantApproved, DirectorApproved];

/// `(kind, current status) -> role that may act next`. Consulted once per advance.
const AUTHORIZATION_TABLE: &[(WorkflowKind, RecordStatus, Role)] = &[
    (WorkflowKind::Sale, Submitted, Role::Accountant),
    (WorkflowKind::Sale, AccountantApproved, Role::Manager),
    (WorkflowKind::FuelEntry, Submitted, Role::Accountant),
    (WorkflowKind::FuelEntry, AccountantApproved, Role::Manager),
    (WorkflowKind::Expense, Submitted, Role::Accountant),
    (WorkflowKind::Expense, AccountantApproved, Role::Director),
];

/// Fixed stage sequence for one workflow kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkflowDefinition {
    kind: WorkflowKind,
    stages: &'static [RecordStatus],
}

impl WorkflowDefinition {
    pub fn for_kind(kind: WorkflowKind) -> Self {
        let stages = match kind {
            WorkflowKind::Sale => SALE_STAGES,
            WorkflowKind::FuelEntry => FUEL_ENTRY_STAGES,
            WorkflowKind::Expense => EXPENSE_STAGES,
        };
        Self { kind, stages }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn stages(&self) -> &'static [RecordStatus] {
        self.stages
    }

    pub fn initial_status(&self) -> RecordStatus {
        self.stages[0]
    }

    pub fn final_status(&self) -> RecordStatus {
        self.stages[self.stages.len() - 1]
    }

    pub fn position(&self, status: RecordStatus) -> Option<usize> {
        self.stages.iter().position(|stage| *stage == status)
    }

    pub fn contains(&self, status: RecordStatus) -> bool {
        status == RecordStatus::Rejected || self.position(status).is_some()
    }

    pub fn is_terminal(&self, status: RecordStatus) -> bool {
        status == RecordStatus::Rejected || status == self.final_status()
    }

    pub fn successor(&self, status: RecordStatus) -> Option<RecordStatus> {
        let position = self.position(status)?;
        self.stages.get(position + 1).copied()
    }

    /// Whether the record already sits at or past `target` in the sequence.
    pub fn has_reached(&self, current: RecordStatus, target: RecordStatus) -> bool {
        if current == RecordStatus::Rejected {
            return true;
        }
        match (self.position(current), self.position(target)) {
            (Some(current), Some(target)) => current >= target,
            _ => false,
        }
    }

    pub fn required_role(&self, current: RecordStatus) -> Option<Role> {
        required_role(self.kind, current)
    }
}

pub fn required_role(kind: WorkflowKind, current: RecordStatus) -> Option<Role> {
    AUTHORIZATION_TABLE
        .iter()
        .find(|(entry_kind, status, _)| *entry_kind == kind && *status == current)
        .map(|(_, _, role)| *role)
}
