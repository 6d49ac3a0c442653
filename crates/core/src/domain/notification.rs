use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::Role;
use crate::domain::record::WorkflowKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Submitted,
    AwaitingApproval,
    Approved,
    Rejected,
    LowStock,
}

/// Ephemeral message derived from a committed change. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub subject_id: String,
    pub message: String,
    pub recipient_roles: Vec<Role>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn is_for(&self, role: Role) -> bool {
        self.recipient_roles.contains(&role)
    }
}

/// Backlog summary handed to the outbound reminder collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub recipient_role: Role,
    pub item_kind: WorkflowKind,
    pub pending_count: u64,
}
