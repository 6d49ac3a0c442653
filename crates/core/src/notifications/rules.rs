use rust_decimal::Decimal;

use crate::domain::actor::Role;
use crate::domain::notification::{Notification, NotificationKind};
use crate::domain::record::{RecordStatus, WorkflowKind, WorkflowRecord};
use crate::domain::tank::TankInventory;
use crate::store::{ChangeEvent, ChangePayload, ChangeType};
use crate::workflow::WorkflowDefinition;

const ACCOUNTANT: &[Role] = &[Role::Accountant];
const MANAGER_AND_DIRECTOR: &[Role] = &[Role::Manager, Role::Director];
const DIRECTOR: &[Role] = &[Role::Director];
const ATTENDANT_AND_ACCOUNTANT: &[Role] = &[Role::Attendant, Role::Accountant];

/// Second-stage reviewers by kind. The final stage and rejection always go back to
/// the submitter side.
fn awaiting_second_stage(kind: WorkflowKind) -> &'static [Role] {
    match kind {
        WorkflowKind::Sale | WorkflowKind::FuelEntry => MANAGER_AND_DIRECTOR,
        WorkflowKind::Expense => DIRECTOR,
    }
}

/// Static mapping from committed changes to the roles that should hear about them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoutingRules {
    low_stock_ratio: Decimal,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self { low_stock_ratio: Decimal::new(2, 1) }
    }
}

impl RoutingRules {
    pub fn new(low_stock_ratio: Decimal) -> Self {
        Self { low_stock_ratio }
    }

    pub fn route(&self, event: &ChangeEvent) -> Option<Notification> {
        match (&event.event_type, &event.payload) {
            (ChangeType::Insert, ChangePayload::Record { after, .. }) => {
                route_record_insert(event, after)
            }
            (ChangeType::Update, ChangePayload::Record { before, after }) => {
                route_record_update(event, before.as_ref(), after)
            }
            (ChangeType::Update, ChangePayload::Tank { before, after }) => {
                self.route_tank_update(event, before.as_ref(), after)
            }
            (ChangeType::Insert, ChangePayload::Tank { .. }) => None,
        }
    }

    fn is_low(&self, tank: &TankInventory) -> bool {
        tank.fill_ratio().is_some_and(|ratio| ratio < self.low_stock_ratio)
    }

    /// Fires on the update that takes a tank under the threshold, not on later ones.
    fn route_tank_update(
        &self,
        event: &ChangeEvent,
        before: Option<&TankInventory>,
        after: &TankInventory,
    ) -> Option<Notification> {
        if !self.is_low(after) || before.is_some_and(|before| self.is_low(before)) {
            return None;
        }

        Some(build(
            event,
            NotificationKind::LowStock,
            format!("tank:{}", after.fuel_type),
            format!(
                "{} tank is low: {}L of {}L remaining",
                after.fuel_type, after.current_level, after.capacity
            ),
            MANAGER_AND_DIRECTOR,
        ))
    }
}

fn route_record_insert(event: &ChangeEvent, record: &WorkflowRecord) -> Option<Notification> {
    if record.status != RecordStatus::Submitted {
        return None;
    }

    Some(build(
        event,
        NotificationKind::Submitted,
        record.id.0.clone(),
        format!(
            "{} {} for {} submitted by {}; awaiting accountant approval",
            record.kind(),
            record.id,
            record.department,
            record.created_by.0
        ),
        ACCOUNTANT,
    ))
}

fn route_record_update(
    event: &ChangeEvent,
    before: Option<&WorkflowRecord>,
    after: &WorkflowRecord,
) -> Option<Notification> {
    if before.is_some_and(|before| before.status == after.status) {
        return None;
    }

    let kind = after.kind();
    let definition = WorkflowDefinition::for_kind(kind);
    let subject = after.id.0.clone();

    if after.status == RecordStatus::Rejected {
        return Some(build(
            event,
            NotificationKind::Rejected,
            subject,
            format!(
                "{kind} {} was rejected: {}",
                after.id,
                after.rejection_reason().unwrap_or("no reason recorded")
            ),
            ATTENDANT_AND_ACCOUNTANT,
        ));
    }

    if after.status == definition.final_status() {
        return Some(build(
            event,
            NotificationKind::Approved,
            subject,
            format!("{kind} {} is fully approved ({})", after.id, after.status),
            ATTENDANT_AND_ACCOUNTANT,
        ));
    }

    if after.status == RecordStatus::AccountantApproved {
        let next = definition.successor(after.status).map(|status| status.as_str()).unwrap_or("final");
        return Some(build(
            event,
            NotificationKind::AwaitingApproval,
            subject,
            format!("{kind} {} passed accountant review; awaiting {next}", after.id),
            awaiting_second_stage(kind),
        ));
    }

    None
}

fn build(
    event: &ChangeEvent,
    kind: NotificationKind,
    subject_id: String,
    message: String,
    roles: &[Role],
) -> Notification {
    let (entity, key, version) = event.dedup_key();
    Notification {
        id: format!("{}:{key}:v{version}", entity.as_str()),
        kind,
        subject_id,
        message,
        recipient_roles: roles.to_vec(),
        timestamp: event.committed_at,
    }
}
