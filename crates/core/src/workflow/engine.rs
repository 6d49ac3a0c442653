use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::discrepancy::{DiscrepancyClass, DiscrepancyDetector};
use crate::domain::actor::{Actor, Role};
use crate::domain::record::{
    ApprovalStamp, FuelEntryDetails, RecordId, RecordStatus, Rejection, WorkflowKind,
    WorkflowRecord,
};
use crate::domain::tank::{OperationKey, TankInventory};
use crate::inventory::{DeductionOutcome, InventoryError, InventoryLedger};
use crate::store::{LedgerStore, StoreError};
use crate::workflow::states::WorkflowDefinition;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("record `{0}` not found")]
    NotFound(RecordId),
    #[error("role `{role}` may not act on this record; `{required}` required")]
    Unauthorized { role: Role, required: Role },
    #[error("illegal {kind} transition from `{from}` to `{to}`: {reason}")]
    IllegalTransition {
        kind: WorkflowKind,
        from: RecordStatus,
        to: RecordStatus,
        reason: &'static str,
    },
    #[error("record `{id}` was already processed by someone else (now `{current}`)")]
    StaleState { id: RecordId, current: RecordStatus },
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ApprovalError {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleState { .. })
    }
}

/// Why a terminal fuel entry's deduction could not be re-applied.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("record `{0}` not found")]
    NotFound(RecordId),
    #[error("record `{id}` has no deduction to apply: {reason}")]
    NotApplicable { id: RecordId, reason: &'static str },
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdvanceRequest {
    pub record_id: RecordId,
    pub actor: Actor,
    pub target: RecordStatus,
    pub reason: Option<String>,
    /// When set, the advance is refused unless the record still sits at this status.
    pub expected_status: Option<RecordStatus>,
}

impl AdvanceRequest {
    pub fn approve(record_id: RecordId, actor: Actor, target: RecordStatus) -> Self {
        Self { record_id, actor, target, reason: None, expected_status: None }
    }

    pub fn reject(record_id: RecordId, actor: Actor, reason: impl Into<String>) -> Self {
        Self {
            record_id,
            actor,
            target: RecordStatus::Rejected,
            reason: Some(reason.into()),
            expected_status: None,
        }
    }

    pub fn expecting(mut self, status: RecordStatus) -> Self {
        self.expected_status = Some(status);
        self
    }
}

/// Result of the deduction requested after a fuel entry's final approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InventoryEffect {
    Deducted { tank: TankInventory },
    AlreadyApplied,
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdvanceOutcome {
    pub record: WorkflowRecord,
    pub inventory: Option<InventoryEffect>,
}

/// Decides the next record state for `request`. No I/O.
pub fn plan_transition(
    record: &WorkflowRecord,
    request: &AdvanceRequest,
    now: DateTime<Utc>,
) -> Result<WorkflowRecord, ApprovalError> {
    let definition = WorkflowDefinition::for_kind(record.kind());
    let current = record.status;
    let target = request.target;
    let stale = || ApprovalError::StaleState { id: record.id.clone(), current };
    let illegal = |reason: &'static str| ApprovalError::IllegalTransition {
        kind: definition.kind(),
        from: current,
        to: target,
        reason,
    };

    if request.expected_status.is_some_and(|expected| expected != current) {
        return Err(stale());
    }
    if definition.is_terminal(current) {
        return Err(stale());
    }

    if target != RecordStatus::Rejected {
        if !definition.contains(target) {
            return Err(illegal("status is not part of this workflow"));
        }
        if definition.has_reached(current, target) {
            return Err(stale());
        }
        if definition.successor(current) != Some(target) {
            return Err(illegal("stages cannot be skipped"));
        }
    }

    let Some(required) = definition.required_role(current) else {
        return Err(illegal("no role may act on this status"));
    };
    if request.actor.role != required {
        return Err(ApprovalError::Unauthorized { role: request.actor.role, required });
    }

    let mut next = record.clone();
    match target.stage() {
        Some(stage) => {
            if next.approvals.contains_key(&stage) {
                return Err(stale());
            }
            next.approvals.insert(
                stage,
                ApprovalStamp { approver_id: request.actor.id.clone(), approved_at: now },
            );
        }
        None => {
            let reason = request.reason.as_deref().map(str::trim).unwrap_or_default();
            if reason.is_empty() {
                return Err(illegal("a rejection reason is required"));
            }
            next.rejection = Some(Rejection {
                reason: reason.to_owned(),
                rejected_by: request.actor.id.clone(),
                rejected_at: now,
            });
        }
    }

    next.status = target;
    next.version = record.version.saturating_add(1);
    next.updated_at = now;
    Ok(next)
}

pub struct ApprovalEngine<S: ?Sized> {
    store: Arc<S>,
    inventory: InventoryLedger<S>,
    detector: DiscrepancyDetector,
    audit: Arc<dyn AuditSink>,
}

impl<S> ApprovalEngine<S>
where
    S: LedgerStore + ?Sized,
{
    pub fn new(store: Arc<S>, audit: Arc<dyn AuditSink>, detector: DiscrepancyDetector) -> Self {
        let inventory = InventoryLedger::new(Arc::clone(&store), Arc::clone(&audit));
        Self { store, inventory, detector, audit }
    }

    pub fn inventory(&self) -> &InventoryLedger<S> {
        &self.inventory
    }

    pub async fn advance(
        &self,
        request: AdvanceRequest,
        correlation_id: &str,
    ) -> Result<AdvanceOutcome, ApprovalError> {
        let audit =
            AuditContext::for_actor(Some(request.record_id.clone()), correlation_id, &request.actor);

        let record = self
            .store
            .find_record(&request.record_id)
            .await
            .map_err(store_unavailable)?
            .ok_or_else(|| ApprovalError::NotFound(request.record_id.clone()))?;

        let next = match plan_transition(&record, &request, Utc::now()) {
            Ok(next) => next,
            Err(error) => {
                self.reject(&audit, &record, &request, &error);
                return Err(error);
            }
        };

        if let Err(error) = self.store.transition_record(record.status, &next).await {
            let error = match error {
                StoreError::Conflict => self.stale_after_conflict(&record).await,
                other => store_unavailable(other),
            };
            self.reject(&audit, &record, &request, &error);
            return Err(error);
        }

        info!(
            event_name = "workflow.advance.applied",
            correlation_id = %correlation_id,
            record_id = %next.id,
            kind = %next.kind(),
            from = %record.status,
            to = %next.status,
            actor_id = %request.actor.id.0,
            "workflow record advanced"
        );
        AuditEvent::new(
            Some(next.id.clone()),
            correlation_id,
            "workflow.transition_applied",
            AuditCategory::Workflow,
            audit.actor.clone(),
            AuditOutcome::Success,
        )
        .with_metadata("from", record.status.as_str())
        .with_metadata("to", next.status.as_str())
        .send(&*self.audit);

        let inventory = self.apply_inventory_effect(&next, &request.actor, &audit).await;
        Ok(AdvanceOutcome { record: next, inventory })
    }

    /// Re-applies the deduction of a fuel entry that reached its final stage.
    ///
    /// Keyed on the record id, so an entry whose deduction already landed reports
    /// `AlreadyApplied` instead of taking the litres twice.
    pub async fn reconcile_deduction(
        &self,
        record_id: &RecordId,
        actor: &Actor,
        correlation_id: &str,
    ) -> Result<InventoryEffect, ReconcileError> {
        if !actor.role.manages_inventory() {
            return Err(InventoryError::Unauthorized { role: actor.role }.into());
        }
        let audit = AuditContext::for_actor(Some(record_id.clone()), correlation_id, actor);

        let record = self
            .store
            .find_record(record_id)
            .await
            .map_err(|error| ReconcileError::StoreUnavailable(error.to_string()))?
            .ok_or_else(|| ReconcileError::NotFound(record_id.clone()))?;

        let not_applicable =
            |reason: &'static str| ReconcileError::NotApplicable { id: record.id.clone(), reason };
        let Some(entry) = record.details.fuel_entry() else {
            return Err(not_applicable("only fuel entries deduct from a tank"));
        };
        if record.status != WorkflowDefinition::for_kind(record.kind()).final_status() {
            return Err(not_applicable("fuel entry has not reached final approval"));
        }
        if entry.fuel_sold().is_zero() {
            return Err(not_applicable("fuel entry records no litres sold"));
        }

        let effect = match self.deduct_for(&record, entry, actor, &audit).await {
            Ok(effect) => effect,
            Err(error) => {
                self.deduction_failed(&record, entry, &audit, &error);
                return Err(error.into());
            }
        };
        info!(
            event_name = "workflow.deduction.reconciled",
            correlation_id = %correlation_id,
            record_id = %record.id,
            fuel_type = %entry.fuel_type,
            already_applied = matches!(effect, InventoryEffect::AlreadyApplied),
            "fuel entry deduction reconciled"
        );
        Ok(effect)
    }

    /// Deducts a fuel entry's litres once it reaches its final stage. Never undoes the advance.
    async fn apply_inventory_effect(
        &self,
        record: &WorkflowRecord,
        actor: &Actor,
        audit: &AuditContext,
    ) -> Option<InventoryEffect> {
        let entry = record.details.fuel_entry()?;
        let definition = WorkflowDefinition::for_kind(record.kind());
        if record.status != definition.final_status() || entry.fuel_sold().is_zero() {
            return None;
        }

        let effect = match self.deduct_for(record, entry, actor, audit).await {
            Ok(effect) => effect,
            Err(error) => {
                self.deduction_failed(record, entry, audit, &error);
                InventoryEffect::Failed { error: error.to_string() }
            }
        };
        Some(effect)
    }

    async fn deduct_for(
        &self,
        record: &WorkflowRecord,
        entry: &FuelEntryDetails,
        actor: &Actor,
        audit: &AuditContext,
    ) -> Result<InventoryEffect, InventoryError> {
        let fuel_type = &entry.fuel_type;
        if let Ok(tank) = self.inventory.get_tank(fuel_type).await {
            let report = self.detector.check_entry(entry, tank.current_level);
            if report.class != DiscrepancyClass::Ok {
                warn!(
                    event_name = "inventory.discrepancy.detected",
                    correlation_id = %audit.correlation_id,
                    record_id = %record.id,
                    fuel_type = %fuel_type,
                    class = ?report.class,
                    "{}",
                    report.summary()
                );
            }
        }

        let key = OperationKey::from(&record.id);
        match self.inventory.deduct(fuel_type, entry.fuel_sold(), Some(&key), actor, audit).await? {
            DeductionOutcome::Applied { tank } => Ok(InventoryEffect::Deducted { tank }),
            DeductionOutcome::AlreadyApplied { .. } => Ok(InventoryEffect::AlreadyApplied),
        }
    }

    fn deduction_failed(
        &self,
        record: &WorkflowRecord,
        entry: &FuelEntryDetails,
        audit: &AuditContext,
        error: &InventoryError,
    ) {
        warn!(
            event_name = "workflow.deduction.failed",
            correlation_id = %audit.correlation_id,
            record_id = %record.id,
            fuel_type = %entry.fuel_type,
            error = %error,
            "fuel entry approved but tank deduction failed"
        );
        AuditEvent::new(
            Some(record.id.clone()),
            audit.correlation_id.clone(),
            "workflow.deduction_failed",
            AuditCategory::Inventory,
            audit.actor.clone(),
            AuditOutcome::Failed,
        )
        .with_metadata("fuel_type", entry.fuel_type.as_str())
        .with_metadata("litres", entry.fuel_sold().to_string())
        .with_metadata("error", error.to_string())
        .send(&*self.audit);
    }

    async fn stale_after_conflict(&self, read: &WorkflowRecord) -> ApprovalError {
        let current = match self.store.find_record(&read.id).await {
            Ok(Some(record)) => record.status,
            Ok(None) | Err(_) => read.status,
        };
        ApprovalError::StaleState { id: read.id.clone(), current }
    }

    fn reject(
        &self,
        audit: &AuditContext,
        record: &WorkflowRecord,
        request: &AdvanceRequest,
        error: &ApprovalError,
    ) {
        info!(
            event_name = "workflow.advance.rejected",
            correlation_id = %audit.correlation_id,
            record_id = %record.id,
            from = %record.status,
            to = %request.target,
            error = %error,
            "workflow advance refused"
        );
        AuditEvent::new(
            Some(record.id.clone()),
            audit.correlation_id.clone(),
            "workflow.transition_rejected",
            AuditCategory::Workflow,
            audit.actor.clone(),
            AuditOutcome::Rejected,
        )
        .with_metadata("to", request.target.as_str())
        .with_metadata("error", error.to_string())
        .send(&*self.audit);
    }
}

fn store_unavailable(error: StoreError) -> ApprovalError {
    ApprovalError::StoreUnavailable(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{plan_transition, AdvanceRequest, ApprovalError};
    use crate::domain::actor::{Actor, ActorId, Role};
    use crate::domain::record::{
        ApprovalStage, RecordDetails, RecordId, RecordStatus, WorkflowRecord,
    };

    fn record(details: RecordDetails, status: RecordStatus) -> WorkflowRecord {
        WorkflowRecord {
            id: RecordId("R-1".to_owned()),
            department: "forecourt".to_owned(),
            amount: Decimal::new(12_500, 2),
            details,
            created_by: ActorId("u-attendant".to_owned()),
            created_at: Utc::now(),
            status,
            approvals: BTreeMap::new(),
            rejection: None,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    fn sale(status: RecordStatus) -> WorkflowRecord {
        record(RecordDetails::Sale { quantity: None, notes: None }, status)
    }

    fn expense(status: RecordStatus) -> WorkflowRecord {
        record(
            RecordDetails::Expense {
                category: "maintenance".to_owned(),
                description: "pump seal".to_owned(),
            },
            status,
        )
    }

    fn approve(role: Role, target: RecordStatus) -> AdvanceRequest {
        AdvanceRequest::approve(RecordId("R-1".to_owned()), Actor::new("u-approver", role), target)
    }

    #[test]
    fn accountant_approval_stamps_stage_and_bumps_version() {
        let now = Utc::now();
        let next = plan_transition(
            &sale(RecordStatus::Submitted),
            &approve(Role::Accountant, RecordStatus::AccountantApproved),
            now,
        )
        .expect("accountant may approve a submitted sale");

        assert_eq!(next.status, RecordStatus::AccountantApproved);
        assert_eq!(next.version, 2);
        let stamp = next.approvals.get(&ApprovalStage::Accountant).expect("stamp");
        assert_eq!(stamp.approver_id.0, "u-approver");
        assert_eq!(stamp.approved_at, now);
    }

    #[test]
    fn wrong_role_is_unauthorized() {
        let error = plan_transition(
            &sale(RecordStatus::Submitted),
            &approve(Role::Manager, RecordStatus::AccountantApproved),
            Utc::now(),
        )
        .expect_err("manager cannot do the accountant stage");

        assert_eq!(error, ApprovalError::Unauthorized { role: Role::Manager, required: Role::Accountant });
    }

    #[test]
    fn expense_second_stage_belongs_to_director() {
        let as_manager = plan_transition(
            &expense(RecordStatus::AccountantApproved),
            &approve(Role::Manager, RecordStatus::DirectorApproved),
            Utc::now(),
        );
        assert!(matches!(as_manager, Err(ApprovalError::Unauthorized { required: Role::Director, .. })));

        let into_manager_stage = plan_transition(
            &expense(RecordStatus::AccountantApproved),
            &approve(Role::Director, RecordStatus::ManagerApproved),
            Utc::now(),
        );
        assert!(matches!(into_manager_stage, Err(ApprovalError::IllegalTransition { .. })));
    }

    #[test]
    fn skipping_a_stage_is_illegal() {
        let error = plan_transition(
            &sale(RecordStatus::Submitted),
            &approve(Role::Accountant, RecordStatus::ManagerApproved),
            Utc::now(),
        )
        .expect_err("submitted cannot jump to manager_approved");

        assert!(matches!(error, ApprovalError::IllegalTransition { .. }));
    }

    #[test]
    fn repeating_a_reached_stage_is_stale() {
        let error = plan_transition(
            &sale(RecordStatus::ManagerApproved),
            &approve(Role::Accountant, RecordStatus::AccountantApproved),
            Utc::now(),
        )
        .expect_err("record already past accountant stage");

        assert!(error.is_stale());

        let error = plan_transition(
            &sale(RecordStatus::AccountantApproved),
            &approve(Role::Accountant, RecordStatus::AccountantApproved),
            Utc::now(),
        )
        .expect_err("accountant stage already reached");
        assert!(error.is_stale());
    }

    #[test]
    fn expected_status_mismatch_is_stale() {
        let request = approve(Role::Manager, RecordStatus::ManagerApproved)
            .expecting(RecordStatus::Submitted);
        let error = plan_transition(&sale(RecordStatus::AccountantApproved), &request, Utc::now())
            .expect_err("caller read an older status");

        assert_eq!(
            error,
            ApprovalError::StaleState {
                id: RecordId("R-1".to_owned()),
                current: RecordStatus::AccountantApproved
            }
        );
    }

    #[test]
    fn rejection_requires_reason_and_role_of_current_stage() {
        let blank = AdvanceRequest::reject(
            RecordId("R-1".to_owned()),
            Actor::new("u-acc", Role::Accountant),
            "   ",
        );
        assert!(matches!(
            plan_transition(&sale(RecordStatus::Submitted), &blank, Utc::now()),
            Err(ApprovalError::IllegalTransition { to: RecordStatus::Rejected, .. })
        ));

        let wrong_role = AdvanceRequest::reject(
            RecordId("R-1".to_owned()),
            Actor::new("u-att", Role::Attendant),
            "duplicate entry",
        );
        assert!(matches!(
            plan_transition(&sale(RecordStatus::Submitted), &wrong_role, Utc::now()),
            Err(ApprovalError::Unauthorized { .. })
        ));

        let valid = AdvanceRequest::reject(
            RecordId("R-1".to_owned()),
            Actor::new("u-dir", Role::Director),
            " receipts missing ",
        );
        let next = plan_transition(&expense(RecordStatus::AccountantApproved), &valid, Utc::now())
            .expect("director may reject at the director stage");
        assert_eq!(next.status, RecordStatus::Rejected);
        assert_eq!(next.rejection_reason(), Some("receipts missing"));
    }

    #[test]
    fn terminal_records_cannot_move() {
        for status in [RecordStatus::ManagerApproved, RecordStatus::Rejected] {
            let request = AdvanceRequest::reject(
                RecordId("R-1".to_owned()),
                Actor::new("u-mgr", Role::Manager),
                "late correction",
            );
            let error = plan_transition(&sale(status), &request, Utc::now())
                .expect_err("terminal status");
            assert!(error.is_stale(), "{status:?}");
        }
    }
}
