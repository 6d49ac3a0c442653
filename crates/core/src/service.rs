//! Caller-facing operations over one ledger store.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::backlog::summarize_backlog;
use crate::config::AppConfig;
use crate::discrepancy::{DiscrepancyClass, DiscrepancyDetector, DiscrepancyReport};
use crate::domain::actor::{Actor, Role};
use crate::domain::notification::{Notification, ReminderRequest};
use crate::domain::record::{
    NewRecord, RecordDetails, RecordId, WorkflowKind, WorkflowRecord,
};
use crate::domain::tank::{FuelType, OperationKey, TankInventory};
use crate::inventory::{DeductionOutcome, InventoryError, InventoryLedger};
use crate::notifications::{NotificationHub, NotificationRouter, RoutingRules, Subscription};
use crate::store::{LedgerStore, StoreError};
use crate::workflow::{
    AdvanceOutcome, AdvanceRequest, ApprovalEngine, ApprovalError, InventoryEffect,
    ReconcileError, WorkflowDefinition,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("invalid submission: {0}")]
    Invalid(String),
    #[error("no tank registered for fuel type `{0}`")]
    UnknownFuelType(FuelType),
    #[error("fuel entry refused: {}", .0.summary())]
    Blocked(DiscrepancyReport),
    #[error("record `{0}` already exists")]
    Duplicate(RecordId),
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub record: WorkflowRecord,
    /// Detector result for fuel entries. A `discrepancy` class is a warning only.
    pub discrepancy: Option<DiscrepancyReport>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSettings {
    pub discrepancy_tolerance: Decimal,
    pub low_stock_ratio: Decimal,
    pub channel_capacity: usize,
    pub client_retention: usize,
    pub dedup_window: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            discrepancy_tolerance: config.inventory.discrepancy_tolerance_litres,
            low_stock_ratio: config.inventory.low_stock_ratio,
            channel_capacity: config.notifications.channel_capacity,
            client_retention: config.notifications.client_retention,
            dedup_window: config.notifications.dedup_window,
        }
    }
}

pub struct ForecourtService<S: ?Sized> {
    store: Arc<S>,
    engine: ApprovalEngine<S>,
    detector: DiscrepancyDetector,
    audit: Arc<dyn AuditSink>,
    hub: NotificationHub,
    rules: RoutingRules,
    dedup_window: usize,
}

impl<S> ForecourtService<S>
where
    S: LedgerStore + ?Sized,
{
    pub fn new(store: Arc<S>, audit: Arc<dyn AuditSink>, settings: ServiceSettings) -> Self {
        let detector = DiscrepancyDetector::new(settings.discrepancy_tolerance);
        let engine = ApprovalEngine::new(Arc::clone(&store), Arc::clone(&audit), detector);
        Self {
            store,
            engine,
            detector,
            audit,
            hub: NotificationHub::new(settings.channel_capacity, settings.client_retention),
            rules: RoutingRules::new(settings.low_stock_ratio),
            dedup_window: settings.dedup_window,
        }
    }

    fn inventory(&self) -> &InventoryLedger<S> {
        self.engine.inventory()
    }

    /// Starts routing the store's change feed to [`Self::subscribe`] sessions.
    pub fn spawn_router(&self) -> JoinHandle<()> {
        NotificationRouter::new(self.rules, self.hub.clone(), self.dedup_window)
            .spawn(self.store.subscribe())
    }

    pub fn subscribe(&self, role: Role) -> Subscription {
        self.hub.subscribe(role)
    }

    pub fn recent_notifications(&self, role: Role) -> Vec<Notification> {
        self.hub.recent_for(role)
    }

    pub fn notification_sessions(&self) -> usize {
        self.hub.session_count()
    }

    pub async fn submit(
        &self,
        new_record: NewRecord,
        actor: &Actor,
        correlation_id: &str,
    ) -> Result<SubmitOutcome, SubmitError> {
        let id = resolve_record_id(&new_record);
        let audit = AuditContext::for_actor(Some(id.clone()), correlation_id, actor);

        let result = self.accept(id, new_record, actor).await;
        match &result {
            Ok(outcome) => {
                info!(
                    event_name = "workflow.record.submitted",
                    correlation_id = %correlation_id,
                    record_id = %outcome.record.id,
                    kind = %outcome.record.kind(),
                    actor_id = %actor.id.0,
                    "record submitted"
                );
                let mut event = AuditEvent::new(
                    audit.record_id.clone(),
                    correlation_id,
                    "submission.accepted",
                    AuditCategory::Submission,
                    audit.actor.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("kind", outcome.record.kind().as_str());
                if let Some(report) = &outcome.discrepancy {
                    event = event.with_metadata("discrepancy", format!("{:?}", report.class));
                }
                event.send(&*self.audit);
            }
            Err(error) => {
                info!(
                    event_name = "workflow.record.refused",
                    correlation_id = %correlation_id,
                    error = %error,
                    "submission refused"
                );
                AuditEvent::new(
                    audit.record_id.clone(),
                    correlation_id,
                    "submission.rejected",
                    AuditCategory::Submission,
                    audit.actor.clone(),
                    AuditOutcome::Rejected,
                )
                .with_metadata("error", error.to_string())
                .send(&*self.audit);
            }
        }
        result
    }

    async fn accept(
        &self,
        id: RecordId,
        new_record: NewRecord,
        actor: &Actor,
    ) -> Result<SubmitOutcome, SubmitError> {
        validate_submission(&new_record)?;

        let discrepancy = match new_record.details.fuel_entry() {
            Some(entry) => {
                let tank = self
                    .store
                    .find_tank(&entry.fuel_type)
                    .await
                    .map_err(|error| SubmitError::StoreUnavailable(error.to_string()))?
                    .ok_or_else(|| SubmitError::UnknownFuelType(entry.fuel_type.clone()))?;
                let report = self.detector.check_entry(entry, tank.current_level);
                if report.class.is_blocking() {
                    return Err(SubmitError::Blocked(report));
                }
                if report.class == DiscrepancyClass::Discrepancy {
                    warn!(
                        event_name = "inventory.discrepancy.detected",
                        record_id = %id,
                        fuel_type = %entry.fuel_type,
                        "{}",
                        report.summary()
                    );
                }
                Some(report)
            }
            None => None,
        };

        let kind = new_record.details.kind();
        let now = Utc::now();
        let record = WorkflowRecord {
            id: id.clone(),
            department: new_record.department.trim().to_owned(),
            amount: new_record.amount,
            details: new_record.details,
            created_by: actor.id.clone(),
            created_at: now,
            status: WorkflowDefinition::for_kind(kind).initial_status(),
            approvals: Default::default(),
            rejection: None,
            version: 1,
            updated_at: now,
        };

        self.store.insert_record(&record).await.map_err(|error| match error {
            StoreError::Duplicate(_) => SubmitError::Duplicate(id),
            other => SubmitError::StoreUnavailable(other.to_string()),
        })?;

        Ok(SubmitOutcome { record, discrepancy })
    }

    pub async fn advance(
        &self,
        request: AdvanceRequest,
        correlation_id: &str,
    ) -> Result<AdvanceOutcome, ApprovalError> {
        self.engine.advance(request, correlation_id).await
    }

    pub async fn get_record(&self, id: &RecordId) -> Result<WorkflowRecord, ApprovalError> {
        self.store
            .find_record(id)
            .await
            .map_err(|error| ApprovalError::StoreUnavailable(error.to_string()))?
            .ok_or_else(|| ApprovalError::NotFound(id.clone()))
    }

    /// Re-applies a terminal fuel entry's deduction after it came back `failed`.
    pub async fn reconcile_deduction(
        &self,
        record_id: &RecordId,
        actor: &Actor,
        correlation_id: &str,
    ) -> Result<InventoryEffect, ReconcileError> {
        let record_id = RecordId(record_id.0.trim().to_owned());
        self.engine.reconcile_deduction(&record_id, actor, correlation_id).await
    }

    /// Direct tank deduction outside of an approval. Restricted to inventory roles.
    pub async fn deduct(
        &self,
        fuel_type: &FuelType,
        amount: Decimal,
        key: Option<OperationKey>,
        actor: &Actor,
        correlation_id: &str,
    ) -> Result<DeductionOutcome, InventoryError> {
        require_inventory_role(actor)?;
        let audit = AuditContext::for_actor(None, correlation_id, actor);
        self.inventory().deduct(fuel_type, amount, key.as_ref(), actor, &audit).await
    }

    pub async fn refill(
        &self,
        fuel_type: &FuelType,
        amount: Decimal,
        notes: Option<String>,
        actor: &Actor,
        correlation_id: &str,
    ) -> Result<TankInventory, InventoryError> {
        require_inventory_role(actor)?;
        let audit = AuditContext::for_actor(None, correlation_id, actor);
        self.inventory().refill(fuel_type, amount, notes, actor, &audit).await
    }

    pub async fn register_tank(
        &self,
        fuel_type: FuelType,
        capacity: Decimal,
        initial_level: Decimal,
        actor: &Actor,
    ) -> Result<TankInventory, InventoryError> {
        require_inventory_role(actor)?;
        self.inventory().register_tank(fuel_type, capacity, initial_level, actor).await
    }

    pub async fn get_tank(&self, fuel_type: &FuelType) -> Result<TankInventory, InventoryError> {
        self.inventory().get_tank(fuel_type).await
    }

    pub async fn list_tanks(&self) -> Result<Vec<TankInventory>, InventoryError> {
        self.inventory().list_tanks().await
    }

    pub async fn summarize_backlog(&self) -> Result<Vec<ReminderRequest>, StoreError> {
        summarize_backlog(self.store.as_ref()).await
    }
}

fn require_inventory_role(actor: &Actor) -> Result<(), InventoryError> {
    if actor.role.manages_inventory() {
        Ok(())
    } else {
        Err(InventoryError::Unauthorized { role: actor.role })
    }
}

fn validate_submission(new_record: &NewRecord) -> Result<(), SubmitError> {
    if new_record.amount < Decimal::ZERO {
        return Err(SubmitError::Invalid("amount must not be negative".to_owned()));
    }
    if new_record.department.trim().is_empty() {
        return Err(SubmitError::Invalid("department is required".to_owned()));
    }
    if let Some(id) = &new_record.id {
        if id.0.trim().is_empty() {
            return Err(SubmitError::Invalid("record id must not be blank".to_owned()));
        }
    }

    match &new_record.details {
        RecordDetails::Sale { quantity, .. } => {
            if quantity.is_some_and(|quantity| quantity < Decimal::ZERO) {
                return Err(SubmitError::Invalid("quantity must not be negative".to_owned()));
            }
        }
        RecordDetails::Expense { category, .. } => {
            if category.trim().is_empty() {
                return Err(SubmitError::Invalid("expense category is required".to_owned()));
            }
        }
        RecordDetails::FuelEntry(entry) => {
            if entry.fuel_type.as_str().is_empty() {
                return Err(SubmitError::Invalid("fuel type is required".to_owned()));
            }
            if entry.opening_stock < Decimal::ZERO || entry.closing_stock < Decimal::ZERO {
                return Err(SubmitError::Invalid("stock readings must not be negative".to_owned()));
            }
            if entry.closing_stock > entry.opening_stock {
                return Err(SubmitError::Invalid(
                    "closing stock cannot exceed opening stock".to_owned(),
                ));
            }
            if entry.pump_fuel_sold.is_some_and(|pump| pump < Decimal::ZERO) {
                return Err(SubmitError::Invalid("pump reading must not be negative".to_owned()));
            }
        }
    }

    Ok(())
}

/// Caller-supplied ids are stored trimmed so lookups and duplicate checks see one form.
fn resolve_record_id(new_record: &NewRecord) -> RecordId {
    match &new_record.id {
        Some(id) => RecordId(id.0.trim().to_owned()),
        None => generate_record_id(new_record.details.kind()),
    }
}

fn generate_record_id(kind: WorkflowKind) -> RecordId {
    let prefix = match kind {
        WorkflowKind::Sale => "SALE",
        WorkflowKind::Expense => "EXP",
        WorkflowKind::FuelEntry => "FUEL",
    };
    let suffix = Uuid::new_v4().simple().to_string();
    RecordId(format!("{prefix}-{}", &suffix[..12]))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{generate_record_id, resolve_record_id, validate_submission, SubmitError};
    use crate::domain::record::{
        FuelEntryDetails, NewRecord, RecordDetails, RecordId, WorkflowKind,
    };
    use crate::domain::tank::FuelType;

    fn fuel_entry(opening: i64, closing: i64) -> NewRecord {
        NewRecord {
            id: None,
            department: "forecourt".to_owned(),
            amount: Decimal::new(50_000, 2),
            details: RecordDetails::FuelEntry(FuelEntryDetails {
                fuel_type: FuelType::new("petrol"),
                opening_stock: Decimal::new(opening, 0),
                closing_stock: Decimal::new(closing, 0),
                pump_fuel_sold: None,
            }),
        }
    }

    #[test]
    fn closing_above_opening_is_invalid() {
        assert!(matches!(validate_submission(&fuel_entry(900, 950)), Err(SubmitError::Invalid(_))));
        assert_eq!(validate_submission(&fuel_entry(950, 900)), Ok(()));
    }

    #[test]
    fn negative_amount_and_blank_department_are_invalid() {
        let mut record = fuel_entry(950, 900);
        record.amount = Decimal::new(-1, 0);
        assert!(matches!(validate_submission(&record), Err(SubmitError::Invalid(_))));

        let mut record = fuel_entry(950, 900);
        record.department = "  ".to_owned();
        assert!(matches!(
            validate_submission(&record),
            Err(SubmitError::Invalid(message)) if message.contains("department")
        ));
    }

    #[test]
    fn generated_ids_are_prefixed_by_kind() {
        assert!(generate_record_id(WorkflowKind::Expense).0.starts_with("EXP-"));
        assert!(generate_record_id(WorkflowKind::FuelEntry).0.starts_with("FUEL-"));
        assert_ne!(generate_record_id(WorkflowKind::Sale), generate_record_id(WorkflowKind::Sale));
    }

    #[test]
    fn supplied_ids_are_trimmed() {
        let mut record = fuel_entry(950, 900);
        record.id = Some(RecordId("  FUEL-7 \t".to_owned()));
        assert_eq!(resolve_record_id(&record), RecordId("FUEL-7".to_owned()));

        record.id = None;
        assert!(resolve_record_id(&record).0.starts_with("FUEL-"));
    }
}
