//! Tank inventory ledger.
//!
//! Level arithmetic is done by pure planners over the last read tank row; the
//! ledger then commits through the store's version-guarded write. Bounds are
//! refused, never clamped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::actor::Actor;
use crate::domain::tank::{FuelType, OperationKey, RefillEntry, TankInventory};
use crate::store::{DeductionWrite, StoreError, TankStore};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("no tank registered for fuel type `{0}`")]
    UnknownFuelType(FuelType),
    #[error("amount must be greater than zero, got {0}")]
    InvalidAmount(Decimal),
    #[error("insufficient `{fuel_type}` stock: requested {requested}L, available {available}L")]
    InsufficientStock { fuel_type: FuelType, requested: Decimal, available: Decimal },
    #[error("refill of {requested}L exceeds `{fuel_type}` tank headroom of {headroom}L")]
    ExceedsCapacity { fuel_type: FuelType, requested: Decimal, headroom: Decimal },
    #[error("invalid tank bounds for `{fuel_type}`: level {level}L, capacity {capacity}L")]
    InvalidBounds { fuel_type: FuelType, level: Decimal, capacity: Decimal },
    #[error("tank `{0}` already registered")]
    AlreadyRegistered(FuelType),
    #[error("role `{role}` may not adjust tank levels directly")]
    Unauthorized { role: crate::domain::actor::Role },
    #[error("tank `{0}` changed since it was read")]
    StaleState(FuelType),
    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(String),
}

impl InventoryError {
    fn from_store(fuel_type: &FuelType, error: StoreError) -> Self {
        match error {
            StoreError::Conflict => Self::StaleState(fuel_type.clone()),
            StoreError::Duplicate(_) => Self::AlreadyRegistered(fuel_type.clone()),
            StoreError::Unavailable(message) | StoreError::Decode(message) => {
                Self::StoreUnavailable(message)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeductionOutcome {
    Applied { tank: TankInventory },
    /// The idempotency key was already consumed; the level was not touched again.
    AlreadyApplied { key: OperationKey },
}

pub fn plan_deduction(
    tank: &TankInventory,
    amount: Decimal,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<TankInventory, InventoryError> {
    if amount <= Decimal::ZERO {
        return Err(InventoryError::InvalidAmount(amount));
    }

    let new_level = tank.current_level - amount;
    if new_level < Decimal::ZERO {
        return Err(InventoryError::InsufficientStock {
            fuel_type: tank.fuel_type.clone(),
            requested: amount,
            available: tank.current_level,
        });
    }

    Ok(TankInventory {
        current_level: new_level,
        updated_by: Some(actor.id.clone()),
        version: tank.version.saturating_add(1),
        updated_at: now,
        ..tank.clone()
    })
}

pub fn plan_refill(
    tank: &TankInventory,
    amount: Decimal,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<TankInventory, InventoryError> {
    if amount <= Decimal::ZERO {
        return Err(InventoryError::InvalidAmount(amount));
    }

    let headroom = tank.capacity - tank.current_level;
    if amount > headroom {
        return Err(InventoryError::ExceedsCapacity {
            fuel_type: tank.fuel_type.clone(),
            requested: amount,
            headroom,
        });
    }

    Ok(TankInventory {
        current_level: tank.current_level + amount,
        last_refill_amount: Some(amount),
        last_refill_date: Some(now),
        updated_by: Some(actor.id.clone()),
        version: tank.version.saturating_add(1),
        updated_at: now,
        ..tank.clone()
    })
}

pub struct InventoryLedger<S: ?Sized> {
    store: Arc<S>,
    audit: Arc<dyn AuditSink>,
}

impl<S: ?Sized> Clone for InventoryLedger<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), audit: Arc::clone(&self.audit) }
    }
}

impl<S> InventoryLedger<S>
where
    S: TankStore + ?Sized,
{
    pub fn new(store: Arc<S>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub async fn get_tank(&self, fuel_type: &FuelType) -> Result<TankInventory, InventoryError> {
        self.store
            .find_tank(fuel_type)
            .await
            .map_err(|error| InventoryError::from_store(fuel_type, error))?
            .ok_or_else(|| InventoryError::UnknownFuelType(fuel_type.clone()))
    }

    pub async fn list_tanks(&self) -> Result<Vec<TankInventory>, InventoryError> {
        self.store
            .list_tanks()
            .await
            .map_err(|error| InventoryError::StoreUnavailable(error.to_string()))
    }

    pub async fn register_tank(
        &self,
        fuel_type: FuelType,
        capacity: Decimal,
        initial_level: Decimal,
        actor: &Actor,
    ) -> Result<TankInventory, InventoryError> {
        let now = Utc::now();
        let tank = TankInventory {
            fuel_type: fuel_type.clone(),
            capacity,
            current_level: initial_level,
            last_refill_amount: None,
            last_refill_date: None,
            updated_by: Some(actor.id.clone()),
            version: 1,
            updated_at: now,
        };
        if capacity <= Decimal::ZERO || !tank.is_within_bounds() {
            return Err(InventoryError::InvalidBounds {
                fuel_type,
                level: initial_level,
                capacity,
            });
        }

        self.store
            .insert_tank(&tank)
            .await
            .map_err(|error| InventoryError::from_store(&fuel_type, error))?;
        info!(
            event_name = "inventory.tank.registered",
            fuel_type = %tank.fuel_type,
            capacity = %tank.capacity,
            current_level = %tank.current_level,
            "tank registered"
        );
        Ok(tank)
    }

    /// Deducts `amount` litres. A known `key` short-circuits to `AlreadyApplied`.
    pub async fn deduct(
        &self,
        fuel_type: &FuelType,
        amount: Decimal,
        key: Option<&OperationKey>,
        actor: &Actor,
        audit: &AuditContext,
    ) -> Result<DeductionOutcome, InventoryError> {
        if let Some(key) = key {
            let seen = self
                .store
                .has_deduction(key)
                .await
                .map_err(|error| InventoryError::from_store(fuel_type, error))?;
            if seen {
                return Ok(self.already_applied(fuel_type, key, audit));
            }
        }

        let tank = self.get_tank(fuel_type).await?;
        let next = match plan_deduction(&tank, amount, actor, Utc::now()) {
            Ok(next) => next,
            Err(error) => {
                self.emit(audit, "inventory.deduction_rejected", AuditOutcome::Rejected, fuel_type)
                    .with_metadata("error", error.to_string())
                    .send(&*self.audit);
                return Err(error);
            }
        };

        let write = self
            .store
            .commit_deduction(tank.version, &next, key)
            .await
            .map_err(|error| InventoryError::from_store(fuel_type, error))?;

        match (write, key) {
            (DeductionWrite::AlreadyApplied, Some(key)) => {
                Ok(self.already_applied(fuel_type, key, audit))
            }
            _ => {
                info!(
                    event_name = "inventory.deduction.applied",
                    correlation_id = %audit.correlation_id,
                    fuel_type = %fuel_type,
                    amount = %amount,
                    current_level = %next.current_level,
                    "tank level deducted"
                );
                self.emit(audit, "inventory.deducted", AuditOutcome::Success, fuel_type)
                    .with_metadata("amount", amount.to_string())
                    .with_metadata("current_level", next.current_level.to_string())
                    .send(&*self.audit);
                Ok(DeductionOutcome::Applied { tank: next })
            }
        }
    }

    pub async fn refill(
        &self,
        fuel_type: &FuelType,
        amount: Decimal,
        notes: Option<String>,
        actor: &Actor,
        audit: &AuditContext,
    ) -> Result<TankInventory, InventoryError> {
        let tank = self.get_tank(fuel_type).await?;
        let now = Utc::now();
        let next = match plan_refill(&tank, amount, actor, now) {
            Ok(next) => next,
            Err(error) => {
                self.emit(audit, "inventory.refill_rejected", AuditOutcome::Rejected, fuel_type)
                    .with_metadata("error", error.to_string())
                    .send(&*self.audit);
                return Err(error);
            }
        };
        let entry = RefillEntry {
            fuel_type: fuel_type.clone(),
            amount,
            notes,
            refilled_by: actor.id.clone(),
            refilled_at: now,
        };

        self.store
            .commit_refill(tank.version, &next, &entry)
            .await
            .map_err(|error| InventoryError::from_store(fuel_type, error))?;

        info!(
            event_name = "inventory.refill.applied",
            correlation_id = %audit.correlation_id,
            fuel_type = %fuel_type,
            amount = %amount,
            current_level = %next.current_level,
            "tank refilled"
        );
        self.emit(audit, "inventory.refilled", AuditOutcome::Success, fuel_type)
            .with_metadata("amount", amount.to_string())
            .with_metadata("current_level", next.current_level.to_string())
            .send(&*self.audit);
        Ok(next)
    }

    fn already_applied(
        &self,
        fuel_type: &FuelType,
        key: &OperationKey,
        audit: &AuditContext,
    ) -> DeductionOutcome {
        warn!(
            event_name = "inventory.deduction.replayed",
            correlation_id = %audit.correlation_id,
            fuel_type = %fuel_type,
            operation_key = %key.0,
            "deduction key already applied; level left unchanged"
        );
        DeductionOutcome::AlreadyApplied { key: key.clone() }
    }

    fn emit(
        &self,
        audit: &AuditContext,
        event_type: &str,
        outcome: AuditOutcome,
        fuel_type: &FuelType,
    ) -> AuditEvent {
        AuditEvent::new(
            audit.record_id.clone(),
            audit.correlation_id.clone(),
            event_type,
            AuditCategory::Inventory,
            audit.actor.clone(),
            outcome,
        )
        .with_metadata("fuel_type", fuel_type.as_str())
    }
}
