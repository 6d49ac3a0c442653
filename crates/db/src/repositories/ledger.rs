use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use forecourt_core::domain::actor::ActorId;
use forecourt_core::domain::record::{
    ApprovalStage, ApprovalStamp, RecordDetails, RecordId, RecordStatus, Rejection, WorkflowKind,
    WorkflowRecord,
};
use forecourt_core::domain::tank::{FuelType, OperationKey, RefillEntry, TankInventory};
use forecourt_core::store::{
    ChangeEvent, ChangeFeed, ChangePayload, ChangeType, DeductionWrite, RecordStore, StoreError,
    TankStore,
};

use super::{RepositoryError, DEFAULT_CHANGE_FEED_CAPACITY};
use crate::DbPool;

const RECORD_COLUMNS: &str = "id, kind, department, amount, details_json, created_by, created_at,
    status, rejection_reason, rejected_by, rejected_at, version, updated_at";

const TANK_COLUMNS: &str = "fuel_type, capacity, current_level, last_refill_amount,
    last_refill_date, updated_by, version, updated_at";

/// SQLite-backed ledger store.
///
/// Guarded writes compare the stored status or version inside the `UPDATE` itself, so a
/// lost race surfaces as zero affected rows. Commit and change publication happen under
/// one sequence lock, keeping the feed in commit order.
pub struct SqlLedgerStore {
    pool: DbPool,
    changes: broadcast::Sender<ChangeEvent>,
    sequence: Mutex<u64>,
}

impl SqlLedgerStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_capacity(pool, DEFAULT_CHANGE_FEED_CAPACITY)
    }

    pub fn with_capacity(pool: DbPool, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self { pool, changes, sequence: Mutex::new(0) }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn refill_history(&self, fuel_type: &FuelType) -> Result<Vec<RefillEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT fuel_type, amount, notes, refilled_by, refilled_at
             FROM tank_refill
             WHERE fuel_type = ?
             ORDER BY id",
        )
        .bind(fuel_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter().map(refill_from_row).collect::<Result<_, _>>().map_err(StoreError::from)
    }

    async fn load_record(&self, id: &RecordId) -> Result<Option<WorkflowRecord>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM workflow_record WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?;
        let Some(row) = row else {
            tx.rollback().await.map_err(db)?;
            return Ok(None);
        };

        let approval_rows = sqlx::query(
            "SELECT stage, approver_id, approved_at FROM record_approval WHERE record_id = ?",
        )
        .bind(&id.0)
        .fetch_all(&mut *tx)
        .await
        .map_err(db)?;
        tx.commit().await.map_err(db)?;

        let approvals = approvals_from_rows(&approval_rows)?;
        Ok(Some(record_from_row(&row, approvals)?))
    }

    async fn load_tank(&self, fuel_type: &FuelType) -> Result<Option<TankInventory>, StoreError> {
        let row =
            sqlx::query(&format!("SELECT {TANK_COLUMNS} FROM tank_inventory WHERE fuel_type = ?"))
                .bind(fuel_type.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;

        row.as_ref().map(tank_from_row).transpose().map_err(StoreError::from)
    }

    async fn commit_and_publish(
        &self,
        tx: Transaction<'_, Sqlite>,
        event_type: ChangeType,
        payload: ChangePayload,
    ) -> Result<(), StoreError> {
        let mut sequence = self.sequence.lock().await;
        tx.commit().await.map_err(db)?;
        *sequence += 1;

        let event =
            ChangeEvent { sequence: *sequence, event_type, payload, committed_at: Utc::now() };
        if self.changes.send(event).is_err() {
            debug!(
                event_name = "ledger.change.unobserved",
                sequence = *sequence,
                "no change feed subscribers"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqlLedgerStore {
    async fn find_record(&self, id: &RecordId) -> Result<Option<WorkflowRecord>, StoreError> {
        self.load_record(id).await
    }

    async fn insert_record(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        let details_json = serde_json::to_string(&record.details)
            .map_err(|error| StoreError::Decode(error.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db)?;
        sqlx::query(
            "INSERT INTO workflow_record (
                id,
                kind,
                department,
                amount,
                details_json,
                created_by,
                created_at,
                status,
                rejection_reason,
                rejected_by,
                rejected_at,
                version,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(record.kind().as_str())
        .bind(&record.department)
        .bind(record.amount.to_string())
        .bind(details_json)
        .bind(&record.created_by.0)
        .bind(record.created_at.to_rfc3339())
        .bind(record.status.as_str())
        .bind(record.rejection.as_ref().map(|rejection| rejection.reason.as_str()))
        .bind(record.rejection.as_ref().map(|rejection| rejection.rejected_by.0.as_str()))
        .bind(record.rejection.as_ref().map(|rejection| rejection.rejected_at.to_rfc3339()))
        .bind(i64::from(record.version))
        .bind(record.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|error| match db(error) {
            StoreError::Duplicate(_) => StoreError::Duplicate(record.id.0.clone()),
            other => other,
        })?;

        for (stage, stamp) in &record.approvals {
            insert_approval(&mut tx, &record.id, *stage, stamp).await?;
        }

        self.commit_and_publish(
            tx,
            ChangeType::Insert,
            ChangePayload::Record { before: None, after: record.clone() },
        )
        .await
    }

    async fn transition_record(
        &self,
        expected: RecordStatus,
        next: &WorkflowRecord,
    ) -> Result<(), StoreError> {
        let before = self.load_record(&next.id).await?.ok_or(StoreError::Conflict)?;
        if before.status != expected || before.version.saturating_add(1) != next.version {
            return Err(StoreError::Conflict);
        }

        let mut tx = self.pool.begin().await.map_err(db)?;
        let updated = sqlx::query(
            "UPDATE workflow_record
             SET status = ?,
                 rejection_reason = ?,
                 rejected_by = ?,
                 rejected_at = ?,
                 version = ?,
                 updated_at = ?
             WHERE id = ? AND status = ? AND version = ?",
        )
        .bind(next.status.as_str())
        .bind(next.rejection.as_ref().map(|rejection| rejection.reason.as_str()))
        .bind(next.rejection.as_ref().map(|rejection| rejection.rejected_by.0.as_str()))
        .bind(next.rejection.as_ref().map(|rejection| rejection.rejected_at.to_rfc3339()))
        .bind(i64::from(next.version))
        .bind(next.updated_at.to_rfc3339())
        .bind(&next.id.0)
        .bind(expected.as_str())
        .bind(i64::from(before.version))
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(db)?;
            return Err(StoreError::Conflict);
        }

        for (stage, stamp) in &next.approvals {
            if before.approvals.contains_key(stage) {
                continue;
            }
            insert_approval(&mut tx, &next.id, *stage, stamp).await.map_err(|error| match error {
                StoreError::Duplicate(_) => StoreError::Conflict,
                other => other,
            })?;
        }

        let mut after = next.clone();
        for (stage, stamp) in &before.approvals {
            after.approvals.insert(*stage, stamp.clone());
        }

        self.commit_and_publish(
            tx,
            ChangeType::Update,
            ChangePayload::Record { before: Some(before), after },
        )
        .await
    }

    async fn count_by_status(
        &self,
        kind: WorkflowKind,
        status: RecordStatus,
    ) -> Result<u64, StoreError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM workflow_record WHERE kind = ? AND status = ?",
        )
        .bind(kind.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db)?
        .try_get::<i64, _>("count")
        .map_err(db)?;

        u64::try_from(count).map_err(|_| StoreError::Decode(format!("negative count {count}")))
    }
}

#[async_trait]
impl TankStore for SqlLedgerStore {
    async fn find_tank(&self, fuel_type: &FuelType) -> Result<Option<TankInventory>, StoreError> {
        self.load_tank(fuel_type).await
    }

    async fn list_tanks(&self) -> Result<Vec<TankInventory>, StoreError> {
        let rows =
            sqlx::query(&format!("SELECT {TANK_COLUMNS} FROM tank_inventory ORDER BY fuel_type"))
                .fetch_all(&self.pool)
                .await
                .map_err(db)?;

        rows.iter().map(tank_from_row).collect::<Result<_, _>>().map_err(StoreError::from)
    }

    async fn insert_tank(&self, tank: &TankInventory) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        sqlx::query(
            "INSERT INTO tank_inventory (
                fuel_type,
                capacity,
                current_level,
                last_refill_amount,
                last_refill_date,
                updated_by,
                version,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(tank.fuel_type.as_str())
        .bind(tank.capacity.to_string())
        .bind(tank.current_level.to_string())
        .bind(tank.last_refill_amount.map(|amount| amount.to_string()))
        .bind(tank.last_refill_date.map(|date| date.to_rfc3339()))
        .bind(tank.updated_by.as_ref().map(|id| id.0.as_str()))
        .bind(i64::from(tank.version))
        .bind(tank.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|error| match db(error) {
            StoreError::Duplicate(_) => StoreError::Duplicate(tank.fuel_type.to_string()),
            other => other,
        })?;

        self.commit_and_publish(
            tx,
            ChangeType::Insert,
            ChangePayload::Tank { before: None, after: tank.clone() },
        )
        .await
    }

    async fn has_deduction(&self, key: &OperationKey) -> Result<bool, StoreError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM inventory_deduction WHERE operation_key = ?",
        )
        .bind(&key.0)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?
        .try_get::<i64, _>("count")
        .map_err(db)?;

        Ok(count > 0)
    }

    async fn commit_deduction(
        &self,
        expected_version: u32,
        next: &TankInventory,
        key: Option<&OperationKey>,
    ) -> Result<DeductionWrite, StoreError> {
        let before = self.load_tank(&next.fuel_type).await?.ok_or(StoreError::Conflict)?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db)?;

        if let Some(key) = key {
            let inserted = sqlx::query(
                "INSERT INTO inventory_deduction (operation_key, fuel_type, amount, applied_by, applied_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(operation_key) DO NOTHING",
            )
            .bind(&key.0)
            .bind(next.fuel_type.as_str())
            .bind((before.current_level - next.current_level).to_string())
            .bind(next.updated_by.as_ref().map(|id| id.0.as_str()))
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db)?;

            if inserted.rows_affected() == 0 {
                tx.rollback().await.map_err(db)?;
                return Ok(DeductionWrite::AlreadyApplied);
            }
        }

        if before.version != expected_version {
            tx.rollback().await.map_err(db)?;
            return Err(StoreError::Conflict);
        }
        update_tank(&mut tx, expected_version, next).await?;

        self.commit_and_publish(
            tx,
            ChangeType::Update,
            ChangePayload::Tank { before: Some(before), after: next.clone() },
        )
        .await?;
        Ok(DeductionWrite::Applied)
    }

    async fn commit_refill(
        &self,
        expected_version: u32,
        next: &TankInventory,
        entry: &RefillEntry,
    ) -> Result<(), StoreError> {
        let before = self.load_tank(&next.fuel_type).await?.ok_or(StoreError::Conflict)?;
        if before.version != expected_version {
            return Err(StoreError::Conflict);
        }

        let mut tx = self.pool.begin().await.map_err(db)?;
        update_tank(&mut tx, expected_version, next).await?;
        sqlx::query(
            "INSERT INTO tank_refill (fuel_type, amount, notes, refilled_by, refilled_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.fuel_type.as_str())
        .bind(entry.amount.to_string())
        .bind(entry.notes.as_deref())
        .bind(&entry.refilled_by.0)
        .bind(entry.refilled_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        self.commit_and_publish(
            tx,
            ChangeType::Update,
            ChangePayload::Tank { before: Some(before), after: next.clone() },
        )
        .await
    }
}

impl ChangeFeed for SqlLedgerStore {
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

async fn insert_approval(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: &RecordId,
    stage: ApprovalStage,
    stamp: &ApprovalStamp,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO record_approval (record_id, stage, approver_id, approved_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(&record_id.0)
    .bind(stage.as_str())
    .bind(&stamp.approver_id.0)
    .bind(stamp.approved_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(db)?;
    Ok(())
}

async fn update_tank(
    tx: &mut Transaction<'_, Sqlite>,
    expected_version: u32,
    next: &TankInventory,
) -> Result<(), StoreError> {
    let updated = sqlx::query(
        "UPDATE tank_inventory
         SET current_level = ?,
             last_refill_amount = ?,
             last_refill_date = ?,
             updated_by = ?,
             version = ?,
             updated_at = ?
         WHERE fuel_type = ? AND version = ?",
    )
    .bind(next.current_level.to_string())
    .bind(next.last_refill_amount.map(|amount| amount.to_string()))
    .bind(next.last_refill_date.map(|date| date.to_rfc3339()))
    .bind(next.updated_by.as_ref().map(|id| id.0.as_str()))
    .bind(i64::from(next.version))
    .bind(next.updated_at.to_rfc3339())
    .bind(next.fuel_type.as_str())
    .bind(i64::from(expected_version))
    .execute(&mut **tx)
    .await
    .map_err(db)?;

    if updated.rows_affected() == 0 {
        return Err(StoreError::Conflict);
    }
    Ok(())
}

fn db(error: sqlx::Error) -> StoreError {
    StoreError::from(RepositoryError::from(error))
}

fn record_from_row(
    row: &SqliteRow,
    approvals: BTreeMap<ApprovalStage, ApprovalStamp>,
) -> Result<WorkflowRecord, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = WorkflowKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown workflow kind `{kind_raw}`")))?;
    let status_raw = row.try_get::<String, _>("status")?;
    let status = RecordStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown record status `{status_raw}`")))?;

    let details_json = row.try_get::<String, _>("details_json")?;
    let details = serde_json::from_str::<RecordDetails>(&details_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid details_json: {error}")))?;
    if details.kind() != kind {
        return Err(RepositoryError::Decode(format!(
            "details for `{}` do not match stored kind `{kind}`",
            details.kind()
        )));
    }

    let rejection = match (
        row.try_get::<Option<String>, _>("rejection_reason")?,
        row.try_get::<Option<String>, _>("rejected_by")?,
        row.try_get::<Option<String>, _>("rejected_at")?,
    ) {
        (Some(reason), Some(rejected_by), Some(rejected_at)) => Some(Rejection {
            reason,
            rejected_by: ActorId(rejected_by),
            rejected_at: parse_timestamp("rejected_at", rejected_at)?,
        }),
        _ => None,
    };

    Ok(WorkflowRecord {
        id: RecordId(row.try_get("id")?),
        department: row.try_get("department")?,
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        details,
        created_by: ActorId(row.try_get("created_by")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        status,
        approvals,
        rejection,
        version: parse_u32("version", row.try_get("version")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn approvals_from_rows(
    rows: &[SqliteRow],
) -> Result<BTreeMap<ApprovalStage, ApprovalStamp>, RepositoryError> {
    rows.iter()
        .map(|row| {
            let stage_raw = row.try_get::<String, _>("stage")?;
            let stage = ApprovalStage::parse(&stage_raw).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown approval stage `{stage_raw}`"))
            })?;
            let stamp = ApprovalStamp {
                approver_id: ActorId(row.try_get("approver_id")?),
                approved_at: parse_timestamp("approved_at", row.try_get("approved_at")?)?,
            };
            Ok((stage, stamp))
        })
        .collect()
}

fn tank_from_row(row: &SqliteRow) -> Result<TankInventory, RepositoryError> {
    Ok(TankInventory {
        fuel_type: FuelType::new(row.try_get::<String, _>("fuel_type")?),
        capacity: parse_decimal("capacity", row.try_get("capacity")?)?,
        current_level: parse_decimal("current_level", row.try_get("current_level")?)?,
        last_refill_amount: row
            .try_get::<Option<String>, _>("last_refill_amount")?
            .map(|value| parse_decimal("last_refill_amount", value))
            .transpose()?,
        last_refill_date: parse_optional_timestamp(
            "last_refill_date",
            row.try_get("last_refill_date")?,
        )?,
        updated_by: row.try_get::<Option<String>, _>("updated_by")?.map(ActorId),
        version: parse_u32("version", row.try_get("version")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn refill_from_row(row: &SqliteRow) -> Result<RefillEntry, RepositoryError> {
    Ok(RefillEntry {
        fuel_type: FuelType::new(row.try_get::<String, _>("fuel_type")?),
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        notes: row.try_get("notes")?,
        refilled_by: ActorId(row.try_get("refilled_by")?),
        refilled_at: parse_timestamp("refilled_at", row.try_get("refilled_at")?)?,
    })
}

fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use forecourt_core::domain::actor::ActorId;
    use forecourt_core::domain::record::{
        ApprovalStage, ApprovalStamp, FuelEntryDetails, RecordDetails, RecordId, RecordStatus,
        WorkflowKind, WorkflowRecord,
    };
    use forecourt_core::domain::tank::{FuelType, OperationKey, RefillEntry, TankInventory};
    use forecourt_core::store::{
        ChangeFeed, ChangePayload, ChangeType, DeductionWrite, RecordStore, StoreError, TankStore,
    };

    use super::SqlLedgerStore;
    use crate::migrations;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn fuel_record() -> WorkflowRecord {
        WorkflowRecord {
            id: RecordId("FUEL-001".to_string()),
            department: "forecourt".to_string(),
            amount: Decimal::new(125_050, 2),
            details: RecordDetails::FuelEntry(FuelEntryDetails {
                fuel_type: FuelType::new("diesel"),
                opening_stock: Decimal::new(10_000, 1),
                closing_stock: Decimal::new(9_405, 1),
                pump_fuel_sold: Some(Decimal::new(60, 0)),
            }),
            created_by: ActorId("u-att".to_string()),
            created_at: parse_ts("2026-03-01T06:00:00Z"),
            status: RecordStatus::Submitted,
            approvals: BTreeMap::new(),
            rejection: None,
            version: 1,
            updated_at: parse_ts("2026-03-01T06:00:00Z"),
        }
    }

    fn tank(level: i64) -> TankInventory {
        TankInventory {
            fuel_type: FuelType::new("diesel"),
            capacity: Decimal::new(5000, 0),
            current_level: Decimal::new(level, 0),
            last_refill_amount: None,
            last_refill_date: None,
            updated_by: None,
            version: 1,
            updated_at: parse_ts("2026-03-01T05:00:00Z"),
        }
    }

    #[tokio::test]
    async fn record_insert_and_transition_persist_stamps() {
        let store = SqlLedgerStore::new(setup_pool().await);
        let mut feed = store.subscribe();
        let record = fuel_record();
        store.insert_record(&record).await.expect("insert record");

        let found = store.find_record(&record.id).await.expect("find");
        assert_eq!(found, Some(record.clone()));

        let mut next = record.clone();
        next.status = RecordStatus::AccountantApproved;
        next.version = 2;
        next.updated_at = parse_ts("2026-03-01T07:00:00Z");
        next.approvals.insert(
            ApprovalStage::Accountant,
            ApprovalStamp {
                approver_id: ActorId("u-acc".to_string()),
                approved_at: parse_ts("2026-03-01T07:00:00Z"),
            },
        );
        store.transition_record(RecordStatus::Submitted, &next).await.expect("transition");

        assert_eq!(store.find_record(&record.id).await.expect("find"), Some(next.clone()));
        assert_eq!(
            store.count_by_status(WorkflowKind::FuelEntry, RecordStatus::AccountantApproved).await,
            Ok(1)
        );

        let insert = feed.recv().await.expect("insert event");
        let update = feed.recv().await.expect("update event");
        assert_eq!(insert.event_type, ChangeType::Insert);
        assert_eq!(update.event_type, ChangeType::Update);
        assert!(update.sequence > insert.sequence);
        assert!(matches!(
            update.payload,
            ChangePayload::Record { before: Some(ref before), .. }
                if before.status == RecordStatus::Submitted
        ));
    }

    #[tokio::test]
    async fn stale_transition_is_a_conflict() {
        let store = SqlLedgerStore::new(setup_pool().await);
        let record = fuel_record();
        store.insert_record(&record).await.expect("insert record");

        let mut next = record.clone();
        next.status = RecordStatus::AccountantApproved;
        next.version = 2;
        store.transition_record(RecordStatus::Submitted, &next).await.expect("first wins");

        assert_eq!(
            store.transition_record(RecordStatus::Submitted, &next).await,
            Err(StoreError::Conflict)
        );
    }

    #[tokio::test]
    async fn duplicate_record_id_is_reported() {
        let store = SqlLedgerStore::new(setup_pool().await);
        let record = fuel_record();
        store.insert_record(&record).await.expect("insert record");

        assert_eq!(
            store.insert_record(&record).await,
            Err(StoreError::Duplicate("FUEL-001".to_string()))
        );
    }

    #[tokio::test]
    async fn keyed_deduction_applies_once() {
        let store = SqlLedgerStore::new(setup_pool().await);
        store.insert_tank(&tank(200)).await.expect("insert tank");
        let key = OperationKey("FUEL-001".to_string());

        let mut next = tank(180);
        next.version = 2;
        assert_eq!(
            store.commit_deduction(1, &next, Some(&key)).await,
            Ok(DeductionWrite::Applied)
        );
        assert_eq!(store.has_deduction(&key).await, Ok(true));

        let mut replay = tank(160);
        replay.version = 3;
        assert_eq!(
            store.commit_deduction(2, &replay, Some(&key)).await,
            Ok(DeductionWrite::AlreadyApplied)
        );

        let stored = store.find_tank(&FuelType::new("diesel")).await.expect("find").expect("tank");
        assert_eq!(stored.current_level, Decimal::new(180, 0));
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn refill_writes_history_and_guards_version() {
        let store = SqlLedgerStore::new(setup_pool().await);
        store.insert_tank(&tank(200)).await.expect("insert tank");

        let mut next = tank(1200);
        next.version = 2;
        next.last_refill_amount = Some(Decimal::new(1000, 0));
        next.last_refill_date = Some(parse_ts("2026-03-02T08:00:00Z"));
        let entry = RefillEntry {
            fuel_type: FuelType::new("diesel"),
            amount: Decimal::new(1000, 0),
            notes: Some("delivery #88".to_string()),
            refilled_by: ActorId("u-mgr".to_string()),
            refilled_at: parse_ts("2026-03-02T08:00:00Z"),
        };
        store.commit_refill(1, &next, &entry).await.expect("refill");

        assert_eq!(store.commit_refill(1, &next, &entry).await, Err(StoreError::Conflict));
        assert_eq!(
            store.refill_history(&FuelType::new("diesel")).await.expect("history"),
            vec![entry]
        );
        assert_eq!(store.list_tanks().await.expect("list"), vec![next]);
    }
}
