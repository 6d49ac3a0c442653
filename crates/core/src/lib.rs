pub mod audit;
pub mod backlog;
pub mod config;
pub mod discrepancy;
pub mod domain;
pub mod errors;
pub mod inventory;
pub mod notifications;
pub mod service;
pub mod store;
pub mod workflow;

pub use discrepancy::{DiscrepancyClass, DiscrepancyDetector, DiscrepancyReport};
pub use domain::actor::{Actor, ActorId, Role};
pub use domain::notification::{Notification, NotificationKind, ReminderRequest};
pub use domain::record::{
    ApprovalStage, FuelEntryDetails, NewRecord, RecordDetails, RecordId, RecordStatus,
    WorkflowKind, WorkflowRecord,
};
pub use domain::tank::{FuelType, OperationKey, RefillEntry, TankInventory};
pub use errors::{ApplicationError, InterfaceError};
pub use inventory::{DeductionOutcome, InventoryError, InventoryLedger};
pub use service::{ForecourtService, ServiceSettings, SubmitError, SubmitOutcome};
pub use store::{ChangeEvent, ChangeFeed, LedgerStore, RecordStore, StoreError, TankStore};
pub use workflow::{
    AdvanceOutcome, AdvanceRequest, ApprovalEngine, ApprovalError, InventoryEffect,
    ReconcileError,
};
