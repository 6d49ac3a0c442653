//! Role-gated approval chain for sales, expenses and fuel entries.

pub mod engine;
pub mod states;

pub use engine::{
    plan_transition, AdvanceOutcome, AdvanceRequest, ApprovalEngine, ApprovalError,
    InventoryEffect, ReconcileError,
};
pub use states::{required_role, WorkflowDefinition};
