use thiserror::Error;

use crate::inventory::InventoryError;
use crate::service::SubmitError;
use crate::store::StoreError;
use crate::workflow::{ApprovalError, ReconcileError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Submission(#[from] SubmitError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "Your role is not allowed to perform this action.",
            Self::NotFound { .. } => "The requested item does not exist.",
            Self::Conflict { .. } => {
                "The item changed since you loaded it. Refresh and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Copy)]
enum Class {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

fn classify(error: &ApplicationError) -> Class {
    match error {
        ApplicationError::Approval(error) => match error {
            ApprovalError::NotFound(_) => Class::NotFound,
            ApprovalError::Unauthorized { .. } => Class::Forbidden,
            ApprovalError::IllegalTransition { .. } => Class::BadRequest,
            ApprovalError::StaleState { .. } => Class::Conflict,
            ApprovalError::StoreUnavailable(_) => Class::Unavailable,
        },
        ApplicationError::Inventory(error) => classify_inventory(error),
        ApplicationError::Submission(error) => match error {
            SubmitError::Invalid(_) | SubmitError::UnknownFuelType(_) | SubmitError::Blocked(_) => {
                Class::BadRequest
            }
            SubmitError::Duplicate(_) => Class::Conflict,
            SubmitError::StoreUnavailable(_) => Class::Unavailable,
        },
        ApplicationError::Reconcile(error) => match error {
            ReconcileError::NotFound(_) => Class::NotFound,
            ReconcileError::NotApplicable { .. } => Class::Conflict,
            ReconcileError::Inventory(error) => classify_inventory(error),
            ReconcileError::StoreUnavailable(_) => Class::Unavailable,
        },
        ApplicationError::Persistence(error) => match error {
            StoreError::Conflict | StoreError::Duplicate(_) => Class::Conflict,
            StoreError::Unavailable(_) => Class::Unavailable,
            StoreError::Decode(_) => Class::Internal,
        },
    }
}

fn classify_inventory(error: &InventoryError) -> Class {
    match error {
        InventoryError::UnknownFuelType(_) => Class::NotFound,
        InventoryError::InvalidAmount(_) | InventoryError::InvalidBounds { .. } => {
            Class::BadRequest
        }
        InventoryError::Unauthorized { .. } => Class::Forbidden,
        InventoryError::InsufficientStock { .. }
        | InventoryError::ExceedsCapacity { .. }
        | InventoryError::AlreadyRegistered(_)
        | InventoryError::StaleState(_) => Class::Conflict,
        InventoryError::StoreUnavailable(_) => Class::Unavailable,
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let class = classify(&value);
        let message = match value {
            ApplicationError::Persistence(error) => error.to_string(),
            other => other.to_string(),
        };
        let correlation_id = "unassigned".to_owned();
        match class {
            Class::BadRequest => Self::BadRequest { message, correlation_id },
            Class::Forbidden => Self::Forbidden { message, correlation_id },
            Class::NotFound => Self::NotFound { message, correlation_id },
            Class::Conflict => Self::Conflict { message, correlation_id },
            Class::Unavailable => Self::ServiceUnavailable { message, correlation_id },
            Class::Internal => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::domain::actor::Role;
    use crate::domain::record::{RecordId, RecordStatus};
    use crate::domain::tank::FuelType;
    use crate::errors::{ApplicationError, InterfaceError};
    use crate::inventory::InventoryError;
    use crate::service::SubmitError;
    use crate::store::StoreError;
    use crate::workflow::{ApprovalError, ReconcileError};

    #[test]
    fn stale_state_maps_to_conflict_with_processed_message() {
        let interface = ApplicationError::from(ApprovalError::StaleState {
            id: RecordId("SALE-1".to_owned()),
            current: RecordStatus::ManagerApproved,
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Conflict { ref correlation_id, ref message }
                if correlation_id == "req-1" && message.contains("already processed by someone else")
        ));
    }

    #[test]
    fn unauthorized_maps_to_forbidden() {
        let interface = ApplicationError::from(ApprovalError::Unauthorized {
            role: Role::Attendant,
            required: Role::Accountant,
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Forbidden { .. }));
        assert_eq!(interface.user_message(), "Your role is not allowed to perform this action.");
    }

    #[test]
    fn insufficient_stock_is_a_conflict_not_a_retry() {
        let interface = ApplicationError::from(InventoryError::InsufficientStock {
            fuel_type: FuelType::new("petrol"),
            requested: Decimal::new(30, 0),
            available: Decimal::new(20, 0),
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert!(!interface.is_retryable());
    }

    #[test]
    fn store_failures_map_to_service_unavailable() {
        let interface =
            ApplicationError::from(StoreError::Unavailable("database lock timeout".to_owned()))
                .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert!(interface.is_retryable());
        assert_eq!(interface.correlation_id(), "req-4");
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn invalid_submission_is_bad_request() {
        let interface =
            ApplicationError::from(SubmitError::Invalid("department is required".to_owned()))
                .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
        assert!(interface.message().contains("department"));
    }

    #[test]
    fn undecodable_rows_are_internal_errors() {
        let interface = ApplicationError::from(StoreError::Decode("invalid details_json".to_owned()))
            .into_interface("req-6");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert!(!interface.is_retryable());
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn reconcile_errors_follow_the_inventory_mapping() {
        let not_final = ApplicationError::from(ReconcileError::NotApplicable {
            id: RecordId("FUEL-1".to_owned()),
            reason: "fuel entry has not reached final approval",
        })
        .into_interface("req-7");
        assert!(matches!(not_final, InterfaceError::Conflict { .. }));

        let forbidden = ApplicationError::from(ReconcileError::from(InventoryError::Unauthorized {
            role: Role::Accountant,
        }))
        .into_interface("req-8");
        assert!(matches!(forbidden, InterfaceError::Forbidden { .. }));

        let missing = ApplicationError::from(ReconcileError::NotFound(RecordId("FUEL-9".to_owned())))
            .into_interface("req-9");
        assert!(matches!(missing, InterfaceError::NotFound { .. }));
    }
}
