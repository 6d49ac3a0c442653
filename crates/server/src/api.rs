//! JSON and SSE routes over [`ForecourtService`].
//!
//! - `POST /records`                       submit a sale, expense or fuel entry
//! - `GET  /records/{id}`                  read one record
//! - `POST /records/{id}/advance`          approve to a target status or reject
//! - `POST /records/{id}/reconcile`        re-apply an approved fuel entry's deduction
//! - `GET  /tanks` / `POST /tanks`         list or register tanks
//! - `GET  /tanks/{fuel_type}`             read one tank
//! - `POST /tanks/{fuel_type}/deduct`      direct deduction (manager/director)
//! - `POST /tanks/{fuel_type}/refill`      refill (manager/director)
//! - `GET  /backlog`                       pending work per role
//! - `GET  /notifications?role=...`        server-sent notification stream
//!
//! Identity comes from the trusted `x-actor-id` / `x-actor-role` headers set by the
//! fronting proxy.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use forecourt_core::domain::notification::ReminderRequest;
use forecourt_core::errors::{ApplicationError, InterfaceError};
use forecourt_core::{
    Actor, AdvanceOutcome, AdvanceRequest, DeductionOutcome, ForecourtService, FuelType,
    InventoryEffect, LedgerStore, NewRecord, OperationKey, RecordId, RecordStatus, Role, SubmitOutcome,
    TankInventory, WorkflowRecord,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

pub type SharedService = Arc<ForecourtService<dyn LedgerStore>>;

#[derive(Clone)]
pub struct ApiState {
    service: SharedService,
}

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/records", post(submit_record))
        .route("/records/{id}", get(get_record))
        .route("/records/{id}/advance", post(advance_record))
        .route("/records/{id}/reconcile", post(reconcile_record))
        .route("/tanks", get(list_tanks).post(register_tank))
        .route("/tanks/{fuel_type}", get(get_tank))
        .route("/tanks/{fuel_type}/deduct", post(deduct))
        .route("/tanks/{fuel_type}/refill", post(refill))
        .route("/backlog", get(backlog))
        .route("/notifications", get(notifications))
        .with_state(ApiState { service })
}

// ---------------------------------------------------------------------------
// Request context
// ---------------------------------------------------------------------------

pub struct CorrelationId(pub String);

impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(correlation_id(&parts.headers)))
    }
}

/// Caller identity plus the correlation id used for every log and audit line.
pub struct RequestContext {
    pub actor: Actor,
    pub correlation_id: String,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(&parts.headers);
        let id = header_value(&parts.headers, ACTOR_ID_HEADER).ok_or_else(|| {
            ApiError::bad_request(format!("missing `{ACTOR_ID_HEADER}` header"), &correlation_id)
        })?;
        let role = header_value(&parts.headers, ACTOR_ROLE_HEADER)
            .and_then(|raw| Role::parse(&raw))
            .ok_or_else(|| {
                ApiError::bad_request(
                    format!("missing or unknown `{ACTOR_ROLE_HEADER}` header"),
                    &correlation_id,
                )
            })?;

        Ok(Self { actor: Actor::new(id, role), correlation_id })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn correlation_id(headers: &HeaderMap) -> String {
    header_value(headers, CORRELATION_HEADER)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4().simple()))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError(InterfaceError);

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    detail: &'a str,
    correlation_id: &'a str,
    retryable: bool,
}

impl ApiError {
    fn new(error: impl Into<ApplicationError>, correlation_id: &str) -> Self {
        Self(error.into().into_interface(correlation_id))
    }

    fn bad_request(message: String, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest { message, correlation_id: correlation_id.to_owned() })
    }

    fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.0.user_message(),
            detail: self.0.message(),
            correlation_id: self.0.correlation_id(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AdvanceBody {
    pub target: RecordStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub expected_status: Option<RecordStatus>,
}

async fn submit_record(
    State(state): State<ApiState>,
    context: RequestContext,
    Json(body): Json<NewRecord>,
) -> Result<(StatusCode, Json<SubmitOutcome>), ApiError> {
    let outcome = state
        .service
        .submit(body, &context.actor, &context.correlation_id)
        .await
        .map_err(|error| ApiError::new(error, &context.correlation_id))?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn get_record(
    State(state): State<ApiState>,
    CorrelationId(correlation_id): CorrelationId,
    Path(id): Path<String>,
) -> Result<Json<WorkflowRecord>, ApiError> {
    state
        .service
        .get_record(&RecordId(id))
        .await
        .map(Json)
        .map_err(|error| ApiError::new(error, &correlation_id))
}

async fn advance_record(
    State(state): State<ApiState>,
    context: RequestContext,
    Path(id): Path<String>,
    Json(body): Json<AdvanceBody>,
) -> Result<Json<AdvanceOutcome>, ApiError> {
    let request = AdvanceRequest {
        record_id: RecordId(id),
        actor: context.actor,
        target: body.target,
        reason: body.reason,
        expected_status: body.expected_status,
    };
    state
        .service
        .advance(request, &context.correlation_id)
        .await
        .map(Json)
        .map_err(|error| ApiError::new(error, &context.correlation_id))
}

async fn reconcile_record(
    State(state): State<ApiState>,
    context: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<InventoryEffect>, ApiError> {
    state
        .service
        .reconcile_deduction(&RecordId(id), &context.actor, &context.correlation_id)
        .await
        .map(Json)
        .map_err(|error| ApiError::new(error, &context.correlation_id))
}

// ---------------------------------------------------------------------------
// Tanks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterTankBody {
    pub fuel_type: String,
    pub capacity: Decimal,
    pub initial_level: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct DeductBody {
    pub amount: Decimal,
    #[serde(default)]
    pub operation_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefillBody {
    pub amount: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

async fn list_tanks(
    State(state): State<ApiState>,
    CorrelationId(correlation_id): CorrelationId,
) -> Result<Json<Vec<TankInventory>>, ApiError> {
    state.service.list_tanks().await.map(Json).map_err(|error| ApiError::new(error, &correlation_id))
}

async fn register_tank(
    State(state): State<ApiState>,
    context: RequestContext,
    Json(body): Json<RegisterTankBody>,
) -> Result<(StatusCode, Json<TankInventory>), ApiError> {
    let tank = state
        .service
        .register_tank(
            FuelType::new(&body.fuel_type),
            body.capacity,
            body.initial_level,
            &context.actor,
        )
        .await
        .map_err(|error| ApiError::new(error, &context.correlation_id))?;
    Ok((StatusCode::CREATED, Json(tank)))
}

async fn get_tank(
    State(state): State<ApiState>,
    CorrelationId(correlation_id): CorrelationId,
    Path(fuel_type): Path<String>,
) -> Result<Json<TankInventory>, ApiError> {
    state
        .service
        .get_tank(&FuelType::new(fuel_type))
        .await
        .map(Json)
        .map_err(|error| ApiError::new(error, &correlation_id))
}

async fn deduct(
    State(state): State<ApiState>,
    context: RequestContext,
    Path(fuel_type): Path<String>,
    Json(body): Json<DeductBody>,
) -> Result<Json<DeductionOutcome>, ApiError> {
    state
        .service
        .deduct(
            &FuelType::new(fuel_type),
            body.amount,
            body.operation_key.map(OperationKey),
            &context.actor,
            &context.correlation_id,
        )
        .await
        .map(Json)
        .map_err(|error| ApiError::new(error, &context.correlation_id))
}

async fn refill(
    State(state): State<ApiState>,
    context: RequestContext,
    Path(fuel_type): Path<String>,
    Json(body): Json<RefillBody>,
) -> Result<Json<TankInventory>, ApiError> {
    state
        .service
        .refill(
            &FuelType::new(fuel_type),
            body.amount,
            body.notes,
            &context.actor,
            &context.correlation_id,
        )
        .await
        .map(Json)
        .map_err(|error| ApiError::new(error, &context.correlation_id))
}

// ---------------------------------------------------------------------------
// Backlog and notifications
// ---------------------------------------------------------------------------

async fn backlog(
    State(state): State<ApiState>,
    CorrelationId(correlation_id): CorrelationId,
) -> Result<Json<Vec<ReminderRequest>>, ApiError> {
    state
        .service
        .summarize_backlog()
        .await
        .map(Json)
        .map_err(|error| ApiError::new(error, &correlation_id))
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub role: String,
}

/// Replays the retained notifications for the role, then streams live ones.
async fn notifications(
    State(state): State<ApiState>,
    CorrelationId(correlation_id): CorrelationId,
    Query(query): Query<NotificationQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let role = Role::parse(&query.role).ok_or_else(|| {
        ApiError::bad_request(format!("unknown role `{}`", query.role), &correlation_id)
    })?;

    let (role, receiver) = state.service.subscribe(role).into_parts();
    let retained = tokio_stream::iter(state.service.recent_notifications(role));
    info!(
        event_name = "notifications.session.opened",
        correlation_id = %correlation_id,
        role = %role,
        "notification stream opened"
    );

    let live = BroadcastStream::new(receiver).filter_map(move |item| match item {
        Ok(notification) => notification.is_for(role).then_some(notification),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(
                event_name = "notifications.subscriber.lagged",
                role = %role,
                skipped,
                "notification stream fell behind; skipped notifications"
            );
            None
        }
    });

    let stream = retained.chain(live).map(|notification| {
        Event::default().event("notification").id(notification.id.clone()).json_data(&notification)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
