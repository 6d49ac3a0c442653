use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use forecourt_db::DbPool;
use serde::Serialize;

use crate::api::SharedService;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    service: SharedService,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub tanks: HealthCheck,
    pub notification_sessions: usize,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, service: SharedService) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, service })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let tanks = tank_check(&state.service).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        tanks,
        notification_sessions: state.service.notification_sessions(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

/// Informational only; an empty ledger is still a healthy one.
async fn tank_check(service: &SharedService) -> HealthCheck {
    match service.list_tanks().await {
        Ok(tanks) => {
            let out_of_bounds = tanks.iter().filter(|tank| !tank.is_within_bounds()).count();
            if out_of_bounds == 0 {
                HealthCheck { status: "ready", detail: format!("{} tanks registered", tanks.len()) }
            } else {
                HealthCheck {
                    status: "degraded",
                    detail: format!("{out_of_bounds} tanks outside 0..=capacity"),
                }
            }
        }
        Err(error) => HealthCheck { status: "degraded", detail: error.to_string() },
    }
}
