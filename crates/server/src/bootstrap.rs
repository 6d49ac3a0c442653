use std::sync::Arc;

use forecourt_core::audit::{AuditSink, TracingAuditSink};
use forecourt_core::config::{AppConfig, ConfigError, LoadOptions};
use forecourt_core::{ForecourtService, LedgerStore, ServiceSettings};
use forecourt_db::{connect_with_config, migrations, DbPool, SqlLedgerStore};
use thiserror::Error;
use tracing::info;

use crate::api::SharedService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: SharedService,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store: Arc<dyn LedgerStore> = Arc::new(SqlLedgerStore::with_capacity(
        db_pool.clone(),
        config.notifications.channel_capacity,
    ));
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let service = Arc::new(ForecourtService::new(store, audit, ServiceSettings::from(&config)));

    Ok(Application { config, db_pool, service })
}
