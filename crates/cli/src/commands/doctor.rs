use forecourt_core::config::{AppConfig, LoadOptions};
use forecourt_core::store::TankStore;
use forecourt_db::{connect_with_config, migrations, DbPool, SqlLedgerStore};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["database_connectivity", "schema_migrations", "tank_registry"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    finish_report(checks)
}

fn finish_report(checks: Vec<DoctorCheck>) -> DoctorReport {
    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                DoctorCheck::skipped("schema_migrations", "the async runtime did not start"),
                DoctorCheck::skipped("tank_registry", "the async runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
                    DoctorCheck::skipped("tank_registry", "the database is unreachable"),
                ];
            }
        };

        let mut checks = vec![DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        }];

        let schema = check_schema(&pool).await;
        let schema_ready = schema.status == CheckStatus::Pass;
        checks.push(schema);
        if schema_ready {
            checks.push(check_tanks(&pool).await);
        } else {
            checks.push(DoctorCheck::skipped("tank_registry", "the schema is not current"));
        }

        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    let expected = migrations::MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .count() as i64;

    let applied = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1",
    )
    .fetch_one(pool)
    .await;

    match applied {
        Ok(applied) if applied >= expected => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Pass,
            details: format!("{applied} of {expected} migrations applied"),
        },
        Ok(applied) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: format!("{applied} of {expected} migrations applied; run `forecourt migrate`"),
        },
        Err(error) => DoctorCheck {
            name: "schema_migrations",
            status: CheckStatus::Fail,
            details: format!("migration history unavailable ({error}); run `forecourt migrate`"),
        },
    }
}

async fn check_tanks(pool: &DbPool) -> DoctorCheck {
    let store = SqlLedgerStore::new(pool.clone());
    match store.list_tanks().await {
        Ok(tanks) if tanks.is_empty() => DoctorCheck {
            name: "tank_registry",
            status: CheckStatus::Fail,
            details: "no tanks registered; run `forecourt seed`".to_string(),
        },
        Ok(tanks) => {
            let out_of_bounds = tanks
                .iter()
                .filter(|tank| !tank.is_within_bounds())
                .map(|tank| tank.fuel_type.as_str().to_string())
                .collect::<Vec<_>>();
            if out_of_bounds.is_empty() {
                DoctorCheck {
                    name: "tank_registry",
                    status: CheckStatus::Pass,
                    details: format!("{} tanks registered within bounds", tanks.len()),
                }
            } else {
                DoctorCheck {
                    name: "tank_registry",
                    status: CheckStatus::Fail,
                    details: format!("tanks outside bounds: {}", out_of_bounds.join(", ")),
                }
            }
        }
        Err(error) => DoctorCheck {
            name: "tank_registry",
            status: CheckStatus::Fail,
            details: format!("failed to list tanks: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{finish_report, render_human, CheckStatus, DoctorCheck};

    #[test]
    fn skipped_checks_fail_the_overall_report() {
        let report = finish_report(vec![
            DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "ok".to_string(),
            },
            DoctorCheck::skipped("tank_registry", "the schema is not current"),
        ]);

        assert_eq!(report.overall_status, CheckStatus::Fail);
        assert_eq!(report.summary, "doctor: one or more readiness checks failed");
    }

    #[test]
    fn human_output_marks_each_check() {
        let report = finish_report(vec![
            DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: "connected".to_string(),
            },
            DoctorCheck::skipped("tank_registry", "the database is unreachable"),
        ]);

        let rendered = render_human(&report);

        assert!(rendered.contains("- [ok] database_connectivity: connected"));
        assert!(rendered
            .contains("- [skip] tank_registry: skipped because the database is unreachable"));
    }
}
