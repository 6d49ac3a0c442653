use forecourt_db::{SeedDataset, SqlLedgerStore, TankSeedInfo};

use crate::commands::{open_migrated, prepare, CommandFailure, CommandResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let store = SqlLedgerStore::new(pool.clone());

        let run_result: Result<Vec<TankSeedInfo>, CommandFailure> = async {
            let seeded = SeedDataset::load(&store)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

            let verification = SeedDataset::verify(&store)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
            if !verification.all_present {
                let failed = verification
                    .checks
                    .iter()
                    .filter_map(|(fuel_type, ok)| (!ok).then_some(*fuel_type))
                    .collect::<Vec<_>>();
                return Err(("seed_verification", verification_message(&failed), 6u8));
            }

            Ok(seeded.tanks)
        }
        .await;

        pool.close().await;
        run_result
    });

    match result {
        Ok(tanks) => CommandResult::success("seed", render_tanks(&tanks)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(failed: &[&str]) -> String {
    if failed.is_empty() {
        "seed tanks failed verification".to_string()
    } else {
        format!("seed verification failed for tanks: {}", failed.join(", "))
    }
}

fn render_tanks(tanks: &[TankSeedInfo]) -> String {
    let inserted = tanks.iter().filter(|tank| tank.inserted).count();
    let lines = tanks
        .iter()
        .map(|tank| {
            let state = if tank.inserted { "registered" } else { "already present" };
            format!("  - {}: {} ({})", tank.fuel_type, state, tank.description)
        })
        .collect::<Vec<_>>();
    format!("seeded {inserted} of {} tanks:\n{}", tanks.len(), lines.join("\n"))
}
