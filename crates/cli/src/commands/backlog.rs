use forecourt_core::backlog::summarize_backlog;
use forecourt_core::domain::notification::ReminderRequest;
use forecourt_db::SqlLedgerStore;

use crate::commands::{open_migrated, prepare, CommandResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("backlog") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let store = SqlLedgerStore::new(pool.clone());
        let summary = summarize_backlog(&store)
            .await
            .map_err(|error| ("backlog_query", error.to_string(), 7u8));
        pool.close().await;
        summary
    });

    match result {
        Ok(requests) => {
            let data = match serde_json::to_value(&requests) {
                Ok(data) => data,
                Err(error) => {
                    return CommandResult::failure("backlog", "serialization", error.to_string(), 1)
                }
            };
            CommandResult::success_with_data("backlog", summary_message(&requests), Some(data))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("backlog", error_class, message, exit_code)
        }
    }
}

fn summary_message(requests: &[ReminderRequest]) -> String {
    if requests.is_empty() {
        return "no records awaiting approval".to_string();
    }
    let total: u64 = requests.iter().map(|request| request.pending_count).sum();
    format!("{total} records awaiting approval across {} queues", requests.len())
}
