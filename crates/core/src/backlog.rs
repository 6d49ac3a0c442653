use crate::domain::notification::ReminderRequest;
use crate::domain::record::WorkflowKind;
use crate::store::{RecordStore, StoreError};
use crate::workflow::WorkflowDefinition;

/// Counts records waiting on each role. Zero counts are omitted; formatting and
/// delivery belong to the caller.
pub async fn summarize_backlog<S>(store: &S) -> Result<Vec<ReminderRequest>, StoreError>
where
    S: RecordStore + ?Sized,
{
    let mut requests = Vec::new();
    for kind in WorkflowKind::ALL {
        let definition = WorkflowDefinition::for_kind(kind);
        for status in definition.stages() {
            let Some(recipient_role) = definition.required_role(*status) else {
                continue;
            };
            let pending_count = store.count_by_status(kind, *status).await?;
            if pending_count > 0 {
                requests.push(ReminderRequest { recipient_role, item_kind: kind, pending_count });
            }
        }
    }

    requests.sort_by(|left, right| {
        (left.recipient_role, left.item_kind).cmp(&(right.recipient_role, right.item_kind))
    });
    Ok(requests)
}
