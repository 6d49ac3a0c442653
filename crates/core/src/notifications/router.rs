use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::actor::Role;
use crate::domain::notification::Notification;
use crate::notifications::rules::RoutingRules;
use crate::store::{ChangeEvent, EntityKind};

type DedupKey = (EntityKind, String, u32);

/// Bounded memory of recently routed mutations, oldest evicted first.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    order: VecDeque<DedupKey>,
    seen: HashSet<DedupKey>,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, order: VecDeque::with_capacity(capacity), seen: HashSet::new() }
    }

    /// Returns `false` when the key is already inside the window.
    pub fn observe(&mut self, key: DedupKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Fan-out point for routed notifications. Cheap to clone.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
    /// Bounded history per recipient role.
    recent: Arc<Mutex<HashMap<Role, VecDeque<Notification>>>>,
    retention: usize,
}

impl NotificationHub {
    pub fn new(channel_capacity: usize, retention: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self { sender, recent: Arc::new(Mutex::new(HashMap::new())), retention: retention.max(1) }
    }

    /// Returns the number of live sessions the notification reached.
    pub fn publish(&self, notification: Notification) -> usize {
        self.retain(notification.clone());
        self.sender.send(notification).unwrap_or(0)
    }

    pub fn subscribe(&self, role: Role) -> Subscription {
        Subscription { role, receiver: self.sender.subscribe() }
    }

    /// Most recent notifications for `role`, oldest first.
    pub fn recent_for(&self, role: Role) -> Vec<Notification> {
        let recent = match self.recent.lock() {
            Ok(recent) => recent,
            Err(poisoned) => poisoned.into_inner(),
        };
        recent.get(&role).map(|history| history.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn retain(&self, notification: Notification) {
        let mut recent = match self.recent.lock() {
            Ok(recent) => recent,
            Err(poisoned) => poisoned.into_inner(),
        };
        for role in &notification.recipient_roles {
            let history = recent.entry(*role).or_default();
            if history.len() == self.retention {
                history.pop_front();
            }
            history.push_back(notification.clone());
        }
    }
}

/// One live session's view of the hub, filtered to a single role.
pub struct Subscription {
    role: Role,
    receiver: broadcast::Receiver<Notification>,
}

impl Subscription {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Next notification addressed to this role. Items lost to lag are skipped.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) if notification.is_for(self.role) => return Some(notification),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        event_name = "notifications.subscriber.lagged",
                        role = %self.role,
                        skipped,
                        "subscriber fell behind; skipped notifications"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_parts(self) -> (Role, broadcast::Receiver<Notification>) {
        (self.role, self.receiver)
    }
}

pub struct NotificationRouter {
    rules: RoutingRules,
    hub: NotificationHub,
    dedup: DedupWindow,
}

impl NotificationRouter {
    pub fn new(rules: RoutingRules, hub: NotificationHub, dedup_window: usize) -> Self {
        Self { rules, hub, dedup: DedupWindow::new(dedup_window) }
    }

    /// Routes one change. Redelivered mutations and silent changes yield `None`.
    pub fn handle(&mut self, event: &ChangeEvent) -> Option<Notification> {
        if !self.dedup.observe(event.dedup_key()) {
            debug!(
                event_name = "notifications.change.duplicate",
                sequence = event.sequence,
                "dropping redelivered change"
            );
            return None;
        }

        let notification = self.rules.route(event)?;
        let delivered = self.hub.publish(notification.clone());
        debug!(
            event_name = "notifications.routed",
            sequence = event.sequence,
            notification_id = %notification.id,
            kind = ?notification.kind,
            delivered,
            "notification routed"
        );
        Some(notification)
    }

    pub async fn run(mut self, mut changes: broadcast::Receiver<ChangeEvent>) {
        info!(event_name = "notifications.router.started", "notification router started");
        loop {
            match changes.recv().await {
                Ok(event) => {
                    self.handle(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        event_name = "notifications.router.lagged",
                        skipped,
                        "change feed overran the router; skipped changes"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(event_name = "notifications.router.stopped", "change feed closed");
    }

    pub fn spawn(self, changes: broadcast::Receiver<ChangeEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(changes))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use rust_decimal::Decimal;
    use tokio::sync::broadcast;

    use super::{DedupWindow, NotificationHub, NotificationRouter};
    use crate::domain::actor::{ActorId, Role};
    use crate::domain::notification::{Notification, NotificationKind};
    use crate::domain::record::{RecordDetails, RecordId, RecordStatus, WorkflowRecord};
    use crate::notifications::rules::RoutingRules;
    use crate::store::{ChangeEvent, ChangePayload, ChangeType, EntityKind};

    fn submitted(id: &str) -> ChangeEvent {
        ChangeEvent {
            sequence: 1,
            event_type: ChangeType::Insert,
            payload: ChangePayload::Record {
                before: None,
                after: WorkflowRecord {
                    id: RecordId(id.to_owned()),
                    department: "shop".to_owned(),
                    amount: Decimal::new(10, 0),
                    details: RecordDetails::Sale { quantity: None, notes: None },
                    created_by: ActorId("u-att".to_owned()),
                    created_at: Utc::now(),
                    status: RecordStatus::Submitted,
                    approvals: BTreeMap::new(),
                    rejection: None,
                    version: 1,
                    updated_at: Utc::now(),
                },
            },
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn dedup_window_evicts_oldest() {
        let mut window = DedupWindow::new(2);
        assert!(window.observe((EntityKind::Record, "a".to_owned(), 1)));
        assert!(!window.observe((EntityKind::Record, "a".to_owned(), 1)));
        assert!(window.observe((EntityKind::Record, "b".to_owned(), 1)));
        assert!(window.observe((EntityKind::Record, "c".to_owned(), 1)));
        assert_eq!(window.len(), 2);
        assert!(window.observe((EntityKind::Record, "a".to_owned(), 1)));
    }

    #[tokio::test]
    async fn redelivered_change_is_routed_once() {
        let hub = NotificationHub::new(16, 10);
        let mut accountant = hub.subscribe(Role::Accountant);
        let mut router = NotificationRouter::new(RoutingRules::default(), hub.clone(), 64);

        let event = submitted("S-1");
        assert!(router.handle(&event).is_some());
        assert!(router.handle(&event).is_none());
        assert!(router.handle(&submitted("S-2")).is_some());

        let first = accountant.next().await.expect("first notification");
        let second = accountant.next().await.expect("second notification");
        assert_eq!(first.subject_id, "S-1");
        assert_eq!(second.subject_id, "S-2");
    }

    #[tokio::test]
    async fn subscriptions_only_see_their_role() {
        let hub = NotificationHub::new(16, 10);
        let mut manager = hub.subscribe(Role::Manager);
        let mut router = NotificationRouter::new(RoutingRules::default(), hub.clone(), 64);

        router.handle(&submitted("S-1"));
        drop(router);
        drop(hub);

        assert_eq!(manager.next().await, None);
    }

    #[tokio::test]
    async fn hub_retains_bounded_recent_history() {
        let hub = NotificationHub::new(16, 2);
        let mut router = NotificationRouter::new(RoutingRules::default(), hub.clone(), 64);
        for id in ["S-1", "S-2", "S-3"] {
            router.handle(&submitted(id));
        }

        let recent: Vec<String> = hub
            .recent_for(Role::Accountant)
            .into_iter()
            .map(|notification| notification.subject_id)
            .collect();
        assert_eq!(recent, vec!["S-2".to_owned(), "S-3".to_owned()]);
        assert!(hub.recent_for(Role::Director).is_empty());
    }

    #[test]
    fn busy_roles_do_not_evict_other_roles_history() {
        let notification = |id: &str, roles: Vec<Role>| Notification {
            id: id.to_owned(),
            kind: NotificationKind::AwaitingApproval,
            subject_id: id.to_owned(),
            message: format!("{id} needs review"),
            recipient_roles: roles,
            timestamp: Utc::now(),
        };
        let hub = NotificationHub::new(16, 2);

        hub.publish(notification("EXP-1", vec![Role::Director, Role::Accountant]));
        for id in ["S-1", "S-2", "S-3", "S-4"] {
            hub.publish(notification(id, vec![Role::Accountant]));
        }

        let director: Vec<String> = hub
            .recent_for(Role::Director)
            .into_iter()
            .map(|notification| notification.subject_id)
            .collect();
        let accountant: Vec<String> = hub
            .recent_for(Role::Accountant)
            .into_iter()
            .map(|notification| notification.subject_id)
            .collect();
        assert_eq!(director, vec!["EXP-1".to_owned()]);
        assert_eq!(accountant, vec!["S-3".to_owned(), "S-4".to_owned()]);
    }

    #[tokio::test]
    async fn router_task_consumes_change_feed_until_closed() {
        let (changes, receiver) = broadcast::channel(8);
        let hub = NotificationHub::new(16, 10);
        let mut accountant = hub.subscribe(Role::Accountant);
        let handle =
            NotificationRouter::new(RoutingRules::default(), hub.clone(), 64).spawn(receiver);

        changes.send(submitted("S-9")).expect("router is subscribed");
        let notification = accountant.next().await.expect("routed");
        assert_eq!(notification.subject_id, "S-9");

        drop(changes);
        handle.await.expect("router exits cleanly");
    }
}
