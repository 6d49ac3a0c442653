//! Change-notification routing.
//!
//! The router consumes the ledger store's change feed, maps each committed change
//! to the roles that care about it and fans the result out to live sessions.
//! Delivery is best-effort: sessions that are not subscribed, or fall behind,
//! miss items.

pub mod router;
pub mod rules;

pub use router::{DedupWindow, NotificationHub, NotificationRouter, Subscription};
pub use rules::RoutingRules;
