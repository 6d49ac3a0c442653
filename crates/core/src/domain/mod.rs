pub mod actor;
pub mod notification;
pub mod record;
pub mod tank;
