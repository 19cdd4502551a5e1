//! Outgoing account notifications.

pub mod email;

pub use email::SystemEmailService;
