//! Database models split into domain-specific modules.

pub mod audit;
pub mod common;
pub mod profile;
pub mod quote;
pub mod user;
pub mod work_request;

pub use audit::*;
pub use common::*;
pub use profile::*;
pub use quote::*;
pub use user::*;
pub use work_request::*;
