mod access_log;
mod auth;
mod core;

pub use access_log::{AccessEntry, AccessLog};
pub use auth::{BasicAuthGate, REALM};
pub use core::Middleware;
