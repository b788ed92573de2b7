//! REST API endpoint modules.

pub mod auth;
pub mod import;
pub mod status;
pub mod sync;
