//! Database module for DomiSafe.
//!
//! Local SQLite buffer plus the remote store it is drained into.

mod models;
mod remote;
mod store;

pub use models::*;
pub use remote::*;
pub use store::*;
