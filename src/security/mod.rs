//! Security monitoring: detection counts, cooldowns, and alert responses.

mod aggregator;
mod cooldown;
mod response;

pub use aggregator::*;
pub use cooldown::*;
pub use response::*;
