//! # Tablewatch Engine
//!
//! The discovery engine's runtime core: the Poll Worker state machine
//! (component C), the Dispatch Scheduler (component D), and the Retention &
//! Sliding Window job (component E). Everything here is orchestration over
//! `tablewatch-core` domain logic, `tablewatch-providers` adapters, and
//! `tablewatch-store` persistence.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod poll_worker;
pub mod retention;
pub mod scheduler;

pub use poll_worker::{PollOutcome, PollWorker};
pub use retention::{run as run_retention, run_daily as run_retention_daily, RetentionReport};
pub use scheduler::{Heartbeat, Scheduler};
