//! # Tablewatch Core
//!
//! Core domain types for the Tablewatch reservation discovery engine.
//!
//! This crate provides the fundamental abstractions shared by every other
//! crate in the workspace: the bucket/slot domain model, the clock
//! abstraction used for deterministic testing, the environment-driven
//! configuration surface, and the error taxonomy each crate boundary
//! narrows down to.
//!
//! ## Core Concepts
//!
//! - **Bucket**: the unit of scheduling, identified by `(date, anchor time)`
//! - **Slot**: a normalized `(venue, time)` observation from a provider
//! - **Clock**: injected time source, abstracted for deterministic tests
//! - **Config**: environment-driven, validated at startup
//!
//! ## Example
//!
//! ```
//! use tablewatch_core::domain::{BucketId, slot_id};
//!
//! let bucket = BucketId::new("2026-02-14".to_string(), "20:30".to_string());
//! assert_eq!(bucket.as_str(), "2026-02-14_20:30");
//!
//! let id = slot_id("resy", "venue-123", "2026-02-14T20:30:00Z");
//! assert_eq!(id.len(), 32);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;

pub use clock::{Clock, SystemClock};
pub use config::{Config, ConfigError};
pub use domain::{BucketId, NormalizedSlot, SlotId};
pub use error::{DiscoveryError, DiscoveryResult};
