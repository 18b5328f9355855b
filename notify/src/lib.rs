//! # Tablewatch Notify
//!
//! Notification Fan-out (component F): notify-set computation, the email
//! and push transport abstractions, and the periodic job that drains
//! unsent drop events.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fanout;
pub mod notify_set;
pub mod transport;

pub use error::NotifyError;
pub use fanout::{FanoutJob, FanoutReport};
pub use notify_set::{compute_notify_set, matches_notify_set, DEFAULT_RECIPIENT_ID};
pub use transport::{ApnsAuthTokenProvider, ApnsPushTransport, DigestEntry, EmailTransport, PushTransport, SmtpEmailTransport};
