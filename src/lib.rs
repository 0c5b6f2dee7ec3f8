//! # Email Reminder Hook
//!
//! A lifecycle hook for interactive assistant tools that emails you when a
//! prompt has been waiting for input for too long:
//! - `start` records the notification and schedules a delayed check
//! - `clear` cancels the pending reminder
//! - `check <token>` waits out the delay and sends one email over SMTP
//!
//! State is a single JSON record; only the check whose token matches the
//! stored record can send, and a record that is cleared or sent never sends
//! again.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use integrations_email_reminder::{
//!     HookPaths, JsonFileStore, NotificationPayload, ProcessSpawner, ReminderController,
//! };
//!
//! let paths = HookPaths::resolve(None, None);
//! let controller = ReminderController::new(
//!     Arc::new(JsonFileStore::new(&paths.state)),
//!     &paths.config,
//!     Arc::new(ProcessSpawner::new(&paths, false)),
//! );
//!
//! let payload = NotificationPayload::parse(r#"{"title":"Permission needed"}"#);
//! let record = controller.start(&payload)?;
//! println!("scheduled reminder {}", record.token);
//! # Ok::<(), integrations_email_reminder::ReminderError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// MIME encoding
pub mod mime;

// Observability
pub mod observability;

// Reminder lifecycle
pub mod delivery;
pub mod reminder;
pub mod store;

// Command line
pub mod cli;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use config::{HookPaths, ReminderConfig, SmtpOptions, TlsMode};
pub use delivery::{build_email, send_email};
pub use errors::{ReminderError, ReminderErrorKind, ReminderResult};
pub use reminder::{CheckSpawner, ProcessSpawner, ReminderController};
pub use store::{JsonFileStore, StateStore};
pub use transport::{MailTransport, SmtpTransport};
pub use types::{
    Address, CheckOutcome, Email, NotificationPayload, ReminderRecord, ReminderStatus,
    SendReceipt, SkipReason,
};
