//! Batch certificate generation and delivery.
//!
//! The pipeline turns a spreadsheet of recipients into personalized
//! certificate images and emails each one out:
//!
//! ```text
//! roster -> WorkQueue -> worker pool -> Renderer -> Mailer
//!                              |
//!                              +--> RecordUpdate channel -> progress UI
//! ```
//!
//! Everything user-facing flows through the update channel so exactly one
//! consumer owns the terminal; workers only compute, send and report.

pub mod config;
pub mod error;
pub mod mailer;
pub mod orchestrator;
pub mod processor;
pub mod queue;
pub mod render;
pub mod roster;

pub use config::Config;
pub use error::{CertmailError, Result};
pub use orchestrator::{RunState, RunSummary, SendJob};
pub use roster::Recipient;
