//! Error types shared across the pipeline.
//!
//! Setup errors (roster, template, font, SMTP connection) abort a run before
//! any worker starts. Per-record errors are reported through the update
//! channel and never stop the remaining records.

use thiserror::Error;

/// All failure modes of the certificate pipeline.
#[derive(Error, Debug)]
pub enum CertmailError {
    /// The spreadsheet could not be opened or read.
    #[error("Spreadsheet read failed: {0}")]
    FileRead(String),

    /// The spreadsheet opened but its contents are unusable.
    #[error("Spreadsheet format error: {0}")]
    DataFormat(String),

    /// The certificate template image could not be opened or decoded.
    #[error("Template load failed: {0}")]
    TemplateLoad(String),

    /// The font file could not be resolved or parsed.
    #[error("Font not found: {0}")]
    FontNotFound(String),

    /// A text position was not given as `X,Y` whole pixels.
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    /// The SMTP relay rejected the configured credentials.
    #[error("SMTP authentication failed: {0}")]
    Authentication(String),

    /// A message could not be built or handed to the relay.
    #[error("Email delivery failed: {0}")]
    Delivery(String),

    /// The config file could not be read, parsed or written.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CertmailError>;
