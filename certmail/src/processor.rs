//! Per-record processing.
//!
//! `RecordProcessor` is the seam between the orchestrator and the real
//! work: the production pipeline renders the certificate and emails it,
//! while tests substitute a mock to drive the pool deterministically.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CertmailError, Result};
use crate::mailer::Mailer;
use crate::render::Renderer;
use crate::roster::Recipient;

/// Handles one roster record end to end.
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    /// Process one record, returning the path of the rendered certificate.
    async fn process(&self, recipient: &Recipient) -> Result<PathBuf>;
}

/// The production pipeline: render the certificate, then email it.
pub struct CertificatePipeline {
    renderer: Arc<Renderer>,
    mailer: Mailer,
}

impl CertificatePipeline {
    pub fn new(renderer: Renderer, mailer: Mailer) -> Self {
        Self {
            renderer: Arc::new(renderer),
            mailer,
        }
    }
}

#[async_trait]
impl RecordProcessor for CertificatePipeline {
    async fn process(&self, recipient: &Recipient) -> Result<PathBuf> {
        // Rendering is CPU-bound image work; keep it off the async threads.
        let renderer = Arc::clone(&self.renderer);
        let record = recipient.clone();
        let path = tokio::task::spawn_blocking(move || renderer.render(&record))
            .await
            .map_err(|e| CertmailError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        self.mailer.send(recipient, &path).await?;
        Ok(path)
    }
}
