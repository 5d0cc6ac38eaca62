//! SMTP delivery.
//!
//! One STARTTLS transport is built per run and shared by every worker;
//! `lettre` pools the underlying connections. The subject and body are
//! templates where `{name}` is substituted per recipient, and each message
//! carries the rendered certificate as an attachment.
//!
//! Authentication rejections (SMTP 530/534/535/538) are reported separately
//! from ordinary delivery failures so the operator can tell a bad password
//! from a bounced recipient.

use std::path::Path;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp;
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::Config;
use crate::error::{CertmailError, Result};
use crate::roster::Recipient;

/// Token substituted with the recipient's name in subject and body.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Subject and body shared by every message of a run.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

impl MessageTemplate {
    /// Substitute every `{name}` occurrence in subject and body.
    pub fn personalize(&self, name: &str) -> (String, String) {
        (
            self.subject.replace(NAME_PLACEHOLDER, name),
            self.body.replace(NAME_PLACEHOLDER, name),
        )
    }
}

/// Sends personalized certificate messages over one shared SMTP transport.
#[derive(Debug)]
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    template: MessageTemplate,
}

impl Mailer {
    /// Build the transport. No network traffic happens until [`verify`] or
    /// [`send`] is called.
    ///
    /// [`verify`]: Mailer::verify
    /// [`send`]: Mailer::send
    pub fn new(config: &Config, template: MessageTemplate) -> Result<Self> {
        let sender: Mailbox = config.credentials.email.parse().map_err(|e| {
            CertmailError::Config(format!(
                "sender address {}: {e}",
                config.credentials.email
            ))
        })?;
        let credentials = SmtpCredentials::new(
            config.credentials.email.clone(),
            config.credentials.password.clone(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp.relay)
            .map_err(|e| CertmailError::Config(format!("SMTP relay {}: {e}", config.smtp.relay)))?
            .credentials(credentials)
            .port(config.smtp.port)
            // Sends carry no deadline; a hung relay stalls only its worker.
            .timeout(None)
            .build();

        Ok(Self {
            transport,
            sender,
            template,
        })
    }

    /// Build the transport and check it end to end: connect, STARTTLS,
    /// authenticate. A bad relay or password fails the whole run here
    /// instead of once per recipient.
    pub async fn connect(config: &Config, template: MessageTemplate) -> Result<Self> {
        let mailer = Self::new(config, template)?;
        mailer.verify().await?;
        Ok(mailer)
    }

    /// Open a connection and authenticate with a NOOP round trip.
    pub async fn verify(&self) -> Result<()> {
        let reachable = self
            .transport
            .test_connection()
            .await
            .map_err(classify_smtp_error)?;
        if !reachable {
            return Err(CertmailError::Delivery(
                "SMTP connection test failed".to_string(),
            ));
        }
        info!("smtp_connection_verified");
        Ok(())
    }

    /// Email one rendered certificate to its recipient.
    pub async fn send(&self, recipient: &Recipient, attachment: &Path) -> Result<()> {
        let content = tokio::fs::read(attachment).await.map_err(|e| {
            CertmailError::Delivery(format!(
                "could not read attachment {}: {e}",
                attachment.display()
            ))
        })?;
        let file_name = attachment
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("certificado")
            .to_string();
        let mime = mime_guess::from_path(attachment).first_or_octet_stream();
        let content_type = ContentType::parse(mime.as_ref()).map_err(|e| {
            CertmailError::Delivery(format!("unsupported attachment type {mime}: {e}"))
        })?;

        let message = self.build_message(recipient, &file_name, content, content_type)?;
        self.transport.send(message).await.map_err(classify_smtp_error)?;
        Ok(())
    }

    fn build_message(
        &self,
        recipient: &Recipient,
        attachment_name: &str,
        content: Vec<u8>,
        content_type: ContentType,
    ) -> Result<Message> {
        let to: Mailbox = recipient.email.parse().map_err(|e| {
            CertmailError::Delivery(format!(
                "invalid recipient address {}: {e}",
                recipient.email
            ))
        })?;
        let (subject, body) = self.template.personalize(&recipient.name);

        Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(body),
                    )
                    .singlepart(
                        Attachment::new(attachment_name.to_string()).body(content, content_type),
                    ),
            )
            .map_err(|e| CertmailError::Delivery(format!("could not assemble message: {e}")))
    }
}

fn classify_smtp_error(error: smtp::Error) -> CertmailError {
    if let Some(code) = error.status() {
        if matches!(code.to_string().as_str(), "530" | "534" | "535" | "538") {
            return CertmailError::Authentication(error.to_string());
        }
    }
    CertmailError::Delivery(error.to_string())
}

// ============================================================================
// Tests
// ============================================================================
