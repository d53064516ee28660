//! Delivery of the archive by mail.
//!
//! The archive is attached to a plain-text message and sent through the
//! sender's SMTP relay. Subject and body are never empty: the receiving
//! mail system files empty messages as spam.

use crate::error::{DigestError, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

pub const DEFAULT_SUBJECT: &str = "yo";
pub const DEFAULT_BODY: &str = "yo";

/// Everything needed to deliver one archive.
#[derive(Clone)]
pub struct MailConfig {
    pub from: String,
    pub password: String,
    pub to: String,
    /// Relay host; derived from the sender's domain when not set.
    pub smtp_host: Option<String>,
    pub subject: String,
    pub body: String,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("smtp_host", &self.smtp_host)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// `smtp.<domain>` for a sender address.
pub fn smtp_host_for(from: &str) -> Result<String> {
    match from.rsplit_once('@') {
        Some((_, domain)) if !domain.trim().is_empty() => Ok(format!("smtp.{}", domain.trim())),
        _ => Err(DigestError::Mail(format!(
            "cannot derive SMTP host from sender `{from}`"
        ))),
    }
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| DigestError::Mail(format!("invalid address `{address}`: {e}")))
}

/// Build the message carrying `attachment` as `application/zip`.
pub fn compose(config: &MailConfig, file_name: &str, attachment: Vec<u8>) -> Result<Message> {
    let zip_type = ContentType::parse("application/zip")
        .map_err(|e| DigestError::Mail(e.to_string()))?;

    Message::builder()
        .from(mailbox(&config.from)?)
        .to(mailbox(&config.to)?)
        .subject(non_empty(&config.subject, DEFAULT_SUBJECT))
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(
                    non_empty(&config.body, DEFAULT_BODY).to_string(),
                ))
                .singlepart(Attachment::new(file_name.to_string()).body(attachment, zip_type)),
        )
        .map_err(|e| DigestError::Mail(format!("build email: {e}")))
}

/// Send `archive` to the configured recipient.
#[instrument(level = "info", skip(config), fields(to = %config.to))]
pub async fn send_mail(config: &MailConfig, archive: &Path) -> Result<()> {
    let bytes = fs::read(archive)
        .await
        .map_err(|e| DigestError::io(archive, e))?;
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "digest.zip".to_string());
    let message = compose(config, &file_name, bytes)?;

    let host = match &config.smtp_host {
        Some(host) => host.clone(),
        None => smtp_host_for(&config.from)?,
    };
    let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
        .map_err(|e| DigestError::Mail(format!("invalid SMTP host `{host}`: {e}")))?
        .credentials(Credentials::new(config.from.clone(), config.password.clone()))
        .build();

    mailer
        .send(message)
        .await
        .map_err(|e| DigestError::Mail(format!("send email via {host}: {e}")))?;
    info!(%host, "Mail sent");
    Ok(())
}
