//! Confirmation email collaborator.
//!
//! Fire-and-forget from the purchase flow's perspective: delivery failures
//! are logged and never undo or block an issued ticket.

use async_trait::async_trait;
use lettre::message::header::{ContentType, ContentTypeErr};
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::SmtpConfig;
use crate::models::{Event, Ticket};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("invalid attachment content type: {0}")]
    ContentType(#[from] ContentTypeErr),

    #[error("could not build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp failure: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// A document attached to the confirmation email, typically the rendered
/// ticket the holder presents at the door.
#[derive(Debug, Clone)]
pub struct MailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait TicketMailer: Send + Sync {
    async fn send_confirmation(
        &self,
        to: &str,
        ticket: &Ticket,
        event: &Event,
        attachment: Option<MailAttachment>,
    ) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self {
            transport,
            from: config.from.parse()?,
        })
    }
}

#[async_trait]
impl TicketMailer for SmtpMailer {
    async fn send_confirmation(
        &self,
        to: &str,
        ticket: &Ticket,
        event: &Event,
        attachment: Option<MailAttachment>,
    ) -> Result<(), MailError> {
        let body = format!(
            "Your purchase is confirmed.\n\n\
             Event: {}\nLocation: {}\nDate: {}\n\n\
             Ticket code: {}\nQuantity: {}\nTotal: {}\n\n\
             Present the ticket code or its QR at the entrance.",
            event.name,
            event.location,
            event.starts_at.to_rfc3339(),
            ticket.ticket_code,
            ticket.quantity,
            ticket.total_amount,
        );
        let builder = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject(format!("Your tickets for {}", event.name));
        let message = match attachment {
            Some(doc) => builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body))
                    .singlepart(
                        Attachment::new(doc.filename)
                            .body(doc.bytes, ContentType::parse(&doc.content_type)?),
                    ),
            )?,
            None => builder.body(body)?,
        };
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Used when no SMTP settings are configured and in tests.
pub struct NoopMailer;

#[async_trait]
impl TicketMailer for NoopMailer {
    async fn send_confirmation(
        &self,
        to: &str,
        ticket: &Ticket,
        _event: &Event,
        _attachment: Option<MailAttachment>,
    ) -> Result<(), MailError> {
        tracing::debug!(to, ticket_code = %ticket.ticket_code, "mailer disabled, skipping email");
        Ok(())
    }
}
