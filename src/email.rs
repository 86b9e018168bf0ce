// Outbound SMTP transport for invoice emails.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, SinglePart},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{error, info};

use crate::config::SmtpConfig;
use crate::error::{BillingError, BillingResult};
use crate::notifier::{EmailSender, OutboundEmail};

#[derive(Debug, Clone)]
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl SmtpSender {
    pub fn new(smtp_config: &SmtpConfig) -> BillingResult<Self> {
        if !smtp_config.is_configured() {
            return Err(BillingError::Config(
                "SMTP host, username and password must be set".to_string(),
            ));
        }

        let creds = Credentials::new(
            smtp_config.username.clone(),
            smtp_config.password.clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        Ok(SmtpSender {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        })
    }

    fn mailbox(address: &str, name: Option<&str>) -> BillingResult<Mailbox> {
        let raw = match name {
            Some(name) => format!("{} <{}>", name, address),
            None => address.to_string(),
        };
        raw.parse::<Mailbox>()
            .map_err(|e| BillingError::Email(format!("invalid address '{}': {}", address, e)))
    }
}

#[async_trait]
impl EmailSender for SmtpSender {
    async fn send(&self, email: &OutboundEmail) -> BillingResult<()> {
        let from = Self::mailbox(&self.from_email, Some(&self.from_name))?;
        let to = Self::mailbox(&email.to, email.to_name.as_deref())?;

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject);

        for cc in &email.cc {
            builder = builder.cc(Self::mailbox(cc, None)?);
        }
        for bcc in &email.bcc {
            builder = builder.bcc(Self::mailbox(bcc, None)?);
        }

        let message = builder
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(email.html_body.clone()),
            )
            .map_err(|e| BillingError::Email(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to {}", email.to);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", email.to, e);
                Err(BillingError::Email(e.to_string()))
            }
        }
    }
}
