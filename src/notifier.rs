// Dispatch notifier: resolves the recipient, assembles subject/body and the
// share URL, and hands the message to the outbound email transport.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::directory::Directory;
use crate::error::{BillingError, BillingResult};
use crate::models::{InvoiceInstance, RecurringTemplate};

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> BillingResult<()>;
}

#[derive(Clone)]
pub struct DispatchNotifier {
    directory: Arc<dyn Directory>,
    sender: Arc<dyn EmailSender>,
    base_url: String,
}

impl DispatchNotifier {
    pub fn new(directory: Arc<dyn Directory>, sender: Arc<dyn EmailSender>, base_url: String) -> Self {
        Self {
            directory,
            sender,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Send the invoice email for an auto-send template. A missing client or
    /// recipient address fails this dispatch only; the caller records it and
    /// moves on.
    pub async fn dispatch(
        &self,
        invoice: &InvoiceInstance,
        template: &RecurringTemplate,
        token: Option<&str>,
    ) -> BillingResult<()> {
        let client_id = template.client_id.ok_or(BillingError::MissingRecipient {
            template_id: template.id,
        })?;

        let client = self
            .directory
            .client(client_id)
            .await?
            .ok_or(BillingError::MissingRecipient {
                template_id: template.id,
            })?;

        let to = client
            .email
            .clone()
            .filter(|e| !e.is_empty())
            .ok_or(BillingError::MissingRecipient {
                template_id: template.id,
            })?;

        let company_name = self
            .directory
            .account(template.account_id)
            .await?
            .and_then(|a| a.company_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Your Company".to_string());

        let invoice_url = self.share_url(invoice, &company_name, token);

        let subject = template.email_subject.clone().unwrap_or_else(|| {
            format!("Invoice {} from {}", invoice.invoice_number, company_name)
        });

        let html_body = invoice_email_html(
            &client.display_name(),
            &company_name,
            invoice,
            &invoice_url,
            template.email_body.as_deref(),
        );

        let email = OutboundEmail {
            to,
            to_name: Some(client.display_name()),
            subject,
            html_body,
            cc: template.cc_emails.clone().unwrap_or_default(),
            bcc: template.bcc_emails.clone().unwrap_or_default(),
        };

        self.sender.send(&email).await?;

        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            "Invoice email dispatched"
        );

        Ok(())
    }

    /// Tokenized share URL when a token exists, otherwise a direct
    /// authenticated reference to the invoice.
    fn share_url(
        &self,
        invoice: &InvoiceInstance,
        company_name: &str,
        token: Option<&str>,
    ) -> String {
        match token {
            Some(token) => format!(
                "{}/{}/invoice/{}",
                self.base_url,
                company_slug(company_name),
                token
            ),
            None => format!("{}/invoice/{}", self.base_url, invoice.id),
        }
    }
}

/// URL slug for a company name: lowercase, runs of non-alphanumerics
/// collapsed to a single hyphen, no leading or trailing hyphen.
pub fn company_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_hyphen = true; // suppress a leading hyphen

    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    slug.trim_end_matches('-').to_string()
}

fn invoice_email_html(
    recipient_name: &str,
    company_name: &str,
    invoice: &InvoiceInstance,
    invoice_url: &str,
    custom_body: Option<&str>,
) -> String {
    let intro = match custom_body {
        Some(body) if !body.is_empty() => body.to_string(),
        _ => format!(
            "Please find your invoice from {} below. You can view and pay it online using the link.",
            company_name
        ),
    };

    format!(
        r#"
        <html>
        <head>
            <style>
                body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 20px; background: #f5f5f5; }}
                .container {{ max-width: 600px; margin: 0 auto; background: white; border-radius: 12px; overflow: hidden; box-shadow: 0 4px 12px rgba(0,0,0,0.1); }}
                .header {{ background: linear-gradient(135deg, #1f2937 0%, #374151 100%); color: white; padding: 24px; text-align: center; }}
                .content {{ padding: 24px; }}
                .amount {{ font-size: 32px; font-weight: 700; color: #1f2937; text-align: center; margin: 20px 0; }}
                .detail-row {{ display: flex; justify-content: space-between; padding: 10px 0; border-bottom: 1px solid #e5e7eb; }}
                .detail-row:last-child {{ border-bottom: none; }}
                .btn {{ display: inline-block; background: #2563eb; color: white; padding: 12px 24px; text-decoration: none; border-radius: 6px; margin: 10px 0; }}
                .footer {{ background: #f9fafb; padding: 16px 24px; text-align: center; color: #6b7280; font-size: 14px; }}
            </style>
        </head>
        <body>
            <div class="container">
                <div class="header">
                    <h1 style="margin: 0;">Invoice</h1>
                    <p style="margin: 8px 0 0; opacity: 0.9;">{number}</p>
                </div>
                <div class="content">
                    <p>Dear {recipient},</p>
                    <p>{intro}</p>
                    <div style="background: #f9fafb; border-radius: 8px; padding: 20px; margin: 20px 0;">
                        <div class="amount">{currency} {amount}</div>
                        <div class="detail-row">
                            <span>Invoice Number</span>
                            <strong>{number}</strong>
                        </div>
                        <div class="detail-row">
                            <span>Due Date</span>
                            <strong>{due}</strong>
                        </div>
                    </div>
                    <p style="text-align: center;">
                        <a href="{url}" class="btn">View Invoice</a>
                    </p>
                    <p>If you have any questions about this invoice, please don't hesitate to contact us.</p>
                    <p>Thank you for your business!</p>
                </div>
                <div class="footer">
                    <p>{company}</p>
                </div>
            </div>
        </body>
        </html>
        "#,
        number = invoice.invoice_number,
        recipient = recipient_name,
        intro = intro,
        currency = invoice.currency,
        amount = invoice.total_amount,
        due = invoice.due_date.format("%B %d, %Y"),
        url = invoice_url,
        company = company_name,
    )
}
