// Persistence adapters for recurring templates and invoices.
//
// The scheduler only ever touches the fields named on these traits; billing
// content is written once at materialization and never updated here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{InvoiceInstance, NewInvoice, NewTemplate, RecurringTemplate};
use crate::schedule;

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// All active templates with `next_run_at <= as_of`, across every
    /// account. The scheduler runs globally, not per tenant request.
    async fn find_due_templates(&self, as_of: DateTime<Utc>)
        -> BillingResult<Vec<RecurringTemplate>>;

    /// Persist the post-run schedule fields in one write.
    async fn advance_template(
        &self,
        id: Uuid,
        next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
    ) -> BillingResult<()>;

    /// Terminal transition to `ended`. Idempotent: ending an already ended
    /// template is a no-op.
    async fn end_template(&self, id: Uuid) -> BillingResult<()>;

    async fn create_template(&self, input: NewTemplate) -> BillingResult<RecurringTemplate>;

    async fn get_template(&self, id: Uuid) -> BillingResult<Option<RecurringTemplate>>;

    async fn pause_template(&self, id: Uuid) -> BillingResult<()>;

    async fn resume_template(&self, id: Uuid) -> BillingResult<()>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<InvoiceInstance>;

    async fn set_share_token(&self, invoice_id: Uuid, token: &str) -> BillingResult<()>;

    /// Next sequential invoice number for the account, `INV-NNNNNN` format.
    async fn next_invoice_number(&self, account_id: Uuid) -> BillingResult<String>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgStore {
    async fn find_due_templates(
        &self,
        as_of: DateTime<Utc>,
    ) -> BillingResult<Vec<RecurringTemplate>> {
        let templates = sqlx::query_as::<_, RecurringTemplate>(
            r#"
            SELECT * FROM recurring_templates
            WHERE status = 'active' AND next_run_at <= $1
            ORDER BY next_run_at ASC
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await?;

        Ok(templates)
    }

    async fn advance_template(
        &self,
        id: Uuid,
        next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE recurring_templates
             SET next_run_at = $2, last_run_at = $3, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(next_run_at)
        .bind(last_run_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn end_template(&self, id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE recurring_templates
             SET status = 'ended', updated_at = NOW()
             WHERE id = $1 AND status <> 'ended'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_template(&self, input: NewTemplate) -> BillingResult<RecurringTemplate> {
        let next_run_at =
            schedule::initial_run_at(input.start_date, input.interval_type, input.interval_value)?;

        let template = sqlx::query_as::<_, RecurringTemplate>(
            r#"
            INSERT INTO recurring_templates
            (account_id, user_id, name, client_id, project_id, title, description, notes,
             po_number, line_items, subtotal, tax_rate, tax_amount, discount_type,
             discount_value, discount_amount, total_amount, currency, payment_terms,
             allow_online_payment, email_subject, email_body, cc_emails, bcc_emails,
             interval_type, interval_value, start_date, next_run_at, end_date,
             auto_send, days_until_due, status, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28,
                    $29, $30, $31, 'active', $32)
            RETURNING *
            "#,
        )
        .bind(input.account_id)
        .bind(input.user_id)
        .bind(&input.name)
        .bind(input.client_id)
        .bind(input.project_id)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.notes)
        .bind(&input.po_number)
        .bind(Json(&input.line_items))
        .bind(input.subtotal)
        .bind(input.tax_rate)
        .bind(input.tax_amount)
        .bind(input.discount_type)
        .bind(input.discount_value)
        .bind(input.discount_amount)
        .bind(input.total_amount)
        .bind(&input.currency)
        .bind(&input.payment_terms)
        .bind(input.allow_online_payment)
        .bind(&input.email_subject)
        .bind(&input.email_body)
        .bind(&input.cc_emails)
        .bind(&input.bcc_emails)
        .bind(input.interval_type)
        .bind(input.interval_value)
        .bind(input.start_date)
        .bind(next_run_at)
        .bind(input.end_date)
        .bind(input.auto_send)
        .bind(input.days_until_due)
        .bind(Json(&input.metadata))
        .fetch_one(&self.pool)
        .await?;

        Ok(template)
    }

    async fn get_template(&self, id: Uuid) -> BillingResult<Option<RecurringTemplate>> {
        let template = sqlx::query_as::<_, RecurringTemplate>(
            "SELECT * FROM recurring_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }

    async fn pause_template(&self, id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE recurring_templates
             SET status = 'paused', updated_at = NOW()
             WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn resume_template(&self, id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE recurring_templates
             SET status = 'active', updated_at = NOW()
             WHERE id = $1 AND status = 'paused'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl InvoiceStore for PgStore {
    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<InvoiceInstance> {
        let created = sqlx::query_as::<_, InvoiceInstance>(
            r#"
            INSERT INTO invoices
            (account_id, client_id, project_id, invoice_number, invoice_type, title,
             description, notes, po_number, line_items, subtotal, tax_rate, tax_amount,
             discount_type, discount_value, discount_amount, total_amount, currency,
             payment_terms, allow_online_payment, status, issue_date, due_date,
             sent_date, recurring_template_id, metadata, created_by, created_by_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)
            RETURNING *
            "#,
        )
        .bind(invoice.account_id)
        .bind(invoice.client_id)
        .bind(invoice.project_id)
        .bind(&invoice.invoice_number)
        .bind(&invoice.invoice_type)
        .bind(&invoice.title)
        .bind(&invoice.description)
        .bind(&invoice.notes)
        .bind(&invoice.po_number)
        .bind(Json(&invoice.line_items))
        .bind(invoice.subtotal)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_amount)
        .bind(invoice.discount_type)
        .bind(invoice.discount_value)
        .bind(invoice.discount_amount)
        .bind(invoice.total_amount)
        .bind(&invoice.currency)
        .bind(&invoice.payment_terms)
        .bind(invoice.allow_online_payment)
        .bind(invoice.status)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.sent_date)
        .bind(invoice.recurring_template_id)
        .bind(Json(&invoice.metadata))
        .bind(invoice.created_by)
        .bind(&invoice.created_by_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn set_share_token(&self, invoice_id: Uuid, token: &str) -> BillingResult<()> {
        sqlx::query("UPDATE invoices SET share_token = $2, updated_at = NOW() WHERE id = $1")
            .bind(invoice_id)
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn next_invoice_number(&self, account_id: Uuid) -> BillingResult<String> {
        let next = sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT COALESCE(MAX(CAST(SUBSTRING(invoice_number FROM '^INV-(\d+)$') AS INTEGER)), 0) + 1
            FROM invoices
            WHERE account_id = $1 AND invoice_number ~ '^INV-\d+$'
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(format!("INV-{:06}", next.unwrap_or(1)))
    }
}
