// Domain types for recurring billing: the standing template, the concrete
// invoice instance it materializes into, and the billing-content pieces
// shared between them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "interval_type", rename_all = "lowercase")]
pub enum IntervalType {
    Weekly,
    Monthly,
    Yearly,
    /// `interval_value` denotes a day count in this mode, not interval counts.
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "template_status", rename_all = "lowercase")]
pub enum TemplateStatus {
    Active,
    Paused,
    /// Terminal; set exactly once when the end date has passed.
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "discount_type", rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "invoice_status", rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Viewed,
    Paid,
    Overdue,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: Decimal,
    pub unit_rate: Decimal,
    #[serde(default)]
    pub taxable: bool,
    pub line_total: Decimal,
}

/// The standing billing schedule. Billing content is a snapshot; edits to a
/// template never reach back into invoices it has already produced.
#[derive(Debug, Clone, FromRow)]
pub struct RecurringTemplate {
    pub id: Uuid,
    pub account_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub client_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub po_number: Option<String>,

    pub line_items: Json<Vec<LineItem>>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_terms: String,
    pub allow_online_payment: bool,

    pub email_subject: Option<String>,
    pub email_body: Option<String>,
    pub cc_emails: Option<Vec<String>>,
    pub bcc_emails: Option<Vec<String>>,

    pub interval_type: IntervalType,
    pub interval_value: i32,
    pub start_date: NaiveDate,
    pub next_run_at: DateTime<Utc>,
    pub end_date: Option<NaiveDate>,

    pub auto_send: bool,
    pub days_until_due: i32,

    pub status: TemplateStatus,
    pub metadata: Json<Map<String, Value>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authoring input for a new template. `next_run_at` is computed by the
/// store from `start_date`, never supplied by the caller.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub account_id: Uuid,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub client_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub po_number: Option<String>,

    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_terms: String,
    pub allow_online_payment: bool,

    pub email_subject: Option<String>,
    pub email_body: Option<String>,
    pub cc_emails: Option<Vec<String>>,
    pub bcc_emails: Option<Vec<String>>,

    pub interval_type: IntervalType,
    pub interval_value: i32,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,

    pub auto_send: bool,
    pub days_until_due: i32,
    pub metadata: Map<String, Value>,
}

/// A concrete invoice produced from a template. Immutable from the
/// scheduler's point of view once inserted.
#[derive(Debug, Clone, FromRow)]
pub struct InvoiceInstance {
    pub id: Uuid,
    pub account_id: Uuid,
    pub client_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub invoice_number: String,
    pub invoice_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub po_number: Option<String>,

    pub line_items: Json<Vec<LineItem>>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_terms: String,
    pub allow_online_payment: bool,

    pub status: InvoiceStatus,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub sent_date: Option<DateTime<Utc>>,
    pub share_token: Option<String>,
    pub recurring_template_id: Option<Uuid>,
    pub metadata: Json<Map<String, Value>>,
    pub created_by: Option<Uuid>,
    pub created_by_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of an invoice row to be inserted; the store fills in id and
/// timestamps.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub account_id: Uuid,
    pub client_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub invoice_number: String,
    pub invoice_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub po_number: Option<String>,

    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_terms: String,
    pub allow_online_payment: bool,

    pub status: InvoiceStatus,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub sent_date: Option<DateTime<Utc>>,
    pub recurring_template_id: Option<Uuid>,
    pub metadata: Map<String, Value>,
    pub created_by: Option<Uuid>,
    pub created_by_name: String,
}
