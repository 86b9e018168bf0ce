// Invoice materializer: turns one template snapshot into a concrete invoice
// record. Billing content is deep-copied; later template edits never reach
// invoices that already exist.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::directory::{Actor, Directory};
use crate::error::BillingResult;
use crate::models::{InvoiceInstance, InvoiceStatus, NewInvoice, RecurringTemplate};
use crate::store::InvoiceStore;

pub const INVOICE_TYPE_RECURRING: &str = "recurring";
pub const METADATA_SOURCE: &str = "recurring_template";

/// Build the invoice row for a template, without touching storage.
///
/// Provenance metadata records the originating template; the template's own
/// metadata is merged on top, so template keys win on conflict.
pub fn build_invoice(
    template: &RecurringTemplate,
    invoice_number: String,
    issued_at: DateTime<Utc>,
    actor: &Actor,
) -> NewInvoice {
    let mut metadata = Map::new();
    metadata.insert("source".to_string(), Value::String(METADATA_SOURCE.into()));
    metadata.insert(
        "recurring_template_id".to_string(),
        Value::String(template.id.to_string()),
    );
    for (key, value) in template.metadata.0.iter() {
        metadata.insert(key.clone(), value.clone());
    }

    let title = template
        .title
        .clone()
        .unwrap_or_else(|| format!("Recurring: {}", template.name));

    NewInvoice {
        account_id: template.account_id,
        client_id: template.client_id,
        project_id: template.project_id,
        invoice_number,
        invoice_type: INVOICE_TYPE_RECURRING.to_string(),
        title: Some(title),
        description: template.description.clone(),
        notes: template.notes.clone(),
        po_number: template.po_number.clone(),

        line_items: template.line_items.0.clone(),
        subtotal: template.subtotal,
        tax_rate: template.tax_rate,
        tax_amount: template.tax_amount,
        discount_type: template.discount_type,
        discount_value: template.discount_value,
        discount_amount: template.discount_amount,
        total_amount: template.total_amount,
        currency: template.currency.clone(),
        payment_terms: template.payment_terms.clone(),
        allow_online_payment: template.allow_online_payment,

        status: if template.auto_send {
            InvoiceStatus::Sent
        } else {
            InvoiceStatus::Draft
        },
        issue_date: issued_at,
        due_date: issued_at + Duration::days(template.days_until_due as i64),
        sent_date: template.auto_send.then_some(issued_at),
        recurring_template_id: Some(template.id),
        metadata,
        created_by: template.user_id.or(actor.user_id),
        created_by_name: actor.display_name.clone(),
    }
}

#[derive(Clone)]
pub struct InvoiceMaterializer {
    invoices: Arc<dyn InvoiceStore>,
    directory: Arc<dyn Directory>,
}

impl InvoiceMaterializer {
    pub fn new(invoices: Arc<dyn InvoiceStore>, directory: Arc<dyn Directory>) -> Self {
        Self { invoices, directory }
    }

    /// Materialize and persist one invoice. Any persistence failure
    /// propagates; the caller must not advance the template's schedule in
    /// that case.
    pub async fn materialize(
        &self,
        template: &RecurringTemplate,
        issued_at: DateTime<Utc>,
    ) -> BillingResult<InvoiceInstance> {
        let actor = self.directory.default_actor(template.account_id).await?;
        let invoice_number = self.invoices.next_invoice_number(template.account_id).await?;

        let invoice = build_invoice(template, invoice_number, issued_at, &actor);
        self.invoices.insert_invoice(invoice).await
    }
}
