// Shared in-memory fakes for batch runner tests. The production seams are
// traits, so the fakes stand in for Postgres, the directory and SMTP, with
// failure injection where the scenarios need it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Map;
use sqlx::types::Json;
use uuid::Uuid;

use recurring_billing::directory::{AccountProfile, Actor, ClientContact, Directory};
use recurring_billing::error::{BillingError, BillingResult};
use recurring_billing::materializer::InvoiceMaterializer;
use recurring_billing::models::{
    DiscountType, IntervalType, InvoiceInstance, LineItem, NewInvoice, NewTemplate,
    RecurringTemplate, TemplateStatus,
};
use recurring_billing::notifier::{DispatchNotifier, EmailSender, OutboundEmail};
use recurring_billing::runner::{BatchRunner, RunnerConfig};
use recurring_billing::schedule;
use recurring_billing::store::{InvoiceStore, TemplateStore};
use recurring_billing::token::{ShareLinkProvisioner, TokenGenerator};

pub const BASE_URL: &str = "http://localhost:3000";

#[derive(Default)]
pub struct FakeStore {
    pub templates: Mutex<Vec<RecurringTemplate>>,
    pub invoices: Mutex<Vec<InvoiceInstance>>,
    pub tokens: Mutex<HashMap<Uuid, String>>,
    /// Template ids whose invoice insert fails (materialization failure).
    pub fail_insert_for: Mutex<HashSet<Uuid>>,
    pub fail_set_token: AtomicBool,
}

impl FakeStore {
    pub fn with_templates(templates: Vec<RecurringTemplate>) -> Arc<Self> {
        let store = Self::default();
        *store.templates.lock().unwrap() = templates;
        Arc::new(store)
    }

    pub fn template(&self, id: Uuid) -> RecurringTemplate {
        self.templates
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .expect("template not found")
    }

    pub fn invoice_count(&self) -> usize {
        self.invoices.lock().unwrap().len()
    }

    pub fn invoices_for(&self, template_id: Uuid) -> Vec<InvoiceInstance> {
        self.invoices
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.recurring_template_id == Some(template_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TemplateStore for FakeStore {
    async fn find_due_templates(
        &self,
        as_of: DateTime<Utc>,
    ) -> BillingResult<Vec<RecurringTemplate>> {
        let mut due: Vec<_> = self
            .templates
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.status == TemplateStatus::Active && t.next_run_at <= as_of)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_run_at);
        Ok(due)
    }

    async fn advance_template(
        &self,
        id: Uuid,
        next_run_at: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
    ) -> BillingResult<()> {
        let mut templates = self.templates.lock().unwrap();
        let template = templates
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        template.next_run_at = next_run_at;
        template.last_run_at = Some(last_run_at);
        template.updated_at = Utc::now();
        Ok(())
    }

    async fn end_template(&self, id: Uuid) -> BillingResult<()> {
        let mut templates = self.templates.lock().unwrap();
        if let Some(template) = templates.iter_mut().find(|t| t.id == id) {
            template.status = TemplateStatus::Ended;
            template.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn create_template(&self, input: NewTemplate) -> BillingResult<RecurringTemplate> {
        let next_run_at =
            schedule::initial_run_at(input.start_date, input.interval_type, input.interval_value)?;
        let now = Utc::now();
        let template = RecurringTemplate {
            id: Uuid::new_v4(),
            account_id: input.account_id,
            user_id: input.user_id,
            name: input.name,
            client_id: input.client_id,
            project_id: input.project_id,
            title: input.title,
            description: input.description,
            notes: input.notes,
            po_number: input.po_number,
            line_items: Json(input.line_items),
            subtotal: input.subtotal,
            tax_rate: input.tax_rate,
            tax_amount: input.tax_amount,
            discount_type: input.discount_type,
            discount_value: input.discount_value,
            discount_amount: input.discount_amount,
            total_amount: input.total_amount,
            currency: input.currency,
            payment_terms: input.payment_terms,
            allow_online_payment: input.allow_online_payment,
            email_subject: input.email_subject,
            email_body: input.email_body,
            cc_emails: input.cc_emails,
            bcc_emails: input.bcc_emails,
            interval_type: input.interval_type,
            interval_value: input.interval_value,
            start_date: input.start_date,
            next_run_at,
            end_date: input.end_date,
            auto_send: input.auto_send,
            days_until_due: input.days_until_due,
            status: TemplateStatus::Active,
            metadata: Json(input.metadata),
            last_run_at: None,
            created_at: now,
            updated_at: now,
        };
        self.templates.lock().unwrap().push(template.clone());
        Ok(template)
    }

    async fn get_template(&self, id: Uuid) -> BillingResult<Option<RecurringTemplate>> {
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn pause_template(&self, id: Uuid) -> BillingResult<()> {
        let mut templates = self.templates.lock().unwrap();
        if let Some(t) = templates
            .iter_mut()
            .find(|t| t.id == id && t.status == TemplateStatus::Active)
        {
            t.status = TemplateStatus::Paused;
        }
        Ok(())
    }

    async fn resume_template(&self, id: Uuid) -> BillingResult<()> {
        let mut templates = self.templates.lock().unwrap();
        if let Some(t) = templates
            .iter_mut()
            .find(|t| t.id == id && t.status == TemplateStatus::Paused)
        {
            t.status = TemplateStatus::Active;
        }
        Ok(())
    }
}

#[async_trait]
impl InvoiceStore for FakeStore {
    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<InvoiceInstance> {
        if let Some(template_id) = invoice.recurring_template_id {
            if self.fail_insert_for.lock().unwrap().contains(&template_id) {
                return Err(BillingError::Database(sqlx::Error::PoolClosed));
            }
        }

        let now = Utc::now();
        let created = InvoiceInstance {
            id: Uuid::new_v4(),
            account_id: invoice.account_id,
            client_id: invoice.client_id,
            project_id: invoice.project_id,
            invoice_number: invoice.invoice_number,
            invoice_type: invoice.invoice_type,
            title: invoice.title,
            description: invoice.description,
            notes: invoice.notes,
            po_number: invoice.po_number,
            line_items: Json(invoice.line_items),
            subtotal: invoice.subtotal,
            tax_rate: invoice.tax_rate,
            tax_amount: invoice.tax_amount,
            discount_type: invoice.discount_type,
            discount_value: invoice.discount_value,
            discount_amount: invoice.discount_amount,
            total_amount: invoice.total_amount,
            currency: invoice.currency,
            payment_terms: invoice.payment_terms,
            allow_online_payment: invoice.allow_online_payment,
            status: invoice.status,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            sent_date: invoice.sent_date,
            share_token: None,
            recurring_template_id: invoice.recurring_template_id,
            metadata: Json(invoice.metadata),
            created_by: invoice.created_by,
            created_by_name: invoice.created_by_name,
            created_at: now,
            updated_at: now,
        };
        self.invoices.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn set_share_token(&self, invoice_id: Uuid, token: &str) -> BillingResult<()> {
        if self.fail_set_token.load(Ordering::SeqCst) {
            return Err(BillingError::Database(sqlx::Error::PoolClosed));
        }
        self.tokens
            .lock()
            .unwrap()
            .insert(invoice_id, token.to_string());
        if let Some(invoice) = self
            .invoices
            .lock()
            .unwrap()
            .iter_mut()
            .find(|i| i.id == invoice_id)
        {
            invoice.share_token = Some(token.to_string());
        }
        Ok(())
    }

    async fn next_invoice_number(&self, _account_id: Uuid) -> BillingResult<String> {
        Ok(format!(
            "INV-{:06}",
            self.invoices.lock().unwrap().len() + 1
        ))
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    pub clients: Mutex<HashMap<Uuid, ClientContact>>,
    pub accounts: Mutex<HashMap<Uuid, AccountProfile>>,
}

impl FakeDirectory {
    pub fn with_client(self: Arc<Self>, client: ClientContact) -> Arc<Self> {
        self.clients.lock().unwrap().insert(client.id, client);
        self
    }

    pub fn with_account(self: Arc<Self>, account: AccountProfile) -> Arc<Self> {
        self.accounts.lock().unwrap().insert(account.id, account);
        self
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn client(&self, id: Uuid) -> BillingResult<Option<ClientContact>> {
        Ok(self.clients.lock().unwrap().get(&id).cloned())
    }

    async fn account(&self, id: Uuid) -> BillingResult<Option<AccountProfile>> {
        Ok(self.accounts.lock().unwrap().get(&id).cloned())
    }

    async fn default_actor(&self, _account_id: Uuid) -> BillingResult<Actor> {
        Ok(Actor::system())
    }
}

pub struct FakeTokenGenerator {
    pub token: String,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl FakeTokenGenerator {
    pub fn ok(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: token.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            token: String::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenGenerator for FakeTokenGenerator {
    async fn generate(&self, _invoice_id: Uuid) -> BillingResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BillingError::TokenGeneration(
                "primary generator unavailable".to_string(),
            ));
        }
        Ok(self.token.clone())
    }
}

#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<OutboundEmail>>,
    pub fail: AtomicBool,
}

impl RecordingSender {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, email: &OutboundEmail) -> BillingResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BillingError::Email("SMTP connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Wires a batch runner over the fakes and keeps handles to every fake for
/// assertions.
pub struct Harness {
    pub store: Arc<FakeStore>,
    pub directory: Arc<FakeDirectory>,
    pub primary_tokens: Arc<FakeTokenGenerator>,
    pub fallback_tokens: Arc<FakeTokenGenerator>,
    pub sender: Arc<RecordingSender>,
    pub runner: BatchRunner,
}

impl Harness {
    pub fn new(store: Arc<FakeStore>, directory: Arc<FakeDirectory>) -> Self {
        Self::with_config(store, directory, RunnerConfig::default())
    }

    pub fn with_config(
        store: Arc<FakeStore>,
        directory: Arc<FakeDirectory>,
        config: RunnerConfig,
    ) -> Self {
        let primary_tokens = FakeTokenGenerator::ok("primarytok01");
        let fallback_tokens = FakeTokenGenerator::ok("fallbacktk01");
        let sender = Arc::new(RecordingSender::default());

        let runner = BatchRunner::new(
            store.clone(),
            InvoiceMaterializer::new(store.clone(), directory.clone()),
            ShareLinkProvisioner::new(
                primary_tokens.clone(),
                fallback_tokens.clone(),
                store.clone(),
            ),
            DispatchNotifier::new(directory.clone(), sender.clone(), BASE_URL.to_string()),
            config,
        );

        Self {
            store,
            directory,
            primary_tokens,
            fallback_tokens,
            sender,
            runner,
        }
    }

    /// Rebuild the runner with a failing primary token generator.
    pub fn with_failing_primary_tokens(mut self) -> Self {
        self.primary_tokens = FakeTokenGenerator::failing();
        self.runner = BatchRunner::new(
            self.store.clone(),
            InvoiceMaterializer::new(self.store.clone(), self.directory.clone()),
            ShareLinkProvisioner::new(
                self.primary_tokens.clone(),
                self.fallback_tokens.clone(),
                self.store.clone(),
            ),
            DispatchNotifier::new(
                self.directory.clone(),
                self.sender.clone(),
                BASE_URL.to_string(),
            ),
            RunnerConfig::default(),
        );
        self
    }
}

/// A template due at `next_run_at` with plain defaults; scenarios mutate the
/// fields they care about.
pub fn due_template(next_run_at: DateTime<Utc>) -> RecurringTemplate {
    let now = Utc::now();
    RecurringTemplate {
        id: Uuid::new_v4(),
        account_id: Uuid::new_v4(),
        user_id: None,
        name: "Monthly retainer".to_string(),
        client_id: None,
        project_id: None,
        title: None,
        description: None,
        notes: None,
        po_number: None,
        line_items: Json(vec![LineItem {
            name: "Retainer".to_string(),
            quantity: Decimal::ONE,
            unit_rate: Decimal::new(100000, 2),
            taxable: false,
            line_total: Decimal::new(100000, 2),
        }]),
        subtotal: Decimal::new(100000, 2),
        tax_rate: Decimal::ZERO,
        tax_amount: Decimal::ZERO,
        discount_type: DiscountType::Fixed,
        discount_value: Decimal::ZERO,
        discount_amount: Decimal::ZERO,
        total_amount: Decimal::new(100000, 2),
        currency: "USD".to_string(),
        payment_terms: "net-30".to_string(),
        allow_online_payment: true,
        email_subject: None,
        email_body: None,
        cc_emails: None,
        bcc_emails: None,
        interval_type: IntervalType::Monthly,
        interval_value: 1,
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        next_run_at,
        end_date: None,
        auto_send: false,
        days_until_due: 30,
        status: TemplateStatus::Active,
        metadata: Json(Map::new()),
        last_run_at: None,
        created_at: now,
        updated_at: now,
    }
}
