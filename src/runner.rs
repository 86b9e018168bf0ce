// Batch runner: one invocation fetches every due template and processes
// them sequentially, isolating failures per template.
//
// Per-template ordering is fixed: expiry check, materialize, optional
// auto-send, advance schedule. A materialization failure leaves the schedule
// untouched, so the same due run is retried on the next tick; that
// non-advancement is the system's whole retry mechanism.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::materializer::InvoiceMaterializer;
use crate::models::RecurringTemplate;
use crate::notifier::DispatchNotifier;
use crate::schedule;
use crate::store::TemplateStore;
use crate::token::ShareLinkProvisioner;

#[derive(Debug, Clone, Serialize)]
pub struct TemplateFailure {
    pub template_id: Uuid,
    pub message: String,
}

/// Outcome of one batch invocation. Not persisted beyond logs.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub invoices_created: u32,
    pub templates_ended: u32,
    pub errors: Vec<TemplateFailure>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            success: true,
            invoices_created: 0,
            templates_ended: 0,
            errors: Vec::new(),
        }
    }
}

impl RunReport {
    /// Hard failure: the template produced nothing and stays due.
    fn record_failure(&mut self, template_id: Uuid, message: String) {
        self.errors.push(TemplateFailure {
            template_id,
            message,
        });
        self.success = false;
    }

    /// Soft failure: recorded for the report, but the invoice stands and the
    /// schedule still advances.
    fn record_soft_failure(&mut self, template_id: Uuid, message: String) {
        self.errors.push(TemplateFailure {
            template_id,
            message,
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Soft deadline for one invocation. When exceeded mid-batch the run
    /// stops; templates already advanced keep their state and the rest stay
    /// due for the next tick.
    pub run_deadline: Option<Duration>,
}

#[derive(Clone)]
pub struct BatchRunner {
    templates: Arc<dyn TemplateStore>,
    materializer: InvoiceMaterializer,
    provisioner: ShareLinkProvisioner,
    notifier: DispatchNotifier,
    config: RunnerConfig,
}

impl BatchRunner {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        materializer: InvoiceMaterializer,
        provisioner: ShareLinkProvisioner,
        notifier: DispatchNotifier,
        config: RunnerConfig,
    ) -> Self {
        Self {
            templates,
            materializer,
            provisioner,
            notifier,
            config,
        }
    }

    /// Process every template due as of `as_of`. Only a failure to fetch the
    /// due list aborts the invocation; per-template failures become report
    /// entries.
    pub async fn run_due_templates(&self, as_of: DateTime<Utc>) -> BillingResult<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::default();

        let due = self.templates.find_due_templates(as_of).await?;
        if due.is_empty() {
            info!("No due recurring templates found");
            return Ok(report);
        }

        info!("Processing {} due recurring template(s)", due.len());

        for (processed, template) in due.iter().enumerate() {
            if let Some(deadline) = self.config.run_deadline {
                if started.elapsed() >= deadline {
                    warn!(
                        processed,
                        remaining = due.len() - processed,
                        "Run deadline exceeded, remaining templates stay due for the next tick"
                    );
                    break;
                }
            }

            if let Err(e) = self.process_template(template, as_of, &mut report).await {
                error!(template_id = %template.id, error = %e, "Failed to process recurring template");
                report.record_failure(template.id, e.to_string());
            }
        }

        info!(
            invoices_created = report.invoices_created,
            templates_ended = report.templates_ended,
            errors = report.errors.len(),
            "Recurring billing run completed"
        );

        Ok(report)
    }

    async fn process_template(
        &self,
        template: &RecurringTemplate,
        as_of: DateTime<Utc>,
        report: &mut RunReport,
    ) -> BillingResult<()> {
        // Quiet expiry: a passed end date is a lifecycle event, not an error.
        if let Some(end_date) = template.end_date {
            if end_date.and_time(NaiveTime::MIN).and_utc() < as_of {
                info!(template_id = %template.id, "End date passed, marking template as ended");
                self.templates.end_template(template.id).await?;
                report.templates_ended += 1;
                return Ok(());
            }
        }

        // Compute the advancement up front: a template with a corrupt
        // interval must fail before it can mint an invoice the schedule
        // could never account for. Anchored on the current next_run_at, not
        // as_of, so late batches do not drift the schedule.
        let next_run_at = schedule::next_run_date(
            template.next_run_at,
            template.interval_type,
            template.interval_value,
        )?;

        let invoice = self.materializer.materialize(template, as_of).await?;
        info!(
            template_id = %template.id,
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            "Created invoice from recurring template"
        );

        if template.auto_send {
            let token = match self.provisioner.provision(invoice.id).await {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(invoice_id = %invoice.id, error = %e, "Share token provisioning failed");
                    report.record_soft_failure(
                        template.id,
                        format!("Share token provisioning failed: {}", e),
                    );
                    None
                }
            };

            if let Err(e) = self
                .notifier
                .dispatch(&invoice, template, token.as_deref())
                .await
            {
                warn!(invoice_id = %invoice.id, error = %e, "Invoice email dispatch failed");
                report.record_soft_failure(template.id, format!("Email dispatch failed: {}", e));
            }
        }

        self.templates
            .advance_template(template.id, next_run_at, as_of)
            .await?;
        report.invoices_created += 1;

        Ok(())
    }
}
