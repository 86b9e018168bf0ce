// Cron wrapper around the batch runner. One job, one cadence; overlap
// prevention across deployments is the invocation layer's responsibility.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::runner::{BatchRunner, RunReport};

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum JobStatus {
    Completed,
    PartialFailure,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: JobStatus,
    pub invoices_created: u32,
    pub templates_ended: u32,
    pub errors: Vec<String>,
    pub duration_ms: i64,
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    runner: Arc<BatchRunner>,
    interval_hours: u32,
    execution_logs: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl JobScheduler {
    pub async fn new(runner: Arc<BatchRunner>, interval_hours: u32) -> BillingResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            runner,
            interval_hours: interval_hours.max(1),
            execution_logs: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn start(&self) -> BillingResult<()> {
        let cron_expr = format!("0 0 */{} * * *", self.interval_hours);

        let runner = self.runner.clone();
        let logs = self.execution_logs.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let runner = runner.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let log_id = Uuid::new_v4();
                let started_at = Utc::now();

                info!("Running recurring billing job");

                match runner.run_due_templates(started_at).await {
                    Ok(report) => {
                        let completed_at = Utc::now();
                        let log = JobExecutionLog {
                            id: log_id,
                            started_at,
                            completed_at,
                            status: job_status(&report),
                            invoices_created: report.invoices_created,
                            templates_ended: report.templates_ended,
                            errors: report
                                .errors
                                .iter()
                                .map(|e| format!("{}: {}", e.template_id, e.message))
                                .collect(),
                            duration_ms: (completed_at - started_at).num_milliseconds(),
                        };

                        let mut logs = logs.write().await;
                        logs.push(log);
                        if logs.len() > MAX_EXECUTION_LOGS {
                            logs.remove(0);
                        }

                        info!(
                            "Recurring billing completed: {} invoices created, {} templates ended",
                            report.invoices_created, report.templates_ended
                        );
                    }
                    Err(e) => {
                        error!("Recurring billing run failed: {}", e);

                        let completed_at = Utc::now();
                        let mut logs = logs.write().await;
                        logs.push(JobExecutionLog {
                            id: log_id,
                            started_at,
                            completed_at,
                            status: JobStatus::Failed,
                            invoices_created: 0,
                            templates_ended: 0,
                            errors: vec![e.to_string()],
                            duration_ms: (completed_at - started_at).num_milliseconds(),
                        });
                        if logs.len() > MAX_EXECUTION_LOGS {
                            logs.remove(0);
                        }
                    }
                }
            })
        })?;

        self.scheduler.add(job).await?;
        self.scheduler.start().await?;

        info!(
            "Recurring billing scheduled to run every {} hour(s)",
            self.interval_hours
        );

        Ok(())
    }

    pub async fn shutdown(&mut self) -> BillingResult<()> {
        info!("Shutting down recurring billing scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    /// Trigger one batch run immediately, outside the cron cadence.
    pub async fn run_now(&self) -> BillingResult<RunReport> {
        self.runner.run_due_templates(Utc::now()).await
    }

    pub async fn get_execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.read().await.clone()
    }
}

fn job_status(report: &RunReport) -> JobStatus {
    if report.errors.is_empty() {
        JobStatus::Completed
    } else {
        JobStatus::PartialFailure
    }
}
