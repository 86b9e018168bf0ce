// Error taxonomy for the recurring billing scheduler.
//
// Per-template failures are caught at the batch runner boundary and turned
// into run-report entries; only a failure to fetch the due list itself is
// allowed to abort a whole invocation.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Interval value must be positive, got {value}")]
    InvalidInterval { value: i32 },

    #[error("Date arithmetic overflow advancing from {from}")]
    DateOverflow { from: DateTime<Utc> },

    #[error("Share token generation failed: {0}")]
    TokenGeneration(String),

    #[error("No recipient email resolvable for template {template_id}")]
    MissingRecipient { template_id: Uuid },

    #[error("Email dispatch failed: {0}")]
    Email(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type BillingResult<T> = Result<T, BillingError>;
