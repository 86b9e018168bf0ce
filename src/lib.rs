// Recurring Billing Scheduler
//
// Turns standing recurring-invoice templates into concrete invoices on a
// schedule: find due templates, materialize an invoice from each, optionally
// provision a share link and send the invoice email, then advance the
// template's schedule. One bad template never blocks the rest of the batch.

pub mod config;
pub mod database;
pub mod directory;
pub mod email;
pub mod error;
pub mod materializer;
pub mod models;
pub mod notifier;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod token;

pub use error::{BillingError, BillingResult};
pub use runner::{BatchRunner, RunReport, RunnerConfig, TemplateFailure};
