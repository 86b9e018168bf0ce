use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recurring_billing::config::Config;
use recurring_billing::database;
use recurring_billing::directory::PgDirectory;
use recurring_billing::email::SmtpSender;
use recurring_billing::materializer::InvoiceMaterializer;
use recurring_billing::notifier::DispatchNotifier;
use recurring_billing::runner::{BatchRunner, RunnerConfig};
use recurring_billing::scheduler::JobScheduler;
use recurring_billing::store::PgStore;
use recurring_billing::token::{LocalTokenGenerator, PgTokenGenerator, ShareLinkProvisioner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    if !config.jobs.auto_invoice_enabled {
        tracing::warn!("Auto-invoicing is disabled; exiting");
        return Ok(());
    }

    let pool = database::create_pool(&config.database_url).await?;
    database::migrate(&pool).await?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let directory = Arc::new(PgDirectory::new(pool.clone()));
    let sender = Arc::new(SmtpSender::new(&config.smtp)?);

    let materializer = InvoiceMaterializer::new(store.clone(), directory.clone());
    let provisioner = ShareLinkProvisioner::new(
        Arc::new(PgTokenGenerator::new(pool.clone())),
        Arc::new(LocalTokenGenerator),
        store.clone(),
    );
    let notifier = DispatchNotifier::new(directory, sender, config.app_base_url.clone());

    let runner = Arc::new(BatchRunner::new(
        store,
        materializer,
        provisioner,
        notifier,
        RunnerConfig {
            run_deadline: config
                .jobs
                .run_deadline_secs
                .map(std::time::Duration::from_secs),
        },
    ));

    let mut scheduler =
        JobScheduler::new(runner, config.jobs.billing_check_interval_hours).await?;
    scheduler.start().await?;

    tracing::info!("Recurring billing scheduler running");

    tokio::signal::ctrl_c().await?;
    scheduler.shutdown().await?;

    Ok(())
}
