use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::tasks::queue::{Trigger, TriggerQueue};

/// Registers one job per cron spec; each tick enqueues a staleness-checked sync.
pub async fn configure_sync_jobs(
    cron_specs: &[String],
    queue: Arc<TriggerQueue>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;
    for spec in cron_specs {
        let label = spec.clone();
        let queue = queue.clone();
        let job = Job::new_async(spec.as_str(), move |_id, _l| {
            let queue = queue.clone();
            let cron_label = label.clone();
            Box::pin(async move {
                tracing::debug!(target: "scheduler", cron = %cron_label, "sync job triggered");
                queue.push(Trigger::Sync { force: false });
            })
        })?;
        scheduler.add(job).await?;
        tracing::info!(target: "scheduler", cron = %spec, "sync job registered");
    }
    scheduler.start().await?;
    Ok(scheduler)
}
