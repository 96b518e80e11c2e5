use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_cron_scheduler::Job;
use tracing::{debug, warn};

use async_telegram::config::ScheduleConfig;

/// Text the polling loop should send on behalf of a cron job
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub chat_id: i64,
    pub text: String,
}

/// Cron job that queues `entry` as a [`Notification`] each time it fires
pub fn notification_job(
    entry: &ScheduleConfig,
    name: &str,
    tx: mpsc::UnboundedSender<Notification>,
) -> Result<Job> {
    let task = notify(entry, tx);
    let job_name = name.to_string();
    Job::new_async(entry.cron.as_str(), move |_uuid, _lock| {
        let name = job_name.clone();
        let fut = task();
        Box::pin(async move {
            debug!("Firing scheduled notification: {}", name);
            fut.await;
        })
    })
    .with_context(|| format!("Invalid cron expression for {}: {}", name, entry.cron))
}

fn notify(
    entry: &ScheduleConfig,
    tx: mpsc::UnboundedSender<Notification>,
) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static {
    let notification = Notification {
        chat_id: entry.chat_id,
        text: entry.text.clone(),
    };
    move || {
        let tx = tx.clone();
        let notification = notification.clone();
        async move {
            if tx.send(notification).is_err() {
                warn!("Polling loop is gone, scheduled notification dropped");
            }
        }
        .boxed()
    }
}
