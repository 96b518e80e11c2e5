pub mod tasks;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_cron_scheduler::JobScheduler;
use tracing::info;

use async_telegram::config::ScheduleConfig;

use self::tasks::Notification;

/// Fires the `[[schedule]]` entries. Jobs never touch the client, they
/// push a [`Notification`] into the outbox the polling loop drains.
pub struct NotificationScheduler {
    inner: JobScheduler,
    outbox: mpsc::UnboundedSender<Notification>,
    jobs: Vec<String>,
    running: bool,
}

impl NotificationScheduler {
    pub async fn new(outbox: mpsc::UnboundedSender<Notification>) -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            inner,
            outbox,
            jobs: Vec::new(),
            running: false,
        })
    }

    /// Stops at the first entry with a bad cron expression
    pub async fn schedule_all(&mut self, entries: &[ScheduleConfig]) -> Result<usize> {
        for entry in entries {
            self.schedule(entry).await?;
        }
        Ok(self.jobs.len())
    }

    pub async fn schedule(&mut self, entry: &ScheduleConfig) -> Result<()> {
        let name = format!("notify-{}-chat-{}", self.jobs.len(), entry.chat_id);
        let job = tasks::notification_job(entry, &name, self.outbox.clone())?;
        self.inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        info!("Scheduled '{}' with cron: {}", name, entry.cron);
        self.jobs.push(name);
        Ok(())
    }

    pub fn job_names(&self) -> &[String] {
        &self.jobs
    }

    /// Returns false without starting anything when no job is scheduled
    pub async fn start(&mut self) -> Result<bool> {
        if self.jobs.is_empty() || self.running {
            return Ok(self.running);
        }
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        self.running = true;
        info!("Scheduler started with {} job(s)", self.jobs.len());
        Ok(true)
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        self.running = false;
        info!("Scheduler stopped");
        Ok(())
    }
}
