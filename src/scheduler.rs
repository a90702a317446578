//! Fixed-rate in-process job scheduler.
//!
//! Every job runs on its own `tokio::time::interval`. A job's runs are
//! awaited inside its own loop, so one job never overlaps itself. Ticks
//! that pass while a run is still going collapse into a single run that
//! starts when the slow one ends. A failed
//! run is logged and the next tick runs as usual.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct ScheduledJob {
    name: String,
    period: Duration,
    run: JobFn,
}

/// Named periodic jobs.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `period`, starting immediately.
    pub fn every<F, Fut>(mut self, name: impl Into<String>, period: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.jobs.push(ScheduledJob {
            name: name.into(),
            period: period.max(Duration::from_millis(1)),
            run: Arc::new(move || Box::pin(job())),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run every job until `shutdown` resolves. In-flight runs are dropped
    /// at shutdown.
    pub async fn run_until<S>(self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        for job in self.jobs {
            tasks.spawn(run_job(job));
        }
        shutdown.await;
        tracing::info!("scheduler shutting down");
        tasks.shutdown().await;
    }
}

async fn run_job(job: ScheduledJob) {
    let mut interval = tokio::time::interval(job.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let started = tokio::time::Instant::now();
        tracing::debug!(job = %job.name, "job started");
        match (job.run)().await {
            Ok(()) => tracing::debug!(
                job = %job.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job finished"
            ),
            Err(err) => tracing::error!(job = %job.name, error = %format!("{:#}", err), "job failed"),
        }
    }
}
