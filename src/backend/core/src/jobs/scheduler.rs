//! Polling scheduler: dispatch due jobs and archive resolved ones.
//!
//! Two independent loops run on fixed intervals. Ticks of the same kind
//! never overlap; a tick that finds the previous one still running is
//! skipped. Dispatch and archive ticks may run at the same time.

use chrono::Duration as ChronoDuration;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::error::Result;
use crate::telemetry::{JobMetrics, TickTimer};

use super::dispatch::{DispatchClient, DispatchFailure, DispatchRequest};
use super::service::JobService;
use super::{Job, JobId, JobTypeConfig};

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub dispatch_interval: Duration,
    pub archive_interval: Duration,
    /// Maximum due jobs fetched per dispatch tick
    pub batch_size: usize,
    /// Upper bound on a single handler call
    pub request_timeout: Duration,
    /// Prepended to every rendered handler path
    pub base_url: String,
    /// Resolved jobs younger than this stay in the active table
    pub active_retention: ChronoDuration,
    /// History rows older than this are purged; `None` keeps them forever
    pub history_retention: Option<ChronoDuration>,
    /// Maximum rows moved or purged per archive tick
    pub archive_batch_size: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_secs(15),
            archive_interval: Duration::from_secs(300),
            batch_size: 50,
            request_timeout: Duration::from_secs(30),
            base_url: "http://localhost:8080".to_string(),
            active_retention: ChronoDuration::days(7),
            history_retention: Some(ChronoDuration::days(90)),
            archive_batch_size: 500,
        }
    }
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            dispatch_interval: config.scheduler.dispatch_interval,
            archive_interval: config.scheduler.archive_interval,
            batch_size: config.scheduler.batch_size,
            request_timeout: config.dispatch.request_timeout,
            base_url: config.dispatch.base_url.clone(),
            active_retention: config.scheduler.active_retention(),
            history_retention: config.scheduler.history_retention(),
            archive_batch_size: config.scheduler.archive_batch_size,
        }
    }
}

/// Result of one dispatch tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Due jobs fetched
    pub fetched: usize,
    /// Handler calls issued
    pub dispatched: usize,
    /// Calls answered with a status below 400
    pub accepted: usize,
    /// Jobs passed to `fail`, with or without a call
    pub failed: usize,
    /// The tick did not run because another dispatch tick was in progress
    pub skipped: bool,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Result of one archive tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub archived: u64,
    pub purged: u64,
    pub skipped: bool,
}

/// Owned polling scheduler.
pub struct JobScheduler {
    service: Arc<JobService>,
    client: Arc<dyn DispatchClient>,
    settings: SchedulerSettings,
    dispatch_guard: Mutex<()>,
    archive_guard: Mutex<()>,
}

impl JobScheduler {
    pub fn new(
        service: Arc<JobService>,
        client: Arc<dyn DispatchClient>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            service,
            client,
            settings,
            dispatch_guard: Mutex::new(()),
            archive_guard: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Spawn the dispatch and archive loops.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            dispatch_interval = ?self.settings.dispatch_interval,
            archive_interval = ?self.settings.archive_interval,
            batch_size = self.settings.batch_size,
            "Job scheduler started"
        );

        let dispatch = {
            let scheduler = self.clone();
            let shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                run_loop("dispatch", scheduler.settings.dispatch_interval, shutdown, || {
                    let scheduler = scheduler.clone();
                    async move {
                        if let Err(e) = scheduler.run_dispatch_tick().await {
                            error!(error = %e, "Dispatch tick aborted");
                        }
                    }
                })
                .await
            })
        };

        let archive = {
            let scheduler = self;
            tokio::spawn(async move {
                run_loop("archive", scheduler.settings.archive_interval, shutdown_rx, || {
                    let scheduler = scheduler.clone();
                    async move {
                        if let Err(e) = scheduler.run_archive_tick().await {
                            error!(error = %e, "Archive tick aborted");
                        }
                    }
                })
                .await
            })
        };

        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks: vec![dispatch, archive],
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one dispatch tick now.
    ///
    /// An error means the tick was aborted before dispatching (fetch or
    /// config lookup failed). Per-job failures are counted, not returned.
    pub async fn run_dispatch_tick(&self) -> Result<TickReport> {
        let Ok(_guard) = self.dispatch_guard.try_lock() else {
            JobMetrics::record_tick_skipped("dispatch");
            debug!("Dispatch tick still running, skipping");
            return Ok(TickReport::skipped());
        };

        let timer = TickTimer::dispatch();
        let report = self.dispatch_due().instrument(info_span!("dispatch_tick")).await?;
        let elapsed = timer.finish();

        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                dispatched = report.dispatched,
                accepted = report.accepted,
                failed = report.failed,
                elapsed_ms = elapsed.as_millis() as u64,
                "Dispatch tick finished"
            );
        }
        Ok(report)
    }

    async fn dispatch_due(&self) -> Result<TickReport> {
        let jobs = self.service.find_due(self.settings.batch_size).await?;
        let mut report = TickReport {
            fetched: jobs.len(),
            ..TickReport::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }

        let configs = self.resolve_configs(&jobs).await?;

        let mut requests = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let built = match configs.get(&job.task_type) {
                Some(Some(config)) => DispatchRequest::build(job, config, &self.settings.base_url),
                _ => Err(DispatchFailure::ConfigMissing {
                    task_type: job.task_type.clone(),
                }),
            };
            match built {
                Ok(request) => requests.push(request),
                Err(failure) => {
                    self.record_failure(job.id, &job.task_type, &failure).await;
                    report.failed += 1;
                }
            }
        }

        report.dispatched = requests.len();
        let timeout = self.settings.request_timeout;
        let calls = requests.iter().map(|request| async move {
            let outcome = match tokio::time::timeout(timeout, self.client.dispatch(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(DispatchFailure::Timeout(timeout)),
            };
            (request, outcome)
        });

        for (request, outcome) in join_all(calls).await {
            match outcome {
                Ok(status) => {
                    JobMetrics::record_dispatch(&request.task_type, "accepted");
                    debug!(job_id = %request.job_id, status, "Handler accepted job");
                    report.accepted += 1;
                }
                Err(failure) => {
                    self.record_failure(request.job_id, &request.task_type, &failure).await;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Look up each distinct task type once.
    async fn resolve_configs(&self, jobs: &[Job]) -> Result<HashMap<String, Option<JobTypeConfig>>> {
        let task_types: BTreeSet<&str> = jobs.iter().map(|job| job.task_type.as_str()).collect();
        let mut configs = HashMap::with_capacity(task_types.len());
        for task_type in task_types {
            let config = self.service.job_type(task_type).await?;
            configs.insert(task_type.to_string(), config);
        }
        Ok(configs)
    }

    async fn record_failure(&self, job_id: JobId, task_type: &str, failure: &DispatchFailure) {
        JobMetrics::record_dispatch(task_type, failure.metric_label());
        warn!(
            job_id = %job_id,
            task_type,
            code = %failure.code(),
            retryable = failure.is_retryable(),
            error = %failure,
            "Dispatch failed"
        );

        if let Err(e) = self
            .service
            .fail(job_id, &failure.to_string(), failure.is_retryable())
            .await
        {
            error!(job_id = %job_id, error = %e, "Failed to record dispatch failure");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Archive
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one archive tick now.
    pub async fn run_archive_tick(&self) -> Result<ArchiveReport> {
        let Ok(_guard) = self.archive_guard.try_lock() else {
            JobMetrics::record_tick_skipped("archive");
            debug!("Archive tick still running, skipping");
            return Ok(ArchiveReport {
                skipped: true,
                ..ArchiveReport::default()
            });
        };

        let timer = TickTimer::archive();
        let report = self.archive().instrument(info_span!("archive_tick")).await?;
        timer.finish();
        Ok(report)
    }

    async fn archive(&self) -> Result<ArchiveReport> {
        let now = self.service.now();
        let archived = self
            .service
            .archive_resolved(now - self.settings.active_retention, self.settings.archive_batch_size)
            .await?;

        let purged = match self.settings.history_retention {
            Some(retention) => {
                self.service
                    .purge_history(now - retention, self.settings.archive_batch_size)
                    .await?
            }
            None => 0,
        };

        Ok(ArchiveReport {
            archived,
            purged,
            skipped: false,
        })
    }
}

/// Tick `tick` every `period` until shutdown is signalled.
///
/// A tick in progress when shutdown arrives runs to completion.
async fn run_loop<F, Fut>(
    kind: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => tick().await,
        }
    }

    info!(kind, "Scheduler loop stopped");
}

/// Handle for a running scheduler.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal both loops and wait for their current ticks to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Scheduler loop panicked");
            }
        }
        info!("Job scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::clock::ManualClock;
    use crate::jobs::{HttpMethod, InMemoryJobStore, JobStatus, NewJob};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingClient {
        calls: AtomicUsize,
        status: u16,
    }

    #[async_trait]
    impl DispatchClient for CountingClient {
        async fn dispatch(&self, _request: &DispatchRequest) -> std::result::Result<u16, DispatchFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.status >= 400 {
                Err(DispatchFailure::HandlerRejected {
                    status: self.status,
                    body: String::new(),
                })
            } else {
                Ok(self.status)
            }
        }
    }

    fn scheduler(status: u16) -> (Arc<JobScheduler>, Arc<JobService>, Arc<CountingClient>) {
        let clock = Arc::new(ManualClock::default());
        let service = Arc::new(JobService::with_clock(Arc::new(InMemoryJobStore::new()), clock));
        let client = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            status,
        });
        let scheduler = Arc::new(JobScheduler::new(
            service.clone(),
            client.clone(),
            SchedulerSettings::default(),
        ));
        (scheduler, service, client)
    }

    #[tokio::test]
    async fn test_empty_tick() {
        let (scheduler, _, client) = scheduler(200);
        let report = scheduler.run_dispatch_tick().await.unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_accepted_calls_write_nothing() {
        let (scheduler, service, client) = scheduler(202);
        service
            .register_job_type(JobTypeConfig::new("t", HttpMethod::Post, "/run/{job_id}"))
            .await
            .unwrap();
        let a = service.create(NewJob::new("t")).await.unwrap();
        let b = service.create(NewJob::new("t")).await.unwrap();

        let report = scheduler.run_dispatch_tick().await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.accepted, 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        for id in [a, b] {
            let job = service.get_job(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(service.job_events(id).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_rejection_schedules_retry() {
        let (scheduler, service, _) = scheduler(503);
        service
            .register_job_type(JobTypeConfig::new("t", HttpMethod::Get, "/run"))
            .await
            .unwrap();
        let id = service.create(NewJob::new("t")).await.unwrap();

        let report = scheduler.run_dispatch_tick().await.unwrap();
        assert_eq!(report.failed, 1);

        let job = service.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 1);
        assert!(job.last_error.unwrap().contains("503"));

        let report = scheduler.run_dispatch_tick().await.unwrap();
        assert_eq!(report.fetched, 0);
    }

    #[tokio::test]
    async fn test_invalid_payload_fails_only_that_job() {
        let (scheduler, service, client) = scheduler(200);
        service
            .register_job_type(JobTypeConfig::new("t", HttpMethod::Post, "/run"))
            .await
            .unwrap();
        let bad = service.create(NewJob::new("t").raw_payload("{nope")).await.unwrap();
        let good = service
            .create(NewJob::new("t").payload(&serde_json::json!({"ok": true})))
            .await
            .unwrap();

        let report = scheduler.run_dispatch_tick().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.accepted, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        let bad = service.get_job(bad).await.unwrap().unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        assert_eq!(bad.retry_count, 0);
        let good = service.get_job(good).await.unwrap().unwrap();
        assert_eq!(good.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_dispatch_tick_skips_when_busy() {
        let (scheduler, _, _) = scheduler(200);
        let _held = scheduler.dispatch_guard.lock().await;
        let report = scheduler.run_dispatch_tick().await.unwrap();
        assert!(report.skipped);

        let archive = scheduler.run_archive_tick().await.unwrap();
        assert!(!archive.skipped);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (scheduler, service, client) = scheduler(200);
        service
            .register_job_type(JobTypeConfig::new("t", HttpMethod::Get, "/run"))
            .await
            .unwrap();
        service.create(NewJob::new("t")).await.unwrap();

        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        assert!(client.calls.load(Ordering::SeqCst) >= 1);
    }
}
