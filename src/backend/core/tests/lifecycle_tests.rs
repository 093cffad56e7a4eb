//! Job lifecycle tests against the in-process store.
//!
//! Tests cover:
//! - Mutual exclusion of concurrent lockers
//! - Retry bound and linear backoff
//! - Exhaustion into FAILED
//! - Archive partition between active and history tables
//! - Event log written alongside every mutation

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use jobq_core::jobs::{
    Clock, EventSeverity, FailOutcome, HttpMethod, InMemoryJobStore, JobId, JobService, JobStatus,
    JobTypeConfig, ManualClock, NewJob,
};

fn setup() -> (Arc<JobService>, Arc<InMemoryJobStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
    let store = Arc::new(InMemoryJobStore::new());
    let service = Arc::new(JobService::with_clock(store.clone(), clock.clone()));
    (service, store, clock)
}

// ============================================================================
// Mutual Exclusion
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lockers_exactly_one_wins() {
    let (service, _, _) = setup();
    let id = service.create(NewJob::new("parse_document")).await.unwrap();

    let lockers: Vec<_> = (0..16)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.acquire_lock(id).await.unwrap() })
        })
        .collect();

    let mut winners = 0;
    for locker in lockers {
        if locker.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let job = service.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);

    let lock_events = service
        .job_events(id)
        .await
        .unwrap()
        .into_iter()
        .filter(|event| event.message.starts_with("lock acquired"))
        .count();
    assert_eq!(lock_events, 1);
}

#[tokio::test]
async fn test_resolved_jobs_cannot_be_relocked() {
    let (service, _, _) = setup();
    let completed = service.create(NewJob::new("t")).await.unwrap();
    let failed = service.create(NewJob::new("t")).await.unwrap();

    assert!(service.acquire_lock(completed).await.unwrap());
    service.complete(completed, "ok").await.unwrap();
    assert!(service.acquire_lock(failed).await.unwrap());
    service.fail(failed, "fatal", false).await.unwrap();

    assert!(!service.acquire_lock(completed).await.unwrap());
    assert!(!service.acquire_lock(failed).await.unwrap());
}

// ============================================================================
// Retry and Backoff
// ============================================================================

#[tokio::test]
async fn test_backoff_is_exactly_sixty_seconds_per_retry() {
    let (service, _, clock) = setup();
    let id = service.create(NewJob::new("t").max_retries(3)).await.unwrap();

    for expected_retry in 1..=3 {
        assert!(service.acquire_lock(id).await.unwrap());
        let failed_at = clock.now();
        let outcome = service.fail(id, "handler timeout", true).await.unwrap();

        let expected_at = failed_at + Duration::seconds(60 * i64::from(expected_retry));
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                retry_count: expected_retry,
                scheduled_at: expected_at
            }
        );

        let job = service.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.scheduled_at, Some(expected_at));
        assert!(service.find_due(10).await.unwrap().is_empty());

        clock.set(expected_at - Duration::seconds(1));
        assert!(service.find_due(10).await.unwrap().is_empty());
        clock.set(expected_at);
        assert_eq!(service.find_due(10).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_retry_count_never_exceeds_max() {
    for max_retries in 0..4 {
        let (service, _, clock) = setup();
        let id = service
            .create(NewJob::new("t").max_retries(max_retries))
            .await
            .unwrap();

        let mut attempts = 0;
        loop {
            assert!(service.acquire_lock(id).await.unwrap());
            attempts += 1;
            let outcome = service.fail(id, "boom", true).await.unwrap();

            let job = service.get_job(id).await.unwrap().unwrap();
            assert!(job.retry_count <= job.max_retries);

            if outcome == FailOutcome::Failed {
                assert_eq!(job.status, JobStatus::Failed);
                break;
            }
            clock.advance(Duration::minutes(10));
        }
        assert_eq!(attempts, max_retries + 1);
    }
}

#[tokio::test]
async fn test_exhaustion_with_single_retry() {
    let (service, _, clock) = setup();
    service
        .register_job_type(
            JobTypeConfig::new("render_video", HttpMethod::Post, "/media/{payload_id}")
                .with_max_retries(1),
        )
        .await
        .unwrap();
    let id = service
        .create(NewJob::new("render_video").payload_id(5))
        .await
        .unwrap();

    assert!(service.acquire_lock(id).await.unwrap());
    service.fail(id, "first", true).await.unwrap();
    let job = service.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);

    clock.advance(Duration::seconds(60));
    assert!(service.acquire_lock(id).await.unwrap());
    service.fail(id, "second", true).await.unwrap();
    let job = service.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.last_error.as_deref(), Some("second"));
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn test_complete_after_retry_clears_nothing_but_status() {
    let (service, _, clock) = setup();
    let id = service.create(NewJob::new("t")).await.unwrap();

    assert!(service.acquire_lock(id).await.unwrap());
    service.fail(id, "flaky", true).await.unwrap();
    clock.advance(Duration::seconds(60));
    assert!(service.acquire_lock(id).await.unwrap());
    service.complete(id, "done on second attempt").await.unwrap();

    let job = service.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.last_error.as_deref(), Some("flaky"));
}

// ============================================================================
// Archive
// ============================================================================

#[tokio::test]
async fn test_archive_partition_invariant() {
    let (service, store, clock) = setup();

    let mut all = BTreeSet::new();
    for i in 0..12 {
        let id = service.create(NewJob::new("t").payload_id(i)).await.unwrap();
        all.insert(id);
        match i % 4 {
            0 => {
                service.acquire_lock(id).await.unwrap();
                service.complete(id, "ok").await.unwrap();
            }
            1 => {
                service.acquire_lock(id).await.unwrap();
                service.fail(id, "fatal", false).await.unwrap();
            }
            2 => {
                service.acquire_lock(id).await.unwrap();
            }
            _ => {}
        }
        clock.advance(Duration::minutes(1));
    }

    clock.advance(Duration::days(8));
    let cutoff = clock.now() - Duration::days(7);

    let mut archived_total = 0;
    loop {
        let moved = service.archive_resolved(cutoff, 2).await.unwrap();
        assert!(moved <= 2);
        archived_total += moved;

        let active: BTreeSet<JobId> = store.active_ids().await.into_iter().collect();
        let history: BTreeSet<JobId> = store.history_ids().await.into_iter().collect();
        assert!(active.is_disjoint(&history));
        assert_eq!(active.union(&history).copied().collect::<BTreeSet<_>>(), all);

        if moved == 0 {
            break;
        }
    }
    assert_eq!(archived_total, 6);

    for id in store.history_ids().await {
        let history = service.get_history(id).await.unwrap().unwrap();
        assert!(history.job.status.is_terminal());
        assert!(history.job.updated_at < cutoff);
        assert!(!service.job_events(id).await.unwrap().is_empty());
    }
    for id in store.active_ids().await {
        let job = service.get_job(id).await.unwrap().unwrap();
        assert!(!job.status.is_terminal());
    }
}

#[tokio::test]
async fn test_recent_resolutions_stay_active() {
    let (service, store, clock) = setup();
    let id = service.create(NewJob::new("t")).await.unwrap();
    service.acquire_lock(id).await.unwrap();
    service.complete(id, "ok").await.unwrap();

    clock.advance(Duration::days(2));
    let moved = service
        .archive_resolved(clock.now() - Duration::days(7), 100)
        .await
        .unwrap();
    assert_eq!(moved, 0);
    assert_eq!(store.active_ids().await, vec![id]);
}

#[tokio::test]
async fn test_purge_keeps_events() {
    let (service, store, clock) = setup();
    let id = service.create(NewJob::new("t")).await.unwrap();
    service.acquire_lock(id).await.unwrap();
    service.complete(id, "ok").await.unwrap();

    clock.advance(Duration::days(1));
    service.archive_resolved(clock.now(), 10).await.unwrap();
    let events_before = store.event_count().await;

    clock.advance(Duration::days(100));
    let purged = service
        .purge_history(clock.now() - Duration::days(90), 10)
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(store.history_ids().await.is_empty());
    assert_eq!(store.event_count().await, events_before);
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_event_trail_for_full_lifecycle() {
    let (service, _, clock) = setup();
    let id = service.create(NewJob::new("t").max_retries(1)).await.unwrap();

    service.acquire_lock(id).await.unwrap();
    clock.advance(Duration::seconds(5));
    service.fail(id, "busy", true).await.unwrap();
    clock.advance(Duration::seconds(60));
    service.acquire_lock(id).await.unwrap();
    clock.advance(Duration::seconds(5));
    service.complete(id, "ok").await.unwrap();

    let events = service.job_events(id).await.unwrap();
    let severities: Vec<EventSeverity> = events.iter().map(|event| event.severity).collect();
    assert_eq!(
        severities,
        vec![
            EventSeverity::Info,
            EventSeverity::Info,
            EventSeverity::Warning,
            EventSeverity::Info,
            EventSeverity::Info,
        ]
    );
    assert!(events.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
}
