//! In-process job store for tests and local development.
//!
//! One async mutex guards all tables for the whole life of a unit of work,
//! so units are fully serialized. A unit edits a private copy of the tables
//! and swaps it in on commit; dropping it discards the copy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{JobqError, Result};

use super::store::{JobInsert, JobStore, UnitOfWork};
use super::{Job, JobEvent, JobHistory, JobId, JobStatus, JobTypeConfig, NewJobEvent};

#[derive(Debug, Clone, Default)]
struct Tables {
    job_types: HashMap<String, JobTypeConfig>,
    jobs: BTreeMap<JobId, Job>,
    history: BTreeMap<JobId, JobHistory>,
    events: Vec<JobEvent>,
    next_job_id: i64,
    next_event_id: i64,
}

/// In-memory [`JobStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids currently in the active table.
    pub async fn active_ids(&self) -> Vec<JobId> {
        self.tables.lock().await.jobs.keys().copied().collect()
    }

    /// Ids currently in the history table.
    pub async fn history_ids(&self) -> Vec<JobId> {
        self.tables.lock().await.history.keys().copied().collect()
    }

    /// Total events across all jobs.
    pub async fn event_count(&self) -> usize {
        self.tables.lock().await.events.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(InMemoryUnitOfWork { guard, working }))
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl InMemoryUnitOfWork {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.working
            .jobs
            .get_mut(&id)
            .ok_or_else(|| JobqError::job_not_found(id))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn job_type(&mut self, task_type: &str) -> Result<Option<JobTypeConfig>> {
        Ok(self.working.job_types.get(task_type).cloned())
    }

    async fn upsert_job_type(&mut self, config: &JobTypeConfig) -> Result<()> {
        self.working
            .job_types
            .insert(config.task_type.clone(), config.clone());
        Ok(())
    }

    async fn insert_job(&mut self, job: JobInsert<'_>) -> Result<JobId> {
        self.working.next_job_id += 1;
        let id = JobId(self.working.next_job_id);
        self.working.jobs.insert(
            id,
            Job {
                id,
                task_type: job.task_type.to_string(),
                payload_id: job.payload_id,
                payload: job.payload.map(str::to_string),
                status: JobStatus::Pending,
                retry_count: 0,
                max_retries: job.max_retries,
                last_error: None,
                scheduled_at: job.scheduled_at,
                started_at: None,
                completed_at: None,
                created_at: job.created_at,
                updated_at: job.created_at,
            },
        );
        Ok(id)
    }

    async fn get_job(&mut self, id: JobId) -> Result<Option<Job>> {
        Ok(self.working.jobs.get(&id).cloned())
    }

    // The unit already holds the table mutex.
    async fn get_job_for_update(&mut self, id: JobId) -> Result<Option<Job>> {
        self.get_job(id).await
    }

    async fn lock_pending(&mut self, id: JobId, now: DateTime<Utc>) -> Result<u64> {
        match self.working.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Processing;
                job.started_at = Some(now);
                job.updated_at = now;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn update_job(&mut self, job: &Job) -> Result<()> {
        let stored = self.job_mut(job.id)?;
        *stored = job.clone();
        Ok(())
    }

    async fn find_due(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        let mut due: Vec<Job> = self
            .working
            .jobs
            .values()
            .filter(|job| job.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn resolved_ids(&mut self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<JobId>> {
        let mut resolved: Vec<&Job> = self
            .working
            .jobs
            .values()
            .filter(|job| job.is_archivable(older_than))
            .collect();
        resolved.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(resolved.into_iter().take(limit).map(|job| job.id).collect())
    }

    async fn jobs_by_ids(&mut self, ids: &[JobId]) -> Result<Vec<Job>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.jobs.get(id).cloned())
            .collect())
    }

    async fn delete_jobs(&mut self, ids: &[JobId]) -> Result<u64> {
        let removed = ids
            .iter()
            .filter(|id| self.working.jobs.remove(*id).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn insert_history(&mut self, rows: &[JobHistory]) -> Result<()> {
        for row in rows {
            if self.working.history.contains_key(&row.job.id) {
                return Err(JobqError::new(
                    crate::error::ErrorCode::DuplicateRecord,
                    format!("Job {} is already archived", row.job.id),
                ));
            }
            self.working.history.insert(row.job.id, row.clone());
        }
        Ok(())
    }

    async fn get_history(&mut self, id: JobId) -> Result<Option<JobHistory>> {
        Ok(self.working.history.get(&id).cloned())
    }

    async fn purge_history(&mut self, older_than: DateTime<Utc>, limit: usize) -> Result<u64> {
        let mut expired: Vec<(DateTime<Utc>, JobId)> = self
            .working
            .history
            .values()
            .filter(|row| row.migrated_at < older_than)
            .map(|row| (row.migrated_at, row.job.id))
            .collect();
        expired.sort();
        expired.truncate(limit);

        for (_, id) in &expired {
            self.working.history.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn append_event(&mut self, event: &NewJobEvent) -> Result<()> {
        self.working.next_event_id += 1;
        self.working.events.push(JobEvent {
            id: self.working.next_event_id,
            job_id: event.job_id,
            timestamp: event.timestamp,
            severity: event.severity,
            message: event.message.clone(),
        });
        Ok(())
    }

    async fn events(&mut self, job_id: JobId) -> Result<Vec<JobEvent>> {
        let mut events: Vec<JobEvent> = self
            .working
            .events
            .iter()
            .filter(|event| event.job_id == job_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(task_type: &str, now: DateTime<Utc>) -> JobInsert<'_> {
        JobInsert {
            task_type,
            payload_id: None,
            payload: None,
            max_retries: 3,
            scheduled_at: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        let id = uow.insert_job(insert("parse_document", now)).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.active_ids().await, vec![id]);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_job(insert("parse_document", now)).await.unwrap();
        }

        assert!(store.active_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_lock_pending_is_conditional() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        let id = uow.insert_job(insert("parse_document", now)).await.unwrap();
        assert_eq!(uow.lock_pending(id, now).await.unwrap(), 1);
        assert_eq!(uow.lock_pending(id, now).await.unwrap(), 0);
        assert_eq!(uow.lock_pending(JobId(999), now).await.unwrap(), 0);

        let job = uow.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.started_at, Some(now));
    }

    #[tokio::test]
    async fn test_find_due_orders_by_creation() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let mut uow = store.begin().await.unwrap();
        let later = uow
            .insert_job(insert("b", now + chrono::Duration::seconds(1)))
            .await
            .unwrap();
        let earlier = uow.insert_job(insert("a", now)).await.unwrap();
        let mut future = insert("c", now);
        future.scheduled_at = Some(now + chrono::Duration::hours(1));
        uow.insert_job(future).await.unwrap();

        let due = uow
            .find_due(now + chrono::Duration::seconds(5), 10)
            .await
            .unwrap();
        let ids: Vec<JobId> = due.iter().map(|job| job.id).collect();
        assert_eq!(ids, vec![earlier, later]);

        let capped = uow.find_due(now + chrono::Duration::seconds(5), 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }
}
