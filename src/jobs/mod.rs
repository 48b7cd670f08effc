//! Long-running job lifecycle
//!
//! A job moves PENDING → RUNNING → COMPLETED | FAILED. Progress only goes
//! up, every checkpoint lands in the job log, and a terminal job is never
//! touched again. Observers poll; there is no cancellation.

use crate::storage::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// COMPLETED or FAILED
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A timestamped job log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// External shape of a job, as returned to status readers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub logs: Vec<JobLogEntry>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Creates jobs
pub struct JobOrchestrator;

impl JobOrchestrator {
    /// Insert a PENDING job and return a handle to drive it
    pub fn create<R: Serialize>(db: &Database, job_type: &str, request: &R) -> Result<JobHandle> {
        let id = uuid::Uuid::new_v4().to_string();
        let request = serde_json::to_string(request).context("Failed to serialize job request")?;

        db.insert_job(&id, job_type, &request)?;
        tracing::info!("Created {} job {}", job_type, id);

        Ok(JobHandle { id, progress: 0 })
    }
}

/// Exclusive handle on an active job.
///
/// `complete` and `fail` consume the handle, so a job reaches a terminal
/// status at most once through it.
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    progress: u8,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record a checkpoint and raise progress.
    ///
    /// # Panics
    ///
    /// If `progress` is above 100 or below the last checkpoint.
    pub fn advance(&mut self, db: &Database, progress: u8, message: &str) -> Result<()> {
        assert!(progress <= 100, "progress {} exceeds 100", progress);
        assert!(
            progress >= self.progress,
            "progress went backwards: {} -> {}",
            self.progress,
            progress
        );

        db.record_job_progress(&self.id, progress, message)?;
        self.progress = progress;
        tracing::debug!(job = %self.id, progress, "{}", message);
        Ok(())
    }

    /// Append a log line without moving progress
    pub fn log(&self, db: &Database, message: &str) -> Result<()> {
        db.append_job_log(&self.id, message)
    }

    /// Mark the job COMPLETED at 100% with its result
    pub fn complete<T: Serialize>(self, db: &Database, result: &T) -> Result<()> {
        let result = serde_json::to_string(result).context("Failed to serialize job result")?;
        db.finish_job(&self.id, JobStatus::Completed, Some(100), Some(&result), None)?;
        tracing::info!("Job {} completed", self.id);
        Ok(())
    }

    /// Mark the job FAILED, keeping progress and any partial result
    pub fn fail<T: Serialize>(self, db: &Database, error: &str, partial: Option<&T>) -> Result<()> {
        mark_failed(db, &self.id, error, partial)
    }
}

/// Move an active job to FAILED.
///
/// The status is written before the log line, and a log failure is only
/// warned about, so the job is terminal whenever this returns `Ok`.
pub fn mark_failed<T: Serialize>(
    db: &Database,
    id: &str,
    error: &str,
    partial: Option<&T>,
) -> Result<()> {
    let partial = partial
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to serialize partial result")?;

    db.finish_job(id, JobStatus::Failed, None, partial.as_deref(), Some(error))?;
    if let Err(e) = db.append_job_log(id, &format!("Failed: {}", error)) {
        tracing::warn!("Could not log failure of job {}: {:#}", id, e);
    }
    tracing::warn!("Job {} failed: {}", id, error);
    Ok(())
}

/// Read a job in its external shape
pub fn load_job(db: &Database, id: &str) -> Result<Option<JobView>> {
    db.get_job(id)
}

/// Most recent jobs, newest first
pub fn recent_jobs(db: &Database, limit: usize) -> Result<Vec<JobView>> {
    db.recent_jobs(limit)
}

/// Result of polling a job
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The job reached COMPLETED or FAILED
    Finished(JobView),
    /// The attempt budget ran out; carries the last observed state
    GaveUp(JobView),
}

impl PollOutcome {
    pub fn job(&self) -> &JobView {
        match self {
            PollOutcome::Finished(job) | PollOutcome::GaveUp(job) => job,
        }
    }
}

/// Poll a job at a fixed interval until it is terminal or `max_attempts`
/// reads have been made.
///
/// The database is reopened on every attempt so a job written by another
/// process is observed. Giving up never changes the job.
pub async fn poll_until_terminal<F, O>(
    open_db: F,
    id: &str,
    interval: Duration,
    max_attempts: u32,
    mut observe: O,
) -> Result<PollOutcome>
where
    F: Fn() -> Result<Database>,
    O: FnMut(&JobView),
{
    let mut last = None;

    for attempt in 0..max_attempts.max(1) {
        if attempt > 0 {
            tokio::time::sleep(interval).await;
        }

        let db = open_db()?;
        let job = load_job(&db, id)?.ok_or_else(|| anyhow::anyhow!("Job not found: {}", id))?;
        observe(&job);

        if job.status.is_terminal() {
            return Ok(PollOutcome::Finished(job));
        }
        last = Some(job);
    }

    last.map(PollOutcome::GaveUp)
        .ok_or_else(|| anyhow::anyhow!("Job not found: {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Counts {
        processed: usize,
    }

    #[test]
    fn test_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let mut job = JobOrchestrator::create(&db, "github_sync", &serde_json::json!({})).unwrap();

        let view = load_job(&db, job.id()).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Pending);
        assert_eq!(view.progress, 0);

        job.advance(&db, 5, "Starting").unwrap();
        job.advance(&db, 20, "Discovered 3 items").unwrap();
        job.advance(&db, 20, "Still discovering").unwrap();

        let view = load_job(&db, job.id()).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Running);
        assert_eq!(view.progress, 20);
        assert_eq!(view.logs.len(), 3);

        let id = job.id().to_string();
        job.complete(&db, &Counts { processed: 2 }).unwrap();

        let view = load_job(&db, &id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.progress, 100);
        assert_eq!(view.result.unwrap()["processed"], 2);
    }

    #[test]
    #[should_panic(expected = "progress went backwards")]
    fn test_progress_never_decreases() {
        let db = Database::open_in_memory().unwrap();
        let mut job = JobOrchestrator::create(&db, "jira_sync", &()).unwrap();
        job.advance(&db, 50, "halfway").unwrap();
        let _ = job.advance(&db, 40, "oops");
    }

    #[test]
    #[should_panic(expected = "exceeds 100")]
    fn test_progress_is_bounded() {
        let db = Database::open_in_memory().unwrap();
        let mut job = JobOrchestrator::create(&db, "jira_sync", &()).unwrap();
        let _ = job.advance(&db, 101, "too far");
    }

    #[test]
    fn test_failure_keeps_partial_result() {
        let db = Database::open_in_memory().unwrap();
        let mut job = JobOrchestrator::create(&db, "github_sync", &()).unwrap();
        job.advance(&db, 30, "Fetching").unwrap();

        let id = job.id().to_string();
        job.fail(&db, "discovery failed: 502", Some(&Counts { processed: 0 }))
            .unwrap();

        let view = load_job(&db, &id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.progress, 30);
        assert_eq!(view.error.as_deref(), Some("discovery failed: 502"));
        assert!(view.logs.last().unwrap().message.starts_with("Failed"));
        assert!(view.result.is_some());
    }

    #[test]
    fn test_failure_is_recorded_when_log_write_fails() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch(
            r#"
            CREATE TRIGGER reject_failure_log BEFORE INSERT ON job_logs
            WHEN NEW.message LIKE 'Failed:%'
            BEGIN SELECT RAISE(ABORT, 'log full'); END;
            "#,
        )
        .unwrap();

        let job = JobOrchestrator::create(&db, "jira_sync", &()).unwrap();
        let id = job.id().to_string();
        job.fail::<()>(&db, "discovery failed: 502", None).unwrap();

        let view = load_job(&db, &id).unwrap().unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.completed_at.is_some());
    }

    #[test]
    fn test_view_serialization_shape() {
        let db = Database::open_in_memory().unwrap();
        let job = JobOrchestrator::create(&db, "github_sync", &()).unwrap();
        let view = load_job(&db, job.id()).unwrap().unwrap();

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["type"], "github_sync");
        assert_eq!(json["status"], "PENDING");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("error").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_gives_up_without_touching_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let db = Database::open(&path).unwrap();
        let job = JobOrchestrator::create(&db, "github_sync", &()).unwrap();

        let mut seen = 0;
        let outcome = poll_until_terminal(
            || Database::open(&path),
            job.id(),
            Duration::from_millis(500),
            3,
            |_| seen += 1,
        )
        .await
        .unwrap();

        assert_eq!(seen, 3);
        assert!(matches!(outcome, PollOutcome::GaveUp(_)));
        assert_eq!(outcome.job().status, JobStatus::Pending);
        assert_eq!(load_job(&db, job.id()).unwrap().unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_poll_returns_terminal_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let db = Database::open(&path).unwrap();
        let job = JobOrchestrator::create(&db, "github_sync", &()).unwrap();
        let id = job.id().to_string();
        job.complete(&db, &()).unwrap();

        let outcome = poll_until_terminal(
            || Database::open(&path),
            &id,
            Duration::from_millis(1),
            5,
            |_| {},
        )
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            PollOutcome::Finished(ref j) if j.status == JobStatus::Completed
        ));
    }
}
