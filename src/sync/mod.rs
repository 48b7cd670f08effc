//! The incremental sync pipeline
//!
//! One sync job runs five phases strictly in sequence, each checkpointed in
//! the job log:
//!
//! | Phase | Progress |
//! |---|---|
//! | discovery (`discover`) | 5 → 20 |
//! | delta filter (`delta`) | 25 |
//! | detail fetch (`fetch`) | 25 → 50 |
//! | classification (`crate::llm`) | 50 → 80 |
//! | persistence (`persist`) | 80 → 100 |

pub mod delta;
pub mod discover;
pub mod fetch;
pub mod persist;

pub use delta::{compute_delta, Delta};
pub use discover::Discoverer;
pub use fetch::{DetailFetcher, FetchEvent, FetchOutcome};
pub use persist::{PersistOutcome, Persister};

use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::evidence::SourceSystem;
use crate::jobs::{self, JobHandle, JobOrchestrator};
use crate::llm::{AnalyzerEvent, AnalyzerSettings, BatchAnalyzer, CompletionBackend};
use crate::sources::{DetailSource, ReferenceSearch};
use crate::storage::Database;
use anyhow::Result;
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Parameters of one sync job, stored with the job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// First day included; defaults to 1 January of the current year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// Last day included; defaults to today
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Repositories or projects; empty means the configured allow-list
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Re-process items that are already stored
    #[serde(default)]
    pub update_existing: bool,
    /// Process only a small capped sample
    #[serde(default)]
    pub dry_run: bool,
}

impl SyncRequest {
    /// Effective date range relative to `today`
    pub fn date_range(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), SyncError> {
        let start = match self.start_date {
            Some(start) => start,
            None => NaiveDate::from_ymd_opt(today.year(), 1, 1)
                .ok_or_else(|| SyncError::Configuration(format!("invalid year {}", today.year())))?,
        };
        let end = self.end_date.unwrap_or(today);

        if start > end {
            return Err(SyncError::Configuration(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok((start, end))
    }
}

/// Counts reported by a sync job, complete or partial
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub discovered: usize,
    pub existing: usize,
    pub delta: usize,
    pub fetched: usize,
    pub fetch_failures: usize,
    pub analyzed: usize,
    /// Items classified with neutral defaults
    pub fallbacks: usize,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    /// Updated items whose content had not changed
    pub unchanged: usize,
    pub links_created: usize,
    pub cross_refs: usize,
    pub dry_run: bool,
}

/// How a sync job ended
#[derive(Debug)]
pub struct SyncOutcome {
    pub job_id: String,
    pub summary: SyncSummary,
    /// Set when the job FAILED
    pub error: Option<SyncError>,
}

impl SyncOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs sync jobs for one source system
pub struct SyncPipeline<'a> {
    db: &'a Database,
    search: &'a dyn ReferenceSearch,
    details: &'a dyn DetailSource,
    backend: &'a dyn CompletionBackend,
    settings: SyncSettings,
    default_scopes: Vec<String>,
    ticket_projects: Vec<String>,
}

impl<'a> SyncPipeline<'a> {
    pub fn new(
        db: &'a Database,
        search: &'a dyn ReferenceSearch,
        details: &'a dyn DetailSource,
        backend: &'a dyn CompletionBackend,
        settings: SyncSettings,
    ) -> Self {
        Self {
            db,
            search,
            details,
            backend,
            settings,
            default_scopes: Vec::new(),
            ticket_projects: Vec::new(),
        }
    }

    /// Scopes used when a request names none
    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Project keys a ticket reference must use to become a cross reference
    pub fn with_ticket_projects(mut self, projects: Vec<String>) -> Self {
        self.ticket_projects = projects;
        self
    }

    pub fn system(&self) -> SourceSystem {
        self.search.system()
    }

    /// Create a job for `request` and run it to a terminal status.
    ///
    /// Pipeline failures end up in the job (and in `SyncOutcome::error`);
    /// the `Err` case is reserved for failing to record the job itself.
    pub async fn run(&self, request: &SyncRequest) -> Result<SyncOutcome> {
        let mut job = JobOrchestrator::create(self.db, self.system().job_type(), request)?;
        let job_id = job.id().to_string();
        let mut summary = SyncSummary {
            dry_run: request.dry_run,
            ..SyncSummary::default()
        };

        match self.execute(&mut job, request, &mut summary).await {
            Ok(()) => match job.complete(self.db, &summary) {
                Ok(()) => Ok(SyncOutcome {
                    job_id,
                    summary,
                    error: None,
                }),
                Err(e) => {
                    let error = SyncError::persistence(e.context("Failed to record completion"));
                    jobs::mark_failed(self.db, &job_id, &error.to_string(), Some(&summary))?;
                    Ok(SyncOutcome {
                        job_id,
                        summary,
                        error: Some(error),
                    })
                }
            },
            Err(error) => {
                job.fail(self.db, &error.to_string(), Some(&summary))?;
                Ok(SyncOutcome {
                    job_id,
                    summary,
                    error: Some(error),
                })
            }
        }
    }

    async fn execute(
        &self,
        job: &mut JobHandle,
        request: &SyncRequest,
        summary: &mut SyncSummary,
    ) -> Result<(), SyncError> {
        let db = self.db;
        let system = self.system();
        let (start, end) = request.date_range(Utc::now().date_naive())?;
        let cap = request.dry_run.then_some(self.settings.dry_run_limit);
        let scopes = if request.scopes.is_empty() {
            self.default_scopes.clone()
        } else {
            request.scopes.clone()
        };

        advance(
            job,
            db,
            5,
            &format!(
                "Starting {} sync for {}..{}{}",
                system,
                start,
                end,
                if request.dry_run { " (dry run)" } else { "" }
            ),
        )?;

        let criteria = db.criteria().map_err(SyncError::persistence)?;
        if criteria.is_empty() {
            return Err(SyncError::Configuration(
                "criterion catalog is empty; import one with `criteria import`".to_string(),
            ));
        }

        // Discovery
        let discovered = Discoverer::new(self.search, self.settings.max_pages)
            .discover(start, end, &scopes, cap)
            .await?;
        summary.discovered = discovered.len();
        advance(job, db, 20, &format!("Discovered {} items", discovered.len()))?;

        // Delta
        let delta = compute_delta(db, system, discovered, request.update_existing, cap)?;
        summary.existing = delta.existing;
        summary.delta = delta.items.len();
        advance(
            job,
            db,
            25,
            &format!(
                "{} items to process ({} already stored)",
                delta.items.len(),
                delta.existing
            ),
        )?;

        if delta.items.is_empty() {
            tracing::info!("Nothing new to sync for {}", system);
            return Ok(());
        }

        // Detail fetch
        let fetched = DetailFetcher::new(self.details)
            .fetch_all(&delta.items, |event| match event {
                FetchEvent::Fetched {
                    done,
                    total,
                    identifier,
                } => advance(
                    job,
                    db,
                    scaled(25, 25, done, total),
                    &format!("Fetched {} ({}/{})", identifier, done, total),
                ),
                FetchEvent::Failed { done, total, error } => advance(
                    job,
                    db,
                    scaled(25, 25, done, total),
                    &format!("Skipped: {}", error),
                ),
            })
            .await?;
        summary.fetched = fetched.records.len();
        summary.fetch_failures = fetched.failures.len();

        if fetched.records.is_empty() {
            advance(job, db, 50, "No items could be fetched")?;
            return Ok(());
        }

        // Classification
        let analyzer = BatchAnalyzer::new(self.backend, AnalyzerSettings::from(&self.settings));
        let mut fallbacks = 0;
        let mut analyzed = 0;
        let result = analyzer
            .analyze(&fetched.records, &criteria, |event| match event {
                AnalyzerEvent::Progress { done, total } => {
                    analyzed = done;
                    advance(
                        job,
                        db,
                        scaled(50, 30, done, total),
                        &format!("Analyzed {}/{} items", done, total),
                    )
                }
                AnalyzerEvent::RateLimited {
                    attempt,
                    wait_secs,
                    request_size,
                    ..
                } => job
                    .log(
                        db,
                        &format!(
                            "Rate limited; retry {} in {}s with {} items per request",
                            attempt, wait_secs, request_size
                        ),
                    )
                    .map_err(SyncError::persistence),
                AnalyzerEvent::Fallback { items, reason } => {
                    fallbacks += items;
                    job.log(db, &format!("Using defaults for {} items: {}", items, reason))
                        .map_err(SyncError::persistence)
                }
            })
            .await;
        summary.analyzed = analyzed;
        summary.fallbacks = fallbacks;
        let analyses = result?;

        // Persistence
        let persister = Persister::new(db, &self.ticket_projects);
        let persisted = persister.persist_all(&fetched.records, &analyses, |done, total| {
            advance(
                job,
                db,
                scaled(80, 20, done, total),
                &format!("Persisted {}/{} items", done, total),
            )
        })?;

        summary.created = persisted.created;
        summary.updated = persisted.updated;
        summary.unchanged = persisted.unchanged;
        summary.processed = persisted.created + persisted.updated;
        summary.links_created = persisted.links_created;
        summary.cross_refs = persisted.cross_refs;

        tracing::info!(
            "{} sync: {} discovered, {} processed ({} new, {} updated)",
            system,
            summary.discovered,
            summary.processed,
            summary.created,
            summary.updated
        );

        Ok(())
    }
}

/// Create a job that fails immediately, for requests rejected before any
/// collaborator could be built (e.g. missing credentials)
pub fn reject_request(
    db: &Database,
    system: SourceSystem,
    request: &SyncRequest,
    error: &SyncError,
) -> Result<String> {
    let job = JobOrchestrator::create(db, system.job_type(), request)?;
    let id = job.id().to_string();
    job.fail(db, &error.to_string(), None::<&SyncSummary>)?;
    Ok(id)
}

fn advance(
    job: &mut JobHandle,
    db: &Database,
    progress: u8,
    message: &str,
) -> Result<(), SyncError> {
    job.advance(db, progress, message)
        .map_err(SyncError::persistence)
}

/// `base + span × done / total`
fn scaled(base: u8, span: u8, done: usize, total: usize) -> u8 {
    let step = span as usize * done.min(total) / total.max(1);
    base + step as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{Criterion, DetailRecord, WorkItemReference};
    use crate::llm::MockLlmClient;
    use crate::sources::{SearchPage, SearchQuery};

    /// A source with nothing to sync
    struct QuietSource;

    #[async_trait::async_trait]
    impl ReferenceSearch for QuietSource {
        fn system(&self) -> SourceSystem {
            SourceSystem::Jira
        }

        fn facets(&self) -> Vec<String> {
            vec!["assigned".to_string()]
        }

        async fn search_page(&self, _query: &SearchQuery, _page: u32) -> Result<SearchPage> {
            Ok(SearchPage::default())
        }
    }

    #[async_trait::async_trait]
    impl DetailSource for QuietSource {
        async fn fetch_detail(&self, reference: &WorkItemReference) -> Result<DetailRecord> {
            anyhow::bail!("unexpected fetch of {}", reference.identifier)
        }
    }

    #[tokio::test]
    async fn test_failed_completion_leaves_job_failed() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_criterion(&Criterion {
            id: 1,
            area: "Delivery".to_string(),
            subarea: String::new(),
            description: "Ships".to_string(),
        })
        .unwrap();
        db.execute_batch(
            r#"
            CREATE TRIGGER reject_completion BEFORE UPDATE OF status ON jobs
            WHEN NEW.status = 'COMPLETED'
            BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;
            "#,
        )
        .unwrap();

        let backend = MockLlmClient::new();
        let pipeline = SyncPipeline::new(
            &db,
            &QuietSource,
            &QuietSource,
            &backend,
            SyncSettings::default(),
        );
        let outcome = pipeline.run(&SyncRequest::default()).await.unwrap();

        assert!(matches!(outcome.error, Some(SyncError::Persistence(_))));
        let job = jobs::load_job(&db, &outcome.job_id).unwrap().unwrap();
        assert_eq!(job.status, jobs::JobStatus::Failed);
        assert!(job.error.unwrap().contains("Failed to record completion"));
        assert_eq!(job.result.unwrap()["discovered"], 0);
    }

    #[test]
    fn test_default_date_range() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap();
        let (start, end) = SyncRequest::default().date_range(today).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(end, today);

        let inverted = SyncRequest {
            start_date: Some(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
            end_date: Some(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
            ..SyncRequest::default()
        };
        assert!(matches!(
            inverted.date_range(today),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn test_request_serialization() {
        let request: SyncRequest =
            serde_json::from_str(r#"{"startDate": "2024-02-01", "dryRun": true}"#).unwrap();
        assert_eq!(request.start_date, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert!(request.dry_run);
        assert!(!request.update_existing);
        assert!(request.scopes.is_empty());
    }

    #[test]
    fn test_scaled_progress() {
        assert_eq!(scaled(25, 25, 0, 4), 25);
        assert_eq!(scaled(25, 25, 2, 4), 37);
        assert_eq!(scaled(25, 25, 4, 4), 50);
        assert_eq!(scaled(80, 20, 1, 0), 80);
    }
}
