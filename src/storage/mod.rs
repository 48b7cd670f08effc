//! SQLite storage layer for evidencesync
//!
//! This module handles persistent storage of:
//! - The criterion catalog
//! - Work items, their evidence rows and criterion links
//! - Cross references between work items
//! - Jobs and their progress logs
//! - Cached monthly snapshots
//!
//! The natural-key UNIQUE constraints are the only guard against duplicate
//! evidence from jobs racing against the same database file.

mod schema;

pub use schema::SCHEMA;

use crate::evidence::{AnalysisResult, ComponentTag, Criterion, DetailRecord, SourceSystem};
use crate::jobs::{JobLogEntry, JobStatus, JobView};
use crate::snapshot::MonthlySnapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Identifiers per existence-lookup statement (SQLite variable limit)
const LOOKUP_CHUNK: usize = 500;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", path.as_ref()))?;

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("Failed to enable WAL journal")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    /// Begin a transaction that holds the write lock from its first statement
    fn write_transaction(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin transaction")
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // ==================== Criteria ====================

    /// Insert or update a catalog entry
    pub fn upsert_criterion(&self, criterion: &Criterion) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO criteria (id, area, subarea, description) VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    area = excluded.area,
                    subarea = excluded.subarea,
                    description = excluded.description
                "#,
                params![
                    criterion.id,
                    criterion.area,
                    criterion.subarea,
                    criterion.description
                ],
            )
            .context("Failed to upsert criterion")?;
        Ok(())
    }

    /// The full criterion catalog, ordered by id
    pub fn criteria(&self) -> Result<Vec<Criterion>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, area, subarea, description FROM criteria ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok(Criterion {
                id: row.get(0)?,
                area: row.get(1)?,
                subarea: row.get(2)?,
                description: row.get(3)?,
            })
        })?;

        let mut criteria = Vec::new();
        for row in rows {
            criteria.push(row?);
        }

        Ok(criteria)
    }

    // ==================== Work Items ====================

    /// Which of the given identifiers already have a stored work item (any role)
    pub fn existing_identifiers(
        &self,
        system: SourceSystem,
        identifiers: &[String],
    ) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();

        for chunk in identifiers.chunks(LOOKUP_CHUNK) {
            let placeholders = (0..chunk.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT DISTINCT identifier FROM work_items WHERE source_system = ?1 AND identifier IN ({})",
                placeholders
            );

            let mut values: Vec<&str> = Vec::with_capacity(chunk.len() + 1);
            values.push(system.as_str());
            values.extend(chunk.iter().map(|s| s.as_str()));

            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;
            for row in rows {
                existing.insert(row?);
            }
        }

        Ok(existing)
    }

    /// Upsert a work item, its evidence and cross references in one transaction.
    ///
    /// Criterion links are written only when the evidence row is created;
    /// an update refreshes summary, category, scope and occurrence time only.
    pub fn store_evidence(
        &self,
        record: &DetailRecord,
        analysis: &AnalysisResult,
        cross_refs: &[CrossReference],
    ) -> Result<StoreOutcome> {
        let now = format_ts(Utc::now());
        let system = record.source_system().as_str();
        let identifier = record.identifier();
        let role = record.reference.facet.as_str();
        let content_hash = content_hash(record);

        let tx = self.write_transaction()?;

        let previous: Option<(String, String)> = tx
            .query_row(
                "SELECT id, content_hash FROM work_items WHERE source_system = ?1 AND identifier = ?2 AND role = ?3",
                params![system, identifier, role],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to look up work item")?;

        let candidate_id = previous
            .as_ref()
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tx.execute(
            r#"
            INSERT INTO work_items (
                id, source_system, identifier, role, title, body, url, author,
                reviewers, additions, deletions, changed_files, files, components,
                content_hash, created_at, resolved_at, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(source_system, identifier, role) DO UPDATE SET
                title = excluded.title,
                body = excluded.body,
                url = excluded.url,
                author = excluded.author,
                reviewers = excluded.reviewers,
                additions = excluded.additions,
                deletions = excluded.deletions,
                changed_files = excluded.changed_files,
                files = excluded.files,
                components = excluded.components,
                content_hash = excluded.content_hash,
                resolved_at = excluded.resolved_at,
                synced_at = excluded.synced_at
            "#,
            params![
                candidate_id,
                system,
                identifier,
                role,
                record.title,
                record.body,
                record.url,
                record.author,
                serde_json::to_string(&record.reviewers)?,
                record.additions as i64,
                record.deletions as i64,
                record.changed_files as i64,
                serde_json::to_string(&record.files)?,
                serde_json::to_string(&record.components)?,
                content_hash,
                format_ts(record.created_at),
                record.resolved_at.map(format_ts),
                now,
            ],
        )
        .context("Failed to upsert work item")?;

        // A concurrent job may have won the insert; always use the stored id
        let work_item_id: String = tx
            .query_row(
                "SELECT id FROM work_items WHERE source_system = ?1 AND identifier = ?2 AND role = ?3",
                params![system, identifier, role],
                |row| row.get(0),
            )
            .context("Failed to read back work item id")?;

        let work_item_created = previous.is_none() && work_item_id == candidate_id;
        let content_changed = previous
            .as_ref()
            .is_some_and(|(_, hash)| *hash != content_hash);

        let evidence_id = uuid::Uuid::new_v4().to_string();
        let occurred_at = format_ts(record.occurred_at());

        let inserted = tx
            .execute(
                r#"
                INSERT INTO evidence (
                    id, work_item_id, summary, category, scope, occurred_at, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                ON CONFLICT(work_item_id) DO NOTHING
                "#,
                params![
                    evidence_id,
                    work_item_id,
                    analysis.summary,
                    analysis.category.as_str(),
                    analysis.scope.as_str(),
                    occurred_at,
                    now,
                ],
            )
            .context("Failed to insert evidence")?;

        let evidence_created = inserted == 1;
        let mut links_created = 0;

        if evidence_created {
            for criterion_id in &analysis.criterion_ids {
                links_created += tx
                    .execute(
                        r#"
                        INSERT OR IGNORE INTO evidence_criteria (evidence_id, criterion_id)
                        SELECT ?1, id FROM criteria WHERE id = ?2
                        "#,
                        params![evidence_id, criterion_id],
                    )
                    .context("Failed to link criterion")?;
            }
        } else {
            tx.execute(
                r#"
                UPDATE evidence SET summary = ?1, category = ?2, scope = ?3, occurred_at = ?4, updated_at = ?5
                WHERE work_item_id = ?6
                "#,
                params![
                    analysis.summary,
                    analysis.category.as_str(),
                    analysis.scope.as_str(),
                    occurred_at,
                    now,
                    work_item_id,
                ],
            )
            .context("Failed to update evidence")?;
        }

        let mut cross_refs_created = 0;
        for xref in cross_refs {
            cross_refs_created += tx
                .execute(
                    r#"
                    INSERT OR IGNORE INTO work_item_links (
                        from_system, from_identifier, to_system, to_identifier, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        system,
                        identifier,
                        xref.to_system.as_str(),
                        xref.to_identifier,
                        now
                    ],
                )
                .context("Failed to upsert cross reference")?;
        }

        tx.commit().context("Failed to commit evidence")?;

        Ok(StoreOutcome {
            work_item_id,
            work_item_created,
            content_changed,
            evidence_created,
            links_created,
            cross_refs_created,
        })
    }

    /// Get a work item by natural key
    pub fn get_work_item(
        &self,
        system: SourceSystem,
        identifier: &str,
        role: &str,
    ) -> Result<Option<StoredWorkItem>> {
        let result = self
            .conn
            .query_row(
                r#"
                SELECT id, title, additions, deletions, changed_files, components, resolved_at
                FROM work_items WHERE source_system = ?1 AND identifier = ?2 AND role = ?3
                "#,
                params![system.as_str(), identifier, role],
                |row| {
                    Ok(WorkItemRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        additions: row.get(2)?,
                        deletions: row.get(3)?,
                        changed_files: row.get(4)?,
                        components: row.get(5)?,
                        resolved_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .context("Failed to get work item")?;

        result
            .map(|row| row.into_work_item(system, identifier, role))
            .transpose()
    }

    /// Get the evidence row attached to a work item
    pub fn get_evidence(&self, work_item_id: &str) -> Result<Option<StoredEvidence>> {
        let result = self
            .conn
            .query_row(
                "SELECT id, summary, category, scope, occurred_at FROM evidence WHERE work_item_id = ?1",
                params![work_item_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to get evidence")?;

        let Some((id, summary, category, scope, occurred_at)) = result else {
            return Ok(None);
        };

        let criterion_ids = self.criterion_links(&id)?;

        Ok(Some(StoredEvidence {
            id,
            summary,
            category,
            scope,
            occurred_at: parse_ts(&occurred_at)?,
            criterion_ids,
        }))
    }

    /// Criterion ids linked to an evidence row
    pub fn criterion_links(&self, evidence_id: &str) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT criterion_id FROM evidence_criteria WHERE evidence_id = ?1 ORDER BY criterion_id",
        )?;
        let rows = stmt.query_map(params![evidence_id], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Cross references recorded from a work item
    pub fn cross_references(
        &self,
        system: SourceSystem,
        identifier: &str,
    ) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT to_system, to_identifier FROM work_item_links
            WHERE from_system = ?1 AND from_identifier = ?2
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![system.as_str(), identifier], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;

        let mut links = Vec::new();
        for row in rows {
            links.push(row?);
        }
        Ok(links)
    }

    /// Evidence that occurred in `[start, end)`, oldest first
    pub fn evidence_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EvidenceEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT w.source_system, w.identifier, w.title, w.url, w.components,
                   e.summary, e.category, e.scope, e.occurred_at
            FROM evidence e
            JOIN work_items w ON w.id = e.work_item_id
            WHERE e.occurred_at >= ?1 AND e.occurred_at < ?2
            ORDER BY e.occurred_at, w.identifier
            "#,
        )?;

        let rows = stmt.query_map(params![format_ts(start), format_ts(end)], |row| {
            Ok(EvidenceEntryRow {
                source_system: row.get(0)?,
                identifier: row.get(1)?,
                title: row.get(2)?,
                url: row.get(3)?,
                components: row.get(4)?,
                summary: row.get(5)?,
                category: row.get(6)?,
                scope: row.get(7)?,
                occurred_at: row.get(8)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    // ==================== Jobs ====================

    /// Insert a new PENDING job
    pub fn insert_job(&self, id: &str, job_type: &str, request: &str) -> Result<()> {
        let now = format_ts(Utc::now());
        self.conn
            .execute(
                r#"
                INSERT INTO jobs (id, job_type, status, progress, request, created_at, updated_at)
                VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5)
                "#,
                params![id, job_type, JobStatus::Pending.as_str(), request, now],
            )
            .context("Failed to insert job")?;
        Ok(())
    }

    /// Append a log entry and move an active job to RUNNING at `progress`
    pub fn record_job_progress(&self, id: &str, progress: u8, message: &str) -> Result<()> {
        let now = format_ts(Utc::now());
        let tx = self.write_transaction()?;

        let updated = tx
            .execute(
                r#"
                UPDATE jobs SET status = ?1, progress = MAX(progress, ?2), updated_at = ?3
                WHERE id = ?4 AND status IN ('PENDING', 'RUNNING')
                "#,
                params![JobStatus::Running.as_str(), progress, now, id],
            )
            .context("Failed to update job progress")?;

        if updated == 0 {
            anyhow::bail!("Job {} is not active", id);
        }

        tx.execute(
            "INSERT INTO job_logs (job_id, timestamp, message) VALUES (?1, ?2, ?3)",
            params![id, now, message],
        )
        .context("Failed to append job log")?;

        tx.commit()?;
        Ok(())
    }

    /// Append a log entry without touching progress
    pub fn append_job_log(&self, id: &str, message: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO job_logs (job_id, timestamp, message) VALUES (?1, ?2, ?3)",
                params![id, format_ts(Utc::now()), message],
            )
            .context("Failed to append job log")?;
        Ok(())
    }

    /// Move an active job to a terminal status
    pub fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        progress: Option<u8>,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        anyhow::ensure!(status.is_terminal(), "{} is not a terminal status", status);

        let now = format_ts(Utc::now());
        let updated = self
            .conn
            .execute(
                r#"
                UPDATE jobs SET
                    status = ?1,
                    progress = COALESCE(?2, progress),
                    result = ?3,
                    error = ?4,
                    updated_at = ?5,
                    completed_at = ?5
                WHERE id = ?6 AND status IN ('PENDING', 'RUNNING')
                "#,
                params![status.as_str(), progress, result, error, now, id],
            )
            .context("Failed to finish job")?;

        if updated == 0 {
            anyhow::bail!("Job {} is not active", id);
        }
        Ok(())
    }

    /// Get a job with its full log
    pub fn get_job(&self, id: &str) -> Result<Option<JobView>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT id, job_type, status, progress, result, error, created_at, completed_at
                FROM jobs WHERE id = ?1
                "#,
                params![id],
                JobRow::from_row,
            )
            .optional()
            .context("Failed to get job")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut job = row.into_view()?;
        job.logs = self.job_logs(id)?;
        Ok(Some(job))
    }

    /// Most recent jobs, newest first, without logs
    pub fn recent_jobs(&self, limit: usize) -> Result<Vec<JobView>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, job_type, status, progress, result, error, created_at, completed_at
            FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit as i64], JobRow::from_row)?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.into_view()?);
        }
        Ok(jobs)
    }

    fn job_logs(&self, id: &str) -> Result<Vec<JobLogEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT timestamp, message FROM job_logs WHERE job_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut logs = Vec::new();
        for row in rows {
            let (timestamp, message) = row?;
            logs.push(JobLogEntry {
                timestamp: parse_ts(&timestamp)?,
                message,
            });
        }
        Ok(logs)
    }

    // ==================== Snapshots ====================

    /// Get the cached snapshot for a month (`YYYY-MM`)
    pub fn get_snapshot(&self, month: &str) -> Result<Option<MonthlySnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT month, content, is_complete, generated_at FROM monthly_snapshots WHERE month = ?1",
                params![month],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to get snapshot")?;

        row.map(|(month, content, is_complete, generated_at)| {
            Ok(MonthlySnapshot {
                month,
                content,
                is_complete,
                generated_at: parse_ts(&generated_at)?,
            })
        })
        .transpose()
    }

    /// Store a snapshot. A complete snapshot is never overwritten.
    pub fn save_snapshot(&self, snapshot: &MonthlySnapshot) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                r#"
                INSERT INTO monthly_snapshots (month, content, is_complete, generated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(month) DO UPDATE SET
                    content = excluded.content,
                    is_complete = excluded.is_complete,
                    generated_at = excluded.generated_at
                WHERE monthly_snapshots.is_complete = 0
                "#,
                params![
                    snapshot.month,
                    snapshot.content,
                    snapshot.is_complete,
                    format_ts(snapshot.generated_at)
                ],
            )
            .context("Failed to save snapshot")?;

        Ok(changed == 1)
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DatabaseStats {
            work_items: count("SELECT COUNT(*) FROM work_items")?,
            evidence: count("SELECT COUNT(*) FROM evidence")?,
            criterion_links: count("SELECT COUNT(*) FROM evidence_criteria")?,
            cross_references: count("SELECT COUNT(*) FROM work_item_links")?,
            criteria: count("SELECT COUNT(*) FROM criteria")?,
            jobs: count("SELECT COUNT(*) FROM jobs")?,
        })
    }
}

/// A cross reference to write alongside a work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossReference {
    pub to_system: SourceSystem,
    pub to_identifier: String,
}

/// What `store_evidence` changed
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub work_item_id: String,
    pub work_item_created: bool,
    /// Existing work item whose fetched content differs from the stored copy
    pub content_changed: bool,
    pub evidence_created: bool,
    pub links_created: usize,
    pub cross_refs_created: usize,
}

/// A stored work item, as read back
#[derive(Debug, Clone)]
pub struct StoredWorkItem {
    pub id: String,
    pub source_system: SourceSystem,
    pub identifier: String,
    pub role: String,
    pub title: String,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
    pub components: Vec<ComponentTag>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A stored evidence row with its criterion links
#[derive(Debug, Clone)]
pub struct StoredEvidence {
    pub id: String,
    pub summary: String,
    pub category: String,
    pub scope: String,
    pub occurred_at: DateTime<Utc>,
    pub criterion_ids: Vec<i64>,
}

/// Evidence joined with its work item, for reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub source_system: String,
    pub identifier: String,
    pub title: String,
    pub url: Option<String>,
    pub summary: String,
    pub category: String,
    pub scope: String,
    pub occurred_at: DateTime<Utc>,
    pub components: Vec<ComponentTag>,
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub work_items: usize,
    pub evidence: usize,
    pub criterion_links: usize,
    pub cross_references: usize,
    pub criteria: usize,
    pub jobs: usize,
}

/// Format a timestamp the way every column stores it
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid stored timestamp: {}", value))
}

fn content_hash(record: &DetailRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.title.as_bytes());
    hasher.update(record.body.as_bytes());
    hasher.update(record.additions.to_le_bytes());
    hasher.update(record.deletions.to_le_bytes());
    hasher.update(record.changed_files.to_le_bytes());
    for file in &record.files {
        hasher.update(file.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Component tags as found in stored rows: older rows hold plain names
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredComponent {
    Tag {
        name: String,
        #[serde(default, alias = "occurrenceCount", alias = "count")]
        occurrence_count: usize,
        #[serde(default)]
        depth: usize,
    },
    Name(String),
}

/// Decode a stored component list, normalizing legacy shapes
pub fn decode_components(json: &str) -> Result<Vec<ComponentTag>> {
    let stored: Vec<StoredComponent> =
        serde_json::from_str(json).context("Failed to decode component tags")?;

    Ok(stored
        .into_iter()
        .map(|component| match component {
            StoredComponent::Tag {
                name,
                occurrence_count,
                depth,
            } => {
                let depth = if depth == 0 { segment_count(&name) } else { depth };
                ComponentTag {
                    name,
                    occurrence_count: occurrence_count.max(1),
                    depth,
                }
            }
            StoredComponent::Name(name) => ComponentTag {
                depth: segment_count(&name),
                name,
                occurrence_count: 1,
            },
        })
        .collect())
}

fn segment_count(name: &str) -> usize {
    name.split('/').filter(|s| !s.is_empty()).count()
}

// Internal row types for database mapping

struct WorkItemRow {
    id: String,
    title: String,
    additions: i64,
    deletions: i64,
    changed_files: i64,
    components: String,
    resolved_at: Option<String>,
}

impl WorkItemRow {
    fn into_work_item(
        self,
        system: SourceSystem,
        identifier: &str,
        role: &str,
    ) -> Result<StoredWorkItem> {
        Ok(StoredWorkItem {
            id: self.id,
            source_system: system,
            identifier: identifier.to_string(),
            role: role.to_string(),
            title: self.title,
            additions: self.additions as u64,
            deletions: self.deletions as u64,
            changed_files: self.changed_files as u64,
            components: decode_components(&self.components)?,
            resolved_at: self.resolved_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

struct EvidenceEntryRow {
    source_system: String,
    identifier: String,
    title: String,
    url: Option<String>,
    components: String,
    summary: String,
    category: String,
    scope: String,
    occurred_at: String,
}

impl EvidenceEntryRow {
    fn into_entry(self) -> Result<EvidenceEntry> {
        Ok(EvidenceEntry {
            source_system: self.source_system,
            identifier: self.identifier,
            title: self.title,
            url: self.url,
            summary: self.summary,
            category: self.category,
            scope: self.scope,
            occurred_at: parse_ts(&self.occurred_at)?,
            components: decode_components(&self.components)?,
        })
    }
}

struct JobRow {
    id: String,
    job_type: String,
    status: String,
    progress: u8,
    result: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_type: row.get(1)?,
            status: row.get(2)?,
            progress: row.get(3)?,
            result: row.get(4)?,
            error: row.get(5)?,
            created_at: row.get(6)?,
            completed_at: row.get(7)?,
        })
    }

    fn into_view(self) -> Result<JobView> {
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| anyhow::anyhow!("Unknown job status: {}", self.status))?;

        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("Failed to decode job result")?;

        Ok(JobView {
            id: self.id,
            job_type: self.job_type,
            status,
            progress: self.progress,
            result,
            error: self.error,
            logs: Vec::new(),
            created_at: parse_ts(&self.created_at)?,
            completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}
