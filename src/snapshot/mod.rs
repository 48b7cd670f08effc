//! Monthly snapshots of stored evidence
//!
//! A snapshot caches the report for one calendar month. Snapshots of a
//! month still in progress go stale after a day; once a snapshot is
//! generated after its month ended it is complete and served forever.

use crate::storage::{Database, EvidenceEntry};
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Components listed in a report
const TOP_COMPONENTS: usize = 10;

/// A cached monthly report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySnapshot {
    /// `YYYY-MM`
    pub month: String,
    /// Serialized `MonthlyReport`
    pub content: String,
    pub is_complete: bool,
    pub generated_at: DateTime<Utc>,
}

/// Decides whether a cached snapshot must be regenerated
pub struct StalenessPolicy;

impl StalenessPolicy {
    /// Maximum age of an incomplete snapshot
    pub const MAX_AGE_HOURS: i64 = 24;

    /// True iff the snapshot is incomplete, was generated before its month
    /// ended, and is older than a day.
    pub fn is_stale(snapshot: &MonthlySnapshot, now: DateTime<Utc>) -> Result<bool> {
        let (_, month_end) = month_bounds(&snapshot.month)?;

        Ok(!snapshot.is_complete
            && snapshot.generated_at < month_end
            && now - snapshot.generated_at > Duration::hours(Self::MAX_AGE_HOURS))
    }
}

/// Report content stored in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyReport {
    pub month: String,
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_scope: BTreeMap<String, usize>,
    pub top_components: Vec<ComponentCount>,
    pub evidence: Vec<EvidenceEntry>,
}

/// How many evidence rows touched a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCount {
    pub name: String,
    pub count: usize,
}

/// A snapshot plus whether it was just generated
#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub snapshot: MonthlySnapshot,
    pub regenerated: bool,
}

/// Start (inclusive) and end (exclusive) of a `YYYY-MM` month, in UTC
pub fn month_bounds(month: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d")
        .with_context(|| format!("Invalid month '{}'. Expected YYYY-MM", month))?;

    let next = if start.month() == 12 {
        NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
    }
    .ok_or_else(|| anyhow::anyhow!("Month out of range: {}", month))?;

    let to_utc = |date: NaiveDate| {
        date.and_hms_opt(0, 0, 0)
            .map(|dt| Utc.from_utc_datetime(&dt))
            .ok_or_else(|| anyhow::anyhow!("Invalid date: {}", date))
    };

    Ok((to_utc(start)?, to_utc(next)?))
}

/// Build the report for a month from stored evidence
pub fn build_report(db: &Database, month: &str) -> Result<MonthlyReport> {
    let (start, end) = month_bounds(month)?;
    let evidence = db.evidence_between(start, end)?;

    let mut by_category = BTreeMap::new();
    let mut by_scope = BTreeMap::new();
    let mut component_counts: HashMap<&str, usize> = HashMap::new();
    let mut component_order: Vec<&str> = Vec::new();

    for entry in &evidence {
        *by_category.entry(entry.category.clone()).or_insert(0) += 1;
        *by_scope.entry(entry.scope.clone()).or_insert(0) += 1;

        for tag in &entry.components {
            let count = component_counts.entry(tag.name.as_str()).or_insert(0);
            if *count == 0 {
                component_order.push(tag.name.as_str());
            }
            *count += 1;
        }
    }

    let mut top_components: Vec<ComponentCount> = component_order
        .into_iter()
        .map(|name| ComponentCount {
            name: name.to_string(),
            count: component_counts[name],
        })
        .collect();
    top_components.sort_by(|a, b| b.count.cmp(&a.count));
    top_components.truncate(TOP_COMPONENTS);

    Ok(MonthlyReport {
        month: month.to_string(),
        total: evidence.len(),
        by_category,
        by_scope,
        top_components,
        evidence,
    })
}

/// Return the cached snapshot for `month`, regenerating it when missing,
/// stale, or `force`d. A complete snapshot is always served from cache.
pub fn monthly_snapshot(
    db: &Database,
    month: &str,
    now: DateTime<Utc>,
    force: bool,
) -> Result<SnapshotOutcome> {
    let (_, month_end) = month_bounds(month)?;

    if let Some(cached) = db.get_snapshot(month)? {
        let reuse = cached.is_complete || (!force && !StalenessPolicy::is_stale(&cached, now)?);
        if reuse {
            tracing::debug!("Snapshot {} served from cache", month);
            return Ok(SnapshotOutcome {
                snapshot: cached,
                regenerated: false,
            });
        }
    }

    let report = build_report(db, month)?;
    let snapshot = MonthlySnapshot {
        month: month.to_string(),
        content: serde_json::to_string(&report).context("Failed to serialize report")?,
        is_complete: now >= month_end,
        generated_at: now,
    };

    if db.save_snapshot(&snapshot)? {
        tracing::info!(
            "Generated snapshot {} ({} items, complete: {})",
            month,
            report.total,
            snapshot.is_complete
        );
        return Ok(SnapshotOutcome {
            snapshot,
            regenerated: true,
        });
    }

    // Another writer stored a complete snapshot first
    let stored = db
        .get_snapshot(month)?
        .ok_or_else(|| anyhow::anyhow!("Snapshot {} vanished after save", month))?;
    Ok(SnapshotOutcome {
        snapshot: stored,
        regenerated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{
        AnalysisResult, Category, DetailRecord, Scope, SourceSystem, WorkItemReference,
    };

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn snapshot(generated_at: DateTime<Utc>, is_complete: bool) -> MonthlySnapshot {
        MonthlySnapshot {
            month: "2024-03".to_string(),
            content: "{}".to_string(),
            is_complete,
            generated_at,
        }
    }

    #[test]
    fn test_month_bounds() {
        let (start, end) = month_bounds("2024-12").unwrap();
        assert_eq!(start, at(2024, 12, 1, 0));
        assert_eq!(end, at(2025, 1, 1, 0));
        assert!(month_bounds("2024-13").is_err());
        assert!(month_bounds("March").is_err());
    }

    #[test]
    fn test_staleness() {
        let generated = at(2024, 3, 10, 12);

        // Fresh within a day
        let open_month = snapshot(generated, false);
        assert!(!StalenessPolicy::is_stale(&open_month, at(2024, 3, 11, 11)).unwrap());
        // Older than a day, month still open at generation time
        assert!(StalenessPolicy::is_stale(&open_month, at(2024, 3, 11, 13)).unwrap());
        // Complete snapshots never go stale
        assert!(!StalenessPolicy::is_stale(&snapshot(generated, true), at(2025, 1, 1, 0)).unwrap());
        // Generated after the month ended
        let month_end = snapshot(at(2024, 4, 1, 0), false);
        assert!(!StalenessPolicy::is_stale(&month_end, at(2024, 5, 1, 0)).unwrap());
    }

    fn store(db: &Database, identifier: &str, resolved: DateTime<Utc>, category: Category) {
        let reference =
            WorkItemReference::new("authored", SourceSystem::GitHub, identifier, "Work");
        let mut record = DetailRecord::from_reference(&reference, resolved);
        record.resolved_at = Some(resolved);
        record.files = vec!["src/api/routes.rs".to_string()];
        record.components = crate::tagger::tag_components(&record.files);

        let analysis = AnalysisResult {
            identifier: identifier.to_string(),
            summary: "Did work".to_string(),
            category,
            scope: Scope::Small,
            components: Vec::new(),
            criterion_ids: Vec::new(),
        };
        db.store_evidence(&record, &analysis, &[]).unwrap();
    }

    #[test]
    fn test_report_counts_only_the_month() {
        let db = Database::open_in_memory().unwrap();
        store(&db, "acme/api#1", at(2024, 3, 2, 9), Category::Feature);
        store(&db, "acme/api#2", at(2024, 3, 30, 9), Category::Bug);
        store(&db, "acme/api#3", at(2024, 4, 1, 0), Category::Bug);

        let report = build_report(&db, "2024-03").unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.by_category.get("feature"), Some(&1));
        assert_eq!(report.by_category.get("bug"), Some(&1));
        assert_eq!(report.by_scope.get("small"), Some(&2));
        assert_eq!(report.top_components[0].count, 2);
    }

    #[test]
    fn test_snapshot_cache_and_completion() {
        let db = Database::open_in_memory().unwrap();
        store(&db, "acme/api#1", at(2024, 3, 2, 9), Category::Feature);

        let during = monthly_snapshot(&db, "2024-03", at(2024, 3, 15, 0), false).unwrap();
        assert!(during.regenerated);
        assert!(!during.snapshot.is_complete);

        let hit = monthly_snapshot(&db, "2024-03", at(2024, 3, 15, 12), false).unwrap();
        assert!(!hit.regenerated);

        let stale = monthly_snapshot(&db, "2024-03", at(2024, 3, 20, 0), false).unwrap();
        assert!(stale.regenerated);

        let after = monthly_snapshot(&db, "2024-03", at(2024, 4, 2, 0), false).unwrap();
        assert!(after.regenerated);
        assert!(after.snapshot.is_complete);

        store(&db, "acme/api#9", at(2024, 3, 31, 9), Category::Docs);
        let forced = monthly_snapshot(&db, "2024-03", at(2024, 6, 1, 0), true).unwrap();
        assert!(!forced.regenerated);
        assert!(forced.snapshot.is_complete);

        let report: MonthlyReport = serde_json::from_str(&forced.snapshot.content).unwrap();
        assert_eq!(report.total, 1);
    }
}
