//! Idempotent persistence of analyzed records

use crate::error::SyncError;
use crate::evidence::{extract_ticket_keys, AnalysisResult, DetailRecord, SourceSystem};
use crate::storage::{CrossReference, Database, StoreOutcome};
use serde::{Deserialize, Serialize};

/// Totals over a persisted set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOutcome {
    /// Evidence rows created
    pub created: usize,
    /// Evidence rows that already existed and were refreshed
    pub updated: usize,
    /// Criterion links written
    pub links_created: usize,
    /// Cross references written
    pub cross_refs: usize,
    /// Updates whose fetched content matched what was stored
    pub unchanged: usize,
}

impl PersistOutcome {
    fn add(&mut self, stored: &StoreOutcome) {
        if stored.evidence_created {
            self.created += 1;
        } else {
            self.updated += 1;
            if !stored.content_changed {
                self.unchanged += 1;
            }
        }
        self.links_created += stored.links_created;
        self.cross_refs += stored.cross_refs_created;
    }
}

/// Writes work items, evidence and cross references
pub struct Persister<'a> {
    db: &'a Database,
    ticket_projects: &'a [String],
}

impl<'a> Persister<'a> {
    /// `ticket_projects` restricts which ticket keys count as cross references
    pub fn new(db: &'a Database, ticket_projects: &'a [String]) -> Self {
        Self {
            db,
            ticket_projects,
        }
    }

    /// Ticket keys mentioned by a pull request
    pub fn cross_references(&self, record: &DetailRecord) -> Vec<CrossReference> {
        if record.source_system() != SourceSystem::GitHub {
            return Vec::new();
        }

        let text = format!("{}\n{}", record.title, record.body);
        extract_ticket_keys(&text, self.ticket_projects)
            .into_iter()
            .map(|key| CrossReference {
                to_system: SourceSystem::Jira,
                to_identifier: key,
            })
            .collect()
    }

    /// Persist one record in a single transaction
    pub fn persist(
        &self,
        record: &DetailRecord,
        analysis: &AnalysisResult,
    ) -> Result<StoreOutcome, SyncError> {
        if analysis.identifier != record.identifier() {
            return Err(SyncError::Persistence(format!(
                "analysis for {} does not match record {}",
                analysis.identifier,
                record.identifier()
            )));
        }

        let cross_refs = self.cross_references(record);
        let stored = self
            .db
            .store_evidence(record, analysis, &cross_refs)
            .map_err(SyncError::persistence)?;

        if !stored.work_item_created && !stored.content_changed {
            tracing::debug!("{} unchanged since last sync", record.identifier());
        }
        Ok(stored)
    }

    /// Persist records with their aligned analyses, reporting after each
    pub fn persist_all<F>(
        &self,
        records: &[DetailRecord],
        analyses: &[AnalysisResult],
        mut on_progress: F,
    ) -> Result<PersistOutcome, SyncError>
    where
        F: FnMut(usize, usize) -> Result<(), SyncError>,
    {
        if records.len() != analyses.len() {
            return Err(SyncError::Persistence(format!(
                "{} records but {} analyses",
                records.len(),
                analyses.len()
            )));
        }

        let mut outcome = PersistOutcome::default();
        for (index, (record, analysis)) in records.iter().zip(analyses).enumerate() {
            let stored = self.persist(record, analysis)?;
            outcome.add(&stored);
            on_progress(index + 1, records.len())?;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::WorkItemReference;
    use chrono::Utc;

    fn pr(title: &str, body: &str) -> DetailRecord {
        let reference = WorkItemReference::new("authored", SourceSystem::GitHub, "a/b#1", title);
        let mut record = DetailRecord::from_reference(&reference, Utc::now());
        record.body = body.to_string();
        record
    }

    #[test]
    fn test_cross_references_from_pull_requests() {
        let db = Database::open_in_memory().unwrap();
        let projects = vec!["PAY".to_string()];
        let persister = Persister::new(&db, &projects);

        let refs =
            persister.cross_references(&pr("PAY-12: refunds", "Also fixes OPS-3 and PAY-12"));
        assert_eq!(
            refs,
            vec![CrossReference {
                to_system: SourceSystem::Jira,
                to_identifier: "PAY-12".to_string()
            }]
        );

        let unrestricted = Persister::new(&db, &[]);
        assert_eq!(
            unrestricted
                .cross_references(&pr("PAY-12", "OPS-3"))
                .len(),
            2
        );
    }

    #[test]
    fn test_persist_all_counts_created_and_updated() {
        let db = Database::open_in_memory().unwrap();
        let persister = Persister::new(&db, &[]);
        let record = pr("PAY-12 refunds", "");
        let analysis = AnalysisResult::fallback(&record);

        let mut reported = Vec::new();
        let first = persister
            .persist_all(&[record.clone()], &[analysis.clone()], |done, total| {
                reported.push((done, total));
                Ok(())
            })
            .unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(first.cross_refs, 1);
        assert_eq!(reported, vec![(1, 1)]);

        let second = persister
            .persist_all(&[record], &[analysis], |_, _| Ok(()))
            .unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.cross_refs, 0);

        let edited = pr("PAY-12 refunds", "Now with partial refunds");
        let third = persister
            .persist_all(&[edited.clone()], &[AnalysisResult::fallback(&edited)], |_, _| Ok(()))
            .unwrap();
        assert_eq!(third.updated, 1);
        assert_eq!(third.unchanged, 0);
    }

    #[test]
    fn test_misaligned_analysis_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let persister = Persister::new(&db, &[]);
        let record = pr("x", "");
        let mut analysis = AnalysisResult::fallback(&record);
        analysis.identifier = "a/b#999".to_string();

        assert!(matches!(
            persister.persist(&record, &analysis),
            Err(SyncError::Persistence(_))
        ));
    }
}
