//! Sequential detail fetching with per-item failure isolation

use crate::error::SyncError;
use crate::evidence::{DetailRecord, WorkItemReference};
use crate::sources::DetailSource;
use crate::tagger::tag_components;

/// Reported after every attempted item
#[derive(Debug)]
pub enum FetchEvent<'e> {
    Fetched {
        done: usize,
        total: usize,
        identifier: &'e str,
    },
    Failed {
        done: usize,
        total: usize,
        error: &'e SyncError,
    },
}

/// Records that were fetched, and the items that were skipped
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<DetailRecord>,
    pub failures: Vec<SyncError>,
}

/// Fetches full records one at a time and tags their components
pub struct DetailFetcher<'a> {
    source: &'a dyn DetailSource,
}

impl<'a> DetailFetcher<'a> {
    pub fn new(source: &'a dyn DetailSource) -> Self {
        Self { source }
    }

    /// Fetch every reference in order. A failed item is skipped and recorded
    /// as `SyncError::ItemFetch`; only an error from `on_event` aborts.
    pub async fn fetch_all<F>(
        &self,
        references: &[WorkItemReference],
        mut on_event: F,
    ) -> Result<FetchOutcome, SyncError>
    where
        F: FnMut(FetchEvent<'_>) -> Result<(), SyncError>,
    {
        let total = references.len();
        let mut outcome = FetchOutcome::default();

        for (index, reference) in references.iter().enumerate() {
            let done = index + 1;

            match self.source.fetch_detail(reference).await {
                Ok(mut record) => {
                    record.components = tag_components(&record.files);
                    on_event(FetchEvent::Fetched {
                        done,
                        total,
                        identifier: &reference.identifier,
                    })?;
                    outcome.records.push(record);
                }
                Err(e) => {
                    let error = SyncError::ItemFetch {
                        identifier: reference.identifier.clone(),
                        message: format!("{:#}", e),
                    };
                    tracing::warn!("{}", error);
                    on_event(FetchEvent::Failed {
                        done,
                        total,
                        error: &error,
                    })?;
                    outcome.failures.push(error);
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::SourceSystem;
    use chrono::Utc;

    struct FlakySource;

    #[async_trait::async_trait]
    impl DetailSource for FlakySource {
        async fn fetch_detail(
            &self,
            reference: &WorkItemReference,
        ) -> anyhow::Result<DetailRecord> {
            if reference.identifier.ends_with("#2") {
                anyhow::bail!("404 Not Found");
            }
            let mut record = DetailRecord::from_reference(reference, Utc::now());
            record.files = vec![
                "src/services/payments/refund.rs".to_string(),
                "src/services/payments/charge.rs".to_string(),
            ];
            Ok(record)
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_records_tagged() {
        let refs: Vec<_> = (1..=3)
            .map(|i| {
                let identifier = format!("a/b#{}", i);
                WorkItemReference::new("authored", SourceSystem::GitHub, &identifier, "t")
            })
            .collect();

        let mut events = Vec::new();
        let outcome = DetailFetcher::new(&FlakySource)
            .fetch_all(&refs, |event| {
                events.push(match event {
                    FetchEvent::Fetched { done, .. } => (done, true),
                    FetchEvent::Failed { done, .. } => (done, false),
                });
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert!(!outcome.failures[0].is_fatal());
        assert_eq!(events, vec![(1, true), (2, false), (3, true)]);
        assert_eq!(outcome.records[0].components[0].name, "src/services/payments");
    }
}
