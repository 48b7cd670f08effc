//! Paginated, faceted reference discovery

use crate::error::SyncError;
use crate::evidence::WorkItemReference;
use crate::sources::{ReferenceSearch, SearchQuery};
use chrono::NaiveDate;
use std::collections::HashSet;

/// Walks every facet × scope of a source and merges the hits
pub struct Discoverer<'a> {
    search: &'a dyn ReferenceSearch,
    max_pages: u32,
}

impl<'a> Discoverer<'a> {
    pub fn new(search: &'a dyn ReferenceSearch, max_pages: u32) -> Self {
        Self {
            search,
            max_pages: max_pages.max(1),
        }
    }

    /// Discover references in `[start, end]`.
    ///
    /// Hits are deduplicated by identifier, keeping the first facet that
    /// found them. With a `cap`, discovery stops as soon as the merged set
    /// holds `cap` references.
    pub async fn discover(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        scopes: &[String],
        cap: Option<usize>,
    ) -> Result<Vec<WorkItemReference>, SyncError> {
        let system = self.search.system();
        let scopes: Vec<Option<String>> = if scopes.is_empty() {
            vec![None]
        } else {
            scopes.iter().cloned().map(Some).collect()
        };

        let mut seen = HashSet::new();
        let mut references = Vec::new();
        let full = |found: usize| cap.is_some_and(|cap| found >= cap);

        'facets: for facet in self.search.facets() {
            for scope in &scopes {
                let query = SearchQuery {
                    facet: facet.clone(),
                    start,
                    end,
                    scope: scope.clone(),
                };

                let mut page = 1;
                loop {
                    if full(references.len()) {
                        break 'facets;
                    }

                    let result = self.search.search_page(&query, page).await.map_err(|e| {
                        SyncError::Discovery(format!(
                            "{} {} search (page {}): {:#}",
                            system, facet, page, e
                        ))
                    })?;

                    tracing::debug!(
                        "{} {} page {}: {} hits",
                        system,
                        facet,
                        page,
                        result.items.len()
                    );

                    for hit in result.items {
                        if seen.insert(hit.identifier.clone()) {
                            references.push(WorkItemReference::new(
                                &facet,
                                system,
                                &hit.identifier,
                                &hit.title,
                            ));
                        }
                        if full(references.len()) {
                            break 'facets;
                        }
                    }

                    if !result.has_more {
                        break;
                    }
                    if page >= self.max_pages {
                        tracing::warn!(
                            "{} {} search stopped after {} pages; results may be incomplete",
                            system,
                            facet,
                            self.max_pages
                        );
                        break;
                    }
                    page += 1;
                }
            }
        }

        Ok(references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::SourceSystem;
    use crate::sources::{SearchHit, SearchPage};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves fixed pages per (facet, scope)
    struct PagedSearch {
        pages: HashMap<(String, Option<String>), Vec<Vec<&'static str>>>,
        calls: Mutex<Vec<(String, Option<String>, u32)>>,
    }

    impl PagedSearch {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with(mut self, facet: &str, scope: Option<&str>, pages: Vec<Vec<&'static str>>) -> Self {
            self.pages
                .insert((facet.to_string(), scope.map(|s| s.to_string())), pages);
            self
        }
    }

    #[async_trait::async_trait]
    impl ReferenceSearch for PagedSearch {
        fn system(&self) -> SourceSystem {
            SourceSystem::GitHub
        }

        fn facets(&self) -> Vec<String> {
            vec!["authored".to_string(), "reviewed".to_string()]
        }

        async fn search_page(&self, query: &SearchQuery, page: u32) -> anyhow::Result<SearchPage> {
            self.calls
                .lock()
                .unwrap()
                .push((query.facet.clone(), query.scope.clone(), page));

            let pages = self
                .pages
                .get(&(query.facet.clone(), query.scope.clone()))
                .cloned()
                .unwrap_or_default();
            let index = page as usize - 1;
            let items = pages
                .get(index)
                .map(|ids| {
                    ids.iter()
                        .map(|id| SearchHit {
                            identifier: id.to_string(),
                            title: format!("title of {}", id),
                        })
                        .collect()
                })
                .unwrap_or_default();

            Ok(SearchPage {
                items,
                has_more: index + 1 < pages.len(),
            })
        }
    }

    fn dates() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_pages_and_dedups_across_facets() {
        let search = PagedSearch::new()
            .with("authored", None, vec![vec!["a/b#1", "a/b#2"], vec!["a/b#3"]])
            .with("reviewed", None, vec![vec!["a/b#2", "a/b#4"]]);

        let (start, end) = dates();
        let refs = Discoverer::new(&search, 10)
            .discover(start, end, &[], None)
            .await
            .unwrap();

        let ids: Vec<&str> = refs.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a/b#1", "a/b#2", "a/b#3", "a/b#4"]);
        assert_eq!(refs[1].facet, "authored");
        assert_eq!(refs[3].facet, "reviewed");
        assert_eq!(refs[0].title, "title of a/b#1");
    }

    #[tokio::test]
    async fn test_queries_each_scope() {
        let search = PagedSearch::new()
            .with("authored", Some("a/api"), vec![vec!["a/api#1"]])
            .with("authored", Some("a/web"), vec![vec!["a/web#1"]]);

        let (start, end) = dates();
        let scopes = vec!["a/api".to_string(), "a/web".to_string()];
        let refs = Discoverer::new(&search, 10)
            .discover(start, end, &scopes, None)
            .await
            .unwrap();

        assert_eq!(refs.len(), 2);
        let calls = search.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|(_, scope, _)| scope.is_some()));
    }

    #[tokio::test]
    async fn test_cap_applies_to_merged_set() {
        let search = PagedSearch::new()
            .with("authored", None, vec![vec!["a/b#1", "a/b#2"]])
            .with("reviewed", None, vec![vec!["a/b#2", "a/b#3", "a/b#4"], vec!["a/b#5"]]);

        let (start, end) = dates();
        let refs = Discoverer::new(&search, 10)
            .discover(start, end, &[], Some(3))
            .await
            .unwrap();

        assert_eq!(refs.len(), 3);
        assert_eq!(refs[2].identifier, "a/b#3");
        // Never asked for the second reviewed page
        assert_eq!(search.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_cap_searches_nothing() {
        let search = PagedSearch::new().with("authored", None, vec![vec!["a/b#1"]]);

        let (start, end) = dates();
        let refs = Discoverer::new(&search, 10)
            .discover(start, end, &[], Some(0))
            .await
            .unwrap();

        assert!(refs.is_empty());
        assert!(search.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_pages_bounds_paging() {
        let pages: Vec<Vec<&'static str>> = vec![vec!["a/b#1"], vec!["a/b#2"], vec!["a/b#3"]];
        let search = PagedSearch::new().with("authored", None, pages);

        let (start, end) = dates();
        let refs = Discoverer::new(&search, 2)
            .discover(start, end, &[], None)
            .await
            .unwrap();
        assert_eq!(refs.len(), 2);
    }

    struct FailingSearch;

    #[async_trait::async_trait]
    impl ReferenceSearch for FailingSearch {
        fn system(&self) -> SourceSystem {
            SourceSystem::Jira
        }

        fn facets(&self) -> Vec<String> {
            vec!["assigned".to_string()]
        }

        async fn search_page(
            &self,
            _query: &SearchQuery,
            _page: u32,
        ) -> anyhow::Result<SearchPage> {
            anyhow::bail!("502 Bad Gateway")
        }
    }

    #[tokio::test]
    async fn test_search_error_fails_discovery() {
        let (start, end) = dates();
        let err = Discoverer::new(&FailingSearch, 10)
            .discover(start, end, &[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Discovery(ref msg) if msg.contains("502")));
    }
}
