//! External work item sources
//!
//! This module defines the two collaborator contracts the pipeline needs
//! from a source system:
//! - `ReferenceSearch`: paginated, faceted search returning lightweight hits
//! - `DetailSource`: full record for one identifier
//!
//! Bundled implementations talk to GitHub (merged pull requests) and Jira
//! (resolved tickets).

pub mod github;
pub mod jira;

pub use github::GitHubClient;
pub use jira::JiraClient;

use crate::evidence::{DetailRecord, SourceSystem, WorkItemReference};
use anyhow::Result;
use chrono::NaiveDate;

/// One search request: a facet over a date range, optionally scoped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Facet name, e.g. "authored"
    pub facet: String,
    /// First day included (merged/resolved on or after)
    pub start: NaiveDate,
    /// Last day included (merged/resolved on or before)
    pub end: NaiveDate,
    /// Repository (`owner/repo`) or project key to restrict to
    pub scope: Option<String>,
}

/// A single search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub identifier: String,
    pub title: String,
}

/// One page of search results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<SearchHit>,
    /// Whether another page may follow
    pub has_more: bool,
}

/// Paginated reference search against a source system
#[async_trait::async_trait]
pub trait ReferenceSearch: Send + Sync {
    /// System the hits belong to
    fn system(&self) -> SourceSystem;

    /// Facets to query, in priority order
    fn facets(&self) -> Vec<String>;

    /// Fetch one page (1-based) of results
    async fn search_page(&self, query: &SearchQuery, page: u32) -> Result<SearchPage>;
}

/// Full record lookup against a source system
#[async_trait::async_trait]
pub trait DetailSource: Send + Sync {
    /// Fetch the full record, including diff stats, files and participants
    async fn fetch_detail(&self, reference: &WorkItemReference) -> Result<DetailRecord>;
}

/// Body of a failed response, for error messages
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    body.chars().take(500).collect()
}
