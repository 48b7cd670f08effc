//! GitHub client: merged pull request search and details

use super::{error_body, DetailSource, ReferenceSearch, SearchHit, SearchPage, SearchQuery};
use crate::evidence::{DetailRecord, SourceSystem, WorkItemReference};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// The search API never returns more than this many results per query
const SEARCH_RESULT_CEILING: u64 = 1000;

/// Page size used for file and review listings
const LIST_PAGE_SIZE: usize = 100;

/// Upper bound on file listing pages (GitHub caps at 3000 files)
const MAX_FILE_PAGES: u32 = 30;

/// Resolved GitHub settings
#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub endpoint: String,
    pub username: String,
    pub token: String,
    pub facets: Vec<String>,
    pub page_size: u32,
}

/// GitHub REST client
pub struct GitHubClient {
    settings: GitHubSettings,
    client: reqwest::Client,
}

impl GitHubClient {
    /// Create a new GitHub client
    pub fn new(settings: GitHubSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("evidencesync/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { settings, client })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.settings.endpoint, path);

        let response = self
            .client
            .get(&url)
            .query(query)
            .bearer_auth(&self.settings.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = error_body(response).await;
            anyhow::bail!("GitHub request failed: {} - {}", status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse GitHub response from {}", url))
    }
}

/// Build the search query string for a facet
pub fn build_search_query(username: &str, query: &SearchQuery) -> Result<String> {
    let range = format!("merged:{}..{}", query.start, query.end);

    let mut q = match query.facet.as_str() {
        "authored" => format!("is:pr is:merged author:{} {}", username, range),
        "reviewed" => format!(
            "is:pr is:merged reviewed-by:{} -author:{} {}",
            username, username, range
        ),
        other => anyhow::bail!("Unsupported GitHub facet: {}", other),
    };

    if let Some(ref repo) = query.scope {
        q.push_str(&format!(" repo:{}", repo));
    }

    Ok(q)
}

/// Split `owner/repo#42` into its repository and number
pub fn parse_identifier(identifier: &str) -> Result<(&str, u64)> {
    let (repo, number) = identifier
        .rsplit_once('#')
        .ok_or_else(|| anyhow::anyhow!("Invalid pull request identifier: {}", identifier))?;

    if !repo.contains('/') {
        anyhow::bail!("Invalid repository in identifier: {}", identifier);
    }

    let number = number
        .parse::<u64>()
        .with_context(|| format!("Invalid pull request number in {}", identifier))?;

    Ok((repo, number))
}

/// Derive `owner/repo` from a search hit's `repository_url`
fn repository_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/repos/")?;
    let mut parts = rest.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{}/{}", owner, repo))
}

#[async_trait::async_trait]
impl ReferenceSearch for GitHubClient {
    fn system(&self) -> SourceSystem {
        SourceSystem::GitHub
    }

    fn facets(&self) -> Vec<String> {
        self.settings.facets.clone()
    }

    async fn search_page(&self, query: &SearchQuery, page: u32) -> Result<SearchPage> {
        let q = build_search_query(&self.settings.username, query)?;
        let per_page = self.settings.page_size;

        let result: SearchResponse = self
            .get_json(
                "/search/issues",
                &[
                    ("q", q),
                    ("per_page", per_page.to_string()),
                    ("page", page.to_string()),
                    ("sort", "created".to_string()),
                    ("order", "asc".to_string()),
                ],
            )
            .await?;

        let fetched = result.items.len();
        let items = result
            .items
            .into_iter()
            .filter_map(|item| {
                let repo = repository_from_url(&item.repository_url)?;
                Some(SearchHit {
                    identifier: format!("{}#{}", repo, item.number),
                    title: item.title,
                })
            })
            .collect();

        let seen = page as u64 * per_page as u64;
        let has_more = fetched == per_page as usize
            && seen < result.total_count
            && seen < SEARCH_RESULT_CEILING;

        Ok(SearchPage { items, has_more })
    }
}

#[async_trait::async_trait]
impl DetailSource for GitHubClient {
    async fn fetch_detail(&self, reference: &WorkItemReference) -> Result<DetailRecord> {
        let (repo, number) = parse_identifier(&reference.identifier)?;

        let pr: PullRequest = self
            .get_json(&format!("/repos/{}/pulls/{}", repo, number), &[])
            .await?;

        let mut record = DetailRecord::from_reference(reference, pr.created_at);
        record.title = pr.title;
        record.body = pr.body.unwrap_or_default();
        record.url = Some(pr.html_url);
        record.author = pr.user.map(|u| u.login);
        record.additions = pr.additions;
        record.deletions = pr.deletions;
        record.changed_files = pr.changed_files;
        record.resolved_at = pr.merged_at;

        for page in 1..=MAX_FILE_PAGES {
            let files: Vec<PullRequestFile> = self
                .get_json(
                    &format!("/repos/{}/pulls/{}/files", repo, number),
                    &[
                        ("per_page", LIST_PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;

            let count = files.len();
            record.files.extend(files.into_iter().map(|f| f.filename));
            if count < LIST_PAGE_SIZE {
                break;
            }
        }

        let reviews: Vec<Review> = self
            .get_json(
                &format!("/repos/{}/pulls/{}/reviews", repo, number),
                &[("per_page", LIST_PAGE_SIZE.to_string())],
            )
            .await?;

        for review in reviews {
            if let Some(user) = review.user {
                record.add_reviewer(&user.login);
            }
        }

        Ok(record)
    }
}

// GitHub API types

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    number: u64,
    title: String,
    repository_url: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    title: String,
    body: Option<String>,
    html_url: String,
    user: Option<User>,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    changed_files: u64,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct Review {
    user: Option<User>,
}
