//! Jira client: resolved ticket search and details

use super::{error_body, DetailSource, ReferenceSearch, SearchHit, SearchPage, SearchQuery};
use crate::evidence::{DetailRecord, SourceSystem, WorkItemReference};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

const DETAIL_FIELDS: &str = "summary,description,created,resolutiondate,assignee,reporter";

/// Resolved Jira settings
#[derive(Debug, Clone)]
pub struct JiraSettings {
    pub endpoint: String,
    pub email: String,
    pub token: String,
    pub facets: Vec<String>,
    pub page_size: u32,
}

/// Jira REST client
pub struct JiraClient {
    settings: JiraSettings,
    client: reqwest::Client,
}

impl JiraClient {
    /// Create a new Jira client
    pub fn new(settings: JiraSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
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
            .basic_auth(&self.settings.email, Some(&self.settings.token))
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = error_body(response).await;
            anyhow::bail!("Jira request failed: {} - {}", status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Jira response from {}", url))
    }
}

/// Build the JQL for a facet
pub fn build_jql(query: &SearchQuery) -> Result<String> {
    let who = match query.facet.as_str() {
        "assigned" => "assignee = currentUser()".to_string(),
        "reported" => {
            "reporter = currentUser() AND (assignee != currentUser() OR assignee is EMPTY)"
                .to_string()
        }
        other => anyhow::bail!("Unsupported Jira facet: {}", other),
    };

    // `resolved <= "day"` means midnight at the start of that day
    let day_after_end = query.end + Duration::days(1);

    let mut jql = format!(
        "{} AND resolution is not EMPTY AND resolved >= \"{}\" AND resolved < \"{}\"",
        who, query.start, day_after_end
    );

    if let Some(ref project) = query.scope {
        jql.push_str(&format!(" AND project = \"{}\"", project));
    }

    jql.push_str(" ORDER BY resolved ASC");
    Ok(jql)
}

/// Parse Jira's timestamp format (`2024-01-15T10:30:00.000+0000`)
pub fn parse_jira_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid Jira timestamp: {}", value))
}

#[async_trait::async_trait]
impl ReferenceSearch for JiraClient {
    fn system(&self) -> SourceSystem {
        SourceSystem::Jira
    }

    fn facets(&self) -> Vec<String> {
        self.settings.facets.clone()
    }

    async fn search_page(&self, query: &SearchQuery, page: u32) -> Result<SearchPage> {
        let jql = build_jql(query)?;
        let page_size = self.settings.page_size;
        let start_at = page.saturating_sub(1) * page_size;

        let result: SearchResponse = self
            .get_json(
                "/rest/api/2/search",
                &[
                    ("jql", jql),
                    ("startAt", start_at.to_string()),
                    ("maxResults", page_size.to_string()),
                    ("fields", "summary".to_string()),
                ],
            )
            .await?;

        let fetched = result.issues.len() as u64;
        let items = result
            .issues
            .into_iter()
            .map(|issue| SearchHit {
                identifier: issue.key,
                title: issue.fields.summary.unwrap_or_default(),
            })
            .collect();

        let has_more = fetched > 0 && (start_at as u64 + fetched) < result.total;

        Ok(SearchPage { items, has_more })
    }
}

#[async_trait::async_trait]
impl DetailSource for JiraClient {
    async fn fetch_detail(&self, reference: &WorkItemReference) -> Result<DetailRecord> {
        let issue: Issue = self
            .get_json(
                &format!("/rest/api/2/issue/{}", reference.identifier),
                &[("fields", DETAIL_FIELDS.to_string())],
            )
            .await?;

        let created_at = parse_jira_time(&issue.fields.created)?;

        let mut record = DetailRecord::from_reference(reference, created_at);
        if let Some(summary) = issue.fields.summary {
            record.title = summary;
        }
        record.body = issue.fields.description.unwrap_or_default();
        record.url = Some(format!("{}/browse/{}", self.settings.endpoint, issue.key));
        record.resolved_at = issue
            .fields
            .resolutiondate
            .as_deref()
            .map(parse_jira_time)
            .transpose()?;
        record.author = issue
            .fields
            .assignee
            .as_ref()
            .map(|user| user.display_name.clone());

        if let Some(reporter) = issue.fields.reporter {
            record.add_reviewer(&reporter.display_name);
        }

        Ok(record)
    }
}

// Jira API types

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    issues: Vec<SearchIssue>,
}

#[derive(Debug, Deserialize)]
struct SearchIssue {
    key: String,
    fields: SearchFields,
}

#[derive(Debug, Deserialize)]
struct SearchFields {
    summary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    key: String,
    fields: IssueFields,
}

#[derive(Debug, Deserialize)]
struct IssueFields {
    summary: Option<String>,
    description: Option<String>,
    created: String,
    resolutiondate: Option<String>,
    assignee: Option<JiraUser>,
    reporter: Option<JiraUser>,
}

#[derive(Debug, Deserialize)]
struct JiraUser {
    #[serde(rename = "displayName")]
    display_name: String,
}
