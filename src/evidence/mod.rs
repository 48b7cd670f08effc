//! Core evidence types
//!
//! These types flow through the pipeline:
//! - `WorkItemReference`: lightweight search hit from discovery
//! - `DetailRecord`: full record fetched for the delta set
//! - `AnalysisResult`: classification of one detail record
//! - `Criterion`: an entry of the read-only criterion catalog

mod xref;

pub use xref::extract_ticket_keys;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of criteria an item may be linked to
pub const MAX_CRITERIA_PER_ITEM: usize = 3;

/// External system a work item comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSystem {
    /// Code host (merged pull requests)
    GitHub,
    /// Issue tracker (resolved tickets)
    Jira,
}

impl SourceSystem {
    /// Storage / CLI form
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::GitHub => "github",
            SourceSystem::Jira => "jira",
        }
    }

    /// Job type recorded for a sync of this system
    pub fn job_type(&self) -> &'static str {
        match self {
            SourceSystem::GitHub => "github_sync",
            SourceSystem::Jira => "jira_sync",
        }
    }
}

impl std::fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceSystem {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(SourceSystem::GitHub),
            "jira" => Ok(SourceSystem::Jira),
            other => anyhow::bail!("Unknown source system: '{}'. Expected github or jira", other),
        }
    }
}

/// A search hit produced by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemReference {
    /// Facet that found this item (also its role, e.g. "authored")
    pub facet: String,
    /// System the item lives in
    pub source_system: SourceSystem,
    /// `owner/repo#number` for pull requests, ticket key for tickets
    pub identifier: String,
    /// Title as returned by search
    pub title: String,
}

impl WorkItemReference {
    /// Create a new reference
    pub fn new(facet: &str, source_system: SourceSystem, identifier: &str, title: &str) -> Self {
        Self {
            facet: facet.to_string(),
            source_system,
            identifier: identifier.to_string(),
            title: title.to_string(),
        }
    }
}

/// A component tag derived from changed file paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentTag {
    /// Directory prefix, e.g. `src/services/billing`
    pub name: String,
    /// Number of changed files under this prefix
    pub occurrence_count: usize,
    /// Number of path segments in the prefix
    pub depth: usize,
}

/// Full record fetched for an item in the delta set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailRecord {
    pub reference: WorkItemReference,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub reviewers: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub components: Vec<ComponentTag>,
}

impl DetailRecord {
    /// Create an empty record for a reference
    pub fn from_reference(reference: &WorkItemReference, created_at: DateTime<Utc>) -> Self {
        Self {
            reference: reference.clone(),
            title: reference.title.clone(),
            body: String::new(),
            url: None,
            author: None,
            reviewers: Vec::new(),
            additions: 0,
            deletions: 0,
            changed_files: 0,
            files: Vec::new(),
            created_at,
            resolved_at: None,
            components: Vec::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.reference.identifier
    }

    pub fn source_system(&self) -> SourceSystem {
        self.reference.source_system
    }

    /// When the work counts as done: merge/resolution time, else creation
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.resolved_at.unwrap_or(self.created_at)
    }

    /// Add a reviewer, keeping first-seen order and skipping the author
    pub fn add_reviewer(&mut self, login: &str) {
        if self.author.as_deref() == Some(login) {
            return;
        }
        if !self.reviewers.iter().any(|r| r == login) {
            self.reviewers.push(login.to_string());
        }
    }
}

/// Kind of work, as classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Feature,
    Bug,
    Refactor,
    Devex,
    Docs,
    Test,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Feature,
        Category::Bug,
        Category::Refactor,
        Category::Devex,
        Category::Docs,
        Category::Test,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Feature => "feature",
            Category::Bug => "bug",
            Category::Refactor => "refactor",
            Category::Devex => "devex",
            Category::Docs => "docs",
            Category::Test => "test",
            Category::Other => "other",
        }
    }

    /// Parse a category name, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Category::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Size of the work, as classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Small,
    Medium,
    Large,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Small, Scope::Medium, Scope::Large];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Small => "small",
            Scope::Medium => "medium",
            Scope::Large => "large",
        }
    }

    /// Parse a scope name, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Scope::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a single detail record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub identifier: String,
    pub summary: String,
    pub category: Category,
    pub scope: Scope,
    /// Component names (pull requests only)
    pub components: Vec<String>,
    /// At most `MAX_CRITERIA_PER_ITEM` catalog ids
    pub criterion_ids: Vec<i64>,
}

impl AnalysisResult {
    /// Neutral analysis used when classification output is unusable
    pub fn fallback(record: &DetailRecord) -> Self {
        Self {
            identifier: record.identifier().to_string(),
            summary: record.title.clone(),
            category: Category::Other,
            scope: Scope::Medium,
            components: tag_names(record),
            criterion_ids: Vec::new(),
        }
    }
}

/// Component names carried into an analysis (pull requests only)
pub fn tag_names(record: &DetailRecord) -> Vec<String> {
    match record.source_system() {
        SourceSystem::GitHub => record.components.iter().map(|t| t.name.clone()).collect(),
        SourceSystem::Jira => Vec::new(),
    }
}

/// An entry of the criterion catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: i64,
    pub area: String,
    #[serde(default)]
    pub subarea: String,
    pub description: String,
}
