//! LLM-assisted batch classification
//!
//! This module handles:
//! - Talking to Ollama or OpenAI-compatible completion APIs
//! - Structured prompt generation for batches of work items
//! - Validating classification output against the enums and criterion catalog
//! - Retrying rate-limited requests with smaller requests and shorter bodies

mod client;
mod prompts;

pub use client::{LlmClient, LlmConfig, LlmResponse, MockLlmClient};
pub use prompts::{truncate_chars, ClassificationPrompt};

use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::evidence::{
    tag_names, AnalysisResult, Category, Criterion, DetailRecord, Scope, SourceSystem,
    MAX_CRITERIA_PER_ITEM,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Errors from a completion backend
#[derive(Debug, Error)]
pub enum LlmError {
    /// The service asked us to slow down (HTTP 429)
    #[error("rate limited by classification service")]
    RateLimited,

    /// The request could not be sent or was rejected
    #[error("{0}")]
    Request(String),

    /// The service replied with something other than a completion
    #[error("{0}")]
    Response(String),
}

/// A service that completes prompts
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse, LlmError>;
}

/// Batching and retry knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerSettings {
    pub batch_size: usize,
    pub max_retries: u32,
    pub backoff_secs: u64,
    pub body_truncation: usize,
    pub min_body_truncation: usize,
    pub max_files_per_item: usize,
}

impl From<&SyncSettings> for AnalyzerSettings {
    fn from(sync: &SyncSettings) -> Self {
        Self {
            batch_size: sync.batch_size.max(1),
            max_retries: sync.max_retries,
            backoff_secs: sync.backoff_secs,
            body_truncation: sync.body_truncation,
            min_body_truncation: sync.min_body_truncation.min(sync.body_truncation),
            max_files_per_item: sync.max_files_per_item,
        }
    }
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

/// Something worth reporting while a batch is analyzed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerEvent {
    /// `done` of `total` items have results
    Progress { done: usize, total: usize },
    /// Waiting before retry `attempt` with smaller requests
    RateLimited {
        attempt: u32,
        wait_secs: u64,
        request_size: usize,
        body_truncation: usize,
    },
    /// A response was unusable; its items got neutral defaults
    Fallback { items: usize, reason: String },
}

/// Classifies detail records in fixed batches
pub struct BatchAnalyzer<'a> {
    backend: &'a dyn CompletionBackend,
    settings: AnalyzerSettings,
}

impl<'a> BatchAnalyzer<'a> {
    /// Create a new batch analyzer
    pub fn new(backend: &'a dyn CompletionBackend, settings: AnalyzerSettings) -> Self {
        Self { backend, settings }
    }

    /// Classify `records`, returning one result per record in input order.
    ///
    /// A rate-limited request is retried after `(attempt + 1) × backoff_secs`
    /// with half as many items and half the body length, resuming with the
    /// items of the batch that have no result yet. Retry state resets for
    /// every fixed batch.
    pub async fn analyze<F>(
        &self,
        records: &[DetailRecord],
        criteria: &[Criterion],
        mut on_event: F,
    ) -> Result<Vec<AnalysisResult>, SyncError>
    where
        F: FnMut(AnalyzerEvent) -> Result<(), SyncError>,
    {
        let catalog: HashSet<i64> = criteria.iter().map(|c| c.id).collect();
        let mut results = Vec::with_capacity(records.len());

        for batch in records.chunks(self.settings.batch_size.max(1)) {
            let mut attempt = 0u32;
            let mut request_size = batch.len();
            let mut truncation = self.settings.body_truncation;
            let mut offset = 0;

            while offset < batch.len() {
                let end = (offset + request_size).min(batch.len());
                let slice = &batch[offset..end];
                let prompt = ClassificationPrompt::generate(
                    slice,
                    criteria,
                    truncation,
                    self.settings.max_files_per_item,
                );

                match self.backend.complete(&prompt).await {
                    Ok(response) => {
                        let parsed = parse_classification(&response.content, slice, &catalog);
                        let analyses = match parsed {
                            Ok(analyses) => analyses,
                            Err(e) => {
                                tracing::warn!("{}; using defaults for {} items", e, slice.len());
                                on_event(AnalyzerEvent::Fallback {
                                    items: slice.len(),
                                    reason: e.to_string(),
                                })?;
                                slice.iter().map(AnalysisResult::fallback).collect()
                            }
                        };

                        results.extend(analyses);
                        offset = end;
                        on_event(AnalyzerEvent::Progress {
                            done: results.len(),
                            total: records.len(),
                        })?;
                    }
                    Err(LlmError::RateLimited) => {
                        if attempt >= self.settings.max_retries {
                            return Err(SyncError::RateLimitExhausted { attempts: attempt });
                        }

                        let wait_secs = (attempt as u64 + 1) * self.settings.backoff_secs;
                        request_size = (request_size / 2).max(1);
                        truncation = (truncation / 2).max(self.settings.min_body_truncation);
                        attempt += 1;

                        tracing::warn!(
                            "Rate limited; retry {} in {}s with {} items per request",
                            attempt,
                            wait_secs,
                            request_size
                        );
                        on_event(AnalyzerEvent::RateLimited {
                            attempt,
                            wait_secs,
                            request_size,
                            body_truncation: truncation,
                        })?;

                        tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                    }
                    Err(e) => return Err(SyncError::Classification(e.to_string())),
                }
            }
        }

        Ok(results)
    }
}

/// One entry of a classification response, before validation
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    category: Option<serde_json::Value>,
    #[serde(default)]
    scope: Option<serde_json::Value>,
    #[serde(default)]
    components: Option<Vec<serde_json::Value>>,
    #[serde(default, alias = "criteria", alias = "criterionIds")]
    criterion_ids: Option<Vec<serde_json::Value>>,
}

/// Parse and validate a response aligned 1:1 with `records`.
///
/// Structural problems (not JSON, not an array, wrong length) fail the whole
/// response. Invalid field values fall back per field.
pub fn parse_classification(
    content: &str,
    records: &[DetailRecord],
    catalog: &HashSet<i64>,
) -> Result<Vec<AnalysisResult>, SyncError> {
    let json = strip_code_fence(content);

    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| SyncError::ClassificationParse(format!("invalid JSON: {}", e)))?;

    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(mut map) => match map.remove("analyses") {
            Some(serde_json::Value::Array(entries)) => entries,
            _ => {
                return Err(SyncError::ClassificationParse(
                    "expected an array of analyses".to_string(),
                ))
            }
        },
        _ => {
            return Err(SyncError::ClassificationParse(
                "expected an array of analyses".to_string(),
            ))
        }
    };

    if entries.len() != records.len() {
        return Err(SyncError::ClassificationParse(format!(
            "expected {} analyses, got {}",
            records.len(),
            entries.len()
        )));
    }

    entries
        .into_iter()
        .zip(records)
        .map(|(entry, record)| {
            let raw: RawAnalysis = serde_json::from_value(entry)
                .map_err(|e| SyncError::ClassificationParse(format!("invalid entry: {}", e)))?;
            Ok(validate(raw, record, catalog))
        })
        .collect()
}

fn validate(raw: RawAnalysis, record: &DetailRecord, catalog: &HashSet<i64>) -> AnalysisResult {
    let summary = raw
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| record.title.clone());

    let category = raw
        .category
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(Category::parse)
        .unwrap_or(Category::Other);

    let scope = raw
        .scope
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(Scope::parse)
        .unwrap_or(Scope::Medium);

    let components = match record.source_system() {
        SourceSystem::Jira => Vec::new(),
        SourceSystem::GitHub => {
            let mut refined: Vec<String> = Vec::new();
            for name in raw.components.unwrap_or_default() {
                if let Some(name) = name.as_str().map(str::trim).filter(|n| !n.is_empty()) {
                    if !refined.iter().any(|r| r == name) {
                        refined.push(name.to_string());
                    }
                }
            }
            if refined.is_empty() {
                tag_names(record)
            } else {
                refined
            }
        }
    };

    let mut criterion_ids = Vec::new();
    for id in raw.criterion_ids.unwrap_or_default() {
        let id = match id {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        if let Some(id) = id {
            if catalog.contains(&id) && !criterion_ids.contains(&id) {
                criterion_ids.push(id);
            }
        }
        if criterion_ids.len() == MAX_CRITERIA_PER_ITEM {
            break;
        }
    }

    AnalysisResult {
        identifier: record.identifier().to_string(),
        summary,
        category,
        scope,
        components,
        criterion_ids,
    }
}

/// Content inside a Markdown code fence, or the trimmed input
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };

    let after = &trimmed[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
    let body = &after[body_start..];

    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::WorkItemReference;
    use chrono::Utc;
    use std::sync::Mutex;

    fn record(n: usize) -> DetailRecord {
        let reference = WorkItemReference::new(
            "authored",
            SourceSystem::GitHub,
            &format!("acme/api#{}", n),
            &format!("Change {}", n),
        );
        let mut record = DetailRecord::from_reference(&reference, Utc::now());
        record.body = "b".repeat(2000);
        record.files = vec![format!("src/services/billing/item{}.rs", n)];
        record.components = crate::tagger::tag_components(&record.files);
        record
    }

    fn catalog() -> Vec<Criterion> {
        (1..=5)
            .map(|id| Criterion {
                id,
                area: "Area".to_string(),
                subarea: String::new(),
                description: format!("criterion {}", id),
            })
            .collect()
    }

    fn catalog_ids() -> HashSet<i64> {
        catalog().iter().map(|c| c.id).collect()
    }

    /// Count items in a prompt by their headings
    fn items_in(prompt: &str) -> usize {
        prompt.matches("\n### ").count()
    }

    fn echo_reply(prompt: &str) -> String {
        let entries: Vec<serde_json::Value> = (0..items_in(prompt))
            .map(|_| serde_json::json!({"summary": "done", "category": "feature", "scope": "small", "criterion_ids": [1]}))
            .collect();
        serde_json::Value::Array(entries).to_string()
    }

    #[test]
    fn test_parse_validates_fields() {
        let records = vec![record(1), record(2)];
        let content = r#"```json
        {"analyses": [
            {"summary": "Billing export", "category": "FEATURE", "scope": "large", "criterion_ids": [2, 2, 99, "3", 4, 5]},
            {"summary": "  ", "category": "chore", "scope": 3, "components": ["billing"]}
        ]}
        ```"#;

        let results = parse_classification(content, &records, &catalog_ids()).unwrap();
        assert_eq!(results[0].category, Category::Feature);
        assert_eq!(results[0].scope, Scope::Large);
        assert_eq!(results[0].criterion_ids, vec![2, 3, 4]);
        assert_eq!(results[0].components, tag_names(&records[0]));

        assert_eq!(results[1].summary, "Change 2");
        assert_eq!(results[1].category, Category::Other);
        assert_eq!(results[1].scope, Scope::Medium);
        assert_eq!(results[1].components, vec!["billing"]);
        assert!(results[1].criterion_ids.is_empty());
    }

    #[test]
    fn test_parse_rejects_structural_problems() {
        let records = vec![record(1), record(2)];
        let ids = catalog_ids();

        for bad in ["not json", r#"{"items": []}"#, r#"[{"summary": "one"}]"#, "42"] {
            let err = parse_classification(bad, &records, &ids).unwrap_err();
            assert!(matches!(err, SyncError::ClassificationParse(_)), "{}", bad);
        }
    }

    #[test]
    fn test_tickets_get_no_components() {
        let reference = WorkItemReference::new("assigned", SourceSystem::Jira, "PAY-1", "Refunds");
        let ticket = DetailRecord::from_reference(&reference, Utc::now());
        let results = parse_classification(
            r#"[{"summary": "Refunds", "components": ["payments"]}]"#,
            &[ticket],
            &catalog_ids(),
        )
        .unwrap();
        assert!(results[0].components.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_response_uses_defaults() {
        let backend = MockLlmClient::with_fallback(echo_reply);
        backend.push_reply("I could not classify these, sorry");

        let records: Vec<_> = (1..=12).map(record).collect();
        let analyzer = BatchAnalyzer::new(&backend, AnalyzerSettings::default());

        let mut fallbacks = 0;
        let results = analyzer
            .analyze(&records, &catalog(), |event| {
                if let AnalyzerEvent::Fallback { items, .. } = event {
                    fallbacks += items;
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 12);
        assert_eq!(fallbacks, 10);
        assert_eq!(results[0].category, Category::Other);
        assert_eq!(results[0].summary, "Change 1");
        assert_eq!(results[10].category, Category::Feature);
        assert_eq!(backend.prompts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_shrinks_and_backs_off() {
        let backend = MockLlmClient::with_fallback(echo_reply);
        backend.push_error(LlmError::RateLimited);
        backend.push_error(LlmError::RateLimited);

        let records: Vec<_> = (1..=10).map(record).collect();
        let analyzer = BatchAnalyzer::new(&backend, AnalyzerSettings::default());

        let waits = Mutex::new(Vec::new());
        let started = tokio::time::Instant::now();
        let results = analyzer
            .analyze(&records, &catalog(), |event| {
                if let AnalyzerEvent::RateLimited { wait_secs, .. } = event {
                    waits.lock().unwrap().push(wait_secs);
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.category == Category::Feature));
        assert_eq!(
            results.iter().map(|r| r.identifier.clone()).collect::<Vec<_>>(),
            records.iter().map(|r| r.identifier().to_string()).collect::<Vec<_>>()
        );
        assert_eq!(*waits.lock().unwrap(), vec![30, 60]);
        assert_eq!(started.elapsed(), Duration::from_secs(90));

        let sizes: Vec<usize> = backend.prompts().iter().map(|p| items_in(p)).collect();
        assert_eq!(sizes, vec![10, 5, 2, 2, 2, 2, 2]);

        let prompts = backend.prompts();
        assert!(prompts[0].contains(&"b".repeat(1200)));
        assert!(!prompts[2].contains(&"b".repeat(301)));
        assert!(prompts[2].contains(&"b".repeat(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_is_fatal() {
        let backend = MockLlmClient::with_fallback(echo_reply);
        for _ in 0..4 {
            backend.push_error(LlmError::RateLimited);
        }

        let records: Vec<_> = (1..=3).map(record).collect();
        let analyzer = BatchAnalyzer::new(&backend, AnalyzerSettings::default());
        let err = analyzer
            .analyze(&records, &catalog(), |_| Ok(()))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::RateLimitExhausted { attempts: 3 }));
        assert_eq!(backend.prompts().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_state_resets_per_batch() {
        let backend = MockLlmClient::with_fallback(echo_reply);
        backend.push_error(LlmError::RateLimited);

        let records: Vec<_> = (1..=20).map(record).collect();
        let analyzer = BatchAnalyzer::new(&backend, AnalyzerSettings::default());
        analyzer.analyze(&records, &catalog(), |_| Ok(())).await.unwrap();

        let sizes: Vec<usize> = backend.prompts().iter().map(|p| items_in(p)).collect();
        assert_eq!(sizes, vec![10, 5, 5, 10]);
    }

    #[tokio::test]
    async fn test_other_errors_are_fatal() {
        let backend = MockLlmClient::new();
        backend.push_error(LlmError::Request("503 Service Unavailable".to_string()));

        let analyzer = BatchAnalyzer::new(&backend, AnalyzerSettings::default());
        let err = analyzer
            .analyze(&[record(1)], &catalog(), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Classification(_)));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  [2]  "), "[2]");
        assert_eq!(strip_code_fence("Here you go:\n```\n[3]\n```\nThanks"), "[3]");
    }
}
