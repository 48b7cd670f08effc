//! Prompt templates for LLM interactions

use crate::evidence::{tag_names, Category, Criterion, DetailRecord, Scope, MAX_CRITERIA_PER_ITEM};

/// Prompt for classifying a batch of work items
pub struct ClassificationPrompt;

impl ClassificationPrompt {
    /// Generate a prompt covering `records`, in order.
    ///
    /// Bodies are cut to `body_truncation` characters and at most
    /// `max_files` file names are listed per item.
    pub fn generate(
        records: &[DetailRecord],
        criteria: &[Criterion],
        body_truncation: usize,
        max_files: usize,
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str(CLASSIFICATION_SYSTEM_PROMPT);
        prompt.push('\n');

        prompt.push_str("## Criteria\n\n");
        for criterion in criteria {
            if criterion.subarea.is_empty() {
                prompt.push_str(&format!(
                    "- [{}] {}: {}\n",
                    criterion.id, criterion.area, criterion.description
                ));
            } else {
                prompt.push_str(&format!(
                    "- [{}] {} / {}: {}\n",
                    criterion.id, criterion.area, criterion.subarea, criterion.description
                ));
            }
        }
        prompt.push('\n');

        prompt.push_str(&format!("## Items ({})\n\n", records.len()));
        for (index, record) in records.iter().enumerate() {
            prompt.push_str(&format!(
                "### {}. `{}` ({})\n\n",
                index + 1,
                record.identifier(),
                record.source_system()
            ));
            prompt.push_str(&format!("**Title:** {}\n", record.title));
            prompt.push_str(&format!("**Role:** {}\n", record.reference.facet));

            if record.additions > 0 || record.deletions > 0 || record.changed_files > 0 {
                prompt.push_str(&format!(
                    "**Size:** +{} / -{} across {} files\n",
                    record.additions, record.deletions, record.changed_files
                ));
            }

            if !record.files.is_empty() {
                let listed: Vec<&str> = record
                    .files
                    .iter()
                    .take(max_files)
                    .map(|f| f.as_str())
                    .collect();
                prompt.push_str(&format!("**Files:** {}", listed.join(", ")));
                if record.files.len() > listed.len() {
                    prompt.push_str(&format!(" (+{} more)", record.files.len() - listed.len()));
                }
                prompt.push('\n');
            }

            let components = tag_names(record);
            if !components.is_empty() {
                prompt.push_str(&format!("**Components:** {}\n", components.join(", ")));
            }

            let body = truncate_chars(record.body.trim(), body_truncation);
            if !body.is_empty() {
                prompt.push_str(&format!("\n**Description:**\n```\n{}\n```\n", body));
            }
            prompt.push('\n');
        }

        prompt.push_str(&classification_instructions(records.len()));

        prompt
    }
}

/// First `max` characters of `text`, marked when cut
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

const CLASSIFICATION_SYSTEM_PROMPT: &str = r#"# Work Evidence Classification

You are summarizing an engineer's completed work items (merged pull requests
and resolved tickets) so they can be used as evidence against a set of
performance criteria.

For every item, write a one-sentence summary of what was delivered, classify
it, and pick the criteria it best demonstrates.
"#;

fn classification_instructions(count: usize) -> String {
    let categories: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    let scopes: Vec<&str> = Scope::ALL.iter().map(|s| s.as_str()).collect();

    format!(
        r#"## Instructions

Respond with a JSON array of exactly {count} objects, one per item, in the same order as the items above. Each object has:

- `identifier`: the item identifier, copied verbatim
- `summary`: one sentence describing what was delivered
- `category`: one of {categories}
- `scope`: one of {scopes}
- `components`: for pull requests, the most relevant component names (may refine the listed ones); empty for tickets
- `criterion_ids`: up to {max_criteria} criterion ids from the list above, most relevant first

Respond ONLY with valid JSON, no other text.
"#,
        count = count,
        categories = categories.join(", "),
        scopes = scopes.join(", "),
        max_criteria = MAX_CRITERIA_PER_ITEM,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{SourceSystem, WorkItemReference};
    use chrono::Utc;

    fn record(files: usize, body: &str) -> DetailRecord {
        let reference =
            WorkItemReference::new("authored", SourceSystem::GitHub, "acme/api#3", "Add retries");
        let mut record = DetailRecord::from_reference(&reference, Utc::now());
        record.body = body.to_string();
        record.additions = 40;
        record.deletions = 4;
        record.changed_files = files as u64;
        record.files = (0..files).map(|i| format!("src/net/file{}.rs", i)).collect();
        record.components = crate::tagger::tag_components(&record.files);
        record
    }

    fn catalog() -> Vec<Criterion> {
        vec![Criterion {
            id: 7,
            area: "Technical".to_string(),
            subarea: "Reliability".to_string(),
            description: "Improves system resilience".to_string(),
        }]
    }

    #[test]
    fn test_prompt_contents() {
        let prompt =
            ClassificationPrompt::generate(&[record(2, "Retries on 503")], &catalog(), 500, 20);

        assert!(prompt.contains("`acme/api#3`"));
        assert!(prompt.contains("+40 / -4 across 2 files"));
        assert!(prompt.contains("[7] Technical / Reliability"));
        assert!(prompt.contains("Retries on 503"));
        assert!(prompt.contains("src/net"));
        assert!(prompt.contains("exactly 1 objects"));
        assert!(prompt.contains("feature, bug, refactor"));
    }

    #[test]
    fn test_file_list_and_body_are_capped() {
        let body = "x".repeat(300);
        let prompt = ClassificationPrompt::generate(&[record(30, &body)], &catalog(), 100, 5);

        assert!(prompt.contains("(+25 more)"));
        assert!(!prompt.contains("file5.rs"));
        assert!(prompt.contains(&format!("{}…", "x".repeat(100))));
        assert!(!prompt.contains(&"x".repeat(101)));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé…");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
