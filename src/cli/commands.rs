//! Command implementations

use super::{CriteriaCommand, OutputFormat, SyncArgs};
use crate::config::{Config, CONFIG_FILE, DATABASE_FILE};
use crate::error::SyncError;
use crate::evidence::{Criterion, SourceSystem};
use crate::jobs::{self, JobView, PollOutcome};
use crate::llm::LlmClient;
use crate::snapshot::{self, MonthlyReport};
use crate::sources::{DetailSource, GitHubClient, JiraClient, ReferenceSearch};
use crate::storage::Database;
use crate::sync::{self, SyncOutcome, SyncPipeline, SyncRequest};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Open the database inside `home`
pub fn open_database(home: &Path) -> Result<Database> {
    Database::open(home.join(DATABASE_FILE))
}

/// Create the home directory, config and database
pub fn init(home: &Path, force: bool) -> Result<()> {
    let config_path = home.join(CONFIG_FILE);
    if config_path.exists() && !force {
        anyhow::bail!(
            "Already initialized at {:?}. Use --force to reset the config.",
            home
        );
    }

    Config::default().save(home)?;
    let _db = open_database(home)?;

    println!("✓ Initialized evidencesync in {:?}", home);
    println!("  Database: {:?}", home.join(DATABASE_FILE));
    println!("  Config: {:?}", config_path);
    println!("\nNext: set github.username / jira.endpoint and llm.endpoint / llm.model,");
    println!("then import a criterion catalog with `evidencesync criteria import <file>`.");

    Ok(())
}

/// Run a sync job and print its outcome
pub async fn sync(
    home: &Path,
    system: SourceSystem,
    args: &SyncArgs,
    format: OutputFormat,
) -> Result<()> {
    let config = Config::load_or_default(home)?;
    let db = open_database(home)?;

    let request = SyncRequest {
        start_date: args.since,
        end_date: args.until,
        scopes: args.scopes.clone(),
        update_existing: args.update_existing,
        dry_run: args.dry_run,
    };

    let llm_config = match config.resolve_llm() {
        Ok(llm) => llm,
        Err(e) => return reject(&db, system, &request, e, format),
    };
    let backend = LlmClient::new(llm_config)?;

    let outcome = match system {
        SourceSystem::GitHub => {
            let settings = match config.resolve_github() {
                Ok(settings) => settings,
                Err(e) => return reject(&db, system, &request, e, format),
            };
            let client = GitHubClient::new(settings)?;
            run_pipeline(&db, &config, &client, &client, &backend, &request).await?
        }
        SourceSystem::Jira => {
            let settings = match config.resolve_jira() {
                Ok(settings) => settings,
                Err(e) => return reject(&db, system, &request, e, format),
            };
            let client = JiraClient::new(settings)?;
            run_pipeline(&db, &config, &client, &client, &backend, &request).await?
        }
    };

    report_outcome(&db, &outcome, format)
}

async fn run_pipeline(
    db: &Database,
    config: &Config,
    search: &dyn ReferenceSearch,
    details: &dyn DetailSource,
    backend: &LlmClient,
    request: &SyncRequest,
) -> Result<SyncOutcome> {
    let system = search.system();
    let pipeline = SyncPipeline::new(db, search, details, backend, config.sync.clone())
        .with_default_scopes(config.default_scopes(system))
        .with_ticket_projects(config.jira.projects.clone());

    pipeline.run(request).await
}

/// Record a job that failed on configuration and report it
fn reject(
    db: &Database,
    system: SourceSystem,
    request: &SyncRequest,
    error: SyncError,
    format: OutputFormat,
) -> Result<()> {
    let job_id = sync::reject_request(db, system, request, &error)?;
    if let Some(job) = jobs::load_job(db, &job_id)? {
        print_job(&job, format)?;
    }
    Err(error.into())
}

fn report_outcome(db: &Database, outcome: &SyncOutcome, format: OutputFormat) -> Result<()> {
    let job = jobs::load_job(db, &outcome.job_id)?
        .ok_or_else(|| anyhow::anyhow!("Job {} disappeared", outcome.job_id))?;

    match format {
        OutputFormat::Json => print_json(&job)?,
        OutputFormat::Text => {
            let s = &outcome.summary;
            println!("Job {} {}", job.id, job.status);
            println!("  Discovered: {} ({} already stored)", s.discovered, s.existing);
            println!("  Fetched: {} ({} skipped)", s.fetched, s.fetch_failures);
            println!("  Analyzed: {} ({} with defaults)", s.analyzed, s.fallbacks);
            println!(
                "  Persisted: {} new, {} updated ({} unchanged), {} criterion links, {} cross references",
                s.created, s.updated, s.unchanged, s.links_created, s.cross_refs
            );
            if s.dry_run {
                println!("  (dry run)");
            }
        }
    }

    match &outcome.error {
        Some(error) => Err(anyhow::anyhow!("Sync failed: {}", error)),
        None => Ok(()),
    }
}

/// Show one job
pub fn show_job(home: &Path, id: &str, format: OutputFormat) -> Result<()> {
    let db = open_database(home)?;
    let job = jobs::load_job(&db, id)?.ok_or_else(|| anyhow::anyhow!("Job not found: {}", id))?;
    print_job(&job, format)
}

/// List recent jobs
pub fn list_jobs(home: &Path, limit: usize, format: OutputFormat) -> Result<()> {
    let db = open_database(home)?;
    let recent = jobs::recent_jobs(&db, limit)?;

    match format {
        OutputFormat::Json => print_json(&recent)?,
        OutputFormat::Text => {
            if recent.is_empty() {
                println!("No jobs yet.");
            }
            for job in &recent {
                println!(
                    "{}  {:<11} {:<9} {:>3}%  {}",
                    job.id,
                    job.job_type,
                    job.status.as_str(),
                    job.progress,
                    job.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }
    Ok(())
}

/// Poll a job until it is terminal
pub async fn watch(
    home: &Path,
    id: &str,
    interval_ms: u64,
    max_attempts: u32,
    format: OutputFormat,
) -> Result<()> {
    let mut last_progress = None;

    let outcome = jobs::poll_until_terminal(
        || open_database(home),
        id,
        Duration::from_millis(interval_ms),
        max_attempts,
        |job| {
            if format == OutputFormat::Text && last_progress != Some(job.progress) {
                let message = job.logs.last().map(|l| l.message.as_str()).unwrap_or("");
                println!("[{:>3}%] {} {}", job.progress, job.status, message);
                last_progress = Some(job.progress);
            }
        },
    )
    .await?;

    match outcome {
        PollOutcome::Finished(job) => print_job(&job, format),
        PollOutcome::GaveUp(job) => {
            if format == OutputFormat::Json {
                print_json(&job)?;
            }
            anyhow::bail!(
                "Gave up after {} polls; job {} is still {} at {}%",
                max_attempts,
                job.id,
                job.status,
                job.progress
            )
        }
    }
}

/// Catalog file layout
#[derive(Debug, Serialize, Deserialize)]
struct CriteriaFile {
    #[serde(default)]
    criteria: Vec<Criterion>,
}

/// Handle criteria commands
pub fn criteria(home: &Path, command: &CriteriaCommand, format: OutputFormat) -> Result<()> {
    let db = open_database(home)?;

    match command {
        CriteriaCommand::Import { file } => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let parsed: CriteriaFile = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", file))?;

            if parsed.criteria.is_empty() {
                anyhow::bail!("No [[criteria]] entries in {:?}", file);
            }

            for criterion in &parsed.criteria {
                db.upsert_criterion(criterion)?;
            }
            println!("✓ Imported {} criteria", parsed.criteria.len());
        }

        CriteriaCommand::List => {
            let catalog = db.criteria()?;
            match format {
                OutputFormat::Json => print_json(&catalog)?,
                OutputFormat::Text => {
                    if catalog.is_empty() {
                        println!("Criterion catalog is empty.");
                    }
                    for c in &catalog {
                        if c.subarea.is_empty() {
                            println!("[{}] {}: {}", c.id, c.area, c.description);
                        } else {
                            println!("[{}] {} / {}: {}", c.id, c.area, c.subarea, c.description);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Show the report for a month
pub fn show_snapshot(home: &Path, month: &str, force: bool, format: OutputFormat) -> Result<()> {
    let db = open_database(home)?;
    let outcome = snapshot::monthly_snapshot(&db, month, chrono::Utc::now(), force)?;
    let report: MonthlyReport = serde_json::from_str(&outcome.snapshot.content)
        .context("Failed to decode cached report")?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("Evidence for {}", report.month);
            println!("==================\n");
            println!(
                "Items: {}  ({}{})",
                report.total,
                if outcome.snapshot.is_complete { "complete" } else { "in progress" },
                if outcome.regenerated { ", regenerated" } else { ", cached" }
            );

            println!("\nBy category:");
            for (category, count) in &report.by_category {
                println!("  {:<10} {}", category, count);
            }

            println!("\nBy scope:");
            for (scope, count) in &report.by_scope {
                println!("  {:<10} {}", scope, count);
            }

            if !report.top_components.is_empty() {
                println!("\nTop components:");
                for component in &report.top_components {
                    println!("  {:<40} {}", component.name, component.count);
                }
            }

            println!();
            for entry in &report.evidence {
                println!(
                    "  {} [{}/{}] {}: {}",
                    entry.occurred_at.format("%Y-%m-%d"),
                    entry.category,
                    entry.scope,
                    entry.identifier,
                    entry.summary
                );
            }
        }
    }
    Ok(())
}

/// Handle config command
pub fn handle_config(home: &Path, show: bool, reset: bool) -> Result<()> {
    if show && reset {
        anyhow::bail!("--show and --reset cannot be combined");
    }

    if reset {
        Config::default().save(home)?;
        println!("✓ Configuration reset to defaults");
        return Ok(());
    }

    let config = Config::load_or_default(home)?;

    println!("evidencesync Configuration");
    println!("==========================\n");
    println!("Home: {:?}", home);

    println!("\n[github]");
    println!("  endpoint: {}", config.github.endpoint);
    println!("  username: {}", config.github.username.as_deref().unwrap_or("(not set)"));
    println!("  token: {}", mask(config.github.token.as_deref()));
    println!("  repositories: {:?}", config.github.repositories);
    println!("  facets: {:?}", config.github.facets);

    println!("\n[jira]");
    println!("  endpoint: {}", config.jira.endpoint.as_deref().unwrap_or("(not set)"));
    println!("  email: {}", config.jira.email.as_deref().unwrap_or("(not set)"));
    println!("  token: {}", mask(config.jira.token.as_deref()));
    println!("  projects: {:?}", config.jira.projects);
    println!("  facets: {:?}", config.jira.facets);

    println!("\n[llm]");
    println!("  endpoint: {}", config.llm.endpoint.as_deref().unwrap_or("(not set)"));
    println!("  model: {}", config.llm.model.as_deref().unwrap_or("(not set)"));
    println!("  api_key: {}", mask(config.llm.api_key.as_deref()));

    println!("\n[sync]");
    println!("  batch_size: {}", config.sync.batch_size);
    println!("  max_retries: {}", config.sync.max_retries);
    println!("  backoff_secs: {}", config.sync.backoff_secs);
    println!("  dry_run_limit: {}", config.sync.dry_run_limit);

    if let Ok(db) = open_database(home) {
        let stats = db.get_stats()?;
        println!("\nDatabase:");
        println!("  Work items: {}", stats.work_items);
        println!("  Evidence: {}", stats.evidence);
        println!("  Criterion links: {}", stats.criterion_links);
        println!("  Cross references: {}", stats.cross_references);
        println!("  Criteria: {}", stats.criteria);
        println!("  Jobs: {}", stats.jobs);
    }

    Ok(())
}

fn mask(secret: Option<&str>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => "(set)",
        _ => "(not set)",
    }
}

/// Print a job in the requested format
pub fn print_job(job: &JobView, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(job),
        OutputFormat::Text => {
            print_job_text(job);
            Ok(())
        }
    }
}

/// Print a job as text
pub fn print_job_text(job: &JobView) {
    println!("Job {}", job.id);
    println!("  Type: {}", job.job_type);
    println!("  Status: {} ({}%)", job.status, job.progress);
    println!("  Created: {}", job.created_at.to_rfc3339());
    if let Some(completed) = job.completed_at {
        println!("  Completed: {}", completed.to_rfc3339());
    }
    if let Some(ref error) = job.error {
        println!("  Error: {}", error);
    }
    if !job.logs.is_empty() {
        println!("\n  Log:");
        for entry in &job.logs {
            println!("    {}  {}", entry.timestamp.format("%H:%M:%S"), entry.message);
        }
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criteria_import_and_list() {
        let home = tempfile::tempdir().unwrap();
        let file = home.path().join("criteria.toml");
        std::fs::write(
            &file,
            r#"
            [[criteria]]
            id = 1
            area = "Delivery"
            description = "Ships incrementally"

            [[criteria]]
            id = 2
            area = "Technical"
            subarea = "Quality"
            description = "Writes maintainable code"
            "#,
        )
        .unwrap();

        criteria(
            home.path(),
            &CriteriaCommand::Import { file: file.clone() },
            OutputFormat::Text,
        )
        .unwrap();

        let db = open_database(home.path()).unwrap();
        let catalog = db.criteria().unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[1].subarea, "Quality");
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let home = tempfile::tempdir().unwrap();
        init(home.path(), false).unwrap();
        assert!(home.path().join(CONFIG_FILE).exists());
        assert!(init(home.path(), false).is_err());
        assert!(init(home.path(), true).is_ok());
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_the_job() {
        let home = tempfile::tempdir().unwrap();
        init(home.path(), false).unwrap();

        let args = SyncArgs {
            source: crate::cli::SourceArg::Github,
            since: None,
            until: None,
            scopes: Vec::new(),
            update_existing: false,
            dry_run: false,
        };
        let err = sync(home.path(), SourceSystem::GitHub, &args, OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("configuration error"));

        let db = open_database(home.path()).unwrap();
        let recent = jobs::recent_jobs(&db, 5).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, crate::jobs::JobStatus::Failed);
    }
}
