//! Database schema definition

/// SQL schema for the evidencesync database
pub const SCHEMA: &str = r#"
-- Criterion catalog (read-only for the pipeline)
CREATE TABLE IF NOT EXISTS criteria (
    id INTEGER PRIMARY KEY,
    area TEXT NOT NULL,
    subarea TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL
);

-- Fetched work items, one per natural key
CREATE TABLE IF NOT EXISTS work_items (
    id TEXT PRIMARY KEY,
    source_system TEXT NOT NULL,
    identifier TEXT NOT NULL,
    role TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    url TEXT,
    author TEXT,
    reviewers TEXT NOT NULL DEFAULT '[]',
    additions INTEGER NOT NULL DEFAULT 0,
    deletions INTEGER NOT NULL DEFAULT 0,
    changed_files INTEGER NOT NULL DEFAULT 0,
    files TEXT NOT NULL DEFAULT '[]',
    components TEXT NOT NULL DEFAULT '[]',
    content_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    synced_at TEXT NOT NULL,
    UNIQUE(source_system, identifier, role)
);

CREATE INDEX IF NOT EXISTS idx_work_items_identifier ON work_items(source_system, identifier);

-- Classified evidence, one per work item
CREATE TABLE IF NOT EXISTS evidence (
    id TEXT PRIMARY KEY,
    work_item_id TEXT NOT NULL UNIQUE,
    summary TEXT NOT NULL,
    category TEXT NOT NULL,
    scope TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (work_item_id) REFERENCES work_items(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_evidence_occurred ON evidence(occurred_at);

-- Evidence <-> criterion links, written only when evidence is created
CREATE TABLE IF NOT EXISTS evidence_criteria (
    evidence_id TEXT NOT NULL,
    criterion_id INTEGER NOT NULL,
    PRIMARY KEY (evidence_id, criterion_id),
    FOREIGN KEY (evidence_id) REFERENCES evidence(id) ON DELETE CASCADE,
    FOREIGN KEY (criterion_id) REFERENCES criteria(id) ON DELETE CASCADE
);

-- Cross references between natural keys of different systems
CREATE TABLE IF NOT EXISTS work_item_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_system TEXT NOT NULL,
    from_identifier TEXT NOT NULL,
    to_system TEXT NOT NULL,
    to_identifier TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_work_item_links_pair
    ON work_item_links(from_system, from_identifier, to_system, to_identifier);

-- Long-running jobs
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    request TEXT NOT NULL DEFAULT '{}',
    result TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);

CREATE TABLE IF NOT EXISTS job_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    message TEXT NOT NULL,
    FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_job_logs_job ON job_logs(job_id);

-- Cached monthly reports
CREATE TABLE IF NOT EXISTS monthly_snapshots (
    month TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    is_complete INTEGER NOT NULL DEFAULT 0,
    generated_at TEXT NOT NULL
);
"#;
