//! SQL migration definitions for the sitecast database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: domains, crawled_pages, agent_artifacts, post_drafts",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Registered sites
CREATE TABLE IF NOT EXISTS domains (
    id               TEXT PRIMARY KEY,
    url              TEXT NOT NULL,
    name             TEXT NOT NULL,
    primary_goal     TEXT,
    brand_voice_tone TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

-- Pages from the latest crawl (replaced wholesale on every crawl)
CREATE TABLE IF NOT EXISTS crawled_pages (
    id             TEXT PRIMARY KEY,
    domain_id      TEXT NOT NULL REFERENCES domains(id) ON DELETE CASCADE,
    position       INTEGER NOT NULL,
    url            TEXT NOT NULL,
    title          TEXT NOT NULL DEFAULT '',
    headings_json  TEXT NOT NULL DEFAULT '[]',
    body_text      TEXT NOT NULL DEFAULT '',
    links_json     TEXT NOT NULL DEFAULT '[]',
    page_type      TEXT NOT NULL,
    content_hash   TEXT NOT NULL,
    crawled_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawled_pages_domain ON crawled_pages(domain_id);

-- Singleton pipeline outputs per domain
CREATE TABLE IF NOT EXISTS agent_artifacts (
    domain_id   TEXT NOT NULL REFERENCES domains(id) ON DELETE CASCADE,
    kind        TEXT NOT NULL,
    data_json   TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE(domain_id, kind)
);

-- Social post drafts generated from campaign calendars
CREATE TABLE IF NOT EXISTS post_drafts (
    id             TEXT PRIMARY KEY,
    domain_id      TEXT NOT NULL REFERENCES domains(id) ON DELETE CASCADE,
    platform       TEXT NOT NULL,
    text           TEXT NOT NULL,
    scheduled_date TEXT,
    status         TEXT NOT NULL DEFAULT 'draft',
    hashtags_json  TEXT NOT NULL DEFAULT '[]',
    content_type   TEXT,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_post_drafts_domain ON post_drafts(domain_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Provider settings key-value store",
            sql: r#"
CREATE TABLE IF NOT EXISTS settings (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
