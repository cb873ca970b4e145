//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding registered domains,
//! the latest crawl's pages, per-domain pipeline artifacts, post drafts, and
//! the provider settings key-value store.
//!
//! **Access rules:**
//! - CLI commands and the pipeline: read-write via [`Storage::open`]
//! - Inspection tooling: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tokio::sync::{Mutex, MutexGuard};
use sitecast_shared::{
    ArtifactKind, CrawledPage, DomainId, DomainRecord, PageType, PostDraft, Result, SitecastError,
};

/// Primary storage handle wrapping a libSQL database.
///
/// One connection is shared by every caller, so writes are serialized through
/// `write_lock`; a transaction never sees another caller's statements.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    write_lock: Mutex<()>,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SitecastError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            write_lock: Mutex::new(()),
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SitecastError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode, then take the write lock.
    async fn begin_write(&self) -> Result<MutexGuard<'_, ()>> {
        if self.readonly {
            return Err(SitecastError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(self.write_lock.lock().await)
    }

    // -----------------------------------------------------------------------
    // Domain operations
    // -----------------------------------------------------------------------

    /// Insert a new domain record.
    pub async fn insert_domain(&self, domain: &DomainRecord) -> Result<()> {
        let _write = self.begin_write().await?;
        self.conn
            .execute(
                "INSERT INTO domains (id, url, name, primary_goal, brand_voice_tone, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    domain.id.to_string(),
                    domain.url.as_str(),
                    domain.name.as_str(),
                    domain.primary_goal.as_deref(),
                    domain.brand_voice_tone.as_deref(),
                    domain.created_at.to_rfc3339(),
                    domain.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a domain by ID.
    pub async fn get_domain(&self, id: &DomainId) -> Result<Option<DomainRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, name, primary_goal, brand_voice_tone, created_at, updated_at
                 FROM domains WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_domain(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all domains, oldest first.
    pub async fn list_domains(&self) -> Result<Vec<DomainRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, name, primary_goal, brand_voice_tone, created_at, updated_at
                 FROM domains ORDER BY created_at",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_domain(&row)?);
        }
        Ok(results)
    }

    /// Delete a domain and everything stored for it. Returns whether it existed.
    pub async fn delete_domain(&self, id: &DomainId) -> Result<bool> {
        let _write = self.begin_write().await?;
        let id = id.to_string();
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        for table in ["crawled_pages", "agent_artifacts", "post_drafts"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE domain_id = ?1"),
                params![id.as_str()],
            )
            .await
            .map_err(storage_err)?;
        }
        let deleted = tx
            .execute("DELETE FROM domains WHERE id = ?1", params![id.as_str()])
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------------
    // Crawled page operations
    // -----------------------------------------------------------------------

    /// Replace the full page set for a domain (delete-then-insert, one transaction).
    pub async fn replace_crawled_pages(&self, domain_id: &DomainId, pages: &[CrawledPage]) -> Result<()> {
        let _write = self.begin_write().await?;
        let domain_id = domain_id.to_string();
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        tx.execute(
            "DELETE FROM crawled_pages WHERE domain_id = ?1",
            params![domain_id.as_str()],
        )
        .await
        .map_err(storage_err)?;

        for (position, page) in pages.iter().enumerate() {
            let headings = serde_json::to_string(&page.headings).map_err(storage_err)?;
            let links = serde_json::to_string(&page.internal_links).map_err(storage_err)?;
            tx.execute(
                "INSERT INTO crawled_pages
                   (id, domain_id, position, url, title, headings_json, body_text, links_json,
                    page_type, content_hash, crawled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    page.id.as_str(),
                    domain_id.as_str(),
                    position as i64,
                    page.url.as_str(),
                    page.title.as_str(),
                    headings,
                    page.body_text.as_str(),
                    links,
                    page.page_type.as_str(),
                    page.content_hash.as_str(),
                    page.crawled_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        tracing::debug!(domain_id = %domain_id, pages = pages.len(), "replaced crawled pages");
        Ok(())
    }

    /// List a domain's pages in crawl order.
    pub async fn list_crawled_pages(&self, domain_id: &DomainId) -> Result<Vec<CrawledPage>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, title, headings_json, body_text, links_json, page_type,
                        content_hash, crawled_at
                 FROM crawled_pages WHERE domain_id = ?1 ORDER BY position",
                params![domain_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_page(&row)?);
        }
        Ok(results)
    }

    /// Number of stored pages for a domain.
    pub async fn count_crawled_pages(&self, domain_id: &DomainId) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM crawled_pages WHERE domain_id = ?1",
                params![domain_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(storage_err)? as usize),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Artifact operations
    // -----------------------------------------------------------------------

    /// Store a pipeline artifact, replacing any previous one of the same kind.
    pub async fn put_artifact(
        &self,
        domain_id: &DomainId,
        kind: ArtifactKind,
        data: &serde_json::Value,
    ) -> Result<()> {
        let _write = self.begin_write().await?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO agent_artifacts (domain_id, kind, data_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(domain_id, kind) DO UPDATE SET
                   data_json = excluded.data_json,
                   updated_at = excluded.updated_at",
                params![domain_id.to_string(), kind.key(), data.to_string(), now],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Fetch a pipeline artifact, if one has been stored.
    pub async fn get_artifact(
        &self,
        domain_id: &DomainId,
        kind: ArtifactKind,
    ) -> Result<Option<serde_json::Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data_json FROM agent_artifacts WHERE domain_id = ?1 AND kind = ?2",
                params![domain_id.to_string(), kind.key()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row.get(0).map_err(storage_err)?;
                let value = serde_json::from_str(&raw).map_err(|e| {
                    SitecastError::Storage(format!("corrupt {kind} artifact: {e}"))
                })?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Post draft operations
    // -----------------------------------------------------------------------

    /// Insert drafts for a domain in one transaction.
    pub async fn insert_post_drafts(&self, domain_id: &DomainId, drafts: &[PostDraft]) -> Result<()> {
        let _write = self.begin_write().await?;
        let domain_id = domain_id.to_string();
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        for draft in drafts {
            let hashtags = serde_json::to_string(&draft.hashtags).map_err(storage_err)?;
            tx.execute(
                "INSERT INTO post_drafts
                   (id, domain_id, platform, text, scheduled_date, status, hashtags_json,
                    content_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    draft.id.as_str(),
                    domain_id.as_str(),
                    draft.platform.as_str(),
                    draft.text.as_str(),
                    draft.scheduled_date.as_deref(),
                    draft.status.as_str(),
                    hashtags,
                    draft.content_type.as_deref(),
                    draft.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    /// List a domain's drafts, oldest first.
    pub async fn list_post_drafts(&self, domain_id: &DomainId) -> Result<Vec<PostDraft>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, domain_id, platform, text, scheduled_date, status, hashtags_json,
                        content_type, created_at
                 FROM post_drafts WHERE domain_id = ?1 ORDER BY created_at, rowid",
                params![domain_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_draft(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Settings operations
    // -----------------------------------------------------------------------

    /// Get a single setting value.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Insert or overwrite a setting.
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let _write = self.begin_write().await?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// All settings as a sorted map.
    pub async fn all_settings(&self) -> Result<BTreeMap<String, String>> {
        let mut rows = self
            .conn
            .query("SELECT key, value FROM settings", params![])
            .await
            .map_err(storage_err)?;

        let mut results = BTreeMap::new();
        while let Ok(Some(row)) = rows.next().await {
            results.insert(
                row.get::<String>(0).map_err(storage_err)?,
                row.get::<String>(1).map_err(storage_err)?,
            );
        }
        Ok(results)
    }

    /// Remove a setting. Returns whether it existed.
    pub async fn delete_setting(&self, key: &str) -> Result<bool> {
        let _write = self.begin_write().await?;
        let deleted = self
            .conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;
        Ok(deleted > 0)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn storage_err(e: impl std::fmt::Display) -> SitecastError {
    SitecastError::Storage(e.to_string())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SitecastError::Storage(format!("invalid date: {e}")))
}

fn parse_domain_id(raw: &str) -> Result<DomainId> {
    raw.parse()
        .map_err(|e| SitecastError::Storage(format!("invalid domain id {raw:?}: {e}")))
}

/// Convert a database row to a [`DomainRecord`].
fn row_to_domain(row: &libsql::Row) -> Result<DomainRecord> {
    Ok(DomainRecord {
        id: parse_domain_id(&row.get::<String>(0).map_err(storage_err)?)?,
        url: row.get::<String>(1).map_err(storage_err)?,
        name: row.get::<String>(2).map_err(storage_err)?,
        primary_goal: row.get::<String>(3).ok(),
        brand_voice_tone: row.get::<String>(4).ok(),
        created_at: parse_time(&row.get::<String>(5).map_err(storage_err)?)?,
        updated_at: parse_time(&row.get::<String>(6).map_err(storage_err)?)?,
    })
}

/// Convert a database row to a [`CrawledPage`].
fn row_to_page(row: &libsql::Row) -> Result<CrawledPage> {
    let headings: String = row.get(3).map_err(storage_err)?;
    let links: String = row.get(5).map_err(storage_err)?;
    let page_type: String = row.get(6).map_err(storage_err)?;

    Ok(CrawledPage {
        id: row.get::<String>(0).map_err(storage_err)?,
        url: row.get::<String>(1).map_err(storage_err)?,
        title: row.get::<String>(2).map_err(storage_err)?,
        headings: serde_json::from_str(&headings).map_err(storage_err)?,
        body_text: row.get::<String>(4).map_err(storage_err)?,
        internal_links: serde_json::from_str(&links).map_err(storage_err)?,
        page_type: PageType::from_name(&page_type),
        content_hash: row.get::<String>(7).map_err(storage_err)?,
        crawled_at: parse_time(&row.get::<String>(8).map_err(storage_err)?)?,
    })
}

/// Convert a database row to a [`PostDraft`].
fn row_to_draft(row: &libsql::Row) -> Result<PostDraft> {
    let hashtags: String = row.get(6).map_err(storage_err)?;

    Ok(PostDraft {
        id: row.get::<String>(0).map_err(storage_err)?,
        domain_id: parse_domain_id(&row.get::<String>(1).map_err(storage_err)?)?,
        platform: row.get::<String>(2).map_err(storage_err)?,
        text: row.get::<String>(3).map_err(storage_err)?,
        scheduled_date: row.get::<String>(4).ok(),
        status: row.get::<String>(5).map_err(storage_err)?,
        hashtags: serde_json::from_str(&hashtags).map_err(storage_err)?,
        content_type: row.get::<String>(7).ok(),
        created_at: parse_time(&row.get::<String>(8).map_err(storage_err)?)?,
    })
}
