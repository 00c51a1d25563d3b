//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.
//! The connection sits behind a `Mutex` so one `SqliteStorage` can be shared
//! by the orchestrator, the signing pool and the requesters.

use crate::crawl::ContentKind;
use crate::signing::CredentialKind;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    CredentialStore, ItemStore, JobStore, SignerStore, StorageError, StorageResult,
    SubscriptionStore,
};
use crate::storage::{ContentItem, ItemStatus, JobRecord, JobStatus, SignerRecord, Subscription};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn fmt_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn bad_column(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ContentItem> {
    let kind: String = row.get(1)?;
    let created: String = row.get(3)?;
    let updated: String = row.get(4)?;
    let status: String = row.get(7)?;

    Ok(ContentItem {
        id: row.get(0)?,
        kind: ContentKind::from_db_string(&kind)
            .ok_or_else(|| bad_column(1, format!("unknown content kind '{}'", kind)))?,
        author_id: row.get(2)?,
        created_at: parse_time(3, &created)?,
        updated_at: parse_time(4, &updated)?,
        text: row.get(5)?,
        raw: row.get(6)?,
        status: ItemStatus::from_db_string(&status)
            .ok_or_else(|| bad_column(7, format!("unknown item status '{}'", status)))?,
    })
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let kind: String = row.get(2)?;
    Ok(Subscription {
        key: row.get(0)?,
        author_id: row.get(1)?,
        kind: ContentKind::from_db_string(&kind)
            .ok_or_else(|| bad_column(2, format!("unknown content kind '{}'", kind)))?,
        finished: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        task_type: row.get(1)?,
        status: JobStatus::from_db_string(&row.get::<_, String>(2)?)
            .unwrap_or(JobStatus::Error),
        config_hash: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn signer_from_row(row: &Row<'_>) -> rusqlite::Result<SignerRecord> {
    Ok(SignerRecord {
        id: row.get(0)?,
        slug: row.get(1)?,
        url: row.get(2)?,
        is_available: row.get(3)?,
        used_count: row.get::<_, i64>(4)?.max(0) as u64,
        failed_count: row.get::<_, i64>(5)?.max(0) as u64,
    })
}

const ITEM_COLUMNS: &str = "id, kind, author_id, created_at, updated_at, text, raw, status";
const JOB_COLUMNS: &str = "id, task_type, status, config_hash, created_at, updated_at";
const SIGNER_COLUMNS: &str = "id, slug, url, is_available, used_count, failed_count";

impl ItemStore for SqliteStorage {
    fn latest_item_time(
        &self,
        kind: ContentKind,
        author_id: &str,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(created_at) FROM items WHERE kind = ?1 AND author_id = ?2",
            params![kind.as_str(), author_id],
            |row| row.get(0),
        )?;

        Ok(latest.map(|t| parse_time(0, &t)).transpose()?)
    }

    fn earliest_item_time(
        &self,
        kind: ContentKind,
        author_id: &str,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let earliest: Option<String> = conn.query_row(
            "SELECT MIN(created_at) FROM items WHERE kind = ?1 AND author_id = ?2",
            params![kind.as_str(), author_id],
            |row| row.get(0),
        )?;

        Ok(earliest.map(|t| parse_time(0, &t)).transpose()?)
    }

    fn save_item(&self, item: &ContentItem) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO items (id, kind, author_id, created_at, updated_at, text, raw, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(kind, id) DO UPDATE SET
                 author_id = excluded.author_id,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at,
                 text = excluded.text,
                 raw = excluded.raw,
                 status = excluded.status
             WHERE excluded.updated_at > items.updated_at
                OR (excluded.updated_at = items.updated_at AND items.status != 'completed')",
            params![
                item.id,
                item.kind.as_str(),
                item.author_id,
                fmt_time(&item.created_at),
                fmt_time(&item.updated_at),
                item.text,
                item.raw,
                item.status.to_db_string(),
            ],
        )?;
        Ok(())
    }

    fn get_item(&self, kind: ContentKind, id: &str) -> StorageResult<Option<ContentItem>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM items WHERE kind = ?1 AND id = ?2",
            ITEM_COLUMNS
        );
        let item = conn
            .query_row(&sql, params![kind.as_str(), id], item_from_row)
            .optional()?;
        Ok(item)
    }

    fn count_items(&self, kind: ContentKind, author_id: &str) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE kind = ?1 AND author_id = ?2",
            params![kind.as_str(), author_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl SubscriptionStore for SqliteStorage {
    fn add_subscription(
        &self,
        kind: ContentKind,
        author_id: &str,
    ) -> StorageResult<Subscription> {
        let key = Subscription::key_for(kind, author_id);
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO subscriptions (key, author_id, kind, finished, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![key, author_id, kind.as_str(), fmt_time(&Utc::now())],
        )?;

        let sub = conn.query_row(
            "SELECT key, author_id, kind, finished, created_at FROM subscriptions WHERE key = ?1",
            params![key],
            subscription_from_row,
        )?;
        Ok(sub)
    }

    fn get_subscription(&self, key: &str) -> StorageResult<Option<Subscription>> {
        let conn = self.conn()?;
        let sub = conn
            .query_row(
                "SELECT key, author_id, kind, finished, created_at FROM subscriptions WHERE key = ?1",
                params![key],
                subscription_from_row,
            )
            .optional()?;
        Ok(sub)
    }

    fn list_subscriptions(&self, kinds: &[ContentKind]) -> StorageResult<Vec<Subscription>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, author_id, kind, finished, created_at FROM subscriptions ORDER BY key",
        )?;

        let subs = stmt
            .query_map([], subscription_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(subs
            .into_iter()
            .filter(|s| kinds.contains(&s.kind))
            .collect())
    }

    fn set_finished(&self, key: &str, finished: bool) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE subscriptions SET finished = ?1 WHERE key = ?2",
            params![finished, key],
        )?;
        if updated == 0 {
            return Err(StorageError::SubscriptionNotFound(key.to_string()));
        }
        Ok(())
    }
}

impl JobStore for SqliteStorage {
    fn create_job(
        &self,
        id: &str,
        task_type: &str,
        config_hash: &str,
    ) -> StorageResult<JobRecord> {
        let now = fmt_time(&Utc::now());
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO jobs (id, task_type, status, config_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, task_type, JobStatus::Running.to_db_string(), config_hash, now],
        )?;

        Ok(JobRecord {
            id: id.to_string(),
            task_type: task_type.to_string(),
            status: JobStatus::Running,
            config_hash: config_hash.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    fn get_job(&self, id: &str) -> StorageResult<Option<JobRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let job = conn.query_row(&sql, params![id], job_from_row).optional()?;
        Ok(job)
    }

    fn find_running_job(&self, task_type: &str) -> StorageResult<Option<JobRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM jobs WHERE task_type = ?1 AND status = ?2
             ORDER BY created_at DESC LIMIT 1",
            JOB_COLUMNS
        );
        let job = conn
            .query_row(
                &sql,
                params![task_type, JobStatus::Running.to_db_string()],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self, status: Option<JobStatus>) -> StorageResult<Vec<JobRecord>> {
        let conn = self.conn()?;
        let jobs = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM jobs WHERE status = ?1 ORDER BY created_at DESC",
                    JOB_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![status.to_db_string()], job_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!("SELECT {} FROM jobs ORDER BY created_at DESC", JOB_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], job_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(jobs)
    }

    fn update_job_status(&self, id: &str, status: JobStatus) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), fmt_time(&Utc::now()), id],
        )?;
        if updated == 0 {
            return Err(StorageError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    fn record_job_detail(&self, job_id: &str, source_key: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO job_details (job_id, source_key, recorded_at)
             VALUES (?1, ?2, ?3)",
            params![job_id, source_key, fmt_time(&Utc::now())],
        )?;
        Ok(())
    }

    fn job_details(&self, job_id: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT source_key FROM job_details WHERE job_id = ?1 ORDER BY id")?;
        let keys = stmt
            .query_map(params![job_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

impl SignerStore for SqliteStorage {
    fn register_signer(&self, slug: &str, url: &str) -> StorageResult<SignerRecord> {
        let conn = self.conn()?;
        // New signers start with one recorded use so their weight is defined
        conn.execute(
            "INSERT INTO signing_services (id, slug, url, is_available, used_count, failed_count, created_at)
             VALUES (?1, ?2, ?3, 1, 1, 0, ?4)
             ON CONFLICT(slug) DO UPDATE SET url = excluded.url, is_available = 1",
            params![
                uuid::Uuid::new_v4().to_string(),
                slug,
                url,
                fmt_time(&Utc::now())
            ],
        )?;

        let sql = format!(
            "SELECT {} FROM signing_services WHERE slug = ?1",
            SIGNER_COLUMNS
        );
        let signer = conn.query_row(&sql, params![slug], signer_from_row)?;
        Ok(signer)
    }

    fn load_signers(&self) -> StorageResult<Vec<SignerRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM signing_services ORDER BY slug", SIGNER_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let signers = stmt
            .query_map([], signer_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(signers)
    }

    fn increment_signer_used(&self, id: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE signing_services SET used_count = used_count + 1 WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Err(StorageError::SignerNotFound(id.to_string()));
        }
        Ok(())
    }

    fn increment_signer_failed(&self, id: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE signing_services SET failed_count = failed_count + 1 WHERE id = ?1",
            params![id],
        )?;
        if updated == 0 {
            return Err(StorageError::SignerNotFound(id.to_string()));
        }
        Ok(())
    }

    fn set_signer_available(&self, id: &str, available: bool) -> StorageResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE signing_services SET is_available = ?1 WHERE id = ?2",
            params![available, id],
        )?;
        if updated == 0 {
            return Err(StorageError::SignerNotFound(id.to_string()));
        }
        Ok(())
    }
}

impl CredentialStore for SqliteStorage {
    fn get_credential(&self, kind: CredentialKind) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM credentials WHERE kind = ?1 AND expires_at > ?2",
                params![kind.as_str(), fmt_time(&Utc::now())],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_credential(
        &self,
        kind: CredentialKind,
        value: &str,
        ttl: Duration,
    ) -> StorageResult<()> {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or_else(|| now + chrono::Duration::days(36500));

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO credentials (kind, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(kind) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![kind.as_str(), value, fmt_time(&expires_at)],
        )?;
        Ok(())
    }

    fn del_credential(&self, kind: CredentialKind) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM credentials WHERE kind = ?1",
            params![kind.as_str()],
        )?;
        Ok(())
    }

    fn expiring(&self, within: Duration) -> StorageResult<Vec<(CredentialKind, DateTime<Utc>)>> {
        let now = Utc::now();
        let horizon = chrono::Duration::from_std(within)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or_else(|| now + chrono::Duration::days(36500));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT kind, expires_at FROM credentials WHERE expires_at <= ?1 ORDER BY expires_at",
        )?;
        let rows = stmt
            .query_map(params![fmt_time(&horizon)], |row| {
                let kind: String = row.get(0)?;
                let kind = kind.parse::<CredentialKind>().map_err(|e| bad_column(0, e))?;
                let expires_at: String = row.get(1)?;
                Ok((kind, parse_time(1, &expires_at)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
