use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::models::{
    JobCategory, JobFilters, JobPosting, NewJobPosting, SponsorRecord, UserProfile, VisaStatus,
};
use crate::normalize::normalize;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

const JOB_COLUMNS: &str = "id, title, company, location, description, url, remote, category, \
     source, embedding, active, posted_at, last_seen_at, link_alive, visa_status, \
     sponsorship_confidence, sponsor_id, needs_review";

const SPONSOR_COLUMNS: &str = "id, company_name, normalized_name, aliases, visa_types, \
     last_year_sponsored, confidence, notes, source, metadata";

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sponsors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_name TEXT NOT NULL,
                normalized_name TEXT NOT NULL UNIQUE,
                aliases TEXT NOT NULL DEFAULT '[]',
                visa_types TEXT NOT NULL DEFAULT '[]',
                last_year_sponsored INTEGER,
                confidence INTEGER NOT NULL DEFAULT 50 CHECK (confidence BETWEEN 0 AND 100),
                notes TEXT,
                source TEXT NOT NULL DEFAULT 'manual',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT,
                description TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL UNIQUE,
                remote INTEGER NOT NULL DEFAULT 0,
                category TEXT NOT NULL CHECK (category IN ('new_grad', 'internship')),
                source TEXT NOT NULL,
                embedding BLOB,
                active INTEGER NOT NULL DEFAULT 1,
                posted_at TEXT,
                last_seen_at TEXT NOT NULL,
                link_alive INTEGER NOT NULL DEFAULT 1,
                visa_status TEXT NOT NULL DEFAULT 'unknown'
                    CHECK (visa_status IN ('sponsor_verified', 'likely_sponsor', 'unknown', 'no_sponsorship')),
                sponsorship_confidence INTEGER NOT NULL DEFAULT 0,
                sponsor_id INTEGER REFERENCES sponsors(id),
                needs_review INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                embedding BLOB,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_active_seen ON jobs(active, last_seen_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_sponsor ON jobs(sponsor_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='jobs'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'jobscout init' first."
            ));
        }
        Ok(())
    }

    // --- Job operations ---

    /// Crawler write path: insert, or refresh the existing row with the same URL.
    pub fn upsert_job(&self, job: &NewJobPosting, seen_at: DateTime<Utc>) -> Result<i64> {
        let embedding = job.embedding.as_deref().map(encode_vector);
        self.conn.execute(
            "INSERT INTO jobs (title, company, location, description, url, remote, category,
                               source, embedding, posted_at, last_seen_at, visa_status,
                               sponsorship_confidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                company = excluded.company,
                location = excluded.location,
                description = excluded.description,
                remote = excluded.remote,
                category = excluded.category,
                source = excluded.source,
                embedding = COALESCE(excluded.embedding, jobs.embedding),
                posted_at = COALESCE(excluded.posted_at, jobs.posted_at),
                last_seen_at = excluded.last_seen_at,
                visa_status = excluded.visa_status,
                sponsorship_confidence = excluded.sponsorship_confidence,
                active = 1,
                link_alive = 1",
            params![
                job.title,
                job.company,
                job.location,
                job.description,
                job.url,
                job.remote,
                job.category.as_str(),
                job.source,
                embedding,
                job.posted_at,
                seen_at,
                job.visa_status.as_str(),
                job.sponsorship_confidence.clamp(0, 100),
            ],
        )?;

        let id = self
            .conn
            .query_row("SELECT id FROM jobs WHERE url = ?1", [&job.url], |row| {
                row.get(0)
            })?;
        Ok(id)
    }

    /// Marks postings not seen since `cutoff` inactive. Returns how many changed.
    pub fn mark_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE jobs SET active = 0 WHERE active = 1 AND last_seen_at < ?1",
            params![cutoff],
        )?;
        Ok(changed)
    }

    pub fn link_job_sponsor(&self, job_id: i64, sponsor_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET sponsor_id = ?1 WHERE id = ?2",
            params![sponsor_id, job_id],
        )?;
        Ok(())
    }

    pub fn get_job(&self, id: i64) -> Result<Option<JobPosting>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        self.conn
            .query_row(&sql, [id], Self::row_to_job)
            .optional()
            .context("Failed to load job")
    }

    /// Filtered postings, most recently seen first.
    pub fn query_jobs(
        &self,
        filters: &JobFilters,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<JobPosting>> {
        let (where_clause, mut values) = build_job_filter(filters);
        let mut sql =
            format!("SELECT {JOB_COLUMNS} FROM jobs{where_clause} ORDER BY last_seen_at DESC, id DESC");

        if let Some(limit) = limit {
            sql.push_str(&format!(
                " LIMIT ?{} OFFSET ?{}",
                values.len() + 1,
                values.len() + 2
            ));
            values.push(Box::new(limit as i64));
            values.push(Box::new(offset as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), Self::row_to_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to query jobs")
    }

    pub fn count_jobs(&self, filters: &JobFilters) -> Result<usize> {
        let (where_clause, values) = build_job_filter(filters);
        let sql = format!("SELECT COUNT(*) FROM jobs{where_clause}");
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobPosting> {
        let id: i64 = row.get(0)?;
        let category: String = row.get(7)?;
        let visa_status: String = row.get(14)?;
        let blob: Option<Vec<u8>> = row.get(9)?;

        let embedding = match blob {
            Some(bytes) => {
                let decoded = decode_vector(&bytes);
                if decoded.is_none() {
                    warn!(job_id = id, bytes = bytes.len(), "Stored job embedding is malformed");
                }
                decoded
            }
            None => None,
        };

        Ok(JobPosting {
            id,
            title: row.get(1)?,
            company: row.get(2)?,
            location: row.get(3)?,
            description: row.get(4)?,
            url: row.get(5)?,
            remote: row.get(6)?,
            category: JobCategory::parse(&category)
                .ok_or_else(|| bad_value(7, format!("unknown job category: {category}")))?,
            source: row.get(8)?,
            embedding,
            active: row.get(10)?,
            posted_at: row.get(11)?,
            last_seen_at: row.get(12)?,
            link_alive: row.get(13)?,
            visa_status: VisaStatus::parse(&visa_status)
                .ok_or_else(|| bad_value(14, format!("unknown visa status: {visa_status}")))?,
            sponsorship_confidence: row.get(15)?,
            sponsor_id: row.get(16)?,
            needs_review: row.get(17)?,
        })
    }

    // --- Sponsor operations ---

    pub fn find_sponsor_by_normalized_name(&self, name: &str) -> Result<Option<SponsorRecord>> {
        let sql = format!("SELECT {SPONSOR_COLUMNS} FROM sponsors WHERE normalized_name = ?1");
        self.conn
            .query_row(&sql, [name], Self::row_to_sponsor)
            .optional()
            .context("Failed to look up sponsor")
    }

    /// Bulk lookup; one query regardless of how many names are asked for.
    pub fn find_sponsors_by_normalized_names(&self, names: &[String]) -> Result<Vec<SponsorRecord>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=names.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {SPONSOR_COLUMNS} FROM sponsors WHERE normalized_name IN ({placeholders})"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(names.iter()), Self::row_to_sponsor)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to bulk load sponsors")
    }

    /// Secondary path: scans records that carry aliases and compares each alias
    /// after normalization.
    pub fn find_sponsor_by_alias(&self, normalized: &str) -> Result<Option<SponsorRecord>> {
        if normalized.is_empty() {
            return Ok(None);
        }
        let sql = format!("SELECT {SPONSOR_COLUMNS} FROM sponsors WHERE aliases != '[]' ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_sponsor)?;
        for row in rows {
            let record = row?;
            if record.aliases.iter().any(|alias| normalize(alias) == normalized) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn list_sponsors(&self) -> Result<Vec<SponsorRecord>> {
        let sql = format!("SELECT {SPONSOR_COLUMNS} FROM sponsors ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_sponsor)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list sponsors")
    }

    /// Insert-or-update keyed on the normalized name. Concurrent writers on the
    /// same name resolve last-writer-wins inside SQLite.
    pub fn upsert_sponsor(&self, record: &SponsorRecord) -> Result<SponsorRecord> {
        self.conn.execute(
            "INSERT INTO sponsors (company_name, normalized_name, aliases, visa_types,
                                   last_year_sponsored, confidence, notes, source, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(normalized_name) DO UPDATE SET
                company_name = excluded.company_name,
                aliases = excluded.aliases,
                visa_types = excluded.visa_types,
                last_year_sponsored = excluded.last_year_sponsored,
                confidence = excluded.confidence,
                notes = excluded.notes,
                source = excluded.source,
                metadata = excluded.metadata,
                updated_at = datetime('now')",
            params![
                record.company_name,
                record.normalized_name,
                serde_json::to_string(&record.aliases)?,
                serde_json::to_string(&record.visa_types)?,
                record.last_year_sponsored,
                record.confidence.clamp(0, 100),
                record.notes,
                record.source,
                record.metadata,
            ],
        )?;

        self.find_sponsor_by_normalized_name(&record.normalized_name)?
            .ok_or_else(|| anyhow!("Sponsor '{}' missing after upsert", record.normalized_name))
    }

    fn row_to_sponsor(row: &rusqlite::Row) -> rusqlite::Result<SponsorRecord> {
        let aliases: String = row.get(3)?;
        let visa_types: String = row.get(4)?;
        Ok(SponsorRecord {
            id: row.get(0)?,
            company_name: row.get(1)?,
            normalized_name: row.get(2)?,
            aliases: serde_json::from_str(&aliases).map_err(|e| json_error(3, e))?,
            visa_types: serde_json::from_str(&visa_types).map_err(|e| json_error(4, e))?,
            last_year_sponsored: row.get(5)?,
            confidence: row.get(6)?,
            notes: row.get(7)?,
            source: row.get(8)?,
            metadata: row.get(9)?,
        })
    }

    // --- Profile operations ---

    pub fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        self.conn
            .query_row(
                "SELECT user_id, description, embedding, updated_at
                 FROM user_profiles WHERE user_id = ?1",
                [user_id],
                |row| {
                    let blob: Option<Vec<u8>> = row.get(2)?;
                    Ok(UserProfile {
                        user_id: row.get(0)?,
                        description: row.get(1)?,
                        embedding: blob.as_deref().and_then(decode_vector),
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to load profile")
    }

    pub fn upsert_profile(
        &self,
        user_id: &str,
        description: &str,
        embedding: Option<&[f32]>,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_profiles (user_id, description, embedding, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                description = excluded.description,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at",
            params![user_id, description, embedding.map(encode_vector), updated_at],
        )?;
        Ok(())
    }
}

fn build_job_filter(filters: &JobFilters) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if filters.active_only.unwrap_or(true) {
        clauses.push("active = 1".to_string());
    }
    if let Some(category) = filters.category {
        values.push(Box::new(category.as_str()));
        clauses.push(format!("category = ?{}", values.len()));
    }
    if let Some(remote) = filters.remote {
        values.push(Box::new(remote));
        clauses.push(format!("remote = ?{}", values.len()));
    }
    if let Some(location) = filters.location.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        values.push(Box::new(location.to_lowercase()));
        clauses.push(format!("instr(LOWER(COALESCE(location, '')), ?{}) > 0", values.len()));
    }
    if filters.verified_sponsor_only {
        clauses.push("visa_status = 'sponsor_verified' AND sponsor_id IS NOT NULL".to_string());
    } else if let Some(status) = filters.visa_status {
        values.push(Box::new(status.as_str()));
        clauses.push(format!("visa_status = ?{}", values.len()));
    }
    if let Some(min) = filters.min_sponsorship_confidence {
        values.push(Box::new(min));
        clauses.push(format!("sponsorship_confidence >= ?{}", values.len()));
    }
    if let Some(after) = filters.posted_after {
        values.push(Box::new(after));
        clauses.push(format!("posted_at >= ?{}", values.len()));
    }
    if let Some(before) = filters.posted_before {
        values.push(Box::new(before));
        clauses.push(format!("posted_at <= ?{}", values.len()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// `None` when the blob is not a whole number of finite f32 values.
pub fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return None;
        }
        out.push(value);
    }
    Some(out)
}

fn bad_value(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

fn json_error(column: usize, err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    pub(crate) fn new_job(url: &str, company: &str) -> NewJobPosting {
        NewJobPosting {
            title: "Software Engineer, New Grad".to_string(),
            company: company.to_string(),
            location: Some("New York, NY".to_string()),
            description: "Build things".to_string(),
            url: url.to_string(),
            remote: false,
            category: JobCategory::NewGrad,
            source: "greenhouse".to_string(),
            embedding: None,
            posted_at: None,
            visa_status: VisaStatus::Unknown,
            sponsorship_confidence: 0,
        }
    }

    pub(crate) fn posting(id: i64, company: &str) -> JobPosting {
        JobPosting {
            id,
            title: "Software Engineer".to_string(),
            company: company.to_string(),
            location: None,
            description: String::new(),
            url: format!("https://jobs.example.com/{id}"),
            remote: false,
            category: JobCategory::NewGrad,
            source: "test".to_string(),
            embedding: None,
            active: true,
            posted_at: None,
            last_seen_at: Utc::now(),
            link_alive: true,
            visa_status: VisaStatus::Unknown,
            sponsorship_confidence: 0,
            sponsor_id: None,
            needs_review: false,
        }
    }

    /// Makes every insert or update on `sponsors` fail.
    pub(crate) fn block_sponsor_writes(db: &Database) {
        db.conn
            .execute_batch(
                "CREATE TRIGGER block_sponsor_insert BEFORE INSERT ON sponsors
                 BEGIN SELECT RAISE(ABORT, 'sponsors are read-only'); END;
                 CREATE TRIGGER block_sponsor_update BEFORE UPDATE ON sponsors
                 BEGIN SELECT RAISE(ABORT, 'sponsors are read-only'); END;",
            )
            .unwrap();
    }

    pub(crate) fn sponsor(name: &str) -> SponsorRecord {
        SponsorRecord {
            id: 0,
            company_name: name.to_string(),
            normalized_name: normalize(name),
            aliases: Vec::new(),
            visa_types: vec!["H-1B".to_string()],
            last_year_sponsored: Some(2023),
            confidence: 70,
            notes: None,
            source: "manual".to_string(),
            metadata: json!({}),
        }
    }

    #[test]
    fn test_upsert_job_dedupes_by_url() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let first = db.upsert_job(&new_job("https://x.com/1", "Acme"), now).unwrap();

        let mut changed = new_job("https://x.com/1", "Acme");
        changed.title = "Software Engineer II".to_string();
        let second = db.upsert_job(&changed, now).unwrap();

        assert_eq!(first, second);
        assert_eq!(db.count_jobs(&JobFilters::default()).unwrap(), 1);
        assert_eq!(db.get_job(first).unwrap().unwrap().title, "Software Engineer II");
    }

    #[test]
    fn test_upsert_job_keeps_embedding_when_crawler_omits_it() {
        let db = Database::open_in_memory().unwrap();
        let mut job = new_job("https://x.com/1", "Acme");
        job.embedding = Some(vec![0.5, 0.25]);
        let id = db.upsert_job(&job, Utc::now()).unwrap();

        job.embedding = None;
        db.upsert_job(&job, Utc::now()).unwrap();

        assert_eq!(db.get_job(id).unwrap().unwrap().embedding, Some(vec![0.5, 0.25]));
    }

    #[test]
    fn test_mark_inactive_before() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.upsert_job(&new_job("https://x.com/old", "Acme"), now - Duration::days(30)).unwrap();
        db.upsert_job(&new_job("https://x.com/new", "Acme"), now).unwrap();

        let changed = db.mark_inactive_before(now - Duration::days(14)).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(db.count_jobs(&JobFilters::default()).unwrap(), 1);

        let all = JobFilters {
            active_only: Some(false),
            ..Default::default()
        };
        assert_eq!(db.count_jobs(&all).unwrap(), 2);
    }

    #[test]
    fn test_query_jobs_filters() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        let mut remote = new_job("https://x.com/remote", "Acme");
        remote.remote = true;
        remote.location = Some("Remote - US".to_string());
        remote.posted_at = Some(now - Duration::days(2));
        db.upsert_job(&remote, now).unwrap();

        let mut intern = new_job("https://x.com/intern", "Globex");
        intern.category = JobCategory::Internship;
        intern.location = Some("Austin, TX".to_string());
        intern.sponsorship_confidence = 80;
        intern.posted_at = Some(now - Duration::days(40));
        db.upsert_job(&intern, now).unwrap();

        let only_remote = JobFilters {
            remote: Some(true),
            ..Default::default()
        };
        let jobs = db.query_jobs(&only_remote, None, 0).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].url, "https://x.com/remote");

        let austin = JobFilters {
            location: Some("AUSTIN".to_string()),
            ..Default::default()
        };
        assert_eq!(db.count_jobs(&austin).unwrap(), 1);

        let confident = JobFilters {
            min_sponsorship_confidence: Some(60),
            category: Some(JobCategory::Internship),
            ..Default::default()
        };
        assert_eq!(db.count_jobs(&confident).unwrap(), 1);

        let recent = JobFilters {
            posted_after: Some(now - Duration::days(7)),
            ..Default::default()
        };
        let jobs = db.query_jobs(&recent, None, 0).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].remote);

        let older = JobFilters {
            posted_before: Some(now - Duration::days(7)),
            ..Default::default()
        };
        assert_eq!(db.count_jobs(&older).unwrap(), 1);
    }

    #[test]
    fn test_verified_sponsor_requires_link() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let mut job = new_job("https://x.com/1", "Acme");
        job.visa_status = VisaStatus::SponsorVerified;
        let id = db.upsert_job(&job, now).unwrap();

        let verified = JobFilters {
            verified_sponsor_only: true,
            ..Default::default()
        };
        assert_eq!(db.count_jobs(&verified).unwrap(), 0);

        let record = db.upsert_sponsor(&sponsor("Acme")).unwrap();
        db.link_job_sponsor(id, record.id).unwrap();
        assert_eq!(db.count_jobs(&verified).unwrap(), 1);
    }

    #[test]
    fn test_query_jobs_last_seen_order_and_paging() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        for i in 0..5 {
            db.upsert_job(
                &new_job(&format!("https://x.com/{i}"), "Acme"),
                now - Duration::hours(i),
            )
            .unwrap();
        }
        let page = db
            .query_jobs(&JobFilters::default(), Some(2), 1)
            .unwrap();
        let urls: Vec<_> = page.iter().map(|j| j.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x.com/1", "https://x.com/2"]);
    }

    #[test]
    fn test_upsert_sponsor_is_unique_on_normalized_name() {
        let db = Database::open_in_memory().unwrap();
        let first = db.upsert_sponsor(&sponsor("Acme, Inc.")).unwrap();

        let mut second = sponsor("ACME INC");
        second.confidence = 90;
        let updated = db.upsert_sponsor(&second).unwrap();

        assert_eq!(first.id, updated.id);
        assert_eq!(updated.confidence, 90);
        assert_eq!(updated.company_name, "ACME INC");
        assert_eq!(db.list_sponsors().unwrap().len(), 1);
    }

    #[test]
    fn test_bulk_and_alias_lookup() {
        let db = Database::open_in_memory().unwrap();
        let mut meta = sponsor("Meta Platforms");
        meta.aliases = vec!["Facebook, Inc.".to_string()];
        db.upsert_sponsor(&meta).unwrap();
        db.upsert_sponsor(&sponsor("Stripe")).unwrap();

        let found = db
            .find_sponsors_by_normalized_names(&[
                "stripe".to_string(),
                "meta platforms".to_string(),
                "nobody".to_string(),
            ])
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(db.find_sponsors_by_normalized_names(&[]).unwrap().is_empty());

        let alias = db.find_sponsor_by_alias("facebook inc").unwrap().unwrap();
        assert_eq!(alias.normalized_name, "meta platforms");
        assert!(db.find_sponsor_by_alias("stripe").unwrap().is_none());
    }

    #[test]
    fn test_sponsor_metadata_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let mut record = sponsor("Acme");
        record.metadata = json!({"remote_synced_at": "2026-01-01T00:00:00Z", "remote_payload": {"name": "Acme"}});
        let stored = db.upsert_sponsor(&record).unwrap();
        assert_eq!(stored.metadata["remote_payload"]["name"], "Acme");
        assert_eq!(stored.visa_types, vec!["H-1B".to_string()]);
    }

    #[test]
    fn test_profile_upsert() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_profile("u1").unwrap().is_none());

        db.upsert_profile("u1", "backend rust", Some(&[1.0, 0.0]), Utc::now()).unwrap();
        db.upsert_profile("u1", "frontend", None, Utc::now()).unwrap();

        let profile = db.get_profile("u1").unwrap().unwrap();
        assert_eq!(profile.description, "frontend");
        assert!(profile.embedding.is_none());
    }

    #[test]
    fn test_decode_vector_rejects_ragged_blob() {
        assert_eq!(decode_vector(&encode_vector(&[1.0, -2.5])), Some(vec![1.0, -2.5]));
        assert!(decode_vector(&[0, 0, 0]).is_none());
        assert!(decode_vector(&encode_vector(&[f32::NAN])).is_none());
    }
}
