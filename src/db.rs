use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::models::{ApplicationRecord, ApplicationStatus, JobListing};

/// Result of inserting a listing keyed by URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// The URL was already stored; carries the existing row id.
    Duplicate(i64),
}

impl InsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Duplicate(id) => *id,
        }
    }
}

const RECORD_COLUMNS: &str = "id, title, company, url, location, source, applied, applied_at, \
                              status, requirements, missing_info, created_at";

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open() -> Result<Self> {
        Self::open_at(&Self::default_path())
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        // XDG data directory, or the working directory as a fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobagent") {
            proj_dirs.data_dir().join("job_applications.db")
        } else {
            PathBuf::from("job_applications.db")
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                location TEXT,
                source TEXT,
                applied INTEGER NOT NULL DEFAULT 0,
                applied_at TEXT,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'found', 'applied', 'failed')),
                requirements TEXT NOT NULL DEFAULT '[]',
                missing_info TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status);
            CREATE INDEX IF NOT EXISTS idx_applications_applied ON applications(applied);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobagent init' first."));
        }
        Ok(())
    }

    // --- Writes ---

    /// Idempotent on URL: a second insert leaves the stored row untouched.
    pub fn insert_listing(&self, listing: &JobListing, status: ApplicationStatus) -> Result<InsertOutcome> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO applications (title, company, url, location, source, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                listing.title,
                listing.company,
                listing.url,
                listing.location,
                listing.source,
                status.as_str()
            ],
        )?;

        if changed == 1 {
            return Ok(InsertOutcome::Inserted(self.conn.last_insert_rowid()));
        }

        let id: i64 = self
            .conn
            .query_row("SELECT id FROM applications WHERE url = ?1", [&listing.url], |row| row.get(0))
            .with_context(|| format!("Listing {} was ignored but not found", listing.url))?;
        Ok(InsertOutcome::Duplicate(id))
    }

    /// Applied rows carry a timestamp and no missing info.
    pub fn mark_applied(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE applications
             SET applied = 1, applied_at = ?1, status = 'applied', missing_info = '[]'
             WHERE id = ?2",
            params![timestamp(at), id],
        )?;
        require_row(changed, id)
    }

    /// Blocked by unanswered fields: back to pending, not applied.
    pub fn record_missing_info(&self, id: i64, keys: &[String]) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE applications
             SET missing_info = ?1, status = 'pending', applied = 0, applied_at = NULL
             WHERE id = ?2",
            params![serde_json::to_string(keys)?, id],
        )?;
        require_row(changed, id)
    }

    /// `Applied` goes through [`Database::mark_applied`] with the current time.
    pub fn set_status(&self, id: i64, status: ApplicationStatus) -> Result<()> {
        if status == ApplicationStatus::Applied {
            return self.mark_applied(id, Utc::now());
        }
        let changed = self.conn.execute(
            "UPDATE applications SET status = ?1, applied = 0, applied_at = NULL WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        require_row(changed, id)
    }

    // --- Reads ---

    /// Most recent first.
    pub fn list_unapplied(&self) -> Result<Vec<ApplicationRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM applications WHERE applied = 0 ORDER BY created_at DESC, id DESC",
                RECORD_COLUMNS
            ),
            [],
        )
        .context("Failed to list unapplied jobs")
    }

    pub fn list_records(&self, status: Option<ApplicationStatus>) -> Result<Vec<ApplicationRecord>> {
        let records = match status {
            Some(s) => self.query_records(
                &format!(
                    "SELECT {} FROM applications WHERE status = ?1 ORDER BY created_at DESC, id DESC",
                    RECORD_COLUMNS
                ),
                [s.as_str()],
            ),
            None => self.query_records(
                &format!(
                    "SELECT {} FROM applications ORDER BY created_at DESC, id DESC",
                    RECORD_COLUMNS
                ),
                [],
            ),
        };
        records.context("Failed to list applications")
    }

    pub fn get_record(&self, id: i64) -> Result<Option<ApplicationRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM applications WHERE id = ?1", RECORD_COLUMNS),
                [id],
                Self::row_to_record,
            )
            .optional()
            .context("Failed to load application")
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM applications", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Plain-text summary of every record, grouped by status.
    pub fn render_report(&self) -> Result<String> {
        let records = self.list_records(None)?;
        let mut out = String::new();
        writeln!(out, "JOB APPLICATIONS REPORT")?;
        writeln!(out, "{}", "=".repeat(50))?;
        writeln!(out, "Generated: {}", Utc::now().format("%Y-%m-%d %H:%M UTC"))?;
        writeln!(out, "Total records: {}", records.len())?;

        for status in ApplicationStatus::ALL {
            let group: Vec<&ApplicationRecord> = records.iter().filter(|r| r.status == status).collect();
            if group.is_empty() {
                continue;
            }
            writeln!(out)?;
            writeln!(out, "{} ({})", status.as_str().to_uppercase(), group.len())?;
            writeln!(out, "{}", "-".repeat(50))?;
            for record in group {
                writeln!(out, "Job Title: {}", record.title)?;
                writeln!(out, "Company: {}", record.company)?;
                writeln!(out, "URL: {}", record.url)?;
                writeln!(out, "Location: {}", record.location.as_deref().unwrap_or("-"))?;
                writeln!(out, "Applied: {}", if record.applied { "Yes" } else { "No" })?;
                if let Some(at) = &record.applied_at {
                    writeln!(out, "Applied At: {}", at)?;
                }
                if !record.requirements.is_empty() {
                    writeln!(out, "Requirements: {}", record.requirements.join(", "))?;
                }
                if !record.missing_info.is_empty() {
                    writeln!(out, "Missing Information: {}", record.missing_info.join(", "))?;
                }
                writeln!(out, "{}", "-".repeat(30))?;
            }
        }
        Ok(out)
    }

    pub fn export_report(&self, path: &Path) -> Result<()> {
        let report = self.render_report()?;
        std::fs::write(path, report)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }

    fn query_records<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<ApplicationRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ApplicationRecord> {
        let status: String = row.get(8)?;
        let requirements: String = row.get(9)?;
        let missing_info: String = row.get(10)?;
        Ok(ApplicationRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            company: row.get(2)?,
            url: row.get(3)?,
            location: row.get(4)?,
            source: row.get(5)?,
            applied: row.get::<_, i64>(6)? != 0,
            applied_at: row.get(7)?,
            status: status.parse().unwrap_or(ApplicationStatus::Pending),
            requirements: serde_json::from_str(&requirements).unwrap_or_default(),
            missing_info: serde_json::from_str(&missing_info).unwrap_or_default(),
            created_at: row.get(11)?,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn require_row(changed: usize, id: i64) -> Result<()> {
    if changed == 0 {
        return Err(anyhow!("No application with id {}", id));
    }
    Ok(())
}
