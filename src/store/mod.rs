//! SQLite persistence for sessions and artifacts.
//!
//! All durable state lives in two tables: sessions (transcript + forward-only
//! status marker) and artifacts (one current row per session/stage pair).
//! Artifact writes are upserts keyed by that pair — two competing writers can
//! never produce duplicate rows; the last write wins.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::pipeline::models::Artifact;
use crate::session::{Session, SessionStatus, SessionSummary};
use crate::stage::StageId;

/// Async-safe handle to the database.
///
/// Wraps `Db` behind `Arc<Mutex>` and runs all access on tokio's blocking
/// thread pool via `spawn_blocking`, keeping synchronous SQLite I/O off the
/// async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Db>>,
}

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with database access on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Db) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    owner TEXT NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    transcript TEXT NOT NULL,
                    transcript_hash TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'created',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS artifacts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                    stage TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(session_id, stage)
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner);
                CREATE INDEX IF NOT EXISTS idx_artifacts_session ON artifacts(session_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub fn create_session(&self, session: &Session) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sessions (id, owner, title, transcript, transcript_hash, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session.id,
                    session.owner,
                    session.title,
                    session.transcript,
                    session.transcript_hash,
                    session.status.as_str(),
                    session.created_at,
                    session.updated_at,
                ],
            )
            .context("Failed to insert session")?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, owner, title, transcript, transcript_hash, status, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .context("Failed to read session")?;

        match row {
            None => Ok(None),
            Some((id, owner, title, transcript, transcript_hash, status, created_at, updated_at)) => {
                let status = SessionStatus::from_str(&status)?;
                Ok(Some(Session {
                    id,
                    owner,
                    title,
                    transcript,
                    transcript_hash,
                    status,
                    created_at,
                    updated_at,
                }))
            }
        }
    }

    pub fn list_sessions(&self, owner: &str) -> Result<Vec<SessionSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, status, transcript_hash, created_at
                 FROM sessions WHERE owner = ?1 ORDER BY created_at DESC",
            )
            .context("Failed to prepare session listing")?;
        let rows = stmt
            .query_map(params![owner], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to list sessions")?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, title, status, transcript_hash, created_at) =
                row.context("Failed to read session row")?;
            summaries.push(SessionSummary {
                id,
                title,
                status: SessionStatus::from_str(&status)?,
                transcript_hash,
                created_at,
            });
        }
        Ok(summaries)
    }

    /// Advance the session status marker.
    ///
    /// Forward-only: a marker at or behind the current one leaves the row
    /// unchanged, so a re-run against an already-complete session never
    /// regresses it. The handle's mutex serializes the read and write.
    pub fn advance_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        let current = self
            .conn
            .query_row(
                "SELECT status FROM sessions WHERE id = ?1",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("Failed to read session status")?
            .with_context(|| format!("Session {} not found", id))?;
        let current = SessionStatus::from_str(&current)?;

        if status.rank() > current.rank() {
            self.conn
                .execute(
                    "UPDATE sessions SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
                    params![id, status.as_str()],
                )
                .context("Failed to update session status")?;
        }
        Ok(())
    }

    // ── Artifacts ─────────────────────────────────────────────────────

    /// Insert or overwrite the artifact for (session, stage).
    ///
    /// Atomic per key: the UNIQUE constraint plus ON CONFLICT means two
    /// competing writers cannot produce duplicate rows; last write wins.
    pub fn upsert_artifact(&self, session_id: &str, artifact: &Artifact) -> Result<()> {
        let (kind, content) = match artifact {
            Artifact::Structured { value, .. } => (
                "structured",
                serde_json::to_string(value).context("Failed to encode artifact value")?,
            ),
            Artifact::Degraded { raw, .. } => ("degraded", raw.clone()),
        };
        self.conn
            .execute(
                "INSERT INTO artifacts (session_id, stage, kind, content)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id, stage) DO UPDATE SET
                     kind = excluded.kind,
                     content = excluded.content,
                     updated_at = datetime('now')",
                params![session_id, artifact.stage().as_str(), kind, content],
            )
            .context("Failed to upsert artifact")?;
        Ok(())
    }

    pub fn get_artifact(&self, session_id: &str, stage: StageId) -> Result<Option<Artifact>> {
        let row = self
            .conn
            .query_row(
                "SELECT kind, content FROM artifacts WHERE session_id = ?1 AND stage = ?2",
                params![session_id, stage.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("Failed to read artifact")?;

        match row {
            None => Ok(None),
            Some((kind, content)) => Ok(Some(decode_artifact(stage, &kind, content)?)),
        }
    }

    pub fn list_artifacts(&self, session_id: &str) -> Result<Vec<Artifact>> {
        let mut stmt = self
            .conn
            .prepare("SELECT stage, kind, content FROM artifacts WHERE session_id = ?1")
            .context("Failed to prepare artifact listing")?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("Failed to list artifacts")?;

        let mut artifacts = Vec::new();
        for row in rows {
            let (stage, kind, content) = row.context("Failed to read artifact row")?;
            let stage = StageId::from_str(&stage)?;
            artifacts.push(decode_artifact(stage, &kind, content)?);
        }
        artifacts.sort_by_key(|a| a.stage().position());
        Ok(artifacts)
    }

    /// Number of artifact rows for a session (test and status inspection).
    pub fn count_artifacts(&self, session_id: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM artifacts WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .context("Failed to count artifacts")?;
        Ok(count as usize)
    }
}

fn decode_artifact(stage: StageId, kind: &str, content: String) -> Result<Artifact> {
    match kind {
        "structured" => {
            let value = serde_json::from_str(&content)
                .context("Failed to decode stored artifact value")?;
            Ok(Artifact::Structured { stage, value })
        }
        "degraded" => Ok(Artifact::Degraded {
            stage,
            raw: content,
        }),
        other => anyhow::bail!("Unknown artifact kind: {}", other),
    }
}
