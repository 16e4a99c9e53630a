use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{Invocation, SessionStore};
use crate::analysis::{
    AnalysisSession, Draft, IterationRecord, SessionCounts, SessionStatus, SessionSummary,
    TerminationReason,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SESSION_ROW_SQL: &str = r#"
    SELECT id, query, scope_filter, status, termination_reason, error_message,
           cancel_requested, current_draft, created_at, updated_at, completed_at
    FROM analysis_sessions
    WHERE id = ?
"#;

const ITERATIONS_SQL: &str = r#"
    SELECT record
    FROM analysis_iterations
    WHERE session_id = ?
    ORDER BY iteration_index ASC
"#;

/// SQLite-backed session store
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at the configured path
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Open a private in-memory database.
    ///
    /// Uses a single long-lived connection, since every SQLite connection
    /// to `:memory:` sees its own database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_session_row(&self, id: &str) -> StorageResult<Option<SessionRow>> {
        let row: Option<SessionRow> = sqlx::query_as(SESSION_ROW_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn current_status(&self, id: &str) -> StorageResult<SessionStatus> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM analysis_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            Some(s) => parse_status(&s),
            None => Err(StorageError::SessionNotFound {
                session_id: id.to_string(),
            }),
        }
    }

    /// Apply a status change only when the current status may move to `to`.
    async fn transition(
        &self,
        id: &str,
        to: SessionStatus,
        reason: Option<TerminationReason>,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let predecessors: Vec<&'static str> = [
            SessionStatus::Pending,
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
            SessionStatus::Failed,
        ]
        .iter()
        .filter(|s| s.can_transition_to(to))
        .map(|s| s.as_str())
        .collect();

        let now = Utc::now().to_rfc3339();
        let completed_at = to.is_terminal().then(|| now.clone());
        let placeholders = vec!["?"; predecessors.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE analysis_sessions
            SET status = ?,
                termination_reason = COALESCE(?, termination_reason),
                error_message = COALESCE(?, error_message),
                completed_at = COALESCE(?, completed_at),
                updated_at = ?
            WHERE id = ? AND status IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(reason.map(|r| r.as_str()))
            .bind(error_message)
            .bind(completed_at)
            .bind(&now)
            .bind(id);
        for status in &predecessors {
            query = query.bind(*status);
        }

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            let from = self.current_status(id).await?;
            return Err(StorageError::InvalidTransition {
                session_id: id.to_string(),
                from,
                to,
            });
        }

        debug!(session_id = %id, status = %to, "Session status updated");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn create_session(&self, session: &AnalysisSession) -> StorageResult<()> {
        let draft = session.current_draft.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO analysis_sessions
                (id, query, scope_filter, status, termination_reason, error_message,
                 cancel_requested, current_draft, created_at, updated_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.query)
        .bind(&session.scope_filter)
        .bind(session.status.as_str())
        .bind(session.termination_reason.map(|r| r.as_str()))
        .bind(&session.error_message)
        .bind(session.cancel_requested)
        .bind(&draft)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<AnalysisSession>> {
        // Row and iterations come from one read transaction so a concurrent
        // append is either wholly visible or not at all.
        let mut tx = self.pool.begin().await?;

        let row: Option<SessionRow> = sqlx::query_as(SESSION_ROW_SQL)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let records: Vec<(String,)> = sqlx::query_as(ITERATIONS_SQL)
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let iterations = records
            .into_iter()
            .map(|(record,)| from_json(&record))
            .collect::<StorageResult<Vec<IterationRecord>>>()?;
        row.into_session(iterations).map(Some)
    }

    async fn list_sessions(&self, limit: u32) -> StorageResult<Vec<SessionSummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.query, s.scope_filter, s.status, s.termination_reason,
                   s.created_at, s.updated_at,
                   (SELECT COUNT(*) FROM analysis_iterations i WHERE i.session_id = s.id)
                       AS iteration_count
            FROM analysis_sessions s
            ORDER BY s.created_at DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SummaryRow::into_summary).collect()
    }

    async fn update_status(&self, id: &str, status: SessionStatus) -> StorageResult<()> {
        self.transition(id, status, None, None).await
    }

    async fn save_draft(&self, id: &str, draft: &Draft) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_sessions
            SET current_draft = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(to_json(draft)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let status = self.current_status(id).await?;
            return Err(StorageError::SessionTerminal {
                session_id: id.to_string(),
                status,
            });
        }
        Ok(())
    }

    async fn finish_session(
        &self,
        id: &str,
        reason: TerminationReason,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        self.transition(id, reason.terminal_status(), Some(reason), error_message)
            .await
    }

    async fn request_cancel(&self, id: &str) -> StorageResult<SessionStatus> {
        sqlx::query(
            r#"
            UPDATE analysis_sessions
            SET cancel_requested = 1, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.current_status(id).await
    }

    async fn is_cancel_requested(&self, id: &str) -> StorageResult<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM analysis_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        flag.ok_or_else(|| StorageError::SessionNotFound {
            session_id: id.to_string(),
        })
    }

    async fn delete_session(&self, id: &str) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM analysis_iterations WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM analysis_sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::SessionNotFound {
                session_id: id.to_string(),
            });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fail_running_sessions(&self, error_message: &str) -> StorageResult<Vec<String>> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM analysis_sessions WHERE status = 'running'")
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            UPDATE analysis_sessions
            SET status = 'failed',
                termination_reason = 'error',
                error_message = ?,
                completed_at = ?,
                updated_at = ?
            WHERE status = 'running'
            "#,
        )
        .bind(error_message)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ids)
    }

    async fn pending_session_ids(&self) -> StorageResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM analysis_sessions WHERE status = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn session_counts(&self) -> StorageResult<SessionCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM analysis_sessions GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = SessionCounts::default();
        for (status, count) in rows {
            counts.add(parse_status(&status)?, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    async fn get_iterations(&self, session_id: &str) -> StorageResult<Vec<IterationRecord>> {
        let rows: Vec<(String,)> = sqlx::query_as(ITERATIONS_SQL)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|(record,)| from_json(&record)).collect()
    }

    async fn append_iteration(
        &self,
        session_id: &str,
        record: &IterationRecord,
    ) -> StorageResult<()> {
        let record_json = to_json(record)?;
        let draft_json = to_json(&record.post_draft)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        // Single guarded insert: running, not cancelled, contiguous index.
        let inserted = sqlx::query(
            r#"
            INSERT INTO analysis_iterations (session_id, iteration_index, score, record, created_at)
            SELECT ?, ?, ?, ?, ?
            FROM analysis_sessions
            WHERE id = ?
              AND status = 'running'
              AND cancel_requested = 0
              AND (SELECT COUNT(*) FROM analysis_iterations WHERE session_id = ?) = ?
            "#,
        )
        .bind(session_id)
        .bind(i64::from(record.index))
        .bind(record.score)
        .bind(&record_json)
        .bind(record.created_at.to_rfc3339())
        .bind(session_id)
        .bind(session_id)
        .bind(i64::from(record.index))
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.diagnose_rejected_append(session_id, record.index).await);
        }

        sqlx::query(
            r#"
            UPDATE analysis_sessions
            SET current_draft = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&draft_json)
        .bind(&now)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            session_id = %session_id,
            iteration = record.index,
            score = record.score,
            "Iteration appended"
        );
        Ok(())
    }

    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()> {
        let input = to_json(&invocation.input)?;
        let output = invocation.output.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO invocations (id, session_id, operation, input, output, attempts, latency_ms, success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&invocation.id)
        .bind(&invocation.session_id)
        .bind(&invocation.operation)
        .bind(&input)
        .bind(&output)
        .bind(i64::from(invocation.attempts))
        .bind(invocation.latency_ms)
        .bind(invocation.success)
        .bind(&invocation.error)
        .bind(invocation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl SqliteStorage {
    /// Explain why a guarded append inserted nothing.
    async fn diagnose_rejected_append(&self, session_id: &str, index: u32) -> StorageError {
        let row = match self.fetch_session_row(session_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                return StorageError::SessionNotFound {
                    session_id: session_id.to_string(),
                }
            }
            Err(e) => return e,
        };

        let status = match parse_status(&row.status) {
            Ok(status) => status,
            Err(e) => return e,
        };
        if status != SessionStatus::Running {
            return StorageError::SessionTerminal {
                session_id: session_id.to_string(),
                status,
            };
        }
        if row.cancel_requested {
            return StorageError::CancelRequested {
                session_id: session_id.to_string(),
            };
        }

        let count: Result<i64, _> =
            sqlx::query_scalar("SELECT COUNT(*) FROM analysis_iterations WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await;
        match count {
            Ok(count) => StorageError::IterationOutOfOrder {
                session_id: session_id.to_string(),
                expected: u32::try_from(count).unwrap_or(u32::MAX),
                actual: index,
            },
            Err(e) => e.into(),
        }
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    query: String,
    scope_filter: Option<String>,
    status: String,
    termination_reason: Option<String>,
    error_message: Option<String>,
    cancel_requested: bool,
    current_draft: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl SessionRow {
    fn into_session(self, iterations: Vec<IterationRecord>) -> StorageResult<AnalysisSession> {
        Ok(AnalysisSession {
            status: parse_status(&self.status)?,
            termination_reason: self
                .termination_reason
                .as_deref()
                .map(parse_reason)
                .transpose()?,
            current_draft: self.current_draft.as_deref().map(from_json).transpose()?,
            id: self.id,
            query: self.query,
            scope_filter: self.scope_filter,
            error_message: self.error_message,
            cancel_requested: self.cancel_requested,
            iterations,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
            completed_at: self.completed_at.as_deref().map(parse_timestamp),
        })
    }
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: String,
    query: String,
    scope_filter: Option<String>,
    status: String,
    termination_reason: Option<String>,
    created_at: String,
    updated_at: String,
    iteration_count: i64,
}

impl SummaryRow {
    fn into_summary(self) -> StorageResult<SessionSummary> {
        Ok(SessionSummary {
            status: parse_status(&self.status)?,
            termination_reason: self
                .termination_reason
                .as_deref()
                .map(parse_reason)
                .transpose()?,
            id: self.id,
            query: self.query,
            scope_filter: self.scope_filter,
            iteration_count: u32::try_from(self.iteration_count).unwrap_or(u32::MAX),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        })
    }
}

fn parse_status(raw: &str) -> StorageResult<SessionStatus> {
    raw.parse::<SessionStatus>()
        .map_err(|message| StorageError::Query { message })
}

fn parse_reason(raw: &str) -> StorageResult<TerminationReason> {
    raw.parse::<TerminationReason>()
        .map_err(|message| StorageError::Query { message })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization {
        message: e.to_string(),
    })
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> StorageResult<T> {
    serde_json::from_str(raw).map_err(|e| StorageError::Serialization {
        message: e.to_string(),
    })
}
