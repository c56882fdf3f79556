//! SQLite Database
//!
//! Embedded database for persistent storage using rusqlite with r2d2 connection pooling.
//! Holds the analysis queue and the minimal conversation tables it reads from.

use chronicle_core::{AnalysisType, Conversation, ConversationMessage, QueueItem, QueueStatus};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, TransactionBehavior};

use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{database_path, ensure_dir};

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Column list shared by all queue queries, in `row_to_queue_item` order
const QUEUE_COLUMNS: &str = "id, subject_id, analysis_type, status, priority, attempt_count,
     max_attempts, claimed_by, result_payload, backend_used, model_used, error_message, created_at";

/// Current time in a fixed-width RFC 3339 form so lexical order matches time order
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Database service for managing SQLite operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a database from an existing connection pool.
    pub fn from_pool(pool: DbPool) -> AppResult<Self> {
        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    ///
    /// The pool holds a single connection since every `:memory:` connection is
    /// its own database.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        Self::from_pool(pool)
    }

    /// Create a new database instance at ~/.chronicle/data.db
    pub fn new() -> AppResult<Self> {
        Self::open(database_path()?)
    }

    /// Open (or create) a database file at `path`
    pub fn open(path: impl AsRef<std::path::Path>) -> AppResult<Self> {
        let db_path = path.as_ref();
        if let Some(parent) = db_path.parent() {
            ensure_dir(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
        });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        Self::from_pool(pool)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> AppResult<()> {
        let conn = self.get_connection()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS analysis_queue (
                id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                analysis_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 1,
                claimed_by TEXT,
                claimed_at TEXT,
                result_payload TEXT,
                backend_used TEXT,
                model_used TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_analysis_queue_claim
                ON analysis_queue(status, priority DESC, created_at);
            CREATE INDEX IF NOT EXISTS idx_analysis_queue_subject
                ON analysis_queue(subject_id, analysis_type);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                provider TEXT NOT NULL,
                project_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_updated
                ON conversations(updated_at);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);",
        )?;

        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    /// Check if the database is healthy
    pub fn is_healthy(&self) -> bool {
        if let Ok(conn) = self.pool.get() {
            conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
        } else {
            false
        }
    }

    // ========================================================================
    // Analysis Queue Operations
    // ========================================================================

    /// Insert a new queue item
    pub fn insert_queue_item(&self, item: &QueueItem) -> AppResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT INTO analysis_queue (id, subject_id, analysis_type, status, priority,
                attempt_count, max_attempts, claimed_by, result_payload, backend_used,
                model_used, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                item.id,
                item.subject_id,
                item.analysis_type.as_str(),
                item.status.to_string(),
                item.priority,
                item.attempt_count,
                item.max_attempts,
                item.claimed_by,
                item.result_payload,
                item.backend_used,
                item.model_used,
                item.error_message,
                item.created_at,
            ],
        )?;
        Ok(())
    }

    /// Atomically claim up to `count` pending items for `owner`.
    ///
    /// Selection and marking happen inside one `BEGIN IMMEDIATE` transaction;
    /// each update is additionally guarded on `status = 'pending'`.
    pub fn claim_queue_items(&self, count: usize, owner: &str) -> AppResult<Vec<QueueItem>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidates: Vec<QueueItem> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM analysis_queue
                 WHERE status = 'pending'
                 ORDER BY priority DESC, created_at ASC, rowid ASC
                 LIMIT ?1",
                QUEUE_COLUMNS
            ))?;
            let rows = stmt.query_map(params![count as i64], Self::row_to_queue_item)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let claimed_at = now_timestamp();
        let mut claimed = Vec::with_capacity(candidates.len());
        for mut item in candidates {
            let changed = tx.execute(
                "UPDATE analysis_queue
                 SET status = 'claimed', claimed_by = ?2, claimed_at = ?3,
                     attempt_count = attempt_count + 1
                 WHERE id = ?1 AND status = 'pending'",
                params![item.id, owner, claimed_at],
            )?;
            if changed == 1 {
                item.status = QueueStatus::Claimed;
                item.claimed_by = Some(owner.to_string());
                item.attempt_count += 1;
                claimed.push(item);
            }
        }

        tx.commit()?;
        Ok(claimed)
    }

    /// Mark a claimed item completed. Returns false if the item was not claimed.
    pub fn complete_queue_item(
        &self,
        id: &str,
        result_payload: &str,
        backend: &str,
        model: Option<&str>,
    ) -> AppResult<bool> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            "UPDATE analysis_queue
             SET status = 'completed', result_payload = ?2, backend_used = ?3,
                 model_used = ?4, error_message = NULL, completed_at = ?5
             WHERE id = ?1 AND status = 'claimed'",
            params![id, result_payload, backend, model, now_timestamp()],
        )?;
        Ok(changed == 1)
    }

    /// Mark a claimed item failed. Returns false if the item was not claimed.
    pub fn fail_queue_item(&self, id: &str, reason: &str) -> AppResult<bool> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            "UPDATE analysis_queue
             SET status = 'failed', error_message = ?2, completed_at = ?3
             WHERE id = ?1 AND status = 'claimed'",
            params![id, reason, now_timestamp()],
        )?;
        Ok(changed == 1)
    }

    /// All pending items in claim order
    pub fn get_pending_queue_items(&self) -> AppResult<Vec<QueueItem>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM analysis_queue
             WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC, rowid ASC",
            QUEUE_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_queue_item)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of pending items
    pub fn count_pending_queue_items(&self) -> AppResult<usize> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM analysis_queue WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Item counts grouped by status
    pub fn count_queue_items_by_status(&self) -> AppResult<Vec<(QueueStatus, usize)>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM analysis_queue GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row?;
            counts.push((status.parse::<QueueStatus>()?, count as usize));
        }
        Ok(counts)
    }

    /// Get a single queue item by ID
    pub fn get_queue_item(&self, id: &str) -> AppResult<Option<QueueItem>> {
        let conn = self.get_connection()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM analysis_queue WHERE id = ?1", QUEUE_COLUMNS),
            params![id],
            Self::row_to_queue_item,
        );

        match result {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::database(e.to_string())),
        }
    }

    /// Fail every item still claimed by an owner other than `current_owner`
    pub fn fail_orphaned_queue_items(&self, current_owner: &str, reason: &str) -> AppResult<usize> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            "UPDATE analysis_queue
             SET status = 'failed', error_message = ?2, completed_at = ?3
             WHERE status = 'claimed' AND (claimed_by IS NULL OR claimed_by != ?1)",
            params![current_owner, reason, now_timestamp()],
        )?;
        Ok(changed)
    }

    fn row_to_queue_item(row: &rusqlite::Row) -> rusqlite::Result<QueueItem> {
        let analysis_type: String = row.get(2)?;
        let status: String = row.get(3)?;
        Ok(QueueItem {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            analysis_type: analysis_type.parse::<AnalysisType>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?,
            status: status.parse::<QueueStatus>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })?,
            priority: row.get(4)?,
            attempt_count: row.get(5)?,
            max_attempts: row.get(6)?,
            claimed_by: row.get(7)?,
            result_payload: row.get(8)?,
            backend_used: row.get(9)?,
            model_used: row.get(10)?,
            error_message: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Insert or update a conversation record
    pub fn upsert_conversation(&self, conversation: &Conversation) -> AppResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT INTO conversations (id, title, provider, project_path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET title = ?2, provider = ?3, project_path = ?4,
                updated_at = ?6",
            params![
                conversation.id,
                conversation.title,
                conversation.provider,
                conversation.project_path,
                conversation.created_at,
                conversation.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Insert a message (ignored if the id already exists)
    pub fn insert_message(&self, message: &ConversationMessage) -> AppResult<()> {
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT OR IGNORE INTO messages (id, conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id,
                message.conversation_id,
                message.role,
                message.content,
                message.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a conversation by ID
    pub fn get_conversation(&self, id: &str) -> AppResult<Option<Conversation>> {
        let conn = self.get_connection()?;
        let result = conn.query_row(
            "SELECT id, title, provider, project_path, created_at, updated_at
             FROM conversations WHERE id = ?1",
            params![id],
            Self::row_to_conversation,
        );

        match result {
            Ok(conversation) => Ok(Some(conversation)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::database(e.to_string())),
        }
    }

    /// Messages of a conversation in chronological order
    pub fn get_messages(&self, conversation_id: &str) -> AppResult<Vec<ConversationMessage>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, created_at
             FROM messages WHERE conversation_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok(ConversationMessage {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All conversations, most recently updated first
    pub fn list_conversations(&self) -> AppResult<Vec<Conversation>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, provider, project_path, created_at, updated_at
             FROM conversations ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], Self::row_to_conversation)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
        Ok(Conversation {
            id: row.get(0)?,
            title: row.get(1)?,
            provider: row.get(2)?,
            project_path: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool_size", &self.pool.state().connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_item(id: &str, priority: i64, created_at: &str) -> QueueItem {
        QueueItem::new(id, "conv-1", AnalysisType::Summarization, priority, created_at)
    }

    #[test]
    fn test_database_health() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.is_healthy());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let db = Database::new_in_memory().unwrap();
        db.init_schema().unwrap();
        db.init_schema().unwrap();
        assert!(db.is_healthy());
    }

    #[test]
    fn test_claim_orders_by_priority_then_creation() {
        let db = Database::new_in_memory().unwrap();
        db.insert_queue_item(&queue_item("low", 0, "2024-01-01T00:00:00.000000Z")).unwrap();
        db.insert_queue_item(&queue_item("high-late", 5, "2024-01-03T00:00:00.000000Z")).unwrap();
        db.insert_queue_item(&queue_item("high-early", 5, "2024-01-02T00:00:00.000000Z")).unwrap();

        let claimed = db.claim_queue_items(2, "owner-a").unwrap();
        let ids: Vec<&str> = claimed.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["high-early", "high-late"]);
        assert!(claimed.iter().all(|i| i.status == QueueStatus::Claimed));
        assert!(claimed.iter().all(|i| i.attempt_count == 1));

        let stored = db.get_queue_item("high-early").unwrap().unwrap();
        assert_eq!(stored.claimed_by.as_deref(), Some("owner-a"));
        assert_eq!(db.count_pending_queue_items().unwrap(), 1);
    }

    #[test]
    fn test_claim_zero_is_noop() {
        let db = Database::new_in_memory().unwrap();
        db.insert_queue_item(&queue_item("a", 0, &now_timestamp())).unwrap();
        assert!(db.claim_queue_items(0, "owner").unwrap().is_empty());
        assert_eq!(db.count_pending_queue_items().unwrap(), 1);
    }

    #[test]
    fn test_terminal_transitions_require_claim() {
        let db = Database::new_in_memory().unwrap();
        db.insert_queue_item(&queue_item("a", 0, &now_timestamp())).unwrap();

        // pending items cannot jump straight to a terminal state
        assert!(!db.complete_queue_item("a", "{}", "local_cli", None).unwrap());
        assert!(!db.fail_queue_item("a", "nope").unwrap());

        db.claim_queue_items(1, "owner").unwrap();
        assert!(db.fail_queue_item("a", "boom").unwrap());

        // terminal items never move again
        assert!(!db.complete_queue_item("a", "{}", "local_cli", None).unwrap());
        let item = db.get_queue_item("a").unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_fail_orphaned_claims_skips_current_owner() {
        let db = Database::new_in_memory().unwrap();
        db.insert_queue_item(&queue_item("old", 1, "2024-01-01T00:00:00.000000Z")).unwrap();
        db.insert_queue_item(&queue_item("mine", 0, "2024-01-02T00:00:00.000000Z")).unwrap();
        db.claim_queue_items(1, "previous-session").unwrap();
        db.claim_queue_items(1, "current").unwrap();

        let failed = db.fail_orphaned_queue_items("current", "orphaned").unwrap();
        assert_eq!(failed, 1);
        assert_eq!(db.get_queue_item("old").unwrap().unwrap().status, QueueStatus::Failed);
        assert_eq!(db.get_queue_item("mine").unwrap().unwrap().status, QueueStatus::Claimed);
    }

    #[test]
    fn test_count_by_status() {
        let db = Database::new_in_memory().unwrap();
        db.insert_queue_item(&queue_item("a", 0, "2024-01-01T00:00:00.000000Z")).unwrap();
        db.insert_queue_item(&queue_item("b", 0, "2024-01-02T00:00:00.000000Z")).unwrap();
        db.claim_queue_items(1, "owner").unwrap();

        let counts = db.count_queue_items_by_status().unwrap();
        assert!(counts.contains(&(QueueStatus::Claimed, 1)));
        assert!(counts.contains(&(QueueStatus::Pending, 1)));
    }

    #[test]
    fn test_conversation_roundtrip() {
        let db = Database::new_in_memory().unwrap();
        let conversation = Conversation {
            id: "conv-1".to_string(),
            title: "Debug flaky test".to_string(),
            provider: "claude_code".to_string(),
            project_path: Some("/work/app".to_string()),
            created_at: "2024-01-01T00:00:00.000000Z".to_string(),
            updated_at: "2024-01-01T01:00:00.000000Z".to_string(),
        };
        db.upsert_conversation(&conversation).unwrap();
        for (i, role) in ["user", "assistant"].iter().enumerate() {
            db.insert_message(&ConversationMessage {
                id: format!("m{}", i),
                conversation_id: "conv-1".to_string(),
                role: role.to_string(),
                content: format!("message {}", i),
                created_at: format!("2024-01-01T00:0{}:00.000000Z", i),
            })
            .unwrap();
        }

        assert_eq!(db.get_conversation("conv-1").unwrap(), Some(conversation));
        assert!(db.get_conversation("missing").unwrap().is_none());
        let messages = db.get_messages("conv-1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(db.list_conversations().unwrap().len(), 1);
    }
}
