use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::commands::{DeliveryRecord, SessionStatus, StoredAccount};
use crate::config::get_data_directory;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastSummary {
    pub id: String,
    pub account_id: i64,
    pub account_name: Option<String>,
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub status: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryHistoryEntry {
    pub session_id: String,
    pub recipient_id: String,
    pub name: String,
    pub phone: String,
    pub status: String,
    pub error: Option<String>,
    pub host: Option<String>,
    pub delivered_at: Option<String>,
}

/// Accounts and broadcast history, backed by SQLite.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database in the application data directory.
    pub async fn init_database() -> AppResult<Self> {
        let data_dir = get_data_directory()?;
        log::info!("Database directory: {}", data_dir.display());

        Self::connect(&data_dir.join("Broadcasts.db")).await
    }

    pub async fn connect(db_path: &Path) -> AppResult<Self> {
        log::info!("Connecting to database: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let database = Self { pool };
        database.create_schema().await?;
        log::info!("Database initialized successfully");
        Ok(database)
    }

    /// Private in-memory database. A single pooled connection keeps the data alive.
    pub async fn connect_in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let database = Self { pool };
        database.create_schema().await?;
        Ok(database)
    }

    async fn create_schema(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                instance_id TEXT NOT NULL,
                token TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                last_used_at DATETIME,
                use_count INTEGER DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS broadcast_sessions (
                id TEXT PRIMARY KEY,
                account_id INTEGER NOT NULL,
                total_recipients INTEGER NOT NULL,
                sent_count INTEGER DEFAULT 0,
                failed_count INTEGER DEFAULT 0,
                session_status TEXT NOT NULL DEFAULT 'running',
                started_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                completed_at DATETIME,
                FOREIGN KEY (account_id) REFERENCES accounts (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS delivery_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                recipient_name TEXT NOT NULL,
                phone TEXT NOT NULL,
                delivery_status TEXT NOT NULL,
                error_message TEXT,
                host TEXT,
                delivered_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES broadcast_sessions (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_delivery_history_session ON delivery_history(session_id)")
            .execute(&self.pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_delivery_history_date ON delivery_history(delivered_at)")
            .execute(&self.pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_broadcast_sessions_account ON broadcast_sessions(account_id)")
            .execute(&self.pool).await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_broadcast_sessions_date ON broadcast_sessions(started_at)")
            .execute(&self.pool).await?;

        Ok(())
    }

    pub async fn get_all_accounts(&self) -> AppResult<Vec<StoredAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, instance_id, token, use_count, datetime(last_used_at) AS last_used_at
            FROM accounts ORDER BY last_used_at DESC, name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(account_from_row).collect())
    }

    pub async fn get_account_by_id(&self, id: i64) -> AppResult<StoredAccount> {
        let row = sqlx::query(
            r#"
            SELECT id, name, instance_id, token, use_count, datetime(last_used_at) AS last_used_at
            FROM accounts WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(account_from_row)
            .ok_or_else(|| AppError::not_found("account", id))
    }

    pub async fn insert_account(&self, name: &str, instance_id: &str, token: &str) -> AppResult<i64> {
        let result = sqlx::query("INSERT INTO accounts (name, instance_id, token) VALUES (?, ?, ?)")
            .bind(name)
            .bind(instance_id)
            .bind(token)
            .execute(&self.pool)
            .await;

        match result {
            Ok(result) => {
                let account_id = result.last_insert_rowid();
                log::info!("Added account: {} (ID: {})", name, account_id);
                Ok(account_id)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("2067") => {
                Err(AppError::validation("name", "An account with this name already exists"))
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    pub async fn delete_account(&self, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("account", id));
        }

        log::info!("Deleted account with id: {}", id);
        Ok(())
    }

    pub async fn update_account_usage(&self, account_id: i64) -> AppResult<()> {
        sqlx::query(
            "UPDATE accounts SET last_used_at = CURRENT_TIMESTAMP, use_count = use_count + 1 WHERE id = ?",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_broadcast_session(
        &self,
        session_id: &str,
        account_id: i64,
        total_recipients: i64,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO broadcast_sessions (id, account_id, total_recipients) VALUES (?, ?, ?)",
        )
        .bind(session_id)
        .bind(account_id)
        .bind(total_recipients)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn finish_broadcast_session(
        &self,
        session_id: &str,
        sent: i64,
        failed: i64,
        status: SessionStatus,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE broadcast_sessions
            SET sent_count = ?, failed_count = ?, session_status = ?, completed_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(sent)
        .bind(failed)
        .bind(status.as_str())
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_deliveries_batch(
        &self,
        session_id: &str,
        deliveries: &[DeliveryRecord],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        for delivery in deliveries {
            let status = if delivery.delivered { "sent" } else { "failed" };
            sqlx::query(
                r#"
                INSERT INTO delivery_history
                (session_id, recipient_id, recipient_name, phone, delivery_status, error_message, host)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session_id)
            .bind(&delivery.recipient_id)
            .bind(&delivery.name)
            .bind(&delivery.phone)
            .bind(status)
            .bind(&delivery.error)
            .bind(&delivery.host)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_broadcast_history(&self, limit: i64) -> AppResult<Vec<BroadcastSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.account_id, a.name AS account_name, s.total_recipients,
                   s.sent_count, s.failed_count, s.session_status,
                   datetime(s.started_at) AS started_at, datetime(s.completed_at) AS completed_at
            FROM broadcast_sessions s
            LEFT JOIN accounts a ON a.id = s.account_id
            ORDER BY s.started_at DESC, s.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| BroadcastSummary {
                id: row.get("id"),
                account_id: row.get("account_id"),
                account_name: row.get("account_name"),
                total: row.get("total_recipients"),
                sent: row.get("sent_count"),
                failed: row.get("failed_count"),
                status: row.get("session_status"),
                started_at: row.get("started_at"),
                completed_at: row.get("completed_at"),
            })
            .collect())
    }

    pub async fn get_session_deliveries(&self, session_id: &str) -> AppResult<Vec<DeliveryHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, recipient_id, recipient_name, phone, delivery_status,
                   error_message, host, datetime(delivered_at) AS delivered_at
            FROM delivery_history WHERE session_id = ? ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DeliveryHistoryEntry {
                session_id: row.get("session_id"),
                recipient_id: row.get("recipient_id"),
                name: row.get("recipient_name"),
                phone: row.get("phone"),
                status: row.get("delivery_status"),
                error: row.get("error_message"),
                host: row.get("host"),
                delivered_at: row.get("delivered_at"),
            })
            .collect())
    }

    pub async fn cleanup_old_broadcast_sessions(&self, days: i32) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM broadcast_sessions WHERE started_at < datetime('now', '-' || ? || ' days')",
        )
        .bind(days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn cleanup_old_delivery_history(&self, days: i32) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM delivery_history WHERE delivered_at < datetime('now', '-' || ? || ' days')",
        )
        .bind(days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn account_from_row(row: &sqlx::sqlite::SqliteRow) -> StoredAccount {
    StoredAccount {
        id: row.get("id"),
        name: row.get("name"),
        instance_id: row.get("instance_id"),
        token: row.get("token"),
        use_count: row.get("use_count"),
        last_used_at: row.get("last_used_at"),
    }
}
