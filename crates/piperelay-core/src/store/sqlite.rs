//! SQLite-backed store.
//!
//! The default deployment target is a single-node service with an
//! embedded database: WAL journal, busy timeout, foreign keys on, and a
//! single writer connection. Schema migration is idempotent and runs at
//! startup.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::debug;

use crate::{
    error::Result,
    models::{
        Application, ApplicationId, Attempt, Delivery, DeliveryId, Endpoint, EndpointId, Message,
        MessageId,
    },
    store::{AppStats, Store, DELIVERY_LEASE_SECS},
    time::Clock,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS applications (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        api_key TEXT NOT NULL UNIQUE,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS endpoints (
        id TEXT PRIMARY KEY,
        app_id TEXT NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
        url TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        secret TEXT NOT NULL,
        event_types TEXT NOT NULL DEFAULT '[]',
        rate_limit INTEGER NOT NULL DEFAULT 0,
        metadata TEXT NOT NULL DEFAULT '{}',
        active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        app_id TEXT NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
        event_type TEXT NOT NULL,
        payload BLOB NOT NULL,
        created_at DATETIME NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS deliveries (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
        endpoint_id TEXT NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
        status TEXT NOT NULL DEFAULT 'pending',
        attempt_count INTEGER NOT NULL DEFAULT 0,
        next_retry_at DATETIME,
        leased_until DATETIME,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS attempts (
        id TEXT PRIMARY KEY,
        delivery_id TEXT NOT NULL REFERENCES deliveries(id) ON DELETE CASCADE,
        attempt_number INTEGER NOT NULL,
        status_code INTEGER NOT NULL DEFAULT 0,
        response_body TEXT NOT NULL DEFAULT '',
        latency_ms INTEGER NOT NULL DEFAULT 0,
        error TEXT NOT NULL DEFAULT '',
        created_at DATETIME NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_applications_api_key ON applications(api_key)",
    "CREATE INDEX IF NOT EXISTS idx_endpoints_app ON endpoints(app_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_app ON messages(app_id)",
    "CREATE INDEX IF NOT EXISTS idx_deliveries_message ON deliveries(message_id)",
    "CREATE INDEX IF NOT EXISTS idx_deliveries_endpoint ON deliveries(endpoint_id)",
    "CREATE INDEX IF NOT EXISTS idx_deliveries_due ON deliveries(status, next_retry_at)
        WHERE status IN ('pending', 'retrying')",
    "CREATE INDEX IF NOT EXISTS idx_attempts_delivery ON attempts(delivery_id)",
];

const DELIVERY_COLUMNS: &str =
    "id, message_id, endpoint_id, status, attempt_count, next_retry_at, created_at, updated_at";

const ENDPOINT_COLUMNS: &str = "id, app_id, url, description, secret, event_types, rate_limit, \
                                metadata, active, created_at, updated_at";

/// Durable store over a single SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Opens (creating if missing) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or configured.
    pub async fn connect(path: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        Self::connect_with(options, clock).await
    }

    /// Opens an in-memory database. State is lost when the store closes.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established.
    pub async fn connect_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true).foreign_keys(true);

        Self::connect_with(options, clock).await
    }

    async fn connect_with(options: SqliteConnectOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        // One writer connection, held for the lifetime of the store.
        // SQLite serializes writes anyway and an in-memory database
        // evaporates with its last connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool, clock })
    }

    /// Applies the schema. Idempotent, runs at every startup.
    ///
    /// # Errors
    ///
    /// Returns error if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("schema migration complete");
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_application(&self, app: &Application) -> Result<()> {
        sqlx::query(
            "INSERT INTO applications (id, name, api_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&app.id)
        .bind(&app.name)
        .bind(&app.api_key)
        .bind(app.created_at)
        .bind(app.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn application(&self, id: &ApplicationId) -> Result<Option<Application>> {
        let app = sqlx::query_as::<_, Application>(
            "SELECT id, name, api_key, created_at, updated_at FROM applications WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(app)
    }

    async fn application_by_api_key(&self, api_key: &str) -> Result<Option<Application>> {
        let app = sqlx::query_as::<_, Application>(
            "SELECT id, name, api_key, created_at, updated_at FROM applications WHERE api_key = ?",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(app)
    }

    async fn list_applications(&self) -> Result<Vec<Application>> {
        let apps = sqlx::query_as::<_, Application>(
            "SELECT id, name, api_key, created_at, updated_at FROM applications
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(apps)
    }

    async fn delete_application(&self, id: &ApplicationId) -> Result<()> {
        sqlx::query("DELETE FROM applications WHERE id = ?").bind(id).execute(&self.pool).await?;

        Ok(())
    }

    async fn rotate_api_key(&self, id: &ApplicationId, api_key: &str) -> Result<()> {
        sqlx::query("UPDATE applications SET api_key = ?, updated_at = ? WHERE id = ?")
            .bind(api_key)
            .bind(self.now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        sqlx::query(
            "INSERT INTO endpoints (id, app_id, url, description, secret, event_types,
                                    rate_limit, metadata, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&endpoint.id)
        .bind(&endpoint.app_id)
        .bind(&endpoint.url)
        .bind(&endpoint.description)
        .bind(&endpoint.secret)
        .bind(&endpoint.event_types)
        .bind(endpoint.rate_limit)
        .bind(&endpoint.metadata)
        .bind(endpoint.active)
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn endpoint(&self, id: &EndpointId) -> Result<Option<Endpoint>> {
        let endpoint = sqlx::query_as::<_, Endpoint>(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(endpoint)
    }

    async fn list_endpoints(&self, app_id: &ApplicationId) -> Result<Vec<Endpoint>> {
        let endpoints = sqlx::query_as::<_, Endpoint>(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE app_id = ? ORDER BY created_at DESC"
        ))
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(endpoints)
    }

    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        sqlx::query(
            "UPDATE endpoints
             SET url = ?, description = ?, event_types = ?, rate_limit = ?, metadata = ?,
                 active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&endpoint.url)
        .bind(&endpoint.description)
        .bind(&endpoint.event_types)
        .bind(endpoint.rate_limit)
        .bind(&endpoint.metadata)
        .bind(endpoint.active)
        .bind(self.now())
        .bind(&endpoint.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_endpoint(&self, id: &EndpointId) -> Result<()> {
        sqlx::query("DELETE FROM endpoints WHERE id = ?").bind(id).execute(&self.pool).await?;

        Ok(())
    }

    async fn set_endpoint_active(&self, id: &EndpointId, active: bool) -> Result<()> {
        sqlx::query("UPDATE endpoints SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(self.now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn active_endpoints_for_event(
        &self,
        app_id: &ApplicationId,
        event_type: &str,
    ) -> Result<Vec<Endpoint>> {
        // Subscription lists are JSON documents; matching happens here
        // rather than in SQL.
        let endpoints = sqlx::query_as::<_, Endpoint>(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM endpoints
             WHERE app_id = ? AND active = TRUE
             ORDER BY created_at ASC"
        ))
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(endpoints.into_iter().filter(|e| e.subscribes_to(event_type)).collect())
    }

    async fn create_message(&self, message: &Message) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, app_id, event_type, payload, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.app_id)
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn message(&self, id: &MessageId) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            "SELECT id, app_id, event_type, payload, created_at FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    async fn list_messages(
        &self,
        app_id: &ApplicationId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT id, app_id, event_type, payload, created_at FROM messages
             WHERE app_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(app_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn create_delivery(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query(
            "INSERT INTO deliveries (id, message_id, endpoint_id, status, attempt_count,
                                     next_retry_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&delivery.id)
        .bind(&delivery.message_id)
        .bind(&delivery.endpoint_id)
        .bind(delivery.status)
        .bind(delivery.attempt_count)
        .bind(delivery.next_retry_at)
        .bind(delivery.created_at)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delivery(&self, id: &DeliveryId) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(delivery)
    }

    async fn deliveries_for_message(&self, message_id: &MessageId) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(&format!(
            "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE message_id = ?
             ORDER BY created_at ASC"
        ))
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(deliveries)
    }

    async fn update_delivery(&self, delivery: &Delivery) -> Result<()> {
        sqlx::query(
            "UPDATE deliveries
             SET status = ?, attempt_count = ?, next_retry_at = ?, updated_at = ?,
                 leased_until = NULL
             WHERE id = ?",
        )
        .bind(delivery.status)
        .bind(delivery.attempt_count)
        .bind(delivery.next_retry_at)
        .bind(self.now())
        .bind(&delivery.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due_deliveries(&self, limit: i64) -> Result<Vec<Delivery>> {
        let now = self.now();

        // Claim transactionally: select due ids, stamp a lease, return
        // the rows. A lease keeps the row invisible to the next poll
        // until the worker either updates it (releasing the lease) or
        // the lease expires.
        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM deliveries
             WHERE status IN ('pending', 'retrying')
               AND (next_retry_at IS NULL OR next_retry_at <= ?)
               AND (leased_until IS NULL OR leased_until <= ?)
             ORDER BY created_at ASC
             LIMIT ?",
        )
        .bind(now)
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let leased_until = now + chrono::Duration::seconds(DELIVERY_LEASE_SECS);
        let mut deliveries = Vec::with_capacity(ids.len());
        for id in &ids {
            sqlx::query("UPDATE deliveries SET leased_until = ? WHERE id = ?")
                .bind(leased_until)
                .bind(id)
                .execute(&mut *tx)
                .await?;

            let delivery = sqlx::query_as::<_, Delivery>(&format!(
                "SELECT {DELIVERY_COLUMNS} FROM deliveries WHERE id = ?"
            ))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
            deliveries.push(delivery);
        }

        tx.commit().await?;

        debug!(claimed = deliveries.len(), "leased due deliveries");
        Ok(deliveries)
    }

    async fn delete_delivery(&self, id: &DeliveryId) -> Result<()> {
        sqlx::query("DELETE FROM deliveries WHERE id = ?").bind(id).execute(&self.pool).await?;

        Ok(())
    }

    async fn retry_failed_for_message(&self, message_id: &MessageId) -> Result<u64> {
        let now = self.now();
        let result = sqlx::query(
            "UPDATE deliveries
             SET status = 'retrying', next_retry_at = ?, updated_at = ?, leased_until = NULL
             WHERE message_id = ? AND status = 'failed'",
        )
        .bind(now)
        .bind(now)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn create_attempt(&self, attempt: &Attempt) -> Result<()> {
        sqlx::query(
            "INSERT INTO attempts (id, delivery_id, attempt_number, status_code, response_body,
                                   latency_ms, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&attempt.id)
        .bind(&attempt.delivery_id)
        .bind(attempt.attempt_number)
        .bind(attempt.status_code)
        .bind(&attempt.response_body)
        .bind(attempt.latency_ms)
        .bind(&attempt.error)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attempts_for_delivery(&self, delivery_id: &DeliveryId) -> Result<Vec<Attempt>> {
        let attempts = sqlx::query_as::<_, Attempt>(
            "SELECT id, delivery_id, attempt_number, status_code, response_body, latency_ms,
                    error, created_at
             FROM attempts WHERE delivery_id = ? ORDER BY attempt_number ASC",
        )
        .bind(delivery_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn stats(&self, app_id: &ApplicationId) -> Result<AppStats> {
        let total_messages: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE app_id = ?")
                .bind(app_id)
                .fetch_one(&self.pool)
                .await?;

        let delivery_count = |status_filter: &'static str| {
            let pool = self.pool.clone();
            let app_id = app_id.clone();
            async move {
                sqlx::query_scalar::<_, i64>(&format!(
                    "SELECT COUNT(*) FROM deliveries d
                     JOIN messages m ON d.message_id = m.id
                     WHERE m.app_id = ? {status_filter}"
                ))
                .bind(&app_id)
                .fetch_one(&pool)
                .await
            }
        };

        let total_deliveries = delivery_count("").await?;
        let success_count = delivery_count("AND d.status = 'success'").await?;
        let failed_count = delivery_count("AND d.status = 'failed'").await?;
        let pending_count = delivery_count("AND d.status IN ('pending', 'retrying')").await?;

        let total_endpoints: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM endpoints WHERE app_id = ?")
                .bind(app_id)
                .fetch_one(&self.pool)
                .await?;

        let active_endpoints: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM endpoints WHERE app_id = ? AND active = TRUE")
                .bind(app_id)
                .fetch_one(&self.pool)
                .await?;

        let success_rate = if total_deliveries > 0 {
            success_count as f64 / total_deliveries as f64 * 100.0
        } else {
            0.0
        };

        Ok(AppStats {
            total_messages,
            total_deliveries,
            success_count,
            failed_count,
            pending_count,
            success_rate,
            total_endpoints,
            active_endpoints,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;

        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
