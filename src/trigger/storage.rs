use super::types::Subscription;
use super::EventSubscriptions;
use crate::database::{Database, DbError};

impl Database {
    /// Create the subscriptions table
    pub fn create_subscription_tables(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                id TEXT PRIMARY KEY,
                doc_id TEXT NOT NULL,
                handler TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_doc_id ON subscriptions(doc_id)",
            [],
        )?;

        Ok(())
    }

    /// Every subscription for a handler, oldest first
    pub fn list_subscriptions(&self, handler: &str) -> Result<Vec<Subscription>, DbError> {
        self.query_subscriptions(
            "SELECT id, doc_id, handler, source, created_at FROM subscriptions
             WHERE handler = ?1 ORDER BY created_at ASC",
            handler,
        )
    }

    fn query_subscriptions(&self, sql: &str, param: &str) -> Result<Vec<Subscription>, DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([param], |row| {
            Ok(Subscription {
                id: row.get(0)?,
                doc_id: row.get(1)?,
                handler: row.get(2)?,
                source: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        let mut subscriptions = Vec::new();
        for row in rows {
            subscriptions.push(row?);
        }

        Ok(subscriptions)
    }
}

impl EventSubscriptions for Database {
    type Error = DbError;

    fn subscriptions(&self, doc_id: &str) -> Result<Vec<Subscription>, DbError> {
        self.query_subscriptions(
            "SELECT id, doc_id, handler, source, created_at FROM subscriptions
             WHERE doc_id = ?1 ORDER BY created_at ASC",
            doc_id,
        )
    }

    fn unsubscribe(&self, id: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;
        conn.execute("DELETE FROM subscriptions WHERE id = ?1", [id])?;
        Ok(())
    }

    fn subscribe(&self, doc_id: &str, handler: &str, source: &str) -> Result<Subscription, DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO subscriptions (id, doc_id, handler, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, doc_id, handler, source, now],
        )?;

        Ok(Subscription {
            id,
            doc_id: doc_id.to_string(),
            handler: handler.to_string(),
            source: source.to_string(),
            created_at: now,
        })
    }
}
