use chrono::{DateTime, Utc};

use super::extract::format_timestamp;
use super::types::PublishConfig;
use crate::database::{Database, DbError};

pub const KEY_BUCKET_NAME: &str = "bucketName";
pub const KEY_REGION: &str = "region";
pub const KEY_PATH: &str = "path";
pub const KEY_ACCESS_KEY_ID: &str = "awsAccessKeyId";
pub const KEY_SECRET_KEY: &str = "awsSecretKey";
pub const KEY_TRACK_CHANGES: &str = "trackChanges";
pub const KEY_UPDATED_AT: &str = "updatedAt";
pub const KEY_LAST_PUBLISHED: &str = "lastPublished";

/// Stored under `trackChanges` when tracking is on; the key is absent otherwise
const TRACK_CHANGES_ENABLED: &str = "true";

impl Database {
    /// Create the document property table
    pub fn create_property_tables(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS document_properties (
                doc_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (doc_id, key)
            )",
            [],
        )?;

        Ok(())
    }

    pub fn get_property(&self, doc_id: &str, key: &str) -> Result<Option<String>, DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;

        let mut stmt = conn.prepare(
            "SELECT value FROM document_properties WHERE doc_id = ?1 AND key = ?2",
        )?;
        let mut rows = stmt.query([doc_id, key])?;

        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    pub fn set_property(&self, doc_id: &str, key: &str, value: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;
        conn.execute(
            "INSERT OR REPLACE INTO document_properties (doc_id, key, value) VALUES (?1, ?2, ?3)",
            [doc_id, key, value],
        )?;
        Ok(())
    }

    pub fn delete_property(&self, doc_id: &str, key: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;
        conn.execute(
            "DELETE FROM document_properties WHERE doc_id = ?1 AND key = ?2",
            [doc_id, key],
        )?;
        Ok(())
    }

    /// Load the publish configuration of a document. Missing keys give defaults.
    pub fn get_publish_config(&self, doc_id: &str) -> Result<PublishConfig, DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Lock)?;
        let mut config = PublishConfig::default();

        let mut stmt = conn.prepare("SELECT key, value FROM document_properties WHERE doc_id = ?1")?;
        let rows = stmt.query_map([doc_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            match key.as_str() {
                KEY_BUCKET_NAME => config.bucket_name = value,
                KEY_REGION => config.region = value,
                KEY_PATH => config.path = value,
                KEY_ACCESS_KEY_ID => config.aws_access_key_id = value,
                KEY_SECRET_KEY => config.aws_secret_key = value,
                KEY_TRACK_CHANGES => config.track_changes = value == TRACK_CHANGES_ENABLED,
                KEY_UPDATED_AT => config.updated_at = value.trim().parse().ok(),
                KEY_LAST_PUBLISHED => {
                    config.last_published = DateTime::parse_from_rfc3339(&value)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| {
                            tracing::warn!(doc_id, "ignoring unreadable lastPublished {:?}: {}", value, e);
                        })
                        .ok();
                }
                _ => {}
            }
        }

        Ok(config)
    }

    /// Save the settings a configuration form edits. `lastPublished` is left alone.
    pub fn save_publish_config(&self, doc_id: &str, config: &PublishConfig) -> Result<(), DbError> {
        let pairs = [
            (KEY_BUCKET_NAME, config.bucket_name.as_str()),
            (KEY_REGION, config.region.as_str()),
            (KEY_PATH, config.path.as_str()),
            (KEY_ACCESS_KEY_ID, config.aws_access_key_id.as_str()),
            (KEY_SECRET_KEY, config.aws_secret_key.as_str()),
        ];

        for (key, value) in pairs {
            self.set_property(doc_id, key, value)?;
        }

        if config.track_changes {
            self.set_property(doc_id, KEY_TRACK_CHANGES, TRACK_CHANGES_ENABLED)?;
            match config.updated_at {
                Some(col) => self.set_property(doc_id, KEY_UPDATED_AT, &col.to_string())?,
                None => self.delete_property(doc_id, KEY_UPDATED_AT)?,
            }
        } else {
            self.delete_property(doc_id, KEY_TRACK_CHANGES)?;
            self.delete_property(doc_id, KEY_UPDATED_AT)?;
        }

        Ok(())
    }

    /// Record a successful publish
    pub fn set_last_published(&self, doc_id: &str, at: DateTime<Utc>) -> Result<(), DbError> {
        self.set_property(doc_id, KEY_LAST_PUBLISHED, &format_timestamp(at))
    }
}
