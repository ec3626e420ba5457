use chrono::{DateTime, Utc};

use super::extract::build_envelope;
use super::key::object_key;
use super::types::{PublishConfig, PublishOutcome};
use crate::excel::Snapshot;
use crate::s3::ObjectStore;

/// Sheet whose edits trigger a publish
pub(crate) const PRIMARY_SHEET: usize = 0;

/// Publish the first sheet of a document.
///
/// Never fails: a missing configuration, an edit to another sheet, and an
/// upload error are all reported through the returned outcome and the log.
/// `edited_sheet` is the sheet a change notification came from, `None` for an
/// explicit publish. The caller persists `PublishOutcome::published_at`.
pub async fn publish(
    document_id: &str,
    snapshot: &Snapshot,
    config: &PublishConfig,
    edited_sheet: Option<usize>,
    store: &dyn ObjectStore,
    now: DateTime<Utc>,
) -> PublishOutcome {
    if !config.is_configured() {
        tracing::info!(document_id, "publish skipped: not configured");
        return PublishOutcome::NotConfigured;
    }

    if let Some(index) = edited_sheet {
        if index != PRIMARY_SHEET {
            tracing::debug!(document_id, sheet = index, "ignoring edit outside the first sheet");
            return PublishOutcome::IgnoredSheet { index };
        }
    }

    let envelope = build_envelope(snapshot, config);
    let key = object_key(&config.path, document_id, config.track_changes, now);

    let body = match serde_json::to_vec(&envelope) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(document_id, %key, "failed to serialize envelope: {}", e);
            return PublishOutcome::UploadFailed {
                key,
                message: e.to_string(),
            };
        }
    };

    match store
        .put_object(&config.bucket_name, &key, body, &config.region)
        .await
    {
        Ok(()) => {
            tracing::info!(
                document_id,
                bucket = %config.bucket_name,
                %key,
                records = envelope.data.len(),
                "published"
            );
            PublishOutcome::Published {
                key,
                records: envelope.data.len(),
                published_at: now,
            }
        }
        Err(e) => {
            tracing::error!(
                document_id,
                bucket = %config.bucket_name,
                %key,
                "upload failed: {}",
                e
            );
            PublishOutcome::UploadFailed {
                key,
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::CellValue;
    use crate::s3::StorageError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// (bucket, key, body, region)
    type Put = (String, String, Vec<u8>, String);

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<Put>>,
        fail: bool,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Vec<u8>,
            region: &str,
        ) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::Service {
                    status: 403,
                    body: "AccessDenied".to_string(),
                });
            }
            self.puts.lock().unwrap().push((
                bucket.to_string(),
                key.to_string(),
                body,
                region.to_string(),
            ));
            Ok(())
        }
    }

    fn config() -> PublishConfig {
        PublishConfig {
            bucket_name: "bucket".to_string(),
            region: "eu-west-1".to_string(),
            path: "exports".to_string(),
            aws_access_key_id: "AKID".to_string(),
            aws_secret_key: "secret".to_string(),
            ..Default::default()
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot::new(vec![
            vec![CellValue::from("Name"), CellValue::from("Updated")],
            vec![CellValue::from("Ada"), CellValue::from("2024-06-01")],
        ])
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_not_configured_does_nothing() {
        let store = RecordingStore::default();
        let mut cfg = config();
        cfg.aws_secret_key.clear();

        let outcome = publish("doc", &snapshot(), &cfg, None, &store, now()).await;

        assert_eq!(outcome, PublishOutcome::NotConfigured);
        assert!(store.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_on_other_sheet_is_ignored() {
        let store = RecordingStore::default();

        let outcome = publish("doc", &snapshot(), &config(), Some(1), &store, now()).await;

        assert_eq!(outcome, PublishOutcome::IgnoredSheet { index: 1 });
        assert!(store.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_uploads_envelope() {
        let store = RecordingStore::default();

        let outcome = publish("doc", &snapshot(), &config(), Some(0), &store, now()).await;

        assert_eq!(
            outcome,
            PublishOutcome::Published {
                key: "exports/doc.json".to_string(),
                records: 1,
                published_at: now(),
            }
        );

        let puts = store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        let (bucket, key, body, region) = &puts[0];
        assert_eq!(bucket, "bucket");
        assert_eq!(key, "exports/doc.json");
        assert_eq!(region, "eu-west-1");
        assert_eq!(
            String::from_utf8(body.clone()).unwrap(),
            r#"{"data":[{"Name":"Ada","Updated":"2024-06-01"}]}"#
        );
    }

    #[tokio::test]
    async fn test_untracked_publish_is_idempotent() {
        let store = RecordingStore::default();
        let later = now() + chrono::Duration::hours(1);

        publish("doc", &snapshot(), &config(), None, &store, now()).await;
        publish("doc", &snapshot(), &config(), None, &store, later).await;

        let puts = store.puts.lock().unwrap();
        assert_eq!(puts[0].1, puts[1].1);
        assert_eq!(puts[0].2, puts[1].2);
    }

    #[tokio::test]
    async fn test_tracked_publish_uses_timestamped_key() {
        let store = RecordingStore::default();
        let mut cfg = config();
        cfg.track_changes = true;
        cfg.updated_at = Some(1);
        cfg.last_published = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let outcome = publish("doc", &snapshot(), &cfg, None, &store, now()).await;

        assert_eq!(outcome.published_at(), Some(now()));
        let puts = store.puts.lock().unwrap();
        assert_eq!(puts[0].1, "exports/doc-2024-07-01T09-00-00-000.json");
        let body: serde_json::Value = serde_json::from_slice(&puts[0].2).unwrap();
        assert_eq!(body["recordsSince"], "2024-01-01T00:00:00.000Z");
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported_not_raised() {
        let store = RecordingStore {
            fail: true,
            ..Default::default()
        };

        let outcome = publish("doc", &snapshot(), &config(), None, &store, now()).await;

        assert_eq!(outcome.published_at(), None);
        match outcome {
            PublishOutcome::UploadFailed { key, message } => {
                assert_eq!(key, "exports/doc.json");
                assert!(message.contains("403"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
