use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One data row keyed by column header, in column order
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Top-level JSON document uploaded to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub data: Vec<Record>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub records_since: Option<String>,
}

/// Per-document publish settings, loaded before a publish and saved after
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishConfig {
    pub bucket_name: String,
    pub region: String,
    /// Key prefix inside the bucket, may be empty
    pub path: String,
    pub aws_access_key_id: String,
    pub aws_secret_key: String,
    pub track_changes: bool,
    /// Zero-based column holding each row's last-updated timestamp
    pub updated_at: Option<usize>,
    pub last_published: Option<DateTime<Utc>>,
}

impl PublishConfig {
    /// Bucket, region and both credentials are present
    pub fn is_configured(&self) -> bool {
        !self.bucket_name.is_empty()
            && !self.region.is_empty()
            && !self.aws_access_key_id.is_empty()
            && !self.aws_secret_key.is_empty()
    }

    /// Column to filter on, when incremental filtering applies
    pub fn tracking_column(&self) -> Option<usize> {
        if self.track_changes {
            self.updated_at
        } else {
            None
        }
    }

    /// Copy safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.aws_secret_key.is_empty() {
            copy.aws_secret_key = "********".to_string();
        }
        copy
    }
}

/// Result of a publish attempt. Every variant is a normal return.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    NotConfigured,
    IgnoredSheet { index: usize },
    Published {
        key: String,
        records: usize,
        published_at: DateTime<Utc>,
    },
    UploadFailed { key: String, message: String },
}

impl PublishOutcome {
    /// New last-published timestamp to persist, if any
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        match self {
            PublishOutcome::Published { published_at, .. } => Some(*published_at),
            _ => None,
        }
    }
}
