use serde::{Deserialize, Serialize};

/// A registered change-notification callback for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub doc_id: String,
    pub handler: String,
    /// Workbook path the notifications come from
    pub source: String,
    pub created_at: i64,
}
