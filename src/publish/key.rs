use chrono::{DateTime, Utc};

/// Object key for a publish: `{path/}{documentId}{-yyyy-MM-dd'T'HH-mm-ss-SSS}.json`.
///
/// The timestamp suffix is only added when tracking, so untracked publishes
/// keep overwriting the same object.
pub fn object_key(path: &str, document_id: &str, tracking: bool, now: DateTime<Utc>) -> String {
    let mut key = String::new();

    let prefix = path.trim_end_matches('/');
    if !prefix.is_empty() {
        key.push_str(prefix);
        key.push('/');
    }

    key.push_str(document_id);

    if tracking {
        key.push('-');
        key.push_str(&now.format("%Y-%m-%dT%H-%M-%S-%3f").to_string());
    }

    key.push_str(".json");
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap() + chrono::Duration::milliseconds(42)
    }

    #[test]
    fn test_untracked_key() {
        assert_eq!(object_key("", "doc", false, now()), "doc.json");
        assert_eq!(object_key("exports", "doc", false, now()), "exports/doc.json");
    }

    #[test]
    fn test_tracked_key_has_timestamp() {
        assert_eq!(
            object_key("exports/", "doc", true, now()),
            "exports/doc-2024-03-05T07-08-09-042.json"
        );
    }
}
