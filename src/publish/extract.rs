use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};

use super::types::{Envelope, PublishConfig, Record};
use crate::excel::reader::excel_serial_to_naive;
use crate::excel::{CellValue, Snapshot};

/// Largest integer a JSON consumer can hold exactly in a double
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Turn a sheet snapshot into the envelope that gets uploaded.
///
/// Row 0 names the columns; columns with a blank header are dropped from
/// every record. Entirely blank data rows are skipped. When change tracking
/// is on and a last-updated column is set, only rows updated strictly after
/// the last publish are kept.
pub fn build_envelope(snapshot: &Snapshot, config: &PublishConfig) -> Envelope {
    let since = records_since(config);
    let filter_column = config.tracking_column();

    let columns = header_columns(snapshot.header().unwrap_or(&[]));

    let data = snapshot
        .rows
        .iter()
        .skip(1)
        .filter(|row| !is_blank_row(row))
        .filter(|row| match filter_column {
            Some(col) => is_updated_since(row, col, since),
            None => true,
        })
        .map(|row| to_record(row, &columns))
        .collect();

    Envelope {
        data,
        records_since: config.track_changes.then(|| format_timestamp(since)),
    }
}

/// Lower bound for incremental filtering; a document never published starts at the epoch
fn records_since(config: &PublishConfig) -> DateTime<Utc> {
    config.last_published.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// (column index, header) for every column with a non-blank header
fn header_columns(header: &[CellValue]) -> Vec<(usize, String)> {
    header
        .iter()
        .enumerate()
        .filter(|(_, cell)| !cell.is_blank())
        .map(|(idx, cell)| (idx, header_key(cell)))
        .collect()
}

/// Column name for a header cell, spelled the way the cell would be as a value
fn header_key(cell: &CellValue) -> String {
    match cell {
        CellValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        _ => match cell_to_json(cell) {
            Value::Null => String::new(),
            Value::String(s) => s,
            other => other.to_string(),
        },
    }
}

fn is_blank_row(row: &[CellValue]) -> bool {
    row.iter().all(CellValue::is_blank)
}

fn is_updated_since(row: &[CellValue], column: usize, since: DateTime<Utc>) -> bool {
    row.get(column)
        .and_then(cell_timestamp)
        .map(|updated| updated > since)
        .unwrap_or(false)
}

fn to_record(row: &[CellValue], columns: &[(usize, String)]) -> Record {
    let mut record = Record::new();
    for (idx, header) in columns {
        let value = row.get(*idx).map(cell_to_json).unwrap_or(Value::Null);
        record.insert(header.clone(), value);
    }
    record
}

/// JSON form of a cell; blank strings become null, everything else keeps its type
pub fn cell_to_json(cell: &CellValue) -> Value {
    match cell {
        CellValue::Empty => Value::Null,
        CellValue::String(s) if s.is_empty() => Value::Null,
        CellValue::String(s) => Value::String(s.clone()),
        CellValue::Number(n) => number_to_json(*n),
        CellValue::Boolean(b) => Value::Bool(*b),
        CellValue::DateTime(s) => match parse_timestamp(s) {
            Some(dt) => Value::String(format_timestamp(dt)),
            None => Value::String(s.clone()),
        },
        CellValue::Error(e) => Value::String(e.clone()),
    }
}

fn number_to_json(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Read a cell as a point in time, if it holds one
pub fn cell_timestamp(cell: &CellValue) -> Option<DateTime<Utc>> {
    match cell {
        CellValue::DateTime(s) | CellValue::String(s) => parse_timestamp(s),
        CellValue::Number(n) => excel_serial_to_naive(*n).map(|dt| dt.and_utc()),
        _ => None,
    }
}

/// Parse RFC 3339 or a naive date/datetime (taken as UTC)
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// ISO 8601 in UTC with milliseconds, e.g. `2024-01-01T00:00:00.000Z`
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(values: &[&str]) -> Vec<CellValue> {
        values.iter().map(|v| CellValue::from(*v)).collect()
    }

    fn tracking_config(column: usize, last_published: Option<DateTime<Utc>>) -> PublishConfig {
        PublishConfig {
            track_changes: true,
            updated_at: Some(column),
            last_published,
            ..Default::default()
        }
    }

    #[test]
    fn test_blank_header_column_and_blank_row_dropped() {
        let snapshot = Snapshot::new(vec![
            row(&["Name", "", "Age"]),
            row(&["Ada", "x", "30"]),
            row(&["", "", ""]),
        ]);

        let envelope = build_envelope(&snapshot, &PublishConfig::default());
        let body = serde_json::to_string(&envelope).unwrap();

        assert_eq!(body, r#"{"data":[{"Name":"Ada","Age":"30"}]}"#);
        assert!(envelope.records_since.is_none());
    }

    #[test]
    fn test_all_headers_blank_gives_empty_records() {
        let snapshot = Snapshot::new(vec![row(&["", ""]), row(&["a", "b"]), row(&["c", ""])]);

        let envelope = build_envelope(&snapshot, &PublishConfig::default());
        assert_eq!(envelope.data.len(), 2);
        assert!(envelope.data.iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_header_keys_match_value_formatting() {
        let header = vec![
            CellValue::from("Name"),
            CellValue::Number(2024.0),
            CellValue::Number(1.5),
            CellValue::Number(1e20),
            CellValue::DateTime("2024-01-01T00:00:00.000".to_string()),
            CellValue::Boolean(true),
        ];

        assert_eq!(header_key(&header[0]), "Name");
        assert_eq!(header_key(&header[1]), "2024");
        assert_eq!(header_key(&header[2]), "1.5");
        assert_eq!(header_key(&header[3]), cell_to_json(&header[3]).to_string());
        assert_ne!(header_key(&header[3]), i64::MAX.to_string());
        assert_eq!(header_key(&header[4]), "2024-01-01T00:00:00.000Z");
        assert_eq!(header_key(&header[5]), "TRUE");
        assert_eq!(header_key(&CellValue::Empty), "");
    }

    #[test]
    fn test_empty_snapshot() {
        let envelope = build_envelope(&Snapshot::default(), &PublishConfig::default());
        assert!(envelope.data.is_empty());

        let header_only = Snapshot::new(vec![row(&["Name"])]);
        assert!(build_envelope(&header_only, &PublishConfig::default()).data.is_empty());
    }

    #[test]
    fn test_row_with_non_string_value_is_kept() {
        let snapshot = Snapshot::new(vec![
            row(&["Name", "Score"]),
            vec![CellValue::from(""), CellValue::Number(0.0)],
            vec![CellValue::Empty, CellValue::Boolean(false)],
            vec![CellValue::Empty, CellValue::Empty],
        ]);

        let envelope = build_envelope(&snapshot, &PublishConfig::default());
        assert_eq!(
            serde_json::to_value(&envelope.data).unwrap(),
            json!([
                {"Name": null, "Score": 0},
                {"Name": null, "Score": false},
            ])
        );
    }

    #[test]
    fn test_blank_string_becomes_null_but_falsy_values_do_not() {
        assert_eq!(cell_to_json(&CellValue::from("")), Value::Null);
        assert_eq!(cell_to_json(&CellValue::Empty), Value::Null);
        assert_eq!(cell_to_json(&CellValue::Number(0.0)), json!(0));
        assert_eq!(cell_to_json(&CellValue::Boolean(false)), json!(false));
        assert_eq!(cell_to_json(&CellValue::from(" ")), json!(" "));
    }

    #[test]
    fn test_number_rendering() {
        assert_eq!(cell_to_json(&CellValue::Number(30.0)), json!(30));
        assert_eq!(cell_to_json(&CellValue::Number(-2.5)), json!(-2.5));
        assert_eq!(cell_to_json(&CellValue::Number(1e300)), json!(1e300));
        assert_eq!(cell_to_json(&CellValue::Number(f64::NAN)), Value::Null);
    }

    #[test]
    fn test_dates_serialize_as_utc_iso() {
        let cell = CellValue::DateTime("2024-06-01T08:30:00.000".to_string());
        assert_eq!(cell_to_json(&cell), json!("2024-06-01T08:30:00.000Z"));
    }

    #[test]
    fn test_tracking_filter_scenario() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let snapshot = Snapshot::new(vec![
            row(&["Id", "Name", "Updated"]),
            row(&["1", "old", "2023-12-31"]),
            row(&["2", "new", "2024-06-01"]),
        ]);

        let envelope = build_envelope(&snapshot, &tracking_config(2, Some(last)));

        assert_eq!(envelope.data.len(), 1);
        assert_eq!(envelope.data[0]["Name"], json!("new"));
        assert_eq!(envelope.records_since.as_deref(), Some("2024-01-01T00:00:00.000Z"));
        assert_eq!(parse_timestamp(envelope.records_since.as_deref().unwrap()), Some(last));
    }

    #[test]
    fn test_tracking_filter_is_strict() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let snapshot = Snapshot::new(vec![
            row(&["Updated"]),
            row(&["2024-01-01T00:00:00Z"]),
            row(&["2024-01-01T00:00:00.001Z"]),
        ]);

        let envelope = build_envelope(&snapshot, &tracking_config(0, Some(last)));
        assert_eq!(envelope.data.len(), 1);
        assert_eq!(envelope.data[0]["Updated"], json!("2024-01-01T00:00:00.001Z"));
    }

    #[test]
    fn test_tracking_excludes_rows_without_timestamp() {
        let snapshot = Snapshot::new(vec![
            row(&["Name", "Updated"]),
            row(&["a", ""]),
            row(&["b", "not a date"]),
            vec![CellValue::from("c")],
            vec![CellValue::from("d"), CellValue::Number(45444.0)],
        ]);

        let envelope = build_envelope(&snapshot, &tracking_config(1, None));
        assert_eq!(envelope.data.len(), 1);
        assert_eq!(envelope.data[0]["Name"], json!("d"));
    }

    #[test]
    fn test_first_tracked_publish_starts_at_epoch() {
        let snapshot = Snapshot::new(vec![row(&["Updated"]), row(&["2020-05-05"])]);

        let envelope = build_envelope(&snapshot, &tracking_config(0, None));
        assert_eq!(envelope.data.len(), 1);
        assert_eq!(envelope.records_since.as_deref(), Some("1970-01-01T00:00:00.000Z"));
    }

    #[test]
    fn test_tracking_without_column_keeps_all_rows() {
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let config = PublishConfig {
            track_changes: true,
            updated_at: None,
            last_published: Some(last),
            ..Default::default()
        };
        let snapshot = Snapshot::new(vec![row(&["Updated"]), row(&["2000-01-01"])]);

        let envelope = build_envelope(&snapshot, &config);
        assert_eq!(envelope.data.len(), 1);
        assert!(envelope.records_since.is_some());
    }

    #[test]
    fn test_column_without_tracking_flag_does_not_filter() {
        let config = PublishConfig {
            track_changes: false,
            updated_at: Some(0),
            last_published: Some(Utc::now()),
            ..Default::default()
        };
        let snapshot = Snapshot::new(vec![row(&["Updated"]), row(&["2000-01-01"])]);

        let envelope = build_envelope(&snapshot, &config);
        assert_eq!(envelope.data.len(), 1);
        assert!(envelope.records_since.is_none());
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let midnight = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-06-01"), Some(midnight));
        assert_eq!(parse_timestamp("2024-06-01T00:00:00"), Some(midnight));
        assert_eq!(parse_timestamp("2024-06-01 00:00:00"), Some(midnight));
        assert_eq!(parse_timestamp("2024-06-01T02:00:00+02:00"), Some(midnight));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_excel_serial_timestamp() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(cell_timestamp(&CellValue::Number(45292.5)), Some(expected));
        assert_eq!(cell_timestamp(&CellValue::Boolean(true)), None);
    }
}
