use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::types::*;

fn open(path: &str) -> Result<Sheets<BufReader<File>>, ExcelError> {
    if !Path::new(path).exists() {
        return Err(ExcelError::file_not_found(path));
    }

    open_workbook_auto(path)
        .map_err(|e| ExcelError::invalid_format(format!("Failed to open workbook: {}", e)))
}

/// Read every value of the first sheet in the workbook
pub fn read_snapshot(path: &str) -> Result<Snapshot, ExcelError> {
    let mut workbook = open(path)?;

    let first = match workbook.sheet_names().first() {
        Some(name) => name.clone(),
        None => return Ok(Snapshot::default()),
    };

    let range = workbook
        .worksheet_range(&first)
        .map_err(|e| ExcelError::read_error(format!("Failed to read sheet '{}': {}", first, e)))?;

    Ok(range_to_snapshot(&range))
}

/// Snapshot of every sheet, in workbook order
pub fn read_all_sheets(path: &str) -> Result<Vec<Snapshot>, ExcelError> {
    let mut workbook = open(path)?;
    let sheet_names = workbook.sheet_names().to_vec();

    let mut snapshots = Vec::with_capacity(sheet_names.len());
    for name in &sheet_names {
        let range = workbook
            .worksheet_range(name)
            .map_err(|e| ExcelError::read_error(format!("Failed to read sheet '{}': {}", name, e)))?;
        snapshots.push(range_to_snapshot(&range));
    }

    Ok(snapshots)
}

/// Convert a calamine range into rows anchored at A1.
///
/// calamine trims leading empty rows and columns off the used range. Rows
/// above it come back as empty rows; columns left of it are padded only on
/// rows that hold a value, so column indices line up with the sheet.
fn range_to_snapshot(range: &Range<Data>) -> Snapshot {
    let (Some((first_row, first_col)), Some((last_row, last_col))) = (range.start(), range.end()) else {
        return Snapshot::default();
    };

    let mut rows: Vec<Vec<CellValue>> = Vec::with_capacity(last_row as usize + 1);
    rows.resize_with(first_row as usize, Vec::new);

    for row_idx in first_row..=last_row {
        let cells: Vec<CellValue> = (first_col..=last_col)
            .map(|col_idx| convert_cell_value(range.get_value((row_idx, col_idx))))
            .collect();

        if cells.iter().all(CellValue::is_blank) {
            rows.push(Vec::new());
            continue;
        }

        let mut row = vec![CellValue::Empty; first_col as usize];
        row.extend(cells);
        rows.push(row);
    }

    Snapshot { rows }
}

/// Convert calamine Data to our CellValue
fn convert_cell_value(cell: Option<&Data>) -> CellValue {
    match cell {
        None => CellValue::Empty,
        Some(data) => match data {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::String(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Boolean(*b),
            Data::DateTime(dt) => CellValue::DateTime(format_excel_datetime(dt.as_f64())),
            Data::DateTimeIso(s) => CellValue::DateTime(s.clone()),
            Data::DurationIso(s) => CellValue::String(s.clone()),
            Data::Error(e) => CellValue::Error(e.to_string()),
        },
    }
}

/// Format an Excel serial date (days since 1899-12-30) as ISO 8601 with millis
pub fn format_excel_datetime(value: f64) -> String {
    excel_serial_to_naive(value)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
        .unwrap_or_default()
}

/// Excel serial date to a naive datetime, `None` when out of range
pub fn excel_serial_to_naive(value: f64) -> Option<chrono::NaiveDateTime> {
    if !value.is_finite() {
        return None;
    }

    let epoch = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (value * 86_400_000.0).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }

    epoch.checked_add_signed(chrono::Duration::try_milliseconds(millis as i64)?)
}

/// Convert column index (0-based) to a column letter (A, B, ..., Z, AA, AB, ...)
pub fn column_index_to_letter(index: u32) -> String {
    let mut result = String::new();
    let mut n = index + 1;

    while n > 0 {
        n -= 1;
        let c = (b'A' + (n % 26) as u8) as char;
        result.insert(0, c);
        n /= 26;
    }

    result
}

/// Get list of sheets in a workbook
pub fn get_sheets(path: &str) -> Result<Vec<SheetInfo>, ExcelError> {
    let mut workbook = open(path)?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::new();

    for (index, name) in sheet_names.iter().enumerate() {
        let (rows, cols) = workbook
            .worksheet_range(name)
            .map(|range| match range.end() {
                Some((r, c)) => (r + 1, c + 1),
                None => (0, 0),
            })
            .unwrap_or((0, 0));

        sheets.push(SheetInfo {
            name: name.clone(),
            index: index as u32,
            row_count: rows,
            col_count: cols,
        });
    }

    Ok(sheets)
}

/// Compute SHA-256 checksum of a file
pub fn compute_checksum(path: &str) -> Result<String, ExcelError> {
    let mut file = File::open(path)
        .map_err(|e| ExcelError::read_error(format!("Failed to open file for checksum: {}", e)))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| ExcelError::read_error(format!("Failed to read file for checksum: {}", e)))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    let result = hasher.finalize();
    Ok(format!("{:x}", result))
}

/// SHA-256 of a sheet's values, used to tell which sheet an edit touched
pub fn snapshot_checksum(snapshot: &Snapshot) -> String {
    let mut hasher = Sha256::new();
    for row in &snapshot.rows {
        for cell in row {
            let encoded = serde_json::to_string(cell).unwrap_or_default();
            hasher.update(encoded.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

/// Per-sheet value checksums, in workbook order
pub fn sheet_checksums(path: &str) -> Result<Vec<String>, ExcelError> {
    Ok(read_all_sheets(path)?.iter().map(snapshot_checksum).collect())
}
