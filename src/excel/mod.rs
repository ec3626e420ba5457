//! Workbook access for publishing.
//!
//! This module provides:
//! - Reading the first sheet of a workbook as a value snapshot
//! - Sheet listing and checksums
//! - Change detection that reports which sheets were edited

pub mod types;
pub mod reader;
pub mod watcher;

pub use types::*;
pub use reader::{read_snapshot, get_sheets, compute_checksum, column_index_to_letter};
pub use watcher::{ExcelWatcher, create_event_channel};
