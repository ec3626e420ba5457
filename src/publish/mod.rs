//! Row extraction and publishing.
//!
//! The first sheet of a workbook is turned into `{ data, recordsSince? }` and
//! uploaded to a bucket. Configuration and the last-published timestamp live
//! in the document property bag (see `storage`), loaded before a publish and
//! saved after it.

pub mod types;
pub mod extract;
pub mod key;
pub mod publisher;
pub mod storage;

pub use types::*;
pub use extract::{build_envelope, format_timestamp};
pub use key::object_key;
pub use publisher::publish;
