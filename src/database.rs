use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Lock error")]
    Lock,
    #[error("Could not determine a data directory")]
    NoDataDir,
}

pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at the default location under the user's data directory
    pub fn new() -> Result<Self, DbError> {
        Self::open(&default_db_path()?)
    }

    /// Open (or create) the database file at `path`
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    /// In-memory database, used by tests
    pub fn in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<(), DbError> {
        self.create_property_tables()?;
        self.create_subscription_tables()?;
        Ok(())
    }
}

/// `<data dir>/sheet-publisher/sheet-publisher.db`
pub fn default_db_path() -> Result<PathBuf, DbError> {
    let data_dir = dirs::data_dir().ok_or(DbError::NoDataDir)?;
    Ok(data_dir.join("sheet-publisher").join("sheet-publisher.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");

        let db = Database::open(&path).unwrap();
        drop(db);

        assert!(path.exists());
    }
}
