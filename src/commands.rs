use crate::database::{Database, DbError};
use crate::excel::{self, ExcelError, ExcelWatcher, FileChangeEvent, FileChangeType, SheetInfo, Snapshot, create_event_channel};
use crate::publish::publisher::PRIMARY_SHEET;
use crate::publish::{self, PublishConfig, PublishOutcome};
use crate::s3::{Credentials, ObjectStore, S3Client, StorageError};
use crate::trigger::{self, EventSubscriptions, PUBLISH_ON_CHANGE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub struct AppState {
    pub db: Arc<Database>,
    /// S3-compatible endpoint used instead of AWS
    pub s3_endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommandError {
    message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        CommandError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CommandError {}

impl From<DbError> for CommandError {
    fn from(e: DbError) -> Self {
        CommandError {
            message: e.to_string(),
        }
    }
}

impl From<ExcelError> for CommandError {
    fn from(e: ExcelError) -> Self {
        CommandError {
            message: e.to_string(),
        }
    }
}

impl From<StorageError> for CommandError {
    fn from(e: StorageError) -> Self {
        CommandError {
            message: e.to_string(),
        }
    }
}

/// Document identifier: the override if given, otherwise the workbook's file stem
pub fn document_id(workbook: &str, id_override: Option<&str>) -> Result<String, CommandError> {
    if let Some(id) = id_override {
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    Path::new(workbook)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| CommandError::new(format!("Cannot derive a document id from {}", workbook)))
}

fn absolute_path(workbook: &str) -> String {
    std::fs::canonicalize(workbook)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| workbook.to_string())
}

// ==================== Configuration Commands ====================

/// Values entered in the configuration form
#[derive(Debug, Clone, Default)]
pub struct ConfigureInput {
    pub bucket_name: String,
    pub region: String,
    pub path: String,
    pub aws_access_key_id: String,
    pub aws_secret_key: String,
    pub track_changes: bool,
    pub updated_at: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ConfigureResult {
    pub doc_id: String,
    /// Shown to the user when the change trigger could not be registered
    pub trigger_message: Option<String>,
}

/// Save the publish configuration, then (re)register the change trigger.
/// A trigger failure is reported but keeps the saved configuration.
pub fn configure(
    state: &AppState,
    workbook: &str,
    doc_override: Option<&str>,
    input: ConfigureInput,
) -> Result<ConfigureResult, CommandError> {
    configure_with(&state.db, state.db.as_ref(), workbook, doc_override, input)
}

fn configure_with<R>(
    db: &Database,
    registry: &R,
    workbook: &str,
    doc_override: Option<&str>,
    input: ConfigureInput,
) -> Result<ConfigureResult, CommandError>
where
    R: EventSubscriptions,
    R::Error: std::fmt::Display,
{
    let doc_id = document_id(workbook, doc_override)?;

    let config = PublishConfig {
        bucket_name: input.bucket_name,
        region: input.region,
        path: input.path,
        aws_access_key_id: input.aws_access_key_id,
        aws_secret_key: input.aws_secret_key,
        track_changes: input.track_changes,
        updated_at: input.updated_at,
        last_published: None,
    };

    db.save_publish_config(&doc_id, &config)?;
    tracing::info!(doc_id = %doc_id, "configuration saved");

    let trigger_message =
        match trigger::ensure_subscription(registry, &doc_id, PUBLISH_ON_CHANGE, &absolute_path(workbook)) {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(doc_id = %doc_id, "trigger registration failed: {}", e);
                Some(format!("Configuration saved, but the change trigger could not be registered: {}", e))
            }
        };

    Ok(ConfigureResult {
        doc_id,
        trigger_message,
    })
}

/// Stored configuration with the secret masked
pub fn show_config(
    state: &AppState,
    workbook: &str,
    doc_override: Option<&str>,
) -> Result<PublishConfig, CommandError> {
    let doc_id = document_id(workbook, doc_override)?;
    Ok(state.db.get_publish_config(&doc_id)?.redacted())
}

// ==================== Publish Commands ====================

/// Publish a workbook once, persisting the new timestamp on success
pub async fn publish_workbook(
    state: &AppState,
    workbook: &str,
    doc_id: &str,
    edited_sheet: Option<usize>,
) -> Result<PublishOutcome, CommandError> {
    let config = state.db.get_publish_config(doc_id)?;
    let now = chrono::Utc::now();

    match S3Client::new(Credentials::from(&config), state.s3_endpoint.clone()) {
        Ok(store) => {
            let load = || excel::read_snapshot(workbook);
            publish_document(&state.db, doc_id, &config, edited_sheet, load, &store, now).await
        }
        Err(e) => {
            tracing::error!(doc_id, "could not create storage client: {}", e);
            Ok(PublishOutcome::UploadFailed {
                key: publish::object_key(&config.path, doc_id, config.track_changes, now),
                message: e.to_string(),
            })
        }
    }
}

/// Run one publish against `store` and record `lastPublished` only when the upload succeeded.
/// `load_snapshot` is not called for a declined publish.
async fn publish_document<F>(
    db: &Database,
    doc_id: &str,
    config: &PublishConfig,
    edited_sheet: Option<usize>,
    load_snapshot: F,
    store: &dyn ObjectStore,
    now: DateTime<Utc>,
) -> Result<PublishOutcome, CommandError>
where
    F: FnOnce() -> Result<Snapshot, ExcelError>,
{
    let declined = !config.is_configured() || edited_sheet.map_or(false, |index| index != PRIMARY_SHEET);
    let snapshot = if declined { Snapshot::default() } else { load_snapshot()? };

    let outcome = publish::publish(doc_id, &snapshot, config, edited_sheet, store, now).await;

    if let Some(published_at) = outcome.published_at() {
        db.set_last_published(doc_id, published_at)?;
    }

    Ok(outcome)
}

/// Sheet the change came from, as far as the watcher could tell
fn edited_sheet(event: &FileChangeEvent) -> Option<usize> {
    if event.changed_sheets.is_empty() {
        None
    } else if event.changed_sheets.contains(&0) {
        Some(0)
    } else {
        event.changed_sheets.first().copied()
    }
}

/// Watch workbooks and publish whenever their first sheet changes.
///
/// `targets` maps workbook path to document id. Runs until Ctrl-C.
pub async fn watch(state: &AppState, targets: Vec<(String, String)>) -> Result<(), CommandError> {
    if targets.is_empty() {
        return Err(CommandError::new("Nothing to watch"));
    }

    let (tx, rx) = create_event_channel();
    let watcher = ExcelWatcher::new(tx);

    let mut documents: HashMap<String, String> = HashMap::new();
    for (path, doc_id) in targets {
        watcher.watch_file(&path)?;
        tracing::info!(doc_id = %doc_id, path = %path, "watching");
        documents.insert(path, doc_id);
    }

    // Bridge the watcher's std channel into the async loop
    let (async_tx, mut async_rx) = tokio::sync::mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            if async_tx.send(event).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            event = async_rx.recv() => {
                let Some(event) = event else { break };
                handle_change(state, &documents, event).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("stopping");
                break;
            }
        }
    }

    for path in documents.keys() {
        watcher.unwatch_file(path)?;
    }

    Ok(())
}

async fn handle_change(
    state: &AppState,
    documents: &HashMap<String, String>,
    event: FileChangeEvent,
) -> Result<(), CommandError> {
    let Some(doc_id) = documents.get(&event.path) else {
        return Ok(());
    };

    if event.change_type == FileChangeType::Deleted {
        tracing::warn!(doc_id = %doc_id, path = %event.path, "workbook removed");
        return Ok(());
    }

    match publish_workbook(state, &event.path, doc_id, edited_sheet(&event)).await {
        Ok(outcome) => {
            tracing::debug!(doc_id = %doc_id, ?outcome, "change handled");
            Ok(())
        }
        // The file may be mid-save; the next change event retries
        Err(e) => {
            tracing::warn!(doc_id = %doc_id, "could not publish change: {}", e);
            Ok(())
        }
    }
}

/// Registered workbooks to watch when none are named explicitly
pub fn subscribed_targets(state: &AppState) -> Result<Vec<(String, String)>, CommandError> {
    Ok(state
        .db
        .list_subscriptions(PUBLISH_ON_CHANGE)?
        .into_iter()
        .map(|s| (s.source, s.doc_id))
        .collect())
}

/// Register the trigger for one workbook and return its watch target
pub fn watch_target(
    state: &AppState,
    workbook: &str,
    doc_override: Option<&str>,
) -> Result<(String, String), CommandError> {
    let doc_id = document_id(workbook, doc_override)?;
    let path = absolute_path(workbook);
    trigger::ensure_subscription(state.db.as_ref(), &doc_id, PUBLISH_ON_CHANGE, &path)?;
    Ok((path, doc_id))
}

// ==================== Workbook Commands ====================

pub fn list_sheets(workbook: &str) -> Result<Vec<SheetInfo>, CommandError> {
    Ok(excel::get_sheets(workbook)?)
}
