mod commands;
mod database;
pub mod excel;
pub mod publish;
pub mod s3;
pub mod trigger;

use clap::{Parser, Subcommand};
use commands::{AppState, CommandError, ConfigureInput};
use database::Database;
use publish::PublishOutcome;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sheet-publisher")]
#[command(about = "Publish the first sheet of a workbook as JSON to an S3 bucket", long_about = None)]
struct Cli {
    /// State database (defaults to the user data directory)
    #[arg(long, global = true, env = "SHEET_PUBLISHER_DB")]
    db: Option<PathBuf>,

    /// S3-compatible endpoint to use instead of AWS
    #[arg(long, global = true, env = "SHEET_PUBLISHER_S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// Document id (defaults to the workbook's file name without extension)
    #[arg(long, global = true)]
    document_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save publish settings for a workbook and register its change trigger
    Configure {
        workbook: String,
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        region: String,
        /// Key prefix inside the bucket
        #[arg(long, default_value = "")]
        path: String,
        #[arg(long, env = "AWS_ACCESS_KEY_ID")]
        access_key_id: String,
        #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
        secret_key: String,
        /// Upload only rows updated since the last publish, under timestamped keys
        #[arg(long)]
        track_changes: bool,
        /// Zero-based column holding each row's last-updated time
        #[arg(long, requires = "track_changes")]
        updated_at_column: Option<usize>,
    },
    /// Print the stored settings (secret masked)
    ShowConfig { workbook: String },
    /// Publish the workbook once
    Publish { workbook: String },
    /// Publish on every change to the first sheet; all registered workbooks when none is given
    Watch { workbook: Option<String> },
    /// List the sheets of a workbook
    Sheets { workbook: String },
}

/// Entry point, returns the process exit code
pub async fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn dispatch(cli: Cli) -> Result<(), CommandError> {
    let db = match &cli.db {
        Some(path) => Database::open(path)?,
        None => Database::new()?,
    };

    let state = AppState {
        db: Arc::new(db),
        s3_endpoint: cli.s3_endpoint,
    };
    let doc_override = cli.document_id.as_deref();

    match cli.command {
        Command::Configure {
            workbook,
            bucket,
            region,
            path,
            access_key_id,
            secret_key,
            track_changes,
            updated_at_column,
        } => {
            let input = ConfigureInput {
                bucket_name: bucket,
                region,
                path,
                aws_access_key_id: access_key_id,
                aws_secret_key: secret_key,
                track_changes,
                updated_at: updated_at_column,
            };
            let result = commands::configure(&state, &workbook, doc_override, input)?;

            println!("Saved configuration for '{}'", result.doc_id);
            if let Some(col) = updated_at_column {
                println!("Tracking changes by column {}", excel::column_index_to_letter(col as u32));
            }
            if let Some(message) = result.trigger_message {
                println!("{}", message);
            }
        }
        Command::ShowConfig { workbook } => {
            let config = commands::show_config(&state, &workbook, doc_override)?;
            let json = serde_json::to_string_pretty(&config)
                .map_err(|e| CommandError::new(e.to_string()))?;
            println!("{}", json);
        }
        Command::Publish { workbook } => {
            let doc_id = commands::document_id(&workbook, doc_override)?;
            match commands::publish_workbook(&state, &workbook, &doc_id, None).await? {
                PublishOutcome::Published { key, records, .. } => {
                    println!("Published {} records to {}", records, key);
                }
                PublishOutcome::NotConfigured => {
                    println!("'{}' is not configured; nothing published", doc_id);
                }
                // Failures are already logged
                PublishOutcome::UploadFailed { .. } | PublishOutcome::IgnoredSheet { .. } => {}
            }
        }
        Command::Watch { workbook } => {
            let targets = match workbook {
                Some(workbook) => vec![commands::watch_target(&state, &workbook, doc_override)?],
                None => commands::subscribed_targets(&state)?,
            };
            commands::watch(&state, targets).await?;
        }
        Command::Sheets { workbook } => {
            for sheet in commands::list_sheets(&workbook)? {
                println!(
                    "{}\t{}\t{} rows x {} cols",
                    sheet.index, sheet.name, sheet.row_count, sheet.col_count
                );
            }
        }
    }

    Ok(())
}
