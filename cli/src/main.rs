use std::fs;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use interest_kernel::commit::{RecordOperationProcessor, RecordTable};
use interest_kernel::event::EventPipeline;
use interest_kernel::ingest::http::ReqwestHttpClient;
use interest_kernel::ingest::PersistFileDataEventHandler;
use interest_kernel::mapping::MappingRepository;
use interest_kernel::operation::config::{PlaceholderResolver, Settings};
use interest_kernel::operation::{RecordData, RecordOperation};
use interest_kernel::storage::index::FileIndex;
use interest_kernel::storage::{FileNameValidator, LocalBackend, ResourceStore};

/// Interest CLI
#[derive(Parser, Debug)]
#[command(name = "interest")]
#[command(about = "Create, update and delete records by remote id", long_about = None)]
struct Cli {
    /// Path to settings JSON
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new record.
    Create {
        #[command(flatten)]
        target: Target,

        /// Quietly update the record if it already exists.
        #[arg(short, long)]
        update: bool,
    },

    /// Update an existing record.
    Update {
        #[command(flatten)]
        target: Target,
    },

    /// Delete a record.
    Delete {
        /// Table name
        table: String,

        /// Remote id of the record
        remote_id: String,
    },
}

#[derive(Args, Debug)]
struct Target {
    /// Table name
    table: String,

    /// Remote id of the record
    remote_id: String,

    /// Field data as a JSON object
    #[arg(long, default_value = "{}")]
    data: String,
}

impl Target {
    fn record_data(&self) -> Result<RecordData> {
        serde_json::from_str(&self.data).context("--data must be a JSON object")
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Load settings
    // ----------------------------
    let settings = if let Some(path) = &cli.config {
        let data = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        serde_json::from_str::<Settings>(&data).with_context(|| format!("parsing {path}"))?
    } else {
        Settings::default_settings()
    };
    debug!(?settings, "settings loaded");

    // ----------------------------
    // Build collaborators
    // ----------------------------
    let processor = build_processor(&settings)?;

    // ----------------------------
    // Run operation
    // ----------------------------
    let result = match &cli.command {
        Command::Create { target, update } => {
            let operation =
                RecordOperation::create(&target.table, &target.remote_id, target.record_data()?);
            if *update {
                processor.upsert(operation)
            } else {
                processor.execute(operation)
            }
        }
        Command::Update { target } => processor.execute(RecordOperation::update(
            &target.table,
            &target.remote_id,
            target.record_data()?,
        )),
        Command::Delete { table, remote_id } => {
            processor.execute(RecordOperation::delete(table, remote_id))
        }
    };

    // ----------------------------
    // Output
    // ----------------------------
    match result {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Err(err) => bail!("{}: {}", err.kind(), err),
    }
}

fn build_processor(settings: &Settings) -> Result<RecordOperationProcessor> {
    let state_dir = &settings.state_dir;

    let validator = FileNameValidator::new(&settings.file_name_deny_pattern)
        .context("invalid file_name_deny_pattern")?;
    let mut resources = ResourceStore::new(
        settings.default_storage.clone(),
        FileIndex::open(state_dir.join("files.json"))?,
        validator,
    );
    for (name, root) in &settings.storages {
        resources.register(name.clone(), LocalBackend::new(root));
    }

    let mapping = Arc::new(MappingRepository::open(state_dir.join("mapping.json"))?);
    let records = Arc::new(RecordTable::open(state_dir.join("records.json"))?);
    let http = Arc::new(ReqwestHttpClient::new(&settings.http)?);

    let mut pipeline = EventPipeline::new();
    pipeline.register(PersistFileDataEventHandler::new(
        Arc::new(resources),
        mapping.clone(),
        Arc::new(PlaceholderResolver),
        http,
        settings.persistence.clone(),
    ));

    Ok(RecordOperationProcessor::new(pipeline, mapping, records))
}
