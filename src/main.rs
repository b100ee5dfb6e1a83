use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use shipment_import::app::{ImportOutcome, ImportUseCase};
use shipment_import::config::ImportConfig;
use shipment_import::domain::{Dataset, FieldMapping, MappingTemplate};
use shipment_import::infra::InMemoryImportStore;
use shipment_import::observability::{init_logging, metrics};

#[derive(Parser)]
#[command(name = "shipment-import")]
#[command(about = "Validate and import shipment spreadsheets")]
#[command(version)]
struct Cli {
    /// Print Prometheus metrics after the command
    #[arg(long, global = true)]
    print_metrics: bool,

    /// Directory for JSON log files
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct InputArgs {
    /// Dataset as JSON: {"headers": [...], "rows": [{...}]}
    #[arg(long)]
    input: PathBuf,

    /// Mapping template; defaults to matching headers named after canonical fields
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// TOML config; defaults to $SHIPMENT_IMPORT_CONFIG or built-in values
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one validation pass and print the quality report
    Validate {
        #[command(flatten)]
        args: InputArgs,
    },
    /// Validate, then commit accepted records to the in-memory store
    Import {
        #[command(flatten)]
        args: InputArgs,
    },
    /// Save the mapping in use as a reusable template
    Template {
        #[command(flatten)]
        args: InputArgs,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value = "default")]
        name: String,
    },
}

struct Loaded {
    config: ImportConfig,
    dataset: Dataset,
    mapping: FieldMapping,
}

fn load(args: &InputArgs) -> Result<Loaded> {
    let config = match &args.config {
        Some(path) => ImportConfig::load(path)?,
        None => ImportConfig::from_env()?,
    };
    let dataset = Dataset::load(&args.input)
        .with_context(|| format!("Failed to read dataset '{}'", args.input.display()))?;
    let mapping = match &args.mapping {
        Some(path) => MappingTemplate::load(path)?.to_mapping()?,
        None => FieldMapping::exact_from_headers(dataset.headers()),
    };
    info!(
        rows = dataset.len(),
        columns = dataset.headers().len(),
        mapped = mapping.len(),
        "Dataset loaded"
    );
    Ok(Loaded {
        config,
        dataset,
        mapping,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Validate { args } => {
            let Loaded {
                config,
                dataset,
                mapping,
            } = load(&args)?;
            let use_case = ImportUseCase::from_config(config, Arc::new(InMemoryImportStore::new()))?;
            let report = use_case.validate(dataset, mapping).await?;
            print_json(&report)?;
        }
        Commands::Import { args } => {
            let Loaded {
                config,
                dataset,
                mapping,
            } = load(&args)?;
            let use_case = ImportUseCase::from_config(config, Arc::new(InMemoryImportStore::new()))?;
            let outcome = use_case.import(dataset, mapping).await?;
            if let ImportOutcome::Imported { result, .. } = &outcome {
                eprintln!("{}", result.summary_line());
            }
            print_json(&outcome)?;
        }
        Commands::Template { args, output, name } => {
            let Loaded { mapping, .. } = load(&args)?;
            let template = MappingTemplate::from_mapping(name, &mapping);
            template.save(&output)?;
            info!(path = %output.display(), fields = mapping.len(), "Template saved");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(Path::new(&cli.log_dir));

    if cli.print_metrics {
        if let Err(e) = metrics::init() {
            error!("Failed to initialize metrics: {}", e);
        }
    }

    let result = run(cli.command).await;
    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }

    if cli.print_metrics {
        if let Some(rendered) = metrics::get_metrics_handle() {
            println!("{}", rendered);
        }
    }
    result
}
