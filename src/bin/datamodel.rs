//! Data Model CLI
//!
//! Validates model files, summarizes their contents and lists the
//! registered schemas.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use roman_datamodels::node::Value;
use roman_datamodels::registry::registry;
use roman_datamodels::schema::{init_schema_store, schema_store};
use roman_datamodels::{DataModelConfig, DataModelError, Node, OpenOptions, SchemaStore};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "datamodel")]
#[command(about = "Validate and inspect Roman data model files")]
struct Cli {
    /// Configuration file (defaults to datamodels.toml lookup)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra directory of schema documents
    #[arg(long)]
    schema_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fully validate one or more files
    Validate {
        /// Files to validate
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Summarize a file: model type, tag, arrays and metadata
    Info {
        file: PathBuf,
        /// Skip validation while opening
        #[arg(long)]
        no_validate: bool,
    },

    /// List known schemas, or print one with references inlined
    Schemas {
        /// Schema id to print
        #[arg(short, long)]
        show: Option<String>,
    },

    /// List the registered tag patterns
    Tags,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_ref().map(|p| p.display().to_string());
    let config = DataModelConfig::load_from(config_path.as_deref())
        .context("failed to load configuration")?;
    config.apply();
    debug!(?config, "configuration loaded");

    if let Some(dir) = cli.schema_dir.as_ref().or(config.schemas.extra_dir.as_ref()) {
        let mut store = SchemaStore::embedded()?;
        let added = store
            .load_directory(dir)
            .with_context(|| format!("failed to load schemas from {}", dir.display()))?;
        info!(dir = %dir.display(), added, "extra schemas loaded");
        if init_schema_store(store).is_err() {
            bail!("schema store was already initialized");
        }
    }

    match cli.command {
        Commands::Validate { files } => validate(&files),
        Commands::Info { file, no_validate } => show_info(&file, !no_validate),
        Commands::Schemas { show } => schemas(show.as_deref()),
        Commands::Tags => tags(),
    }
}

fn validate(files: &[PathBuf]) -> anyhow::Result<()> {
    println!("🔍 Validating {} file(s)...", files.len());
    let options = OpenOptions::new().validate_on_read(true);
    let mut failed = 0;

    for file in files {
        match options.open(file) {
            Ok(model) => println!("  ✅ {} ({})", file.display(), model.kind()),
            Err(DataModelError::Validation { schema, violations, .. }) => {
                failed += 1;
                println!("  ❌ {} does not conform to {}", file.display(), schema);
                println!("{}", violations);
            }
            Err(e) => {
                failed += 1;
                println!("  ❌ {}: {}", file.display(), e);
            }
        }
    }

    println!();
    if failed > 0 {
        bail!("{} of {} file(s) failed validation", failed, files.len());
    }
    println!("✅ All files valid");
    Ok(())
}

fn show_info(file: &Path, validate: bool) -> anyhow::Result<()> {
    let model = OpenOptions::new().validate_on_read(validate).open(file)?;

    println!("📄 {}", file.display());
    println!("  Model:  {}", model.kind().model_name());
    println!("  Tag:    {}", model.tag());
    println!("  Schema: {}", model.schema_uri());
    println!("  State:  {:?}", model.state());

    println!();
    println!("Arrays:");
    for (key, value) in model.node().iter() {
        if let Value::Array(array) = value {
            println!("  {:<12} {:<8} {:?}", key, array.dtype(), array.shape());
        }
    }

    if let Ok(meta) = model.meta() {
        println!();
        println!("Metadata:");
        print_node(meta, 1);
    }
    Ok(())
}

fn print_node(node: &Node, depth: usize) {
    let indent = "  ".repeat(depth);
    for (key, value) in node.iter() {
        match value {
            Value::Node(child) => {
                println!("{}{}:", indent, key);
                print_node(child, depth + 1);
            }
            Value::Array(array) => println!("{}{}: <{} {:?}>", indent, key, array.dtype(), array.shape()),
            other => println!("{}{}: {}", indent, key, other.to_json()),
        }
    }
}

fn schemas(show: Option<&str>) -> anyhow::Result<()> {
    let store = schema_store()?;
    match show {
        Some(uri) => {
            let resolved = store.resolve(uri)?;
            println!("{}", serde_json::to_string_pretty(resolved.as_ref())?);
        }
        None => {
            println!("📚 {} schema(s)", store.len());
            for id in store.ids() {
                println!("  {}", id);
            }
        }
    }
    Ok(())
}

fn tags() -> anyhow::Result<()> {
    let registry = registry()?;
    println!("🏷️  {} registered tag pattern(s)", registry.entries().len());
    for entry in registry.entries() {
        println!("  {:<70} {:<22} {}", entry.pattern.as_str(), entry.kind.model_name(), entry.schema_uri);
    }
    Ok(())
}
