use clap::{Parser, Subcommand, ValueEnum};
use couchview::settings::Role;
use couchview::view::{design_id, design_name, DesignDocument, CATCH_ALL_DESIGN};
use couchview::{parse_definition, Connector, ConnectorDefinition, Filter, MemoryStore, Record, StoreHandles};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::process;

/// couchview CLI: inspect a connector definition, its design documents and query plans
#[derive(Parser)]
#[command(name = "couchview", version, about)]
struct Cli {
    /// Path to the definition file
    #[arg(long, default_value = "couchview.yaml")]
    definition: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Show resolved datasource settings and per-role connection URLs
    Settings,

    /// Show the design documents the connector writes
    Design {
        /// Only show the design document for this model
        #[arg(long)]
        model: Option<String>,
    },

    /// Show how a filter would be answered
    Plan {
        /// Model name
        #[arg(long)]
        model: String,
        /// Filter as JSON (e.g. --filter '{"where":{"color":"red"}}')
        #[arg(long, default_value = "{}")]
        filter: String,
    },

    /// Run a filter against seed records held in memory
    Query {
        /// Model name
        #[arg(long)]
        model: String,
        /// Filter as JSON
        #[arg(long, default_value = "{}")]
        filter: String,
        /// JSON file mapping model names to lists of records
        #[arg(long)]
        seed: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let definition = parse_definition(Path::new(&cli.definition))?;

    match cli.command {
        Command::Settings => {
            let resolved = definition.datasource.resolve()?;
            let urls: Map<String, Value> = Role::ALL
                .iter()
                .map(|role| (role.as_str().to_string(), Value::String(resolved.masked_url(*role))))
                .collect();
            print_output(
                &json!({ "settings": resolved, "urls": urls }),
                &cli.format,
            )?;
        }

        Command::Design { model } => {
            let mut designs = Map::new();
            if model.is_none() {
                designs.insert(
                    design_id(CATCH_ALL_DESIGN),
                    DesignDocument::catch_all().to_document(CATCH_ALL_DESIGN, None)?,
                );
            }
            for def in definition.model_definitions() {
                if model.as_deref().is_some_and(|m| m != def.name) {
                    continue;
                }
                let def = def.with_revision();
                if let Some(design) = DesignDocument::for_model(&def) {
                    let name = design_name(&def.name);
                    designs.insert(design_id(&name), design.to_document(&name, None)?);
                }
            }
            print_output(&Value::Object(designs), &cli.format)?;
        }

        Command::Plan { model, filter } => {
            let filter: Filter = serde_json::from_str(&filter)?;
            let connector = in_memory(&definition).await?;
            let plan = connector.plan(&model, &filter)?;
            print_output(&serde_json::to_value(plan)?, &cli.format)?;
        }

        Command::Query { model, filter, seed } => {
            let filter: Filter = serde_json::from_str(&filter)?;
            let connector = in_memory(&definition).await?;
            if let Some(seed) = seed {
                load_seed(&connector, &seed).await?;
            }
            let records = connector.all(&model, &filter).await?;
            let values: Vec<Value> = records.iter().map(Record::to_value).collect();
            print_output(&Value::Array(values), &cli.format)?;
        }
    }

    Ok(())
}

async fn in_memory(definition: &ConnectorDefinition) -> couchview::Result<Connector<MemoryStore>> {
    Connector::from_definition(definition, StoreHandles::shared(MemoryStore::new())).await
}

async fn load_seed(connector: &Connector<MemoryStore>, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read seed file '{path}': {e}"))?;
    let seed: Map<String, Value> = serde_json::from_str(&content)?;

    for (model, records) in seed {
        let records = match records {
            Value::Array(records) => records,
            other => return Err(format!("Seed for '{model}' must be a list, got {other}").into()),
        };
        for value in records {
            connector.create(&model, Record::from_value(value)?).await?;
        }
        log::debug!("Seeded {model}");
    }
    Ok(())
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
