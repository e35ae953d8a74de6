// SPDX-License-Identifier: MIT

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use kinetic_canvas::adk::error::FlowError;
use kinetic_canvas::adk::model::{Model, OpenAiModel};
use kinetic_canvas::kinetic::config::EngineConfig;
use kinetic_canvas::kinetic::workflow::graph::InvokeOptions;
use kinetic_canvas::kinetic::workflow::reference::build_refs;
use kinetic_canvas::kinetic::workflow::{CanvasLoader, WorkflowBuilder};

use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML engine config; defaults come from KINETIC_* variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a canvas and print the resulting schema
    Compile {
        /// Path to the canvas file (JSON or YAML)
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print the workflow references held by a canvas
    Refs {
        #[arg(short, long)]
        file: PathBuf,

        /// Id of the workflow the canvas belongs to
        #[arg(long, default_value_t = 0)]
        id: i64,
    },
    /// Run a canvas from the start
    Run {
        #[arg(short, long)]
        file: PathBuf,

        /// Input record as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,

        /// Checkpoint id to save under if the run suspends
        #[arg(long)]
        checkpoint: Option<String>,
    },
    /// Answer a suspended node and continue the run
    Resume {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(long)]
        checkpoint: String,

        /// Key of the node waiting for input
        #[arg(long)]
        node: String,

        #[arg(short, long)]
        answer: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            EngineConfig::from_yaml(&content)?
        }
        None => EngineConfig::from_env(),
    };

    match args.command {
        Commands::Compile { file } => {
            let workflow = builder(config).build_from_file(&file).await?;
            println!("{}", serde_json::to_string_pretty(workflow.schema())?);
        }
        Commands::Refs { file, id } => {
            let canvas = CanvasLoader::new().load_canvas(&file)?;
            let refs = build_refs(id, &canvas)?;
            println!("{}", serde_json::to_string_pretty(&refs)?);
        }
        Commands::Run {
            file,
            input,
            checkpoint,
        } => {
            let input = parse_input(&input)?;
            let checkpoint = checkpoint.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let workflow = builder(config).build_from_file(&file).await?;
            report(
                workflow
                    .invoke(input, InvokeOptions::checkpoint(checkpoint))
                    .await,
            )?;
        }
        Commands::Resume {
            file,
            checkpoint,
            node,
            answer,
        } => {
            let workflow = builder(config).build_from_file(&file).await?;
            let options = InvokeOptions::checkpoint(checkpoint).resume(node, json!(answer));
            report(workflow.invoke(Map::new(), options).await)?;
        }
    }

    Ok(())
}

fn builder(config: EngineConfig) -> WorkflowBuilder {
    let model = OpenAiModel::from_env().map(|m| {
        log::info!("Using model: {}", m.model_name());
        Arc::new(m) as Arc<dyn Model>
    });
    if model.is_none() {
        log::warn!("OPENAI_API_KEY is not set; model-backed nodes will fail");
    }
    WorkflowBuilder::from_config(config, model)
}

fn parse_input(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("input must be JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("input must be a JSON object, got {}", other),
    }
}

fn report(result: Result<Map<String, Value>, FlowError>) -> anyhow::Result<()> {
    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(err) => match err.interrupt_info() {
            Some(info) => {
                println!(
                    "Suspended at '{}' (checkpoint: {})",
                    info.node_path.join(" > "),
                    info.checkpoint_id.as_deref().unwrap_or("none")
                );
                println!("{}", serde_json::to_string_pretty(&info.payload)?);
                Ok(())
            }
            None => Err(err.into()),
        },
    }
}
