//! CLI binary for converting text into validated knowledge graphs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::sync::Semaphore;

use textkg_llm::{
    EmbedderClient, LlmClient, LoggingMiddleware, ModelSlot, ModelSlotConfig, OpenAiAdapter,
    OpenAiEmbedder,
};
use textkg_pipeline::{
    CallSink, JsonlCallSink, NullCallSink, Pipeline, PipelineConfig, ProcessValidator,
    TopicTaxonomy, VocabularyCatalog,
};
use textkg_types::RunOutcome;

#[derive(Parser)]
#[command(name = "textkg", version, about = "Convert text into validated knowledge graphs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Clone)]
struct PipelineArgs {
    /// Path to the validator executable
    #[arg(long)]
    validator: PathBuf,

    /// Schema file handed to the validator (-schema-file)
    #[arg(long)]
    validator_schema: PathBuf,

    /// Vocabulary catalogue JSON (labels, comments, definitions, embeddings)
    #[arg(long)]
    vocabulary: PathBuf,

    /// Assign taxonomy labels to validated documents
    #[arg(long)]
    labels: bool,

    /// Topic taxonomy JSON, required with --labels
    #[arg(long)]
    taxonomy: Option<PathBuf>,

    /// Regeneration budget for recoverable validation errors
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Append one JSON line per model call to this file
    #[arg(long)]
    call_log: Option<PathBuf>,

    /// Chat model used by every stage
    #[arg(long, default_value = "gpt-4o")]
    model: String,

    /// Model used for the schema selection step
    #[arg(long)]
    selection_model: Option<String>,

    /// Embedding model used for schema mapping
    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one text file into a knowledge graph
    Run {
        /// Input text file
        input: PathBuf,

        /// Write the JSON-LD document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Convert many text files, writing a .jsonld next to each input
    Batch {
        /// Input text files
        inputs: Vec<PathBuf>,

        /// Concurrent runs
        #[arg(long, default_value = "4")]
        concurrency: usize,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Check the configuration without processing any input
    Check {
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            input,
            output,
            pipeline,
        } => cmd_run(&input, output.as_deref(), &pipeline).await,
        Commands::Batch {
            inputs,
            concurrency,
            pipeline,
        } => cmd_batch(inputs, concurrency, &pipeline).await,
        Commands::Check { pipeline } => cmd_check(&pipeline),
    }
}

fn build_pipeline(args: &PipelineArgs) -> anyhow::Result<Pipeline> {
    let mut slots = ModelSlotConfig::uniform(&args.model, &args.embedding_model);
    if let Some(selection_model) = &args.selection_model {
        slots.assign(ModelSlot::SchemaSelection, selection_model);
    }

    let provider = OpenAiAdapter::from_env()?;
    let client = Arc::new(LlmClient::new(provider, slots).with_middleware(LoggingMiddleware));

    let embedder: Arc<dyn EmbedderClient> =
        Arc::new(OpenAiEmbedder::from_env(&args.embedding_model)?);

    let catalog = Arc::new(VocabularyCatalog::load(&args.vocabulary)?);
    let validator = Arc::new(ProcessValidator::new(
        &args.validator,
        &args.validator_schema,
    )?);

    let taxonomy = args
        .taxonomy
        .as_deref()
        .map(TopicTaxonomy::load)
        .transpose()?
        .map(Arc::new);

    let sink: Arc<dyn CallSink> = match &args.call_log {
        Some(path) => Arc::new(JsonlCallSink::new(path)),
        None => Arc::new(NullCallSink),
    };

    let pipeline = Pipeline::new(
        client,
        embedder,
        catalog,
        validator,
        taxonomy,
        sink,
        PipelineConfig {
            max_retries: args.max_retries,
            enable_labeling: args.labels,
        },
    )?;
    Ok(pipeline)
}

fn report_failure(input: &Path, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Succeeded { .. } => {}
        RunOutcome::ExhaustedRetries { violations, .. } => {
            eprintln!(
                "{}: validation retries exhausted ({} outstanding violation(s))",
                input.display(),
                violations.len()
            );
            for violation in violations {
                eprintln!("  [{}] {}: {}", violation.code, violation.path, violation.message);
            }
        }
        RunOutcome::FailedInfrastructure { reason, .. } => {
            eprintln!("{}: {}", input.display(), reason);
        }
    }
}

async fn cmd_run(
    input: &Path,
    output: Option<&Path>,
    args: &PipelineArgs,
) -> anyhow::Result<()> {
    let pipeline = build_pipeline(args)?;
    let text = std::fs::read_to_string(input)?;

    match pipeline.run(&text).await {
        RunOutcome::Succeeded { graph_document, .. } => {
            let rendered = graph_document.to_json_pretty()?;
            match output {
                Some(path) => std::fs::write(path, rendered)?,
                None => println!("{rendered}"),
            }
            Ok(())
        }
        outcome @ RunOutcome::ExhaustedRetries { .. } => {
            report_failure(input, &outcome);
            std::process::exit(1);
        }
        outcome @ RunOutcome::FailedInfrastructure { .. } => {
            report_failure(input, &outcome);
            std::process::exit(2);
        }
    }
}

async fn cmd_batch(
    inputs: Vec<PathBuf>,
    concurrency: usize,
    args: &PipelineArgs,
) -> anyhow::Result<()> {
    anyhow::ensure!(!inputs.is_empty(), "no input files given");
    anyhow::ensure!(concurrency > 0, "--concurrency must be at least 1");

    let pipeline = Arc::new(build_pipeline(args)?);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    let mut handles = Vec::with_capacity(inputs.len());
    for input in inputs {
        let pipeline = pipeline.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await;
            let text = match std::fs::read_to_string(&input) {
                Ok(text) => text,
                Err(e) => {
                    eprintln!("{}: {}", input.display(), e);
                    return false;
                }
            };
            let outcome = pipeline.run(&text).await;
            match &outcome {
                RunOutcome::Succeeded { graph_document, .. } => {
                    let out = input.with_extension("jsonld");
                    match graph_document.to_json_pretty() {
                        Ok(rendered) => {
                            if let Err(e) = std::fs::write(&out, rendered) {
                                eprintln!("{}: {}", out.display(), e);
                                return false;
                            }
                            println!("{} -> {}", input.display(), out.display());
                            true
                        }
                        Err(e) => {
                            eprintln!("{}: {}", input.display(), e);
                            false
                        }
                    }
                }
                _ => {
                    report_failure(&input, &outcome);
                    false
                }
            }
        }));
    }

    let mut failures = 0usize;
    for handle in handles {
        if !handle.await? {
            failures += 1;
        }
    }

    if failures > 0 {
        eprintln!("{failures} input(s) failed");
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_check(args: &PipelineArgs) -> anyhow::Result<()> {
    let catalog = VocabularyCatalog::load(&args.vocabulary)?;
    println!("Vocabulary: {} type(s)", catalog.len());

    ProcessValidator::new(&args.validator, &args.validator_schema)?;
    println!("Validator: {}", args.validator.display());

    if args.labels {
        let taxonomy_path = args
            .taxonomy
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("--labels requires --taxonomy"))?;
        let taxonomy = TopicTaxonomy::load(taxonomy_path)?;
        println!("Taxonomy: {} label(s)", taxonomy.all_labels().len());
    }

    let slots = ModelSlotConfig::uniform(&args.model, &args.embedding_model);
    slots.validate(args.labels)?;
    println!("Models: chat={} embeddings={}", args.model, args.embedding_model);

    println!("Configuration OK");
    Ok(())
}
