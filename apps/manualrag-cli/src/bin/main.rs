use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use manualrag_core::config::Config;
use manualrag_core::loader::DocumentLoader;
use manualrag_hybrid::{QueryOutcome, RetrievalEngine, RetrievedContext};

/// Hybrid retrieval over extracted vehicle manuals
#[derive(Parser, Debug)]
#[command(name = "manualrag", version, about, long_about = None)]
struct Cli {
    /// Directory holding config.toml; relative data paths resolve against it
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Config overlay to apply (config.<env>.toml); defaults to $RUST_ENV or dev
    #[arg(long)]
    env: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chunk and index every .txt manual in a directory
    Ingest {
        dir: PathBuf,
        /// Only ingest the first N files
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Retrieve context for one question
    Query {
        text: String,
        /// Passages to keep after reranking (defaults to retrieval.final_k)
        #[arg(short, long)]
        k: Option<usize>,
        /// Force wide candidate retrieval
        #[arg(long)]
        broad: bool,
        #[arg(long)]
        json: bool,
    },
    /// Run every line of a file as a query, concurrently
    Batch {
        file: PathBuf,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
    /// Show store sizes
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Remove one ingested document by its content hash
    Remove { hash: String },
    /// Delete all stored sections and indexes
    Reset {
        #[arg(long)]
        confirm: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("MANUALRAG_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn open_engine(cli: &Cli) -> Result<RetrievalEngine> {
    let env_name = cli.env.clone().unwrap_or_else(|| std::env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string()));
    let config = Config::load_from(&cli.config_dir, &env_name).context("loading configuration")?;
    let settings = config.settings()?;
    RetrievalEngine::open(&cli.config_dir, settings)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let engine = open_engine(&cli)?;
    match &cli.command {
        Commands::Ingest { dir, limit } => ingest(&engine, dir, *limit),
        Commands::Query { text, k, broad, json } => {
            let k = k.unwrap_or(engine.settings().retrieval.final_k);
            let hint = broad.then_some(true);
            match engine.query(text, k, hint)? {
                QueryOutcome::Found(ctx) if *json => println!("{}", serde_json::to_string_pretty(&ctx)?),
                QueryOutcome::Found(ctx) => print_context(&ctx),
                QueryOutcome::NoResults => println!("No relevant passages found."),
            }
            Ok(())
        }
        Commands::Batch { file, k, concurrency } => batch(engine, file, *k, *concurrency),
        Commands::Stats { json } => {
            let stats = engine.stats();
            if *json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Parent sections: {}", stats.parent_count);
                println!("Child passages:  {}", stats.child_count);
                println!("Keyword index:   {}", if stats.index_present { "present" } else { "missing" });
                println!("Section chars:   {}", stats.total_parent_chars);
            }
            Ok(())
        }
        Commands::Remove { hash } => {
            let removed = engine.remove_document(hash)?;
            println!("Removed {removed} sections of {hash}");
            Ok(())
        }
        Commands::Reset { confirm } => {
            if !confirm {
                bail!("reset deletes every stored section and index; pass --confirm to proceed");
            }
            engine.reset()?;
            println!("All stores cleared");
            Ok(())
        }
    }
}

fn ingest(engine: &RetrievalEngine, dir: &Path, limit: Option<usize>) -> Result<()> {
    let loader = DocumentLoader::new(engine.settings().categories.clone());
    let docs = loader.load_directory_limited(dir, limit.unwrap_or(usize::MAX))?;
    if docs.is_empty() {
        println!("No .txt files under {}", dir.display());
        return Ok(());
    }

    let pb = ProgressBar::new(docs.len() as u64);
    pb.set_style(ProgressStyle::default_bar().template("{msg} [{bar:40}] {pos}/{len}")?);
    pb.set_message("Ingesting");
    let (mut ingested, mut skipped, mut sections) = (0usize, 0usize, 0usize);
    for doc in &docs {
        let report = engine
            .ingest_pages(&doc.document, &doc.pages)
            .with_context(|| format!("ingesting {}", doc.path.display()))?;
        if report.skipped {
            skipped += 1;
        } else {
            ingested += 1;
            sections += report.parents;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(ingested, skipped, sections, "ingestion finished");
    println!("Ingested {ingested} documents ({sections} sections), skipped {skipped} already present");
    Ok(())
}

/// Queries run on tokio's blocking pool against one shared engine.
fn batch(engine: RetrievalEngine, file: &Path, k: Option<usize>, concurrency: usize) -> Result<()> {
    let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let queries: Vec<String> = text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
    let k = k.unwrap_or(engine.settings().retrieval.final_k);
    let engine = Arc::new(engine);
    let limit = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));

    let runtime = tokio::runtime::Runtime::new()?;
    let outcomes = runtime.block_on(async {
        let mut handles = Vec::with_capacity(queries.len());
        for query in queries {
            let engine = Arc::clone(&engine);
            let permit = Arc::clone(&limit).acquire_owned().await?;
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let outcome = engine.query(&query, k, None);
                (query, outcome)
            }));
        }
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await?);
        }
        anyhow::Ok(outcomes)
    })?;

    for (query, outcome) in outcomes {
        match outcome {
            Ok(QueryOutcome::Found(ctx)) => {
                let titles: Vec<&str> = ctx.context.sources.iter().map(|s| s.section_title.as_str()).collect();
                println!("{query}\n  -> {}", titles.join(" | "));
            }
            Ok(QueryOutcome::NoResults) => println!("{query}\n  -> no results"),
            Err(e) => {
                warn!(query = %query, error = %e, "query failed");
                println!("{query}\n  -> error: {e}");
            }
        }
    }
    Ok(())
}

fn print_context(ctx: &RetrievedContext) {
    println!("{}\n", ctx.context.text);
    println!("Sources:");
    for source in &ctx.context.sources {
        let pages: Vec<String> = source.page_numbers.iter().map(u32::to_string).collect();
        println!(
            "  [{}] {} ({}, pages {}){}",
            source.number,
            source.section_title,
            source.source_file,
            pages.join(", "),
            if source.full_section { "" } else { " [excerpt]" }
        );
    }
}
