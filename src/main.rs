use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use lexdex::config::BuildConfig;
use lexdex::error::LexdexError;
use lexdex::index::build::UnitFailure;
use lexdex::index::stats::{format_size, index_stats, show_stats};
use lexdex::index::{Corpus, DocStore, IndexBuilder, IndexReader};
use lexdex::output::{self, OutputOptions};
use lexdex::query::QueryEngine;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lexdex")]
#[command(about = "Out-of-core positional inverted index with boolean, proximity and phrase queries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log progress of each build phase (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index over every file below a directory
    Index {
        /// Corpus directory
        corpus: PathBuf,

        /// Index file to write
        #[arg(short, long)]
        output: PathBuf,

        /// JSON build configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Worker threads (0 = one per CPU)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Total arena memory in bytes
        #[arg(long)]
        memory_budget: Option<u64>,

        /// Target shard size in bytes
        #[arg(long)]
        shard_bytes: Option<u64>,

        /// Hide progress bars
        #[arg(short, long)]
        quiet: bool,
    },
    /// Evaluate a query
    Query {
        /// Index file
        index: PathBuf,

        /// Query, e.g. `father & (brother | sister)`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        query: Vec<String>,

        /// Only print the number of matches
        #[arg(short, long)]
        count: bool,

        /// Maximum documents to list (0 = all)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
    /// Show index statistics
    Stats {
        /// Index file
        index: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List dictionary terms
    Terms {
        /// Index file
        index: PathBuf,

        /// Only terms starting with this prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Maximum terms to list (0 = all)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "lexdex=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Index {
            corpus,
            output,
            config,
            workers,
            memory_budget,
            shard_bytes,
            quiet,
        } => {
            let mut build_config = match &config {
                Some(path) => BuildConfig::load(path)?,
                None => BuildConfig::default(),
            };
            if let Some(workers) = workers {
                build_config.workers = workers;
            }
            if let Some(budget) = memory_budget {
                build_config.memory_budget = budget;
            }
            if let Some(bytes) = shard_bytes {
                build_config.shard_bytes = bytes;
            }
            run_index(corpus, output, build_config, quiet)?;
        }
        Commands::Query {
            index,
            query,
            count,
            limit,
            no_color,
        } => {
            let color = !no_color && std::io::stdout().is_terminal();
            run_query(index, &query.join(" "), count, limit, color)?;
        }
        Commands::Stats { index, json } => {
            if json {
                let stats = index_stats(&index)?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                show_stats(&index)?;
            }
        }
        Commands::Terms {
            index,
            prefix,
            limit,
        } => {
            run_terms(index, prefix.as_deref(), limit)?;
        }
    }

    Ok(())
}

fn run_index(corpus_dir: PathBuf, output: PathBuf, config: BuildConfig, quiet: bool) -> Result<()> {
    let mut corpus = Corpus::open_dir(&corpus_dir)
        .with_context(|| format!("cannot open corpus {}", corpus_dir.display()))?;
    if corpus.is_empty() {
        bail!("no documents found in {}", corpus_dir.display());
    }
    println!(
        "Indexing {} documents ({}) from {}",
        corpus.len(),
        format_size(corpus.total_bytes()),
        corpus_dir.display()
    );

    let builder = IndexBuilder::new(config)?.with_progress(!quiet);
    let mut report = builder.build(&corpus, &output)?;
    report.failures.extend(
        corpus
            .unreadable
            .drain(..)
            .map(|(path, error)| UnitFailure::new(path.display().to_string(), error)),
    );

    let stats = &report.stats;
    println!(
        "Indexed {} tokens into {} terms across {} segments",
        stats.tokens, stats.terms, stats.segments
    );
    println!(
        "Invert {:.2?}, merge {:.2?}, write {:.2?}",
        stats.invert_time, stats.merge_time, stats.write_time
    );
    println!(
        "Index stored at: {} ({})",
        report.index.display(),
        format_size(stats.index_bytes)
    );
    if !report.failures.is_empty() {
        eprintln!("({} units could not be indexed)", report.failures.len());
        for failure in &report.failures {
            eprintln!("  {}", failure);
        }
    }
    Ok(())
}

fn run_query(index: PathBuf, query: &str, count: bool, limit: usize, color: bool) -> Result<()> {
    let reader = IndexReader::open(&index)
        .with_context(|| format!("cannot open index {}", index.display()))?;
    let docs = DocStore::load_for_index(&index)?;
    let engine = QueryEngine::new(Arc::new(reader));

    let outcome = match engine.execute(query) {
        Ok(outcome) => outcome,
        Err(LexdexError::QuerySyntax { position, message }) => {
            eprintln!("{}", query);
            let column = query.get(..position).map_or(0, |head| head.chars().count());
            eprintln!("{}^", " ".repeat(column));
            bail!("query syntax error at offset {}: {}", position, message);
        }
        Err(e) => return Err(e.into()),
    };

    output::print_outcome(
        &outcome,
        docs.as_ref(),
        OutputOptions {
            color,
            count_only: count,
            limit,
        },
    )?;
    Ok(())
}

fn run_terms(index: PathBuf, prefix: Option<&str>, limit: usize) -> Result<()> {
    let reader = IndexReader::open(&index)
        .with_context(|| format!("cannot open index {}", index.display()))?;
    let entries = match prefix {
        Some(prefix) => reader.terms_with_prefix(prefix)?,
        None => reader.terms()?.collect::<Result<Vec<_>, _>>()?,
    };
    let take = if limit == 0 { entries.len() } else { limit.min(entries.len()) };

    let mut listed = Vec::with_capacity(take);
    for entry in entries.into_iter().take(take) {
        let doc_frequency = reader.doc_frequency(entry.postings)?;
        listed.push((entry, doc_frequency));
    }
    output::print_terms(&listed, std::io::stdout().is_terminal())?;
    Ok(())
}
