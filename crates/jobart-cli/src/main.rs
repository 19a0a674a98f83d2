use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use jobart_adapters::CreationWindow;
use jobart_sync::{
    build_pipeline, read_dataset, similar_listings, RunSummary, SkillExtractor, SyncConfig,
    ALL_JOBS_DATASET, DEFAULT_SIMILAR_COUNT, JOB_TITLES,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jobart")]
#[command(about = "Job'Arts listing ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, normalize and write one dataset.
    Run(RunArgs),
    /// List the job titles used by `run --all`.
    Titles,
    /// Rank the listings of a written dataset closest to one of them.
    Similar(SimilarArgs),
}

#[derive(Debug, Args)]
struct SimilarArgs {
    /// Row of the reference listing in the dataset.
    #[arg(long)]
    index: usize,
    #[arg(long, default_value = ALL_JOBS_DATASET)]
    dataset: String,
    #[arg(long, default_value_t = DEFAULT_SIMILAR_COUNT)]
    top: usize,
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Job title to search for.
    #[arg(long, default_value = "data analyst", conflicts_with = "all")]
    query: String,
    /// Merge every known job title into one deduplicated dataset.
    #[arg(long)]
    all: bool,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    links_dir: Option<PathBuf>,
    #[arg(long)]
    database_url: Option<String>,
    /// Skip the relational sink.
    #[arg(long)]
    no_sql: bool,
    /// Lower creation-date bound, RFC 3339. Requires --max-creation-date.
    #[arg(long, requires = "max_creation_date")]
    min_creation_date: Option<DateTime<Utc>>,
    #[arg(long, requires = "min_creation_date")]
    max_creation_date: Option<DateTime<Utc>>,
    /// Abort the run after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            query: "data analyst".to_string(),
            all: false,
            output_dir: None,
            links_dir: None,
            database_url: None,
            no_sql: false,
            min_creation_date: None,
            max_creation_date: None,
            timeout_secs: None,
        }
    }
}

impl RunArgs {
    fn apply(&self, config: &mut SyncConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(dir) = &self.links_dir {
            config.links_dir = dir.clone();
        }
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if self.no_sql {
            config.sql_enabled = false;
        }
    }

    fn creation_window(&self) -> Result<Option<CreationWindow>> {
        match (self.min_creation_date, self.max_creation_date) {
            (Some(min), Some(max)) if min <= max => Ok(Some(CreationWindow { min, max })),
            (Some(_), Some(_)) => bail!("--min-creation-date must not be after --max-creation-date"),
            _ => Ok(None),
        }
    }
}

async fn run(args: RunArgs) -> Result<RunSummary> {
    let mut config = SyncConfig::from_env();
    args.apply(&mut config);
    let pipeline = build_pipeline(config)?.with_creation_window(args.creation_window()?);

    let work = async {
        if args.all {
            pipeline.run_all().await
        } else {
            pipeline.run_query(&args.query).await
        }
    };

    match args.timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), work)
            .await
            .with_context(|| format!("run exceeded {secs}s deadline"))?,
        None => work.await,
    }
}

fn similar(args: SimilarArgs) -> Result<()> {
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| SyncConfig::from_env().output_dir);
    let listings = read_dataset(&output_dir, &args.dataset)?;
    let extractor = SkillExtractor::bundled()?;
    let ranked = similar_listings(&listings, args.index, args.top, &extractor)?;

    let reference = &listings[args.index];
    println!(
        "reference #{}: {} | {} | {}",
        args.index, reference.title, reference.company_name, reference.source_url
    );
    for (rank, hit) in ranked.iter().enumerate() {
        let listing = &listings[hit.index];
        println!(
            "{}. #{} score={:.3} {} | {} | {}",
            rank + 1,
            hit.index,
            hit.score,
            listing.title,
            listing.company_name,
            listing.source_url
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            let summary = run(args).await?;
            println!(
                "run complete: run_id={} dataset={} fetched={} dropped={} deduplicated={} written={} parquet={} manifest={}",
                summary.run_id,
                summary.dataset,
                summary.fetched,
                summary.dropped_without_description,
                summary.deduplicated,
                summary.written,
                summary.parquet_path,
                summary.manifest_path
            );
            if let Some(table) = &summary.sql_table {
                println!("sql table: {table}");
            }
        }
        Commands::Similar(args) => similar(args)?,
        Commands::Titles => {
            for title in JOB_TITLES {
                println!("{title}");
            }
        }
    }

    Ok(())
}
