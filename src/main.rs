use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use study_bible_rust::enrich::ThumbnailFetcher;
use study_bible_rust::{Annotator, BatchReport, Config, ExtractionMode, LLMConfig, Pipeline};

#[derive(Parser)]
#[command(name = "study-bible")]
#[command(version, about = "Build a study Bible database from sermon transcripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to study-bible.toml or config/study-bible.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for per-video artifacts
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Database file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment transcripts and build the verse, topic and video indices
    Extract {
        #[arg(long, value_enum, default_value_t = ExtractionMode::Basic)]
        mode: ExtractionMode,
        /// Model API key, only used in enhanced mode
        api_key: Option<String>,
    },
    /// AI-parse focus videos into teaching sections
    Parse { api_key: Option<String> },
    /// Rebuild verse indices from parsed artifacts, then synthesize when a key is available
    Rebuild { api_key: Option<String> },
    /// Synthesize verse commentary
    Synthesize { api_key: Option<String> },
    /// Derive clip ranges, titles and descriptions for mentions
    Clips { api_key: Option<String> },
    /// Extract speaker, series, episode and organization per video
    Metadata { api_key: Option<String> },
    /// Look up thumbnails in the program catalog
    Thumbnails {
        /// Catalog API key
        api_key: Option<String>,
    },
    /// Every stage in order
    RunAll {
        #[arg(long, value_enum, default_value_t = ExtractionMode::Enhanced)]
        mode: ExtractionMode,
        api_key: Option<String>,
    },
    /// Report violated database invariants
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "study_bible_rust=debug,study_bible=debug,info"
    } else {
        "study_bible_rust=info,study_bible=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };
    if let Some(dir) = cli.data_dir {
        config.paths.data_dir = dir;
    }
    if let Some(database) = cli.database {
        config.paths.database = Some(database);
    }
    config.validate()?;

    info!("🚀 Study Bible builder starting...");
    tracing::debug!("{}", config.summary());

    match cli.command {
        Commands::Extract { mode, api_key } => {
            set_llm_key(&mut config, api_key);
            let summarizer = match mode {
                ExtractionMode::Enhanced => Some(annotator(&config.summary_llm())?),
                ExtractionMode::Basic => None,
            };
            let pipeline = Pipeline::new(config);
            pipeline.extract(mode, summarizer.as_ref()).await?.log_summary();
        }

        Commands::Parse { api_key } => {
            set_llm_key(&mut config, api_key);
            let annotator = annotator(&config.section_llm())?;
            let pipeline = Pipeline::new(config);
            let parser = pipeline.section_parser(annotator).await;
            pipeline.parse_sections(&parser).await?.log_summary();
        }

        Commands::Rebuild { api_key } => {
            set_llm_key(&mut config, api_key);
            let synthesis_llm = config.synthesis_llm();
            let pipeline = Pipeline::new(config);
            pipeline.rebuild().await?;

            if has_credentials(&synthesis_llm) {
                let synthesizer = pipeline.synthesizer(Annotator::from_config(&synthesis_llm)?).await;
                pipeline.synthesize(&synthesizer).await?.log_summary();
            } else {
                warn!(
                    "⚠️ No API key ({}), skipping commentary synthesis",
                    synthesis_llm.api_key_env
                );
            }
        }

        Commands::Synthesize { api_key } => {
            set_llm_key(&mut config, api_key);
            let annotator = annotator(&config.synthesis_llm())?;
            let pipeline = Pipeline::new(config);
            let synthesizer = pipeline.synthesizer(annotator).await;
            pipeline.synthesize(&synthesizer).await?.log_summary();
        }

        Commands::Clips { api_key } => {
            set_llm_key(&mut config, api_key);
            let annotator = annotator(&config.clip_llm())?;
            let pipeline = Pipeline::new(config);
            let extractor = pipeline.clip_extractor(annotator).await;
            pipeline.extract_clips(&extractor).await?.log_summary();
        }

        Commands::Metadata { api_key } => {
            set_llm_key(&mut config, api_key);
            let annotator = annotator(&config.metadata_llm())?;
            let pipeline = Pipeline::new(config);
            let extractor = pipeline.metadata_extractor(annotator).await;
            pipeline.extract_metadata(&extractor).await?.log_summary();
        }

        Commands::Thumbnails { api_key } => {
            if api_key.is_some() {
                config.thumbnails.api_key = api_key;
            }
            if config.thumbnails.resolve_api_key().is_none() {
                missing_credentials(&config.thumbnails.api_key_env);
            }
            let fetcher = ThumbnailFetcher::new(&config.thumbnails)?;
            let pipeline = Pipeline::new(config);
            pipeline.fetch_thumbnails(&fetcher).await?.log_summary();
        }

        Commands::RunAll { mode, api_key } => {
            set_llm_key(&mut config, api_key);
            run_all(config, mode).await?;
        }

        Commands::Check => {
            let pipeline = Pipeline::new(config);
            let problems = pipeline.check().await?;
            if !problems.is_empty() {
                for problem in &problems {
                    error!("❌ {}", problem);
                }
                error!("{} invariant violations in {}", problems.len(), pipeline.store().path().display());
                std::process::exit(1);
            }
            info!("✅ {} satisfies all invariants", pipeline.store().path().display());
        }
    }

    Ok(())
}

async fn run_all(config: Config, mode: ExtractionMode) -> Result<()> {
    let summary = annotator(&config.summary_llm())?;
    let sections = annotator(&config.section_llm())?;
    let synthesis = annotator(&config.synthesis_llm())?;
    let clips = annotator(&config.clip_llm())?;
    let metadata = annotator(&config.metadata_llm())?;
    let fetcher = match config.thumbnails.resolve_api_key() {
        Some(_) => Some(ThumbnailFetcher::new(&config.thumbnails)?),
        None => None,
    };

    let pipeline = Pipeline::new(config);
    let start_time = std::time::Instant::now();
    let mut reports: Vec<BatchReport> = Vec::new();

    reports.push(pipeline.extract(mode, Some(&summary)).await?);

    let parser = pipeline.section_parser(sections).await;
    reports.push(pipeline.parse_sections(&parser).await?);

    pipeline.rebuild().await?;

    let synthesizer = pipeline.synthesizer(synthesis).await;
    reports.push(pipeline.synthesize(&synthesizer).await?);

    let extractor = pipeline.clip_extractor(clips).await;
    reports.push(pipeline.extract_clips(&extractor).await?);

    let extractor = pipeline.metadata_extractor(metadata).await;
    reports.push(pipeline.extract_metadata(&extractor).await?);

    match fetcher {
        Some(fetcher) => reports.push(pipeline.fetch_thumbnails(&fetcher).await?),
        None => warn!(
            "⚠️ No catalog key ({}), skipping thumbnails",
            pipeline.config().thumbnails.api_key_env
        ),
    }

    info!("🎉 All stages completed in {:.2}s", start_time.elapsed().as_secs_f64());
    for report in &reports {
        report.log_summary();
    }

    Ok(())
}

fn set_llm_key(config: &mut Config, api_key: Option<String>) {
    if api_key.is_some() {
        config.llm.api_key = api_key;
    }
}

fn has_credentials(llm: &LLMConfig) -> bool {
    !llm.requires_api_key() || llm.resolve_api_key().is_some()
}

/// Annotator for a stage that cannot run without credentials
fn annotator(llm: &LLMConfig) -> Result<Annotator> {
    if !has_credentials(llm) {
        missing_credentials(&llm.api_key_env);
    }
    Annotator::from_config(llm)
}

fn missing_credentials(env_var: &str) -> ! {
    error!("❌ No API key provided");
    eprintln!("Usage: study-bible <COMMAND> [API_KEY]");
    eprintln!("   or: {}=<key> study-bible <COMMAND>", env_var);
    std::process::exit(1);
}
