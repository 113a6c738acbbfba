//! 🚀 trendx-cli: the front door of trendx.
//!
//! 🎬 *[narrator voice]* "It all started with a cron entry and a single flag: `--apply`."
//! 📦 Thin wrapper: loads `.env` and config, sets up logging, parses flags, then lets the
//! library do the heavy lifting and prints whatever comes back. Like a manager. 🦆

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use trendx::{AppConfig, IndexReporter, RunConfig, RunMode, build_backends};

/// 🔧 Looked for in the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "trendx.toml";

/// 📈 Recompute trending scores from view counts and sync them into the search index.
#[derive(Debug, Parser)]
#[command(name = "trendx-cli", version)]
struct Cli {
    /// TOML config file. Without it, `trendx.toml` is used if present, else env vars only.
    #[arg(long, env = "TRENDX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Target index, overriding `run.index`.
    #[arg(long, global = true)]
    index: Option<String>,

    /// Print JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch, score, and preview or write trending scores.
    Rerank {
        #[command(flatten)]
        knobs: RunKnobs,
        /// Also write every scored result to this NDJSON file before dispatch.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Fetch and score, then write NDJSON. Never touches the index.
    Export {
        path: PathBuf,
        #[command(flatten)]
        knobs: RunKnobs,
    },
    /// min/max/avg of trending_score and views_count.
    Stats,
    /// Bucketed counts by views or by score.
    Distribution {
        #[arg(value_enum)]
        by: DistributionKind,
    },
    /// Stats plus both distributions.
    Summary,
    /// Highest trending scores.
    Top {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Lowest trending scores.
    Bottom {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// One item as the index and the metrics source see it.
    Item { id: String },
    /// Cluster name and version.
    Health,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DistributionKind {
    Views,
    Scores,
}

/// 🎛️ Flags that override the `run` section of the config.
#[derive(Debug, Args)]
struct RunKnobs {
    /// Preview only. Default unless the config says otherwise.
    #[arg(long, conflicts_with = "apply")]
    dry_run: bool,
    /// Actually write scores to the index.
    #[arg(long)]
    apply: bool,
    #[arg(long)]
    max_score: Option<f64>,
    #[arg(long)]
    factor: Option<f64>,
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long)]
    include_views_count: bool,
    #[arg(long)]
    parallelism: Option<usize>,
    /// Hide the progress bar.
    #[arg(long)]
    no_progress: bool,
}

impl RunKnobs {
    fn apply_to(&self, run: &mut RunConfig) {
        if self.dry_run {
            run.mode = RunMode::DryRun.to_string();
        }
        if self.apply {
            run.mode = "apply".to_string();
        }
        if let Some(max_score) = self.max_score {
            run.max_score = max_score;
        }
        if let Some(factor) = self.factor {
            run.decay_factor = factor;
        }
        if let Some(chunk_size) = self.chunk_size {
            run.chunk_size = chunk_size;
        }
        if self.include_views_count {
            run.include_views_count = true;
        }
        if let Some(parallelism) = self.parallelism {
            run.index_parallelism = parallelism;
        }
        if self.no_progress {
            run.show_progress = false;
        }
    }
}

/// 🔍 `--config` must exist if given. Otherwise the default file is optional.
fn resolve_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    match explicit {
        Some(path) => {
            let exists = path.try_exists().with_context(|| {
                format!(
                    "💀 Could not check whether the config file exists. Relative paths are relative to the cwd. Was checking here: '{}'",
                    path.display()
                )
            })?;
            if !exists {
                bail!(
                    "💀 Config file '{}' does not exist. Double check the path, or use an absolute one.",
                    path.display()
                );
            }
            Ok(Some(path.to_path_buf()))
        }
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            Ok(default.is_file().then_some(default))
        }
    }
}

fn emit<T: Serialize>(json: bool, value: &T, render: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("💀 Could not serialize the output to JSON")?
        );
    } else {
        println!("{}", render(value));
    }
    Ok(())
}

/// 🚀 Runs the chosen command. `Ok(code)` is the process exit code.
async fn run(cli: Cli, mut config: AppConfig) -> Result<i32> {
    if let Some(index) = &cli.index {
        config.run.index = index.clone();
    }

    let report = match &cli.command {
        Command::Rerank { knobs, export } => {
            knobs.apply_to(&mut config.run);
            Some(trendx::rerank(&config, export.as_deref()).await?)
        }
        Command::Export { path, knobs } => {
            knobs.apply_to(&mut config.run);
            Some(trendx::export(&config, path).await?)
        }
        _ => None,
    };
    if let Some(report) = report {
        emit(cli.json, &report, |r| r.render())?;
        return Ok(report.status.exit_code());
    }

    let (source, index) = build_backends(&config)?;
    let reporter = IndexReporter::new(index.as_ref(), config.run.index.clone());
    match cli.command {
        Command::Stats => emit(cli.json, &reporter.stats().await?, |s| s.render())?,
        Command::Distribution { by } => {
            let distribution = match by {
                DistributionKind::Views => reporter.view_distribution().await?,
                DistributionKind::Scores => reporter.score_distribution().await?,
            };
            emit(cli.json, &distribution, |d| d.render())?
        }
        Command::Summary => emit(cli.json, &reporter.summary().await?, |s| s.render())?,
        Command::Top { limit } => emit(cli.json, &reporter.top(limit).await?, |r| r.render())?,
        Command::Bottom { limit } => emit(cli.json, &reporter.bottom(limit).await?, |r| r.render())?,
        Command::Item { id } => {
            let params = trendx::FormulaParameters::new(config.run.max_score, config.run.decay_factor);
            let details = reporter.item(&id, Some(&source), &params).await?;
            emit(cli.json, &details, |d| d.render())?
        }
        Command::Health => emit(cli.json, &reporter.health().await?, |h| {
            format!("💓 cluster: {}   version: {}", h.cluster_name, h.version)
        })?,
        Command::Rerank { .. } | Command::Export { .. } => {}
    }
    Ok(0)
}

/// 🧅 Peel the error chain, one layer at a time, and say something useful if it smells
/// like nobody is listening on the other end.
fn report_failure(err: &anyhow::Error) {
    error!("💀 error: {err}");
    let mut the_vibes_are_giving_connection_issues = false;
    for cause in err.chain().skip(1) {
        error!("⚠️  cause: {cause}");
        let cause_str = cause.to_string();
        if cause_str.contains("error sending request")
            || cause_str.contains("connection refused")
            || cause_str.contains("Connection refused")
            || cause_str.contains("tcp connect error")
            || cause_str.contains("dns error")
        {
            the_vibes_are_giving_connection_issues = true;
        }
    }
    if the_vibes_are_giving_connection_issues {
        error!(
            "🔧 hint: looks like a service isn't reachable. \
            Double-check that Elasticsearch and the warehouse are actually running and that \
            the urls in your config point at them. If you're using Docker, `docker ps` is a good start. ☕"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // -- .env first, so TRENDX_* from the file is visible to clap and figment alike
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Ok(path) = dotenv {
        debug!("🌱 Loaded environment from '{}'", path.display());
    }

    let cli = Cli::parse();

    let outcome = async {
        let config_file = resolve_config_file(cli.config.as_deref())?;
        let config = trendx::load_config(config_file.as_deref()).context(
            "💀 In trendx-cli, we couldn't load the configuration. Check the file and the TRENDX_* env vars.",
        )?;
        run(cli, config).await
    }
    .await;

    match outcome {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(err) => {
            report_failure(&err);
            std::process::exit(1);
        }
    }
}
