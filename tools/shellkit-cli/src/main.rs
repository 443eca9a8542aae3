//! Command-line driver for the ShellKit caching worker.
//!
//! Runs the worker against a live origin with an in-memory cache, which is
//! handy for checking a deployment's critical resources and classification
//! rules before shipping a new worker version.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache the critical resources of a site
//! shellkit warm https://example.com/
//!
//! # Fetch pages through the worker and report where each response came from
//! shellkit fetch https://example.com/ /style.css /assets/hero.jpg
//! shellkit fetch https://example.com/ /about --navigate
//!
//! # Show how paths are classified
//! shellkit classify /api/users /assets/logo.png /blog/post
//!
//! # Print the effective configuration
//! shellkit config --config shellkit.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shellkit_common::{init_logging, LogConfig, SharedClock, SystemClock};
use shellkit_net::{Fetcher, HttpFetcher, LoaderConfig, Request};
use shellkit_sw::{
    CacheConfig, CacheStorage, CacheWorker, Clients, MemoryCacheStorage, PageEvent,
    WorkerContainer,
};
use tokio::sync::{mpsc, RwLock};
use tracing::info;
use url::Url;

#[derive(Parser)]
#[command(name = "shellkit")]
#[command(about = "Offline caching worker for static site shells")]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON log output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a worker for the origin and pre-cache its critical resources
    Warm {
        /// Site origin
        origin: Url,
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Fetch paths through an installed worker
    Fetch {
        /// Site origin
        origin: Url,
        /// Paths to fetch, relative to the origin
        #[arg(required = true)]
        paths: Vec<String>,
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Treat each request as a page navigation
        #[arg(long)]
        navigate: bool,
    },

    /// Print the verdict and matching rule for each path
    Classify {
        /// Request paths
        #[arg(required = true)]
        paths: Vec<String>,
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig::from_flags(cli.verbose, cli.json));

    match cli.command {
        Commands::Warm { origin, config } => {
            let config = load_config(config.as_deref())?;
            let (storage, fetcher, clock) = runtime()?;
            let (events, _rx) = mpsc::unbounded_channel();
            let worker = CacheWorker::new(
                config,
                origin,
                storage,
                fetcher,
                clock,
                Arc::new(RwLock::new(Clients::new())),
                events,
            )?;

            let report = worker.install().await?;

            println!("Cache {}:", worker.cache_name());
            println!("  Cached: {}", report.cached.len());
            for path in &report.failed {
                println!("  Failed: {path}");
            }

            if !report.failed.is_empty() {
                std::process::exit(1);
            }
        }

        Commands::Fetch {
            origin,
            paths,
            config,
            navigate,
        } => {
            let config = load_config(config.as_deref())?;
            let (container, mut events) = container(&origin)?;
            container.register(config).await?;

            for path in &paths {
                let url = origin
                    .join(path)
                    .with_context(|| format!("invalid path {path}"))?;
                let request = if navigate {
                    Request::navigate(url.clone())
                } else {
                    Request::get(url.clone())
                };

                match container.fetch(request).await {
                    Ok(fetched) => println!(
                        "{} {:?} {} bytes {}",
                        fetched.response.status.as_u16(),
                        fetched.source,
                        fetched.response.body.len(),
                        url
                    ),
                    Err(e) => println!("ERR {url}: {e}"),
                }
            }

            while let Ok(event) = events.try_recv() {
                info!(event = %serde_json::to_string(&event)?, "Page event");
            }
        }

        Commands::Classify { paths, config } => {
            let classifier = load_config(config.as_deref())?.classifier()?;
            for path in &paths {
                match classifier.explain(path) {
                    Some((rule, verdict)) => println!("{path}: {verdict:?} ({rule})"),
                    None => println!("{path}: {:?}", classifier.classify(path)),
                }
            }
        }

        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CacheConfig> {
    match path {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(CacheConfig::default()),
    }
}

/// Live network, in-memory cache, wall clock.
fn runtime() -> Result<(Arc<dyn CacheStorage>, Arc<dyn Fetcher>, SharedClock)> {
    let clock: SharedClock = Arc::new(SystemClock);
    let fetcher = HttpFetcher::new(LoaderConfig::default())?;
    let storage = MemoryCacheStorage::new(clock.clone());
    Ok((Arc::new(storage), Arc::new(fetcher), clock))
}

fn container(origin: &Url) -> Result<(WorkerContainer, mpsc::UnboundedReceiver<PageEvent>)> {
    let (storage, fetcher, clock) = runtime()?;
    Ok(WorkerContainer::new(origin.clone(), storage, fetcher, clock))
}
