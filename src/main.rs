//! Trawler: polite, adaptive web crawler CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use trawler::{
    config::{Config, LogFormat, LogLevel},
    crawl::CrawlEngine,
    util::truncate_for_display,
};

#[derive(Parser)]
#[command(name = "trawler")]
#[command(about = "Polite, adaptive web crawler")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "trawler.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl starting from the given seed URLs
    Crawl {
        /// Seed URLs to start from
        #[arg(required = true)]
        urls: Vec<String>,

        /// Maximum crawl depth
        #[arg(short, long)]
        depth: Option<u32>,

        /// Maximum pages to crawl
        #[arg(short, long)]
        max_pages: Option<u64>,

        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Output directory for JSON batches
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Follow links to external sites
        #[arg(long)]
        follow_external: bool,

        /// Ignore robots.txt (be rude; use on infrastructure you own)
        #[arg(long)]
        no_robots: bool,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load or default the config before logging so the configured level
    // applies when -v is not given.
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Crawl {
            urls,
            depth,
            max_pages,
            workers,
            output,
            follow_external,
            no_robots,
        } => {
            let mut config = config;
            if let Some(depth) = depth {
                config.crawl.max_depth = depth;
            }
            if let Some(max_pages) = max_pages {
                config.crawl.max_pages = max_pages;
            }
            if let Some(workers) = workers {
                config.crawl.workers = workers;
            }
            if let Some(output) = output {
                config.storage.output_dir = output;
            }
            if follow_external {
                config.crawl.follow_external_links = true;
            }
            if no_robots {
                config.crawl.respect_robots = false;
            }
            config.validate()?;

            crawl(config, urls).await
        }
        Commands::Init { force } => init_config(&cli.config, force),
    }
}

fn init_logging(config: &Config, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => match config.logging.level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        },
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false);

    match config.logging.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
    }
    Ok(())
}

async fn crawl(config: Config, url_strings: Vec<String>) -> Result<()> {
    // Accept bare hostnames by assuming https
    let seeds: Vec<String> = url_strings
        .iter()
        .map(|s| {
            if s.starts_with("http://") || s.starts_with("https://") {
                s.clone()
            } else {
                format!("https://{s}")
            }
        })
        .collect();

    info!(seeds = ?seeds, "starting crawl");

    let engine = CrawlEngine::builder(config).seeds(seeds).build()?;

    // Ctrl-C broadcasts shutdown; workers drain and storage flushes.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                engine.shutdown();
            }
        });
    }

    let stats = engine.run().await;

    println!("\nCrawl complete!");
    println!("===============");
    println!("Pages crawled:      {}", stats.crawled);
    println!("Pages stored:       {}", stats.stored);
    println!("Duplicates skipped: {}", stats.duplicates);
    println!("Pages failed:       {}", stats.failed);
    println!("Policy skips:       {}", stats.skipped);
    println!("URLs discovered:    {}", stats.added);
    println!("Hosts seen:         {}", stats.hosts_seen);
    println!("Duration:           {:.1}s", stats.duration.as_secs_f64());

    Ok(())
}

fn init_config(path: &PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            truncate_for_display(&path.display().to_string(), 120)
        );
    }
    let config = Config::default();
    std::fs::write(path, toml::to_string_pretty(&config)?)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
