//! dezoom-cache - Fetch and reassemble deep-zoom images.
//!
//! This binary parses the command line, sets up logging and runs one of the
//! subcommands.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dezoom_cache::{
    config::{AssembleConfig, CacheConfig, Cli, Command, FetchConfig},
    parse_pages, BatchRunner, CacheKey, CachedFetcher, ContentCache, FetchClient, ImageAssembler,
    Page, ReceiptLedger,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Assemble(config) => run_assemble(config).await,
        Command::Fetch(config) => run_fetch(config).await,
        Command::Cache(config) => run_cache(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "dezoom_cache=debug"
    } else {
        "dezoom_cache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Assemble Command
// =============================================================================

async fn run_assemble(config: AssembleConfig) -> ExitCode {
    init_logging(config.archive.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let pages = match collect_pages(&config).await {
        Ok(pages) => pages,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let cache_dir = config.archive.cache_dir();
    info!("Configuration:");
    info!("  Cache: {}", cache_dir.display());
    info!("  Workers: {}", config.archive.workers);
    info!("  Pages: {}", pages.len());

    let assembler_config = match config.assembler_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let cache = Arc::new(ContentCache::new(cache_dir));
    let assembler =
        match ImageAssembler::new(cache, config.archive.fetch_options(), assembler_config) {
            Ok(assembler) => Arc::new(assembler),
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        };

    let mut runner = BatchRunner::new(Arc::clone(&assembler));
    if let Some(ref path) = config.ledger {
        match ReceiptLedger::load(path).await {
            Ok(ledger) => {
                info!("  Ledger: {} ({} receipts)", path.display(), ledger.len().await);
                runner = runner.with_ledger(Arc::new(ledger));
            }
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    if let Some(ref dir) = config.output_dir {
        runner = runner.with_output_dir(dir);
    }

    let report = runner.run(&pages).await;
    drop(runner);
    if let Ok(assembler) = Arc::try_unwrap(assembler) {
        assembler.shutdown().await;
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Pages from the command line followed by pages from `--input`.
async fn collect_pages(config: &AssembleConfig) -> Result<Vec<Page>, String> {
    let mut pages: Vec<Page> = config.urls.iter().map(|url| vec![url.clone()]).collect();

    if let Some(ref input) = config.input {
        let text = tokio::fs::read_to_string(input)
            .await
            .map_err(|e| format!("Cannot read {}: {}", input.display(), e))?;
        pages.extend(parse_pages(&text, config.alternates));
    }

    Ok(pages)
}

// =============================================================================
// Fetch Command
// =============================================================================

async fn run_fetch(config: FetchConfig) -> ExitCode {
    init_logging(config.archive.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let client = match FetchClient::new(config.archive.fetch_options()) {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let cache = Arc::new(ContentCache::new(config.archive.cache_dir()));
    let fetcher = CachedFetcher::new(cache, client);

    let body = if config.xml {
        fetcher.xml(&config.url).await.map(|xml| xml.into_bytes())
    } else {
        fetcher.download(&config.url).await.map(|bytes| bytes.to_vec())
    };
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            error!(url = %config.url, "{}", e);
            return ExitCode::FAILURE;
        }
    };

    let written = match config.output {
        Some(ref path) => tokio::fs::write(path, &body).await,
        None => {
            let mut stdout = tokio::io::stdout();
            match stdout.write_all(&body).await {
                Ok(()) => stdout.flush().await,
                Err(e) => Err(e),
            }
        }
    };

    match written {
        Ok(()) => {
            info!(url = %config.url, bytes = body.len(), "fetched");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cannot write output: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Cache Command
// =============================================================================

async fn run_cache(config: CacheConfig) -> ExitCode {
    if config.archive.verbose {
        init_logging(true);
    }

    let cache = ContentCache::new(config.archive.cache_dir());
    let key = CacheKey::of(&config.key);
    let path = cache.path(&key);
    let present = cache.contains(&key).await;

    println!("key:     {}", key);
    println!("path:    {}", path.display());
    println!("present: {}", present);

    if config.invalidate && present {
        cache.invalidate(&key).await;
        println!("invalidated");
    }

    ExitCode::SUCCESS
}
