//! crawl-controller main entry point
//!
//! This is the command-line interface for running one crawl job from a
//! TOML crawl order.

use anyhow::Context;
use clap::Parser;
use crawl_controller::config::{load_order_with_hash, CrawlOrder, MAX_TOE_THREADS};
use crawl_controller::crawler::{CrawlController, LoggingListener};
use crawl_controller::frontier::{Frontier, MemoryFrontier};
use crawl_controller::output::{load_statistics, print_statistics};
use crawl_controller::processors::build_chains;
use crawl_controller::state::status;
use crawl_controller::storage::page_store_path;
use crawl_controller::CrawlState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How long an interrupt waits for workers to pause before checkpointing
const PAUSE_TIMEOUT: Duration = Duration::from_secs(120);

/// crawl-controller: runs a crawl job described by a crawl order
///
/// The crawl runs until the frontier is exhausted or a configured limit is
/// hit. Ctrl-C stops it gracefully; a second Ctrl-C exits at once.
#[derive(Parser, Debug)]
#[command(name = "crawl-controller")]
#[command(version)]
#[command(about = "Multi-threaded crawl controller", long_about = None)]
struct Cli {
    /// Path to the TOML crawl order
    #[arg(value_name = "ORDER")]
    order: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the order and show the pipeline without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show page store statistics of the job and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Override the number of toe threads
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_TOE_THREADS as u64))]
    threads: Option<u64>,

    /// Pause and write a checkpoint before stopping on Ctrl-C
    #[arg(long)]
    checkpoint_on_interrupt: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading crawl order from: {}", cli.order.display());
    let (mut order, hash) = load_order_with_hash(&cli.order)
        .with_context(|| format!("Failed to load crawl order {}", cli.order.display()))?;
    tracing::info!("Crawl order loaded successfully (hash: {})", hash);

    if let Some(threads) = cli.threads {
        order.crawl.max_toe_threads = threads as usize;
    }

    if cli.dry_run {
        handle_dry_run(&order)
    } else if cli.stats {
        handle_stats(&order)
    } else {
        handle_crawl(order, cli.checkpoint_on_interrupt).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawl_controller=info,warn"),
            1 => EnvFilter::new("crawl_controller=debug,info"),
            2 => EnvFilter::new("crawl_controller=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates the order and prints the pipeline
fn handle_dry_run(order: &CrawlOrder) -> anyhow::Result<()> {
    let chains = build_chains(order).context("Invalid processor chains")?;

    println!("=== Crawl Order Dry Run ===\n");
    println!("Crawl: {}", order.crawl.name);
    println!("  Job directory: {}", order.job_dir().display());
    println!("  Toe threads: {}", order.crawl.max_toe_threads);
    println!("  User agent: {}", order.user_agent_string());
    println!(
        "  Limits: {} bytes, {} documents, {} seconds (0 = none)",
        order.crawl.max_bytes_download, order.crawl.max_document_download, order.crawl.max_time_sec
    );
    if let Some(checkpoint) = &order.disk.recover_checkpoint {
        println!("  Recovering from checkpoint: {}", checkpoint);
    }

    println!("\nSeeds ({}):", order.scope.seeds.len());
    for seed in &order.scope.seeds {
        println!("  - {}", seed);
    }

    println!("\nPipeline:");
    for (index, chain) in chains.chains().iter().enumerate() {
        let marker = if index == chains.post_chain_index() {
            " (post)"
        } else {
            ""
        };
        println!("  {}{}:", chain.name(), marker);
        for stage in chain.stages() {
            println!("    * {}", stage.name());
        }
    }

    println!("\n✓ Crawl order is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from the page store
fn handle_stats(order: &CrawlOrder) -> anyhow::Result<()> {
    let path = page_store_path(order);
    println!("Page store: {}\n", path.display());
    let stats = load_statistics(&path)
        .with_context(|| format!("Failed to read page store {}", path.display()))?;
    print_statistics(&stats);
    Ok(())
}

/// Runs the crawl to completion
async fn handle_crawl(order: CrawlOrder, checkpoint_on_interrupt: bool) -> anyhow::Result<()> {
    let chains = build_chains(&order).context("Invalid processor chains")?;
    let controller = CrawlController::from_order(order)?;
    controller.add_listener(Arc::new(LoggingListener));

    let frontier: Arc<dyn Frontier> = Arc::new(MemoryFrontier::new(controller.order()));
    controller.initialize(frontier, chains)?;
    controller.request_crawl_start()?;

    let finished = {
        let controller = Arc::clone(&controller);
        tokio::task::spawn_blocking(move || {
            controller.wait_for_state(|s| s == CrawlState::Finished, None)
        })
    };
    tokio::pin!(finished);

    tokio::select! {
        result = &mut finished => {
            result.context("Crawl waiter failed")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Interrupt received, stopping crawl (Ctrl-C again to exit immediately)");
            let stopper = {
                let controller = Arc::clone(&controller);
                tokio::task::spawn_blocking(move || interrupt(&controller, checkpoint_on_interrupt))
            };
            tokio::select! {
                result = &mut finished => {
                    result.context("Crawl waiter failed")?;
                    stopper.await.context("Stop request failed")??;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Second interrupt, exiting without a clean stop");
                    std::process::exit(130);
                }
            }
        }
    }

    println!("{}", controller.single_line_report());
    println!("Exit reason: {}", controller.exit_reason());
    if let Some(line) = controller.report("compact") {
        print!("{}", line);
    }
    let path = page_store_path(controller.order());
    if path.exists() {
        match load_statistics(&path) {
            Ok(stats) => print_statistics(&stats),
            Err(e) => tracing::warn!("Could not read page store statistics: {}", e),
        }
    }
    Ok(())
}

/// Stops the crawl, optionally pausing to checkpoint first
fn interrupt(controller: &CrawlController, checkpoint: bool) -> anyhow::Result<()> {
    if checkpoint {
        controller.request_crawl_pause();
        let state = controller.wait_for_state(
            |s| matches!(s, CrawlState::Paused | CrawlState::Finished),
            Some(PAUSE_TIMEOUT),
        );
        match state {
            CrawlState::Paused => match controller.request_crawl_checkpoint() {
                Ok(dir) => tracing::info!("Checkpoint written to {}", dir.display()),
                Err(e) => tracing::error!("Checkpoint failed: {}", e),
            },
            CrawlState::Finished => return Ok(()),
            other => tracing::warn!(
                "Crawl did not pause in time (still {}), stopping without a checkpoint",
                other
            ),
        }
    }

    match controller.request_crawl_stop(status::ABORTED) {
        Ok(()) => Ok(()),
        Err(e) if controller.state() == CrawlState::Finished => {
            tracing::debug!("Crawl finished before the stop request: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
