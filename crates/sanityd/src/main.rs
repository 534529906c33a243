//! Operator binary for the sanity pipeline.
//!
//! Drives the saneitize loop against the durable job queue: push the next
//! round of checker jobs, inspect or forget a loop, look at queue backlogs
//! and list the configured profiles.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sanity_cluster::ClusterAssignment;
use sanity_jobs::{
    JobContext, JobError, ProfileRepository, SanitizeProfile, delete_loop, loop_status, push_jobs,
};
use sanity_queue::JobQueue;
use sanity_store::{MemoryIndex, MemoryPageStore};
use sanity_types::{LoopState, PageRecord, queues};
use tracing::{info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "sanityd",
    version,
    about = "Search index sanity checker and repair pipeline"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override data directory.
    #[arg(short, long, global = true, env = "SANITY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push the next round of checker jobs for a loop.
    Push {
        /// Name the loop state is stored under.
        #[arg(short, long, default_value = "default")]
        job_name: String,

        /// Restrict the loop to one cluster (all writable clusters if omitted).
        #[arg(long)]
        cluster: Option<String>,

        /// Seconds over which the pushed jobs are released.
        #[arg(short, long, default_value = "7200")]
        refresh_freq: u64,
    },

    /// Show the progress of a loop.
    Show {
        /// Name the loop state is stored under.
        #[arg(short, long, default_value = "default")]
        job_name: String,
    },

    /// Show the backlog of every queue.
    Status,

    /// Forget a loop's state.
    DeleteJob {
        /// Name the loop state is stored under.
        #[arg(short, long, default_value = "default")]
        job_name: String,
    },

    /// List the sanitization profiles.
    Profiles,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = cli.data_dir {
        config.node.data_dir = dir;
    }

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Profiles => {
            cmd_profiles(&config.profiles);
            Ok(())
        }
        command => {
            std::fs::create_dir_all(&config.node.data_dir)
                .context("failed to create data directory")?;
            let queue_path = config.queue_path();
            let queue = JobQueue::open(&queue_path)
                .with_context(|| format!("cannot open job queue at {}", queue_path.display()))?;
            let pages = config.load_pages()?;
            let ctx = build_context(&config, Arc::new(queue), pages);
            run_command(&ctx, command).await
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wire the configured collaborators into a job context.
fn build_context(config: &CliConfig, queue: Arc<JobQueue>, pages: Vec<PageRecord>) -> JobContext {
    let store = MemoryPageStore::new();
    let page_count = pages.len();
    for page in pages {
        store.insert(page);
    }

    // The CLI never writes to a cluster; clients only back name resolution.
    let clusters = Arc::new(ClusterAssignment::new(config.write_timeout()));
    for cluster in &config.clusters {
        clusters.add_cluster(
            cluster.clone(),
            Arc::new(MemoryIndex::new(config.index.clone())),
        );
    }
    info!(
        pages = page_count,
        clusters = config.clusters.len(),
        data_dir = %config.node.data_dir.display(),
        "context ready"
    );

    let ctx = JobContext::new(queue, Arc::new(store), clusters)
        .index_config(config.index.clone())
        .profiles(config.profiles.clone())
        .backoff(config.backoff.clone())
        .write_config(config.write)
        .log_sane(config.log.log_sane);
    config
        .external_indices
        .iter()
        .cloned()
        .fold(ctx, JobContext::external_index)
}

async fn run_command(ctx: &JobContext, command: Commands) -> Result<()> {
    match command {
        Commands::Push {
            job_name,
            cluster,
            refresh_freq,
        } => cmd_push(ctx, &job_name, cluster.as_deref(), refresh_freq).await,
        Commands::Show { job_name } => cmd_show(ctx, &job_name).await,
        Commands::Status => cmd_status(ctx),
        Commands::DeleteJob { job_name } => cmd_delete_job(ctx, &job_name),
        Commands::Profiles => {
            cmd_profiles(&ctx.profiles);
            Ok(())
        }
    }
}

// -----------------------------------------------------------------------
// sanityd push
// -----------------------------------------------------------------------

async fn cmd_push(
    ctx: &JobContext,
    job_name: &str,
    cluster: Option<&str>,
    refresh_freq: u64,
) -> Result<()> {
    match push_jobs(ctx, job_name, cluster, refresh_freq).await {
        Ok(report) => {
            println!(
                "Pushed {} checker jobs using profile {}",
                report.jobs.len(),
                report.profile
            );
            print_state(&report.state);
            Ok(())
        }
        // A full queue is the normal state between two timer ticks.
        Err(JobError::TooManyCheckerJobs { pending, max }) => {
            warn!(pending, max, "checker queue is full, nothing pushed");
            println!("Skipped: {pending} checker jobs pending (max {max})");
            Ok(())
        }
        Err(e) => Err(e).context("failed to push checker jobs"),
    }
}

// -----------------------------------------------------------------------
// sanityd show
// -----------------------------------------------------------------------

async fn cmd_show(ctx: &JobContext, job_name: &str) -> Result<()> {
    let status = loop_status(ctx, job_name)
        .await
        .with_context(|| format!("cannot read loop {job_name}"))?;
    print_state(&status.state);
    println!("  ids todo:      {}", status.ids_todo);
    println!(
        "  jobs/hour:     {:.1} (loop), {:.1} (total)",
        status.jobs_per_hour, status.jobs_per_hour_total
    );
    println!(
        "  ids/hour:      {:.1} (loop), {:.1} (total)",
        status.ids_per_hour, status.ids_per_hour_total
    );
    println!("  eta:           {}", status.eta);
    println!("  next loop at:  {}", status.next_loop_min);
    Ok(())
}

fn print_state(state: &LoopState) {
    println!("Loop {}", state.job_name);
    println!(
        "  cluster:       {}",
        state.cluster.as_deref().unwrap_or("all writable clusters")
    );
    println!("  loop id:       {}", state.loop_id);
    println!("  offset:        {}", state.id_offset);
    println!(
        "  ids sent:      {} (loop), {} (total)",
        state.ids_sent, state.ids_sent_total
    );
    println!(
        "  jobs sent:     {} (loop), {} (total)",
        state.jobs_sent, state.jobs_sent_total
    );
    println!(
        "  created {}, updated {}, loop started {}",
        state.created, state.updated, state.last_loop
    );
}

// -----------------------------------------------------------------------
// sanityd status
// -----------------------------------------------------------------------

fn cmd_status(ctx: &JobContext) -> Result<()> {
    let now = ctx.clock.now();
    println!("{:<28} {:>8} {:>8} {:>8}", "queue", "ready", "delayed", "claimed");
    for queue in std::iter::once(queues::CHECKER).chain(queues::UPDATE_QUEUES) {
        let stats = ctx.queue.stats(queue, now)?;
        println!(
            "{queue:<28} {:>8} {:>8} {:>8}",
            stats.size, stats.delayed, stats.claimed
        );
    }
    Ok(())
}

// -----------------------------------------------------------------------
// sanityd delete-job
// -----------------------------------------------------------------------

fn cmd_delete_job(ctx: &JobContext, job_name: &str) -> Result<()> {
    let state = delete_loop(ctx, job_name)?;
    println!(
        "Deleted loop {} (loop id {}, offset {})",
        state.job_name, state.loop_id, state.id_offset
    );
    Ok(())
}

// -----------------------------------------------------------------------
// sanityd profiles
// -----------------------------------------------------------------------

fn cmd_profiles(profiles: &ProfileRepository) {
    for (name, raw) in profiles.iter() {
        let size = raw
            .max_wiki_size
            .map_or_else(|| "-".to_string(), |size| size.to_string());
        match SanitizeProfile::validate(raw) {
            Ok(profile) => println!(
                "{name:<6} max_wiki_size={size} batch={} chunk={} pressure={} max_time={}s",
                profile.checker_batch_size,
                profile.jobs_chunk_size,
                profile.update_jobs_max_pressure,
                profile.checker_job_max_time,
            ),
            Err(e) => println!("{name:<6} max_wiki_size={size} invalid: {e}"),
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
