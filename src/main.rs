use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use tandem::Relay;
use tandem::config::TandemConfig;
use tandem::model::ChangeRecord;
use tandem::transport::{self, Client, client::DEFAULT_SERVER};

/// Multi-author edit relay
///
/// tandem accepts full-content file snapshots from many authors, buffers
/// them durably, and on request replays them into a git working tree,
/// reconciling concurrent edits with line patches instead of locks. Each
/// run of consecutive edits by one author becomes one commit.
///
/// QUICK START:
///
///   # In the shared repository
///   tandem serve
///
///   # From anywhere
///   tandem push --user alice --file src/lib.rs
///   tandem commit
#[derive(Parser)]
#[command(name = "tandem")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'tandem <command> --help' for more information on a specific command.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server for a git working tree
    ///
    /// Serves the push/commit/status API until Ctrl-C, then flushes
    /// anything still buffered to the pending log.
    Serve(ServeArgs),

    /// Push a file's current content as one author's edit
    Push(PushArgs),

    /// Merge everything pending into the repository
    Commit(OutputArgs),

    /// Show what is waiting to be committed
    Pending(OutputArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Config file [default: <repo>/.tandem/config.toml]
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file and PORT)
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Git working tree to merge into [default: .]
    #[arg(long, value_name = "DIR")]
    repo: Option<PathBuf>,
}

#[derive(Args)]
struct ServerArgs {
    /// Relay server URL
    #[arg(long, env = "TANDEM_SERVER", default_value = DEFAULT_SERVER)]
    server: String,
}

#[derive(Args)]
struct PushArgs {
    /// Author of the edit
    #[arg(long)]
    user: String,

    /// File whose content to push
    #[arg(long, value_name = "FILE")]
    file: PathBuf,

    /// Repository-relative path to record [default: the --file path]
    #[arg(long = "as", value_name = "PATH")]
    path: Option<String>,

    #[command(flatten)]
    server: ServerArgs,
}

#[derive(Args)]
struct OutputArgs {
    /// Print the server's JSON response instead of a summary
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    server: ServerArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = tandem::telemetry::init();

    match cli.command {
        Commands::Serve(args) => serve(args),
        Commands::Push(args) => push(&args),
        Commands::Commit(args) => commit(&args),
        Commands::Pending(args) => pending(&args),
    }
}

fn serve(args: ServeArgs) -> Result<()> {
    let repo_root = args.repo.clone().unwrap_or_else(|| PathBuf::from("."));
    let config_path = args
        .config
        .unwrap_or_else(|| TandemConfig::default_path(&repo_root));
    let port_env = std::env::var("PORT").ok();
    let config = TandemConfig::load(&config_path)?.with_overrides(
        args.listen,
        port_env.as_deref(),
        args.repo,
    )?;

    let relay = Arc::new(Relay::open(&config)?);
    let flusher = relay.start_flusher()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tandem-http")
        .build()
        .context("starting async runtime")?;
    let served = runtime.block_on(transport::serve(
        Arc::clone(&relay),
        config.server.listen,
        shutdown_signal(),
    ));
    drop(runtime);

    flusher.stop();
    let flushed = relay.flush()?;
    info!(bytes = flushed, "final flush complete");
    served?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!(error = %e, "cannot listen for Ctrl-C; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}

fn push(args: &PushArgs) -> Result<()> {
    let content = fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let path = match &args.path {
        Some(path) => path.clone(),
        None => args
            .file
            .to_str()
            .map(str::to_owned)
            .with_context(|| format!("{} is not valid UTF-8; pass --as", args.file.display()))?,
    };
    if args.user.trim().is_empty() {
        bail!("--user must not be empty");
    }

    let record = ChangeRecord::edit(ChangeRecord::new_id(), args.user.as_str(), path, content);
    record.validate()?;
    Client::new(&args.server.server)?.push(&record)?;
    println!("pushed {} as {}", args.file.display(), args.user);
    Ok(())
}

fn commit(args: &OutputArgs) -> Result<()> {
    let response = Client::new(&args.server.server)?.commit()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    if response.count == 0 {
        println!("nothing to commit");
        return Ok(());
    }
    println!(
        "committed {} record(s) in {} checkpoint(s)",
        response.count, response.checkpoints
    );
    if response.dropped_hunks > 0 {
        println!(
            "warning: {} hunk(s) could not be placed and were dropped; check the result",
            response.dropped_hunks
        );
    }
    if response.skipped_edits > 0 {
        println!(
            "warning: {} edit(s) target files that are not UTF-8 text and were skipped",
            response.skipped_edits
        );
    }
    Ok(())
}

fn pending(args: &OutputArgs) -> Result<()> {
    let stats = Client::new(&args.server.server)?.pending()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!(
        "buffered: {} record(s), {} byte(s)",
        stats.buffered_records, stats.buffered_bytes
    );
    println!("pending log: {} byte(s)", stats.log_bytes);
    Ok(())
}
