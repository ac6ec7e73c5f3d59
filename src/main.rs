//! Command-line driver for the gateway core.
//!
//! Every subcommand maps onto one resource manager operation, so the binary
//! doubles as a way to inspect and repair the index and mirror by hand.
//!
//! ```text
//! davcache put docs/report.pdf ./report.pdf
//! davcache ls docs --depth 1
//! davcache propfind / --depth 1 --base-url https://gw.example.com/dav
//! RUST_LOG=davcache_storage=debug davcache stat docs/report.pdf
//! ```

use clap::{Parser, Subcommand};
use davcache_config::Config;
use davcache_manager::{Depth, ResourceManager, framer, retention_policy};
use davcache_storage::{ResourceMeta, date};
use derive_more::{Display, Error};
use exn::{OptionExt, ResultExt};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not start the resource manager")]
    Startup,
    #[display("{_0} failed")]
    Command(#[error(not(source))] &'static str),
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("local I/O error")]
    Io,
}

#[derive(Parser, Debug)]
#[command(name = "davcache", version, about = "Cached WebDAV storage gateway core")]
struct Cli {
    /// Configuration file (defaults to ./davcache.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a directory and its ancestors.
    Mkdir { path: String },
    /// Store a local file at PATH.
    Put { path: String, source: PathBuf },
    /// Fetch a file into the mirror and print its location.
    Get {
        path: String,
        /// Also copy the file here.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a file or directory tree.
    Rm { path: String },
    /// Move a resource, overwriting the destination.
    Mv { source: String, destination: String },
    /// Show metadata for a resource.
    Stat { path: String },
    /// List entries below a directory.
    Ls {
        #[arg(default_value = "/")]
        path: String,
        /// 0, 1 or infinity.
        #[arg(short, long, default_value = "1")]
        depth: String,
    },
    /// Print the multistatus body a PROPFIND would answer with.
    Propfind {
        #[arg(default_value = "/")]
        path: String,
        #[arg(short, long, default_value = "1")]
        depth: String,
        /// Prefix the namespace is served under.
        #[arg(long, default_value = "/")]
        base_url: String,
    },
    /// Drop cached index rows for a subtree and look the path up again.
    Refresh { path: String },
    /// Bound the index size; limits default to the configured retention.
    Prune {
        #[arg(long)]
        max_age_secs: Option<u64>,
        #[arg(long)]
        max_entries: Option<u64>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Mkdir { .. } => "mkdir",
            Self::Put { .. } => "put",
            Self::Get { .. } => "get",
            Self::Rm { .. } => "rm",
            Self::Mv { .. } => "mv",
            Self::Stat { .. } => "stat",
            Self::Ls { .. } => "ls",
            Self::Propfind { .. } => "propfind",
            Self::Refresh { .. } => "refresh",
            Self::Prune { .. } => "prune",
        }
    }
}

/// One line per entry: kind, size, fingerprint, modification time, path.
fn print_entry(entry: &ResourceMeta) {
    let kind = if entry.is_dir { 'd' } else { '-' };
    let modified = date::format_http(entry.modified).unwrap_or_default();
    let fingerprint = entry.fingerprint.as_deref().unwrap_or("-");
    println!("{kind} {:>12} {fingerprint:<16.16} {modified:<29} /{}", entry.size, entry.path);
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbose > 1))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let manager = ResourceManager::connect(&config).await.or_raise(|| ErrorKind::Startup)?;
    let name = cli.command.name();
    match cli.command {
        Command::Mkdir { path } => {
            let entry = manager.ensure_directory(&path).await.or_raise(|| ErrorKind::Command(name))?;
            print_entry(&entry);
        },
        Command::Put { path, source } => {
            let entry = manager.put_file(&path, &source).await.or_raise(|| ErrorKind::Command(name))?;
            print_entry(&entry);
        },
        Command::Get { path, output } => {
            let local = manager.get_file(&path).await.or_raise(|| ErrorKind::Command(name))?;
            match output {
                Some(output) => {
                    tokio::fs::copy(&local, &output).await.or_raise(|| ErrorKind::Io)?;
                    println!("{}", output.display());
                },
                None => println!("{}", local.display()),
            }
        },
        Command::Rm { path } => manager.delete(&path).await.or_raise(|| ErrorKind::Command(name))?,
        Command::Mv { source, destination } => {
            manager.rename(&source, &destination).await.or_raise(|| ErrorKind::Command(name))?;
        },
        Command::Stat { path } => {
            let entry = manager.stat(&path).await.or_raise(|| ErrorKind::Command(name))?;
            print_entry(&entry.ok_or_raise(|| ErrorKind::NotFound(path))?);
        },
        Command::Ls { path, depth } => {
            let depth = Depth::from_header(Some(&depth));
            let mut entries = manager.list_directory(&path, depth).await.or_raise(|| ErrorKind::Command(name))?;
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            entries.iter().for_each(print_entry);
        },
        Command::Propfind { path, depth, base_url } => {
            let depth = Depth::from_header(Some(&depth));
            let entries = manager.propfind(&path, depth).await.or_raise(|| ErrorKind::Command(name))?;
            println!("{}", framer::render(&base_url, &path, &entries, depth));
        },
        Command::Refresh { path } => match manager.refresh(&path).await.or_raise(|| ErrorKind::Command(name))? {
            Some(entry) => print_entry(&entry),
            None => exn::bail!(ErrorKind::NotFound(path)),
        },
        Command::Prune { max_age_secs, max_entries } => {
            let mut policy = retention_policy(&config);
            if let Some(secs) = max_age_secs {
                policy.max_age = Some(std::time::Duration::from_secs(secs));
            }
            if max_entries.is_some() {
                policy.max_entries = max_entries;
            }
            let removed = manager.prune(&policy).await.or_raise(|| ErrorKind::Command(name))?;
            println!("removed {removed} index entries");
        },
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}
