//! flowgit - git-backed versioned flow storage
//!
//! Command-line access to a flow storage directory.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use flowgit::provider::{
    FlowPersistenceProvider, FlowSnapshotContext, GitFlowPersistenceProvider, ProviderConfig, SyncPolicy,
    DEFAULT_PUSH_ATTEMPTS,
};
use flowgit::storage::{BucketId, FlowId, MergeOutcome};

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Git-backed versioned flow storage", long_about = None)]
struct Cli {
    /// Flow storage directory (an existing git working directory)
    #[arg(short, long, default_value = "flow_storage")]
    dir: PathBuf,

    /// Remote to push every change to
    #[arg(long)]
    remote: Option<String>,

    /// Remote user name
    #[arg(long, requires = "password")]
    user: Option<String>,

    /// Remote password
    #[arg(long, requires = "user")]
    password: Option<String>,

    /// Push on a background thread instead of before returning
    #[arg(long, requires = "remote")]
    background_push: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Save a new version of a flow
    Save {
        #[command(flatten)]
        flow: FlowArgs,

        /// Bucket display name, decides the bucket directory
        #[arg(long)]
        bucket_name: String,

        /// Flow display name, decides the snapshot file name
        #[arg(long)]
        flow_name: String,

        #[arg(long)]
        version: u32,

        #[arg(long)]
        author: Option<String>,

        /// Commit message
        #[arg(short, long)]
        comment: Option<String>,

        /// Read the snapshot from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Write the content of a flow version to stdout
    Get {
        #[command(flatten)]
        flow: FlowArgs,

        #[arg(long)]
        version: u32,
    },

    /// Delete a flow and all of its versions
    Delete {
        #[command(flatten)]
        flow: FlowArgs,
    },

    /// List the stored versions of a flow
    Versions {
        #[command(flatten)]
        flow: FlowArgs,
    },

    /// Dump the whole index as JSON
    List,

    /// Fetch and merge the remote branch
    Pull,

    /// Discard local history in favor of the remote branch
    Reset,
}

#[derive(Args)]
struct FlowArgs {
    #[arg(long, value_parser = parse_bucket_id)]
    bucket: BucketId,

    #[arg(long, value_parser = parse_flow_id)]
    flow: FlowId,
}

fn parse_bucket_id(s: &str) -> Result<BucketId, String> {
    BucketId::new(s).map_err(|e| e.to_string())
}

fn parse_flow_id(s: &str) -> Result<FlowId, String> {
    FlowId::new(s).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .try_init();
}

fn provider_config(cli: &Cli) -> ProviderConfig {
    let mut config = ProviderConfig::new(&cli.dir);
    if let Some(remote) = &cli.remote {
        config = config.remote(remote.as_str());
    }
    if let (Some(user), Some(password)) = (&cli.user, &cli.password) {
        config = config.credentials(user.as_str(), password.as_str());
    }
    if cli.background_push {
        config = config.sync_policy(SyncPolicy::background(DEFAULT_PUSH_ATTEMPTS));
    }
    config
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let provider = GitFlowPersistenceProvider::configure(provider_config(&cli))?;

    match cli.command {
        Command::Save {
            flow,
            bucket_name,
            flow_name,
            version,
            author,
            comment,
            file,
        } => {
            let content = match file {
                Some(path) => fs::read(path)?,
                None => {
                    let mut buf = Vec::new();
                    io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };

            let mut context = FlowSnapshotContext::new(flow.bucket, bucket_name, flow.flow, flow_name, version);
            if let Some(author) = author {
                context = context.author(author);
            }
            if let Some(comment) = comment {
                context = context.comments(comment);
            }
            provider.save_flow_content(&context, &content)?;
            println!("saved version {} of flow {}", version, context.flow_id);
        }
        Command::Get { flow, version } => {
            let content = provider.get_flow_content(&flow.bucket, &flow.flow, version)?;
            let mut stdout = io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
        }
        Command::Delete { flow } => {
            provider.delete_all_flow_content(&flow.bucket, &flow.flow)?;
            println!("deleted flow {} in bucket {}", flow.flow, flow.bucket);
        }
        Command::Versions { flow } => {
            for version in provider.flow_versions(&flow.bucket, &flow.flow)? {
                let info = provider.describe_version(&flow.bucket, &flow.flow, version)?;
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    info.version,
                    info.commit_id.short(),
                    info.committed_at.format("%Y-%m-%d %H:%M:%S"),
                    info.author,
                    info.message
                );
            }
        }
        Command::List => {
            let index = provider.index();
            println!("{}", serde_json::to_string_pretty(&*index)?);
        }
        Command::Pull => match provider.pull()? {
            MergeOutcome::UpToDate => println!("already up to date"),
            MergeOutcome::FastForward(commit) => println!("fast-forwarded to {}", commit.short()),
            MergeOutcome::Merged(commit) => println!("merged as {}", commit.short()),
        },
        Command::Reset => match provider.reset_to_remote()? {
            Some(commit) => println!("reset to {}", commit.short()),
            None => println!("remote has no matching branch"),
        },
    }

    Ok(())
}
