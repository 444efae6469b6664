//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use blupen_core::Platform;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

/// Collect, cache and resume creative content from social platforms.
///
/// Content is stored per source as a resumable snapshot; an interrupted run
/// picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "blupen")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/blupen/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect one source into its snapshot
    Collect(CollectArgs),
    /// Process a work-queue request document
    Request(RequestArgs),
    /// Delete the snapshot of one source
    Purge(SourceArgs),
}

/// Platform and query naming one source.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Platform: twitter, tumblr, tumblr-tag, flickr, flickr-group, instagram, feed
    pub platform: Platform,

    /// Query: "@user", "#tag", "@a+@b", a feed URL, or a group name
    pub query: String,

    /// Flickr group id, when the query is the group's name
    #[arg(long, value_name = "ID")]
    pub group_id: Option<String>,

    /// Content directory (overrides config)
    #[arg(long, value_name = "DIR")]
    pub content_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CollectArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Delete any existing snapshot before collecting
    #[arg(long)]
    pub purge: bool,

    /// Skip media download
    #[arg(long)]
    pub no_media: bool,

    /// Maximum items across all query terms
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_length: Option<u64>,

    /// Earliest day to keep (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub start_date: Option<NaiveDate>,

    /// Latest day to keep (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub stop_date: Option<NaiveDate>,
}

#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Request document (JSON)
    pub file: PathBuf,

    /// Write the outgoing document here instead of stdout
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Delete existing snapshots before collecting
    #[arg(long)]
    pub purge: bool,

    /// Content directory (overrides config)
    #[arg(long, value_name = "DIR")]
    pub content_dir: Option<PathBuf>,
}
