//! CLI argument definitions using clap derive

use crate::config::schema::RemoteBackend;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// cacheprog - build cache helper for the Go toolchain
///
/// Speaks the GOCACHEPROG protocol on stdin/stdout, keeping a local disk
/// cache in front of an optional shared remote.
#[derive(Parser, Debug)]
#[command(name = "cacheprog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CACHEPROG_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the cache protocol on stdin/stdout (set GOCACHEPROG to this)
    Run(RunArgs),

    /// Expose the local cache over HTTP for other machines
    Serve(ServeArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Local cache directory
    #[arg(long, env = "CACHEPROG_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Payloads smaller than this many bytes are not uploaded
    #[arg(long)]
    pub min_upload_size: Option<u64>,

    /// Remote backend
    #[arg(long, value_enum)]
    pub remote: Option<RemoteBackend>,

    /// Cloud Storage bucket (gcs backend)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Object namespace inside the bucket (gcs backend)
    #[arg(long)]
    pub cache_key: Option<String>,

    /// Base URL of a `cacheprog serve` instance (http backend)
    #[arg(long)]
    pub remote_url: Option<String>,

    /// Shared secret for the http backend
    #[arg(long, env = "CACHEPROG_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
}

/// Arguments for the serve command
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Listen address
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Local cache directory
    #[arg(long, env = "CACHEPROG_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Required value of the `secret` request header
    #[arg(long, env = "CACHEPROG_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Config action
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., remote.gcs.bucket)
        key: String,

        /// Value to set
        value: String,
    },
}
