use becky_core::timestamp::{self, Timestamp};
use becky_core::{ProviderKind, ScannerKind};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "becky", version, about = "Differential file backups to local, SSH and S3 storage")]
pub struct Cli {
    /// TOML configuration file; the environment is used when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path, overriding the configuration
    #[arg(long, global = true, env = "BECKY_DB_PATH")]
    pub db: Option<PathBuf>,

    /// Log level, overriding the configuration
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the periodic trigger until SIGINT/SIGTERM
    Serve,

    /// Run one backup of a job now
    Run { job_id: String },

    /// Restore paths, and everything beneath them, into a directory
    Restore {
        job_id: String,

        /// Logical paths to restore
        #[arg(required = true)]
        paths: Vec<String>,

        #[arg(short, long)]
        destination: PathBuf,

        /// Restore as of this run (RFC 3339); latest when omitted
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<Timestamp>,
    },

    /// Check every stored file version against its recorded checksum
    Verify { job_id: String },

    /// List the backed-up entries of a directory
    Browse {
        job_id: String,

        #[arg(default_value = "/")]
        directory: String,

        #[arg(long, value_parser = parse_timestamp)]
        at: Option<Timestamp>,
    },

    /// List the timestamps of completed runs
    Timestamps { job_id: String },

    /// Show the current status of a job
    Status { job_id: String },

    /// Show a page of a job's log, newest first
    Logs {
        job_id: String,

        #[arg(long, default_value_t = 0)]
        page: u32,

        #[arg(long, default_value_t = 50)]
        rows: u32,
    },

    /// Manage jobs
    #[command(subcommand)]
    Job(JobCommand),

    /// Manage a job's selected paths
    #[command(subcommand)]
    Select(SelectCommand),
}

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Create a job
    Add(AddJob),

    /// List all jobs
    List,

    /// Show a job with its parameters and selections
    Show { job_id: String },

    /// Change a job's name, provider settings or source root
    Set {
        job_id: String,

        #[arg(long)]
        name: Option<String>,

        /// Provider setting as KEY=VALUE; repeatable
        #[arg(long = "setting", value_parser = parse_setting)]
        settings: Vec<(String, String)>,

        #[arg(long)]
        fs_root: Option<String>,
    },

    /// Include a job in periodic runs
    Enable { job_id: String },

    /// Exclude a job from periodic runs
    Disable { job_id: String },

    /// Delete a job and everything recorded for it
    Delete { job_id: String },
}

#[derive(Debug, Args)]
pub struct AddJob {
    pub name: String,

    #[arg(long)]
    pub provider: ProviderKind,

    /// Scanner; the provider's default when omitted
    #[arg(long)]
    pub scanner: Option<ScannerKind>,

    /// Directory that logical paths are resolved against
    #[arg(long)]
    pub fs_root: Option<String>,

    /// Provider setting as KEY=VALUE; repeatable
    #[arg(long = "setting", value_parser = parse_setting)]
    pub settings: Vec<(String, String)>,

    /// Create the job excluded from periodic runs
    #[arg(long)]
    pub disabled: bool,
}

#[derive(Debug, Subcommand)]
pub enum SelectCommand {
    Add { job_id: String, path: String },
    Remove { job_id: String, path: String },
    List { job_id: String },
}

fn parse_timestamp(value: &str) -> Result<Timestamp, String> {
    timestamp::parse(value).ok_or_else(|| format!("`{}` is not an RFC 3339 timestamp", value))
}

fn parse_setting(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("`{}` is not KEY=VALUE", value)),
    }
}
