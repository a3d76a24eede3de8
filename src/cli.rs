use clap::{Args, Parser, Subcommand};

use crate::types::{DataAccess, License, LogLevel, Platform};
use crate::upload::{DEFAULT_CHUNK_SIZE, DEFAULT_PRIORITY};

pub const DEFAULT_API_URL: &str = "https://data2.deadtrees.earth/api/v1/";
const DEFAULT_CHUNK_SIZE_MB: u64 = DEFAULT_CHUNK_SIZE / (1024 * 1024);

#[derive(Parser, Debug)]
#[command(
    name = "deadtrees-upload",
    version,
    about = "Resumable batch upload of orthophotos and raw image archives to deadtrees.earth"
)]
pub struct Cli {
    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload every GeoTIFF and ZIP archive in a directory
    Upload(UploadArgs),
    /// Show the upload session recorded for a directory
    Status(StatusArgs),
    /// Delete the upload session of a directory so the next run starts fresh
    ResetSession(ResetSessionArgs),
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Directory containing the files to upload
    #[arg(short = 'd', long)]
    pub directory: String,

    /// JSON file with per-file metadata (array of entries with a `filename`)
    #[arg(
        short = 'm',
        long,
        conflicts_with_all = [
            "license",
            "platform",
            "authors",
            "acquisition_date",
            "additional_information",
            "citation_doi",
        ]
    )]
    pub metadata: Option<String>,

    /// License applied to every file (CC BY, CC BY-SA, CC BY-NC-SA, CC BY-NC, MIT)
    #[arg(long, required_unless_present = "metadata")]
    pub license: Option<License>,

    /// Capture platform applied to every file (drone, airborne)
    #[arg(long, required_unless_present = "metadata")]
    pub platform: Option<Platform>,

    /// Authors applied to every file, separated by semicolons
    #[arg(long, required_unless_present = "metadata")]
    pub authors: Option<String>,

    /// Data access level (public, private, viewonly)
    #[arg(long, default_value = "public")]
    pub data_access: DataAccess,

    /// Acquisition date (YYYY, YYYY-MM or YYYY-MM-DD)
    #[arg(long)]
    pub acquisition_date: Option<String>,

    #[arg(long)]
    pub additional_information: Option<String>,

    #[arg(long)]
    pub citation_doi: Option<String>,

    /// Account email for password login
    #[arg(short = 'u', long, env = "DEADTREES_EMAIL")]
    pub email: Option<String>,

    /// Account password (if not provided, will prompt).
    /// WARNING: passing via --password is visible in process listings.
    /// Prefer the DEADTREES_PASSWORD environment variable instead.
    #[arg(short = 'p', long, env = "DEADTREES_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Pre-issued access token; it cannot be renewed during the batch
    #[arg(
        long,
        env = "DEADTREES_TOKEN",
        hide_env_values = true,
        conflicts_with = "email"
    )]
    pub token: Option<String>,

    /// Root URL of the ingestion API
    #[arg(long, default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Identity service URL (default: derived from --api-url)
    #[arg(long)]
    pub auth_url: Option<String>,

    /// Public key of the identity service (default: derived from --api-url)
    #[arg(long, env = "DEADTREES_ANON_KEY", hide_env_values = true)]
    pub anon_key: Option<String>,

    /// Chunk size in MiB
    #[arg(
        long,
        default_value_t = DEFAULT_CHUNK_SIZE_MB,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub chunk_size_mb: u64,

    /// Attempts per chunk before the file is marked failed
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_retries: u32,

    /// Base delay between chunk attempts in seconds (doubles each retry)
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Processing priority requested after each upload
    #[arg(long, default_value_t = DEFAULT_PRIORITY)]
    pub priority: u8,

    /// Timeout for a single chunk request in seconds
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,

    /// Fingerprint and plan, but upload nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Data directory of the session
    #[arg(short = 'd', long)]
    pub directory: String,

    /// List failed files with their errors
    #[arg(long)]
    pub failed: bool,
}

#[derive(Args, Debug)]
pub struct ResetSessionArgs {
    /// Data directory of the session
    #[arg(short = 'd', long)]
    pub directory: String,

    /// Skip confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}
