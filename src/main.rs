//! deadtrees-upload: resumable batch uploads to the deadtrees.earth ingestion API.
//!
//! Every GeoTIFF and ZIP archive in a directory is fingerprinted, paired with
//! its metadata and sent in fixed-size chunks. Progress is checkpointed next
//! to the data so an interrupted batch picks up where it stopped, and tokens
//! are renewed mid-batch when they are about to expire.

#![warn(clippy::all)]

mod auth;
mod batch;
mod checkpoint;
mod cli;
mod config;
mod discover;
mod fingerprint;
mod metadata;
mod retry;
mod shutdown;
mod types;
mod upload;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use auth::{StaticToken, TokenSource};
use batch::{BatchCoordinator, ConsoleReporter};
use checkpoint::CheckpointStore;
use cli::Command;
use config::{Config, Credentials};
use upload::{HttpIngestApi, UploadError};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the status command.
async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let directory = config::expand_tilde(&args.directory);
    let store = CheckpointStore::for_directory(&directory);

    let checkpoint = match store.try_load().await {
        Ok(Some(cp)) => cp,
        Ok(None) => {
            println!("No upload session found at {}", store.path().display());
            println!("Either nothing was uploaded yet or the last batch completed.");
            return Ok(());
        }
        Err(e) => {
            println!("{}", e);
            println!("Run `deadtrees-upload reset-session` to start over.");
            return Ok(());
        }
    };
    let counts = checkpoint.counts();

    println!("Upload session: {}", checkpoint.session_id);
    println!(
        "Created:        {}",
        checkpoint.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("API:            {}", checkpoint.api_url);
    if let Some(meta) = &checkpoint.metadata_file {
        println!("Metadata:       {}", meta);
    }
    println!();
    println!("Files:");
    println!("  Total:     {}", counts.total);
    println!("  Completed: {}", counts.completed);
    println!("  Failed:    {}", counts.failed);
    println!("  Skipped:   {}", counts.skipped);
    println!("  Pending:   {}", counts.pending);

    if args.failed && counts.failed > 0 {
        println!();
        println!("Failed files:");
        for (filename, error) in &checkpoint.files_failed {
            println!("  {} - {}", filename, error);
        }
    }

    Ok(())
}

/// Run the reset-session command.
async fn run_reset_session(args: cli::ResetSessionArgs) -> anyhow::Result<()> {
    let directory = config::expand_tilde(&args.directory);
    let store = CheckpointStore::for_directory(&directory);

    if !store.path().exists() {
        println!("No upload session found at {}", store.path().display());
        return Ok(());
    }

    if !args.yes {
        println!("This will delete the upload session at:");
        println!("  {}", store.path().display());
        println!("Files already uploaded would be sent again on the next run.");
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    store.remove().await?;
    println!("Upload session deleted.");
    Ok(())
}

/// Resolve the configured credentials into a token source, logging in if needed.
async fn obtain_tokens(config: &Config) -> anyhow::Result<Box<dyn TokenSource>> {
    match &config.credentials {
        Some(Credentials::Token(token)) => {
            tracing::warn!(
                "Using a pre-issued token; it cannot be renewed if it expires mid-batch"
            );
            Ok(Box::new(StaticToken::new(token.clone())))
        }
        Some(Credentials::Login { email, password }) => {
            let password_provider = {
                let pw = password.clone();
                move || -> Option<String> {
                    pw.clone().or_else(|| {
                        tokio::task::block_in_place(|| {
                            rpassword::prompt_password("deadtrees.earth password: ").ok()
                        })
                    })
                }
            };
            let credential = auth::authenticate(
                config.identity.clone(),
                email,
                &password_provider,
                LOGIN_TIMEOUT,
            )
            .await?;
            tracing::info!(
                user = credential.user_id().unwrap_or("unknown"),
                identity = credential.issuer_endpoint(),
                "Logged in as {}",
                email
            );
            Ok(Box::new(credential))
        }
        None => anyhow::bail!("Uploading requires --email (password login) or --token"),
    }
}

/// Run the upload command.
async fn run_upload(args: cli::UploadArgs) -> anyhow::Result<()> {
    let config = Config::from_cli(args)?;
    tracing::debug!(?config, "Starting deadtrees-upload");

    let files = discover::find_uploadable_files(&config.directory)?;
    let matched = discover::match_files_to_metadata(files, &config.metadata);
    if matched.items.is_empty() {
        tracing::info!("No files with metadata to upload in {}", config.directory.display());
        return Ok(());
    }

    let shutdown_token = shutdown::install_signal_handler()?;
    let api = HttpIngestApi::new(&config.api_url, config.timeout)?;
    let reporter = ConsoleReporter::new(config.no_progress_bar);
    let batch_config = config.batch_config();
    let coordinator = BatchCoordinator::new(&api, &batch_config, &reporter, shutdown_token);

    let plan = match coordinator.plan(matched.items).await {
        Ok(plan) => plan,
        Err(UploadError::Cancelled) => {
            tracing::info!("Interrupted while fingerprinting; nothing was uploaded");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    batch::report::log_plan(&plan, config.dry_run);

    if config.dry_run {
        tracing::info!("[DRY RUN] No files were uploaded");
        return Ok(());
    }
    if plan.is_empty() {
        tracing::info!("Nothing left to upload");
        return Ok(());
    }

    let mut tokens = obtain_tokens(&config).await?;
    let summary = coordinator.execute(plan, tokens.as_mut()).await;
    batch::report::log_summary(&summary);

    if let Some(reason) = &summary.halted {
        anyhow::bail!(
            "Batch halted: {}. Log in again and rerun to continue with the remaining files.",
            reason
        );
    }
    if !summary.failed.is_empty() {
        anyhow::bail!(
            "{} upload(s) failed; rerun the same command to retry them",
            summary.failed.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let filter = match cli.log_level {
        types::LogLevel::Debug => "debug",
        types::LogLevel::Info => "info",
        types::LogLevel::Warn => "warn",
        types::LogLevel::Error => "error",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Command::Upload(args) => run_upload(args).await,
        Command::Status(args) => run_status(args).await,
        Command::ResetSession(args) => run_reset_session(args).await,
    }
}
