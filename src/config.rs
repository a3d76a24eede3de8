use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::auth::endpoints::IdentityEndpoint;
use crate::batch::BatchConfig;
use crate::cli::UploadArgs;
use crate::discover::MetadataSource;
use crate::metadata::{self, AcquisitionDate, DatasetMetadata};
use crate::retry::RetryConfig;

const MIB: u64 = 1024 * 1024;
const MAX_RETRY_DELAY_SECS: u64 = 60;

/// How the batch obtains its bearer token.
pub enum Credentials {
    /// Password login against the identity service; renewable.
    Login {
        email: String,
        password: Option<String>,
    },
    /// Token handed in from outside; used until it is rejected.
    Token(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Login { email, .. } => f
                .debug_struct("Login")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

/// Application configuration for an upload run, built from CLI arguments.
pub struct Config {
    pub directory: PathBuf,
    pub metadata_file: Option<PathBuf>,
    pub metadata: MetadataSource,
    pub api_url: String,
    pub identity: IdentityEndpoint,
    /// `None` is only usable for dry runs or batches with nothing left to send.
    pub credentials: Option<Credentials>,
    pub chunk_size: u64,
    pub retry: RetryConfig,
    pub priority: u8,
    pub timeout: Duration,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("directory", &self.directory)
            .field("metadata_file", &self.metadata_file)
            .field("api_url", &self.api_url)
            .field("identity", &self.identity.base_url)
            .field("credentials", &self.credentials)
            .field("chunk_size", &self.chunk_size)
            .field("retry", &self.retry)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Trailing slash is significant when joining endpoint paths onto the root.
fn normalize_api_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

fn uniform_metadata(args: &UploadArgs) -> anyhow::Result<DatasetMetadata> {
    let license = args
        .license
        .context("--license is required without --metadata")?;
    let platform = args
        .platform
        .context("--platform is required without --metadata")?;
    let authors = args
        .authors
        .as_deref()
        .context("--authors is required without --metadata")?;

    let mut meta = DatasetMetadata::new(license, platform, metadata::parse_authors(authors)?);
    meta.data_access = args.data_access;
    if let Some(raw) = args.acquisition_date.as_deref() {
        let date: AcquisitionDate = raw.parse()?;
        meta.fill_date(&date);
    }
    meta.additional_information = non_empty(args.additional_information.as_deref());
    meta.citation_doi = non_empty(args.citation_doi.as_deref());
    Ok(meta)
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

impl Config {
    pub fn from_cli(args: UploadArgs) -> anyhow::Result<Self> {
        let directory = expand_tilde(&args.directory);
        let metadata_file = args.metadata.as_deref().map(expand_tilde);

        let metadata = match &metadata_file {
            Some(path) => MetadataSource::PerFile(metadata::load_manifest(path)?),
            None => MetadataSource::Uniform(uniform_metadata(&args)?),
        };

        let api_url = normalize_api_url(&args.api_url);
        let defaults = IdentityEndpoint::for_api_url(&api_url);
        let identity = IdentityEndpoint::new(
            args.auth_url.as_deref().unwrap_or(&defaults.base_url),
            args.anon_key.as_deref().unwrap_or(&defaults.anon_key),
        );

        let credentials = match (non_empty(args.token.as_deref()), args.email) {
            (Some(token), _) => Some(Credentials::Token(token)),
            (None, Some(email)) => Some(Credentials::Login {
                email,
                password: args.password,
            }),
            (None, None) => None,
        };

        Ok(Self {
            directory,
            metadata_file,
            metadata,
            api_url,
            identity,
            credentials,
            chunk_size: args.chunk_size_mb.saturating_mul(MIB),
            retry: RetryConfig {
                max_attempts: args.max_retries,
                base_delay_secs: args.retry_delay,
                max_delay_secs: MAX_RETRY_DELAY_SECS.max(args.retry_delay),
            },
            priority: args.priority,
            timeout: Duration::from_secs(args.timeout),
            dry_run: args.dry_run,
            no_progress_bar: args.no_progress_bar,
        })
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            directory: self.directory.clone(),
            metadata_file: self
                .metadata_file
                .as_ref()
                .map(|p| p.display().to_string()),
            api_url: self.api_url.clone(),
            chunk_size: self.chunk_size,
            retry: self.retry,
            priority: self.priority,
            dry_run: self.dry_run,
        }
    }
}
