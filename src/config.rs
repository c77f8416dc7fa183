use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Args;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.k8s.fictionlog.co/graphql";

/// Runtime settings shared by the CLI and the HTTP app.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// GraphQL endpoint of the platform.
    #[arg(long, global = true, env = "FICTIONDL_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Token used when a request does not carry one.
    #[arg(long = "token", global = true, env = "FICTIONDL_TOKEN", hide_env_values = true)]
    pub default_token: Option<String>,

    /// Root directory holding one directory per downloaded book.
    #[arg(long, global = true, env = "FICTIONDL_DOWNLOAD_DIR", default_value = "downloads")]
    pub download_dir: PathBuf,

    /// Root directory for paged multi-file exports.
    #[arg(long, global = true, env = "FICTIONDL_EXPORT_DIR", default_value = "exports")]
    pub export_dir: PathBuf,

    /// Directory holding one profile file per authenticated username.
    #[arg(long, global = true, env = "FICTIONDL_TOKEN_DIR", default_value = "tokens")]
    pub token_dir: PathBuf,

    /// Write a profile file whenever a token authenticates.
    #[arg(long, global = true, env = "FICTIONDL_SAVE_TOKEN_LOG", default_value_t = false)]
    pub save_token_log: bool,

    /// Chapters fetched concurrently per group.
    #[arg(long, global = true, default_value_t = 25)]
    pub chapter_batch_size: usize,

    /// Books processed concurrently per group in batch jobs.
    #[arg(long, global = true, default_value_t = 4)]
    pub book_batch_size: usize,

    /// Chapters per file in paged exports.
    #[arg(long, global = true, default_value_t = 100)]
    pub export_window: usize,

    /// Attempts per idempotent request (first try included).
    #[arg(long, global = true, default_value_t = 4)]
    pub max_attempts: u32,

    /// Base delay between retries; grows linearly with the attempt number.
    #[arg(long, global = true, default_value_t = 500)]
    pub retry_delay_ms: u64,

    #[arg(long, global = true, default_value_t = 60)]
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            default_token: None,
            download_dir: PathBuf::from("downloads"),
            export_dir: PathBuf::from("exports"),
            token_dir: PathBuf::from("tokens"),
            save_token_log: false,
            chapter_batch_size: 25,
            book_batch_size: 4,
            export_window: 100,
            max_attempts: 4,
            retry_delay_ms: 500,
            request_timeout_secs: 60,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(&self.api_url).context("parse --api-url")?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("--api-url must be http/https: {url}");
        }
        if self.chapter_batch_size == 0 {
            anyhow::bail!("--chapter-batch-size must be > 0");
        }
        if self.book_batch_size == 0 {
            anyhow::bail!("--book-batch-size must be > 0");
        }
        if self.export_window == 0 {
            anyhow::bail!("--export-window must be > 0");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("--max-attempts must be > 0");
        }
        Ok(())
    }

    /// Falls back to the configured default when `token` is missing or blank.
    pub fn resolve_token(&self, token: Option<&str>) -> Option<String> {
        token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| {
                self.default_token
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
            })
            .map(str::to_owned)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
