use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Utc;

use crate::client::ContentClient;
use crate::formats::UserProfile;
use crate::fs_store;

pub const TOKEN_FILE_EXTENSION: &str = "text";

/// Append-only audit of tokens that authenticated, one file per username.
#[derive(Debug, Clone)]
pub struct TokenLog {
    dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedToken {
    pub path: PathBuf,
    pub token: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub removed: usize,
    pub kept: usize,
}

impl TokenLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, username: &str) -> PathBuf {
        let safe = username
            .chars()
            .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
            .collect::<String>();
        self.dir.join(format!("{safe}.{TOKEN_FILE_EXTENSION}"))
    }

    pub async fn record(&self, profile: &UserProfile, token: &str) -> anyhow::Result<PathBuf> {
        let path = self.path_for(&profile.username);
        let contents = render_profile(profile, token, &Utc::now().to_rfc3339());
        fs_store::write_atomic(&path, contents.as_bytes())
            .await
            .with_context(|| format!("write token log: {}", path.display()))?;
        Ok(path)
    }

    /// Every logged token, sorted by file name. Files without a token line are skipped.
    pub async fn list(&self) -> anyhow::Result<Vec<LoggedToken>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read token dir: {}", self.dir.display()));
            }
        };

        let mut tokens = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("list token dir")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TOKEN_FILE_EXTENSION) {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("read token log: {}", path.display()))?;
            match parse_token(&contents) {
                Some(token) => tokens.push(LoggedToken { path, token }),
                None => tracing::warn!(path = %path.display(), "token log has no TOKEN line"),
            }
        }
        tokens.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(tokens)
    }

    /// Deletes the files whose token no longer identifies a user.
    /// Tokens that cannot be checked because of transport errors are kept.
    pub async fn clear_invalid(&self, client: &dyn ContentClient) -> anyhow::Result<SweepReport> {
        let mut report = SweepReport::default();
        for logged in self.list().await? {
            report.checked += 1;
            match client.fetch_current_user(&logged.token).await {
                Ok(Some(_)) => report.kept += 1,
                Ok(None) => {
                    tokio::fs::remove_file(&logged.path)
                        .await
                        .with_context(|| format!("remove token log: {}", logged.path.display()))?;
                    tracing::info!(path = %logged.path.display(), "removed invalid token");
                    report.removed += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %logged.path.display(), error = %err, "token check failed; keeping");
                    report.kept += 1;
                }
            }
        }
        Ok(report)
    }
}

fn render_profile(profile: &UserProfile, token: &str, date: &str) -> String {
    let field = |v: &Option<String>| v.clone().unwrap_or_default();
    let gold = profile
        .gold_coin
        .map(|g| g.to_string())
        .unwrap_or_default();
    format!(
        "DATE={date}\r\nUSERNAME={}\r\nDISPLAYNAME={}\r\nEMAIL={}\r\nGOLDCOIN={gold}\r\nTEL={}\r\nADDRESS={}\r\n\r\nTOKEN={token}",
        profile.username,
        field(&profile.display_name),
        field(&profile.email),
        field(&profile.tel),
        field(&profile.address),
    )
}

pub fn parse_token(contents: &str) -> Option<String> {
    contents
        .lines()
        .filter_map(|line| line.trim().strip_prefix("TOKEN="))
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_owned)
}
