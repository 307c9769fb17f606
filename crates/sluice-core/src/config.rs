//! Configuration management for Sluice.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pull::MergeStyle;

/// Sluice configuration loaded from `<data-dir>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pull request settings.
    #[serde(default)]
    pub pull_request: PullRequestConfig,

    /// Branch sync settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Event notification settings.
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl Config {
    /// Load config from a TOML file.
    ///
    /// # Errors
    /// Returns error if file can't be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to a TOML file.
    ///
    /// # Errors
    /// Returns error if serialization or write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| std::io::Error::other(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// The configured work-in-progress marker carried by `title`, if any.
    ///
    /// Matching is case-insensitive. A bracketed marker such as `[WIP]`
    /// matches anywhere in the title; any other marker must start the
    /// trimmed title.
    #[must_use]
    pub fn work_in_progress_marker(&self, title: &str) -> Option<&str> {
        let title = title.trim().to_lowercase();
        self.pull_request
            .wip_prefixes
            .iter()
            .filter(|marker| !marker.trim().is_empty())
            .find(|marker| {
                let needle = marker.trim().to_lowercase();
                if needle.starts_with('[') && needle.ends_with(']') {
                    title.contains(&needle)
                } else {
                    title.starts_with(&needle)
                }
            })
            .map(String::as_str)
    }

    /// Render the default merge commit message for a pull request.
    ///
    /// Placeholders are expanded in one pass, so braces inside the values
    /// are copied as they are. Unknown placeholders stay verbatim.
    #[must_use]
    pub fn merge_message(&self, title: &str, index: u64, head: &str, base: &str) -> String {
        let index = index.to_string();
        let template = self.pull_request.default_merge_message.as_str();
        let mut message = String::with_capacity(template.len() + title.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            message.push_str(&rest[..start]);
            let tail = &rest[start..];
            let value = [
                ("{title}", title),
                ("{index}", index.as_str()),
                ("{head}", head),
                ("{base}", base),
            ]
            .into_iter()
            .find(|(placeholder, _)| tail.starts_with(placeholder));

            match value {
                Some((placeholder, value)) => {
                    message.push_str(value);
                    rest = &tail[placeholder.len()..];
                }
                None => {
                    message.push('{');
                    rest = &tail[1..];
                }
            }
        }
        message.push_str(rest);
        message
    }
}

/// Pull request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestConfig {
    /// Title markers that flag a pull request as work in progress.
    #[serde(default = "default_wip_prefixes")]
    pub wip_prefixes: Vec<String>,

    /// Merge commit message template.
    ///
    /// Placeholders: `{title}`, `{index}`, `{head}`, `{base}`.
    #[serde(default = "default_merge_message")]
    pub default_merge_message: String,

    /// Retarget pull requests based on a branch when that branch is deleted.
    #[serde(default = "default_true")]
    pub retarget_children_on_merge: bool,

    /// Style used when a merge request doesn't name one.
    #[serde(default)]
    pub default_merge_style: MergeStyle,
}

impl Default for PullRequestConfig {
    fn default() -> Self {
        Self {
            wip_prefixes: default_wip_prefixes(),
            default_merge_message: default_merge_message(),
            retarget_children_on_merge: true,
            default_merge_style: MergeStyle::default(),
        }
    }
}

fn default_wip_prefixes() -> Vec<String> {
    vec!["WIP:".into(), "[WIP]".into()]
}

fn default_merge_message() -> String {
    "Merge pull request '{title}' (#{index}) from {head} into {base}".into()
}

const fn default_true() -> bool {
    true
}

/// Branch sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Repositories synced in parallel by a full sync.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

const fn default_max_concurrency() -> usize {
    4
}

/// Event notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Window in which a repeated open/synchronize event for the same head is dropped.
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            dedup_ttl_secs: default_dedup_ttl_secs(),
        }
    }
}

const fn default_dedup_ttl_secs() -> u64 {
    300
}
