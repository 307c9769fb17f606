//! Command definitions and the shared command context.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use sluice_core::{
    CheckState, Config, DedupNotifier, JsonStore, MergeStyle, PullRequest, PullStore, Repo,
    RepoStore, Services, User, UserStore,
};

use crate::events::LogNotifier;

pub mod branches;
pub mod completions;
pub mod conflicts;
pub mod hook;
pub mod init;
pub mod pr;
pub mod protect;
pub mod repo;
pub mod status;
pub mod sync;
pub mod user;

/// Name of the settings file inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";
/// Name of the state file inside the data directory.
pub const STATE_FILE: &str = "state.json";

/// Sluice - branch sync and pull request merging for bare git repositories.
#[derive(Debug, Parser)]
#[command(name = "sluice", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options every command accepts.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Directory holding config.toml and state.json.
    #[arg(long, global = true, env = "SLUICE_DATA_DIR", default_value = ".sluice")]
    pub data_dir: PathBuf,

    /// User to act as.
    #[arg(long = "as", global = true, env = "SLUICE_USER", value_name = "USER")]
    pub acting_user: Option<String>,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print essential output.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the data directory with a default config.
    Init,

    /// Manage users.
    #[command(subcommand)]
    User(UserCommand),

    /// Manage repositories.
    #[command(subcommand)]
    Repo(RepoCommand),

    /// Bring the branch index in line with the git refs.
    Sync {
        /// Repository to sync (owner/name).
        repo: Option<String>,

        /// Sync every repository.
        #[arg(long, conflicts_with = "repo")]
        all: bool,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List indexed branches.
    Branches {
        /// Repository (owner/name).
        repo: String,

        /// Include deleted branches.
        #[arg(long)]
        all: bool,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create, replace or remove a branch protection rule.
    Protect(ProtectArgs),

    /// Work with pull requests.
    #[command(subcommand)]
    Pr(PrCommand),

    /// Record commit statuses.
    #[command(subcommand)]
    Status(StatusCommand),

    /// Check whether HEAD merges cleanly into BASE.
    Conflicts {
        /// Repository (owner/name).
        repo: String,

        /// Base branch or ref.
        base: String,

        /// Head branch or ref.
        head: String,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Git server hooks; ref updates are read from stdin.
    #[command(subcommand)]
    Hook(HookCommand),

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// Add a user.
    Add {
        /// Login name.
        name: String,

        /// Email used for commits made on the user's behalf.
        #[arg(long)]
        email: String,

        /// Grant administrator rights.
        #[arg(long)]
        admin: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum RepoCommand {
    /// Register a bare repository and index its branches.
    Add {
        /// Repository (owner/name); the owner must be a user.
        repo: String,

        /// Path of the bare git directory.
        #[arg(long)]
        path: PathBuf,

        /// Branch new pull requests target by default.
        #[arg(long, default_value = "main")]
        default_branch: String,

        /// Parent repository (owner/name) when this is a fork.
        #[arg(long, value_name = "REPO")]
        fork_of: Option<String>,

        /// Create an empty bare repository at the path first.
        #[arg(long)]
        init: bool,
    },

    /// List registered repositories.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProtectArgs {
    /// Repository (owner/name).
    pub repo: String,

    /// Branch name or glob (e.g. `release/*`).
    pub rule: String,

    /// Allow pushes to matching branches.
    #[arg(long)]
    pub enable_push: bool,

    /// Only these users may push.
    #[arg(long, value_name = "USER", num_args = 1..)]
    pub push_allowlist: Vec<String>,

    /// Only these users may merge.
    #[arg(long, value_name = "USER", num_args = 1..)]
    pub merge_allowlist: Vec<String>,

    /// Status contexts (globs) that must pass before merging.
    #[arg(long = "status-check", value_name = "CONTEXT")]
    pub status_checks: Vec<String>,

    /// Approvals required before merging.
    #[arg(long, default_value_t = 0)]
    pub required_approvals: u32,

    /// Block merging while changes are requested.
    #[arg(long)]
    pub block_on_rejected_reviews: bool,

    /// Block merging while the head is behind the base.
    #[arg(long)]
    pub block_on_outdated_branch: bool,

    /// Apply the rule to administrators too.
    #[arg(long)]
    pub apply_to_admins: bool,

    /// Path globs no push or merge may change, separated by `;`.
    #[arg(long, value_name = "GLOBS", value_delimiter = ';')]
    pub protected_files: Vec<String>,

    /// Remove the rule instead.
    #[arg(long)]
    pub remove: bool,
}

#[derive(Debug, Subcommand)]
pub enum PrCommand {
    /// Open a pull request.
    Open {
        /// Base repository (owner/name).
        repo: String,

        /// Branch holding the changes.
        #[arg(long)]
        head: String,

        /// Branch to merge into; defaults to the repository's default branch.
        #[arg(long)]
        base: Option<String>,

        /// Repository holding the head branch, when it is a fork.
        #[arg(long, value_name = "REPO")]
        head_repo: Option<String>,

        /// Title.
        #[arg(long)]
        title: String,
    },

    /// List pull requests.
    List {
        /// Repository (owner/name).
        repo: String,

        /// Include closed and merged pull requests.
        #[arg(long)]
        all: bool,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a pull request and whether it can be merged.
    Show {
        /// Repository (owner/name).
        repo: String,

        /// Pull request number.
        index: u64,

        /// Merge style to evaluate.
        #[arg(long)]
        style: Option<MergeStyle>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Re-run the mergeability check.
    Check {
        /// Repository (owner/name).
        repo: String,

        /// Pull request number.
        index: u64,
    },

    /// Merge a pull request.
    Merge {
        /// Repository (owner/name).
        repo: String,

        /// Pull request number.
        index: u64,

        /// merge, rebase, rebase-merge, squash or fast-forward-only.
        #[arg(long)]
        style: Option<MergeStyle>,

        /// Head commit you reviewed; the merge fails if the branch moved.
        #[arg(long, value_name = "SHA")]
        head_commit: Option<String>,

        /// Commit message for styles that write one.
        #[arg(long, short)]
        message: Option<String>,

        /// Delete the head branch afterwards.
        #[arg(long)]
        delete_branch: bool,

        /// Merge once every gate passes instead of failing now.
        #[arg(long)]
        when_checks_succeed: bool,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Drop a merge scheduled with `--when-checks-succeed`.
    CancelAutoMerge {
        /// Repository (owner/name).
        repo: String,

        /// Pull request number.
        index: u64,
    },

    /// Bring the head branch up to date with the base branch.
    Update {
        /// Repository (owner/name).
        repo: String,

        /// Pull request number.
        index: u64,

        /// Rebase the head commits instead of merging the base in.
        #[arg(long)]
        rebase: bool,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Close a pull request without merging.
    Close {
        /// Repository (owner/name).
        repo: String,

        /// Pull request number.
        index: u64,
    },

    /// Approve a pull request.
    Approve {
        /// Repository (owner/name).
        repo: String,

        /// Pull request number.
        index: u64,
    },

    /// Request changes on a pull request.
    Reject {
        /// Repository (owner/name).
        repo: String,

        /// Pull request number.
        index: u64,
    },
}

#[derive(Debug, Subcommand)]
pub enum StatusCommand {
    /// Record the state of a status context on a commit.
    Set {
        /// Repository (owner/name).
        repo: String,

        /// Commit SHA or branch name.
        commit: String,

        /// Status context, e.g. `ci/build`.
        context: String,

        /// New state.
        #[arg(value_enum)]
        state: StateArg,
    },
}

#[derive(Debug, Subcommand)]
pub enum HookCommand {
    /// Refuse ref updates that protection rules forbid.
    PreReceive {
        /// Repository (owner/name).
        repo: String,
    },

    /// Index ref updates after they landed.
    PostReceive {
        /// Repository (owner/name).
        repo: String,
    },
}

/// Commit status states accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StateArg {
    Pending,
    Success,
    Error,
    Failure,
    Warning,
}

impl From<StateArg> for CheckState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Pending => Self::Pending,
            StateArg::Success => Self::Success,
            StateArg::Error => Self::Error,
            StateArg::Failure => Self::Failure,
            StateArg::Warning => Self::Warning,
        }
    }
}

/// Store, services and acting user for one command run.
pub struct Context {
    pub store: Arc<JsonStore>,
    pub services: Services,
    acting_user: Option<String>,
}

impl Context {
    /// Load config and state from the data directory.
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let config_path = global.data_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            bail!("Sluice not initialized - run `sluice init` first");
        }

        let config = Config::load(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?;
        let store = Arc::new(
            JsonStore::open(global.data_dir.join(STATE_FILE)).context("Failed to open state")?,
        );

        let ttl = config.notify.dedup_ttl_secs;
        let services = Services::new(store.clone(), config)
            .with_notifier(Arc::new(DedupNotifier::new(LogNotifier, ttl)));

        Ok(Self {
            store,
            services,
            acting_user: global.acting_user.clone(),
        })
    }

    /// The user named by `--as`.
    pub fn doer(&self) -> Result<User> {
        let Some(name) = self.acting_user.as_deref() else {
            bail!("No acting user - pass --as <USER> or set SLUICE_USER");
        };
        self.user(name)
    }

    /// Whether `--as` was given.
    pub const fn has_doer(&self) -> bool {
        self.acting_user.is_some()
    }

    /// The acting user, or `fallback` when none was given.
    pub fn doer_or(&self, fallback: &str) -> Result<User> {
        match self.acting_user.as_deref() {
            Some(name) => self.user(name),
            None => self.user(fallback),
        }
    }

    pub fn user(&self, name: &str) -> Result<User> {
        self.store
            .user_by_name(name)?
            .ok_or_else(|| anyhow::anyhow!("No user named '{name}'"))
    }

    /// Look up a repository by `owner/name`.
    pub fn repo(&self, full_name: &str) -> Result<Repo> {
        let (owner, name) = split_full_name(full_name)?;
        self.store
            .repo_by_name(owner, name)?
            .ok_or_else(|| anyhow::anyhow!("No repository named '{full_name}'"))
    }

    /// Look up a pull request by its number in `repo`.
    pub fn pull(&self, repo: &Repo, index: u64) -> Result<PullRequest> {
        self.store
            .pull_by_index(repo.id, index)
            .with_context(|| format!("No pull request #{index} in {}", repo.full_name()))
    }

    pub fn config(&self) -> &Config {
        &self.services.config
    }
}

/// Split `owner/name`.
pub fn split_full_name(full_name: &str) -> Result<(&str, &str)> {
    match full_name.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => bail!("Invalid repository '{full_name}' - expected owner/name"),
    }
}

/// Print `value` as pretty JSON.
pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolve a path relative to the current directory.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("Failed to read current directory")?
        .join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_full_name() {
        assert_eq!(split_full_name("user2/repo1").ok(), Some(("user2", "repo1")));
        assert!(split_full_name("repo1").is_err());
        assert!(split_full_name("/repo1").is_err());
        assert!(split_full_name("a/b/c").is_err());
    }

    #[test]
    fn test_cli_parses_merge() {
        let cli = Cli::try_parse_from([
            "sluice",
            "--as",
            "user1",
            "pr",
            "merge",
            "user2/repo1",
            "3",
            "--style",
            "rebase-merge",
            "--delete-branch",
        ])
        .ok();
        let Some(cli) = cli else {
            panic!("merge arguments should parse");
        };
        assert_eq!(cli.global.acting_user.as_deref(), Some("user1"));
        match cli.command {
            Commands::Pr(PrCommand::Merge {
                index,
                style,
                delete_branch,
                ..
            }) => {
                assert_eq!(index, 3);
                assert_eq!(style, Some(MergeStyle::RebaseMerge));
                assert!(delete_branch);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_protected_files() {
        let Ok(cli) = Cli::try_parse_from([
            "sluice",
            "protect",
            "user2/repo1",
            "main",
            "--protected-files",
            "*.lock;ci/**",
        ]) else {
            panic!("protect arguments should parse");
        };
        match cli.command {
            Commands::Protect(args) => {
                assert_eq!(args.protected_files, vec!["*.lock", "ci/**"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_style() {
        let parsed = Cli::try_parse_from(["sluice", "pr", "merge", "a/b", "1", "--style", "octopus"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
