//! `sluice repo` commands.

use anyhow::{Context as _, Result, bail};
use serde::Serialize;
use sluice_core::{BranchSyncer, Repo, RepoStore};

use super::{Context, GlobalArgs, RepoCommand, absolute, print_json, split_full_name};
use crate::output;

/// One row of `repo list --json`.
#[derive(Debug, Serialize)]
struct RepoRow {
    full_name: String,
    path: String,
    default_branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fork_of: Option<String>,
}

/// Run a repo subcommand.
pub fn run(global: &GlobalArgs, cmd: RepoCommand) -> Result<()> {
    let ctx = Context::open(global)?;
    match cmd {
        RepoCommand::Add {
            repo,
            path,
            default_branch,
            fork_of,
            init,
        } => add(&ctx, &repo, &path, default_branch, fork_of.as_deref(), init),
        RepoCommand::List { json } => list(&ctx, json),
    }
}

fn add(
    ctx: &Context,
    full_name: &str,
    path: &std::path::Path,
    default_branch: String,
    fork_of: Option<&str>,
    init: bool,
) -> Result<()> {
    let (owner, name) = split_full_name(full_name)?;
    let owner_user = ctx.user(owner)?;
    let parent = fork_of.map(|parent| ctx.repo(parent)).transpose()?;
    let path = absolute(path)?;

    if init {
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        let git = sluice_git::Repository::init_bare(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        if let Some(parent) = &parent {
            let refname = sluice_git::branch_ref(&parent.default_branch);
            git.fetch_ref(&parent.path, &refname, &refname)
                .with_context(|| format!("Failed to copy {} from {}", refname, parent.full_name()))?;
        }
    } else {
        sluice_git::Repository::open(&path)
            .with_context(|| format!("No git repository at {}", path.display()))?;
    }

    let repo = ctx.store.insert_repo(Repo {
        id: 0,
        owner: owner.to_string(),
        name: name.to_string(),
        path,
        default_branch,
        fork_of: parent.as_ref().map(|p| p.id),
    })?;

    let outcome = BranchSyncer::new(ctx.services.clone()).sync_repo_branches(repo.id, owner_user.id)?;
    output::success(&format!("Added {}", repo.full_name()));
    output::detail(&format!("  {} branch(es) indexed", outcome.added));
    Ok(())
}

fn list(ctx: &Context, json: bool) -> Result<()> {
    let repos = ctx.store.repos()?;
    let rows: Vec<RepoRow> = repos
        .iter()
        .map(|repo| RepoRow {
            full_name: repo.full_name(),
            path: repo.path.display().to_string(),
            default_branch: repo.default_branch.clone(),
            fork_of: repo
                .fork_of
                .and_then(|id| repos.iter().find(|r| r.id == id))
                .map(Repo::full_name),
        })
        .collect();

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        output::info("No repositories registered");
        return Ok(());
    }
    for row in rows {
        let fork = row
            .fork_of
            .map(|parent| format!(" (fork of {parent})"))
            .unwrap_or_default();
        output::essential(&format!("{} [{}]{fork}", row.full_name, row.default_branch));
    }
    Ok(())
}
