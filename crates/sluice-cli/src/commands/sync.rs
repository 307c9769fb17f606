//! `sluice sync` command - Reconcile the branch index with git refs.

use anyhow::{Result, bail};
use sluice_core::BranchSyncer;

use super::{Context, GlobalArgs, print_json};
use crate::output;

/// Run the sync command.
pub async fn run(global: &GlobalArgs, repo: Option<&str>, all: bool, json: bool) -> Result<()> {
    let ctx = Context::open(global)?;
    let syncer = BranchSyncer::new(ctx.services.clone());

    if all {
        let doer = ctx.doer()?;
        if !doer.is_admin {
            bail!("Syncing every repository requires an administrator");
        }
        let summary = syncer.sync_all_repos(doer.id).await?;
        if json {
            return print_json(&summary);
        }
        output::success(&format!(
            "Synced {} of {} repositories: {} added, {} marked deleted",
            summary.succeeded, summary.repos, summary.added, summary.marked_deleted
        ));
        if summary.failed > 0 {
            output::warn(&format!(
                "{} repositories failed - rerun with -v for details",
                summary.failed
            ));
        }
        return Ok(());
    }

    let Some(full_name) = repo else {
        bail!("Name a repository or pass --all");
    };
    let repo = ctx.repo(full_name)?;
    let doer = ctx.doer_or(&repo.owner)?;
    let outcome = syncer.sync_repo_branches(repo.id, doer.id)?;

    if json {
        return print_json(&outcome);
    }
    output::success(&format!(
        "Synced {}: {} added, {} marked deleted",
        repo.full_name(),
        outcome.added,
        outcome.marked_deleted
    ));
    Ok(())
}
