//! `sluice status` commands - Record commit statuses.

use anyhow::{Context as _, Result};
use chrono::Utc;
use sluice_core::{AutoMerger, CheckState, CommitStatus, PullStore};

use super::{Context, GlobalArgs, StatusCommand};
use crate::output;

/// Run a status subcommand.
pub fn run(global: &GlobalArgs, cmd: StatusCommand) -> Result<()> {
    let ctx = Context::open(global)?;
    match cmd {
        StatusCommand::Set {
            repo,
            commit,
            context,
            state,
        } => {
            let repo = ctx.repo(&repo)?;
            let git = ctx.services.git.open(&repo)?;
            let commit_id = match sluice_git::parse_oid(&commit) {
                Ok(oid) if commit.len() == 40 => oid,
                _ => git
                    .branch_commit(&commit)
                    .with_context(|| format!("'{commit}' is neither a commit nor a branch"))?,
            };

            let state = CheckState::from(state);
            ctx.store.record_status(CommitStatus {
                repo_id: repo.id,
                commit_id: commit_id.to_string(),
                context: context.clone(),
                state,
                created_at: Utc::now(),
            })?;
            let state = format!("{state:?}").to_lowercase();
            output::success(&format!("{context} is {state} on {commit_id}"));

            let merged = AutoMerger::new(ctx.services.clone())
                .status_changed(repo.id, &commit_id.to_string())?;
            for outcome in &merged {
                let pr = ctx.store.pull(outcome.pull_id)?;
                super::pr::auto_merged(&pr, outcome);
            }
        }
    }
    Ok(())
}
