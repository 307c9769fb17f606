//! `sluice branches` command - List indexed branches.

use anyhow::Result;
use colored::Colorize;
use sluice_core::BranchIndex;

use super::{Context, GlobalArgs, print_json};
use crate::output;

/// Run the branches command.
pub fn run(global: &GlobalArgs, repo: &str, all: bool, json: bool) -> Result<()> {
    let ctx = Context::open(global)?;
    let repo = ctx.repo(repo)?;
    let branches = ctx.store.list_branches(repo.id, all)?;

    if json {
        return print_json(&branches);
    }
    if branches.is_empty() {
        output::info(&format!("No branches indexed for {}", repo.full_name()));
        return Ok(());
    }

    for branch in &branches {
        let short = branch.commit_id.get(..7).unwrap_or(&branch.commit_id);
        let name = if branch.is_deleted {
            format!("{} (deleted)", branch.name).dimmed().to_string()
        } else if branch.name == repo.default_branch {
            branch.name.cyan().bold().to_string()
        } else {
            branch.name.clone()
        };
        output::essential(&format!(
            "{name}  {}  {}",
            short.yellow(),
            branch.commit_message
        ));
    }
    Ok(())
}
