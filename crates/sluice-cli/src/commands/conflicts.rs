//! `sluice conflicts` command - Try merging two branches without writing anything.

use anyhow::Result;
use serde::Serialize;
use sluice_core::{ConflictCheck, ConflictDetector, Divergence};

use super::{Context, GlobalArgs, print_json};
use crate::output;

#[derive(Debug, Serialize)]
struct ConflictsOutput {
    base: String,
    head: String,
    #[serde(flatten)]
    check: ConflictCheck,
    divergence: Divergence,
    fast_forwardable: bool,
}

/// Run the conflicts command.
pub fn run(global: &GlobalArgs, repo: &str, base: &str, head: &str, json: bool) -> Result<()> {
    let ctx = Context::open(global)?;
    let repo = ctx.repo(repo)?;
    let git = ctx.services.git.open(&repo)?;
    let detector = ConflictDetector::new(git.as_ref());

    let base_oid = detector.resolve(base)?;
    let head_oid = detector.resolve(head)?;
    let check = detector.check_conflicts(base_oid, head_oid)?;
    let divergence = detector.divergence(base_oid, head_oid)?;
    let fast_forwardable = detector.is_fast_forwardable(base_oid, head_oid)?;

    if json {
        return print_json(&ConflictsOutput {
            base: base_oid.to_string(),
            head: head_oid.to_string(),
            check,
            divergence,
            fast_forwardable,
        });
    }

    if check.unrelated {
        output::warn(&format!("{head} and {base} have unrelated histories"));
    } else if check.conflicted_files.is_empty() {
        output::success(&format!("{head} merges cleanly into {base}"));
    } else {
        output::warn(&format!(
            "{head} conflicts with {base} in {} file(s):",
            check.conflicted_files.len()
        ));
        for file in &check.conflicted_files {
            output::detail(&format!("  {file}"));
        }
    }
    output::detail(&format!(
        "  {} ahead, {} behind{}",
        divergence.ahead,
        divergence.behind,
        if fast_forwardable { ", fast-forwardable" } else { "" }
    ));
    Ok(())
}
