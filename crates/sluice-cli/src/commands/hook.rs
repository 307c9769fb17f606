//! `sluice hook` commands - Receive ref updates from the git server.
//!
//! Both hooks read `<old> <new> <refname>` lines from stdin, the format git
//! passes to `pre-receive` and `post-receive`.

use std::io::{self, BufRead};

use anyhow::{Context as _, Result, bail};
use sluice_core::{BranchSyncer, PushOutcome, PushUpdate};

use super::{Context, GlobalArgs, HookCommand};
use crate::output;

/// Run a hook subcommand.
pub fn run(global: &GlobalArgs, cmd: HookCommand) -> Result<()> {
    let ctx = Context::open(global)?;
    let pusher = ctx.doer()?;
    let (repo, pre) = match cmd {
        HookCommand::PreReceive { repo } => (repo, true),
        HookCommand::PostReceive { repo } => (repo, false),
    };
    let repo = ctx.repo(&repo)?;
    let syncer = BranchSyncer::new(ctx.services.clone());

    let mut rejected = 0;
    let mut failed = 0;
    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read ref update")?;
        let Some(update) = parse_update(&line, pusher.id) else {
            if !line.trim().is_empty() {
                output::warn(&format!("Ignoring malformed ref update: {line}"));
            }
            continue;
        };

        if pre {
            if let Err(e) = syncer.check_push_update(repo.id, &update) {
                output::error(&e.to_string());
                rejected += 1;
            }
            continue;
        }

        let outcome = match syncer.apply_push(repo.id, &update) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(refname = %update.refname, error = %e, "failed to apply ref update");
                output::error(&format!("{}: {e}", update.refname));
                failed += 1;
                continue;
            }
        };
        match outcome {
            PushOutcome::Ignored => {}
            PushOutcome::Updated { rechecked } => {
                output::info(&format!("{} updated", update.refname));
                if rechecked > 0 {
                    output::detail(&format!("  {rechecked} pull request(s) re-checked"));
                }
            }
            PushOutcome::Deleted(outcome) => {
                output::info(&format!("{} deleted", update.refname));
                if !outcome.retargeted.is_empty() {
                    output::detail(&format!(
                        "  {} pull request(s) retargeted to {}",
                        outcome.retargeted.len(),
                        repo.default_branch
                    ));
                }
                if !outcome.closed.is_empty() {
                    output::detail(&format!("  {} pull request(s) closed", outcome.closed.len()));
                }
            }
        }
    }

    if rejected > 0 {
        bail!("{rejected} ref update(s) rejected");
    }
    if failed > 0 {
        bail!("{failed} ref update(s) failed");
    }
    Ok(())
}

fn parse_update(line: &str, pusher_id: sluice_core::UserId) -> Option<PushUpdate> {
    let mut parts = line.split_whitespace();
    let old_commit = parts.next()?.to_string();
    let new_commit = parts.next()?.to_string();
    let refname = parts.next()?.to_string();
    if parts.next().is_some() {
        return None;
    }
    Some(PushUpdate {
        refname,
        old_commit,
        new_commit,
        pusher_id,
    })
}
