//! `sluice protect` command - Manage branch protection rules.

use anyhow::Result;
use sluice_core::{MergeChecker, ProtectedBranch, ProtectionStore};

use super::{Context, GlobalArgs, ProtectArgs};
use crate::output;

/// Run the protect command.
pub fn run(global: &GlobalArgs, args: &ProtectArgs) -> Result<()> {
    let ctx = Context::open(global)?;
    let repo = ctx.repo(&args.repo)?;
    let checker = MergeChecker::new(ctx.services.clone());

    if args.remove {
        if ctx.store.delete_protected_branch(repo.id, &args.rule)? {
            output::success(&format!("Removed rule '{}' from {}", args.rule, repo.full_name()));
            checker.protection_changed(repo.id)?;
        } else {
            output::warn(&format!("No rule '{}' in {}", args.rule, repo.full_name()));
        }
        return Ok(());
    }

    let user_ids = |names: &[String]| -> Result<Vec<_>> {
        names.iter().map(|name| Ok(ctx.user(name)?.id)).collect()
    };

    let mut rule = ProtectedBranch::new(repo.id, args.rule.clone());
    rule.enable_push = args.enable_push || !args.push_allowlist.is_empty();
    rule.enable_push_allowlist = !args.push_allowlist.is_empty();
    rule.push_allowlist_user_ids = user_ids(&args.push_allowlist)?;
    rule.enable_merge_allowlist = !args.merge_allowlist.is_empty();
    rule.merge_allowlist_user_ids = user_ids(&args.merge_allowlist)?;
    rule.enable_status_check = !args.status_checks.is_empty();
    rule.status_check_contexts.clone_from(&args.status_checks);
    rule.required_approvals = args.required_approvals;
    rule.block_on_rejected_reviews = args.block_on_rejected_reviews;
    rule.block_on_outdated_branch = args.block_on_outdated_branch;
    rule.apply_to_admins = args.apply_to_admins;
    rule.protected_file_patterns = args
        .protected_files
        .iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    rule.validate()?;

    ctx.store.save_protected_branch(&rule)?;
    let rechecked = checker.protection_changed(repo.id)?;

    output::success(&format!("Protected '{}' in {}", rule.rule_name, repo.full_name()));
    if !rechecked.is_empty() {
        output::detail(&format!("  {} open pull request(s) re-checked", rechecked.len()));
    }
    Ok(())
}
