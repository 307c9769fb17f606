//! `sluice pr` commands - Open, inspect, update, merge and close pull requests.

use anyhow::{Result, bail};
use chrono::Utc;
use serde::Serialize;
use sluice_core::{
    AutoMergeStore, AutoMerger, Divergence, Error, MergeChecker, MergeExecutor, MergeOutcome,
    MergeStyle, OpenPull, PullLifecycle, PullRequest, PullStore, PullUpdater, Review, ReviewKind,
    ScheduleOutcome, UpdateStyle, Verdict,
};

use super::{Context, GlobalArgs, PrCommand, print_json};
use crate::output;

/// JSON output for `pr show`.
#[derive(Debug, Serialize)]
struct ShowOutput<'a> {
    title: &'a str,
    #[serde(flatten)]
    pull: &'a PullRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    verdict: Option<&'a Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    divergence: Option<Divergence>,
    auto_merge_scheduled: bool,
}

/// Run a pr subcommand.
pub fn run(global: &GlobalArgs, cmd: PrCommand) -> Result<()> {
    let ctx = Context::open(global)?;
    match cmd {
        PrCommand::Open {
            repo,
            head,
            base,
            head_repo,
            title,
        } => open(&ctx, &repo, head, base, head_repo.as_deref(), title),
        PrCommand::List { repo, all, json } => list(&ctx, &repo, all, json),
        PrCommand::Show {
            repo,
            index,
            style,
            json,
        } => show(&ctx, &repo, index, style, json),
        PrCommand::Check { repo, index } => check(&ctx, &repo, index),
        PrCommand::Merge {
            repo,
            index,
            style,
            head_commit,
            message,
            delete_branch,
            when_checks_succeed: true,
            json,
        } => {
            if head_commit.is_some() {
                bail!("--head-commit can't be combined with --when-checks-succeed");
            }
            schedule(&ctx, &repo, index, style, message.as_deref(), delete_branch, json)
        }
        PrCommand::Merge {
            repo,
            index,
            style,
            head_commit,
            message,
            delete_branch,
            when_checks_succeed: false,
            json,
        } => merge(
            &ctx,
            &repo,
            index,
            style,
            head_commit,
            message.as_deref(),
            delete_branch,
            json,
        ),
        PrCommand::CancelAutoMerge { repo, index } => cancel_auto_merge(&ctx, &repo, index),
        PrCommand::Update {
            repo,
            index,
            rebase,
            json,
        } => {
            let style = if rebase {
                UpdateStyle::Rebase
            } else {
                UpdateStyle::Merge
            };
            update(&ctx, &repo, index, style, json)
        }
        PrCommand::Close { repo, index } => close(&ctx, &repo, index),
        PrCommand::Approve { repo, index } => review(&ctx, &repo, index, ReviewKind::Approve),
        PrCommand::Reject { repo, index } => review(&ctx, &repo, index, ReviewKind::Reject),
    }
}

fn open(
    ctx: &Context,
    repo: &str,
    head: String,
    base: Option<String>,
    head_repo: Option<&str>,
    title: String,
) -> Result<()> {
    let doer = ctx.doer()?;
    let base_repo = ctx.repo(repo)?;
    let head_repo = match head_repo {
        Some(name) => ctx.repo(name)?,
        None => base_repo.clone(),
    };

    let pr = PullLifecycle::new(ctx.services.clone()).open(OpenPull {
        base_repo_id: base_repo.id,
        head_repo_id: head_repo.id,
        base_branch: base.unwrap_or_else(|| base_repo.default_branch.clone()),
        head_branch: head,
        title: title.clone(),
        poster_id: doer.id,
    })?;

    output::success(&format!("Opened pull request #{} in {}", pr.index, base_repo.full_name()));
    output::detail(&format!("  {}", output::pull_line(&pr, &title)));
    output::essential(&pr.index.to_string());
    Ok(())
}

fn list(ctx: &Context, repo: &str, all: bool, json: bool) -> Result<()> {
    let repo = ctx.repo(repo)?;
    let pulls: Vec<PullRequest> = ctx
        .store
        .pulls(repo.id)?
        .into_iter()
        .filter(|pr| all || pr.is_open())
        .collect();

    if json {
        return print_json(&pulls);
    }
    if pulls.is_empty() {
        output::info(&format!("No pull requests in {}", repo.full_name()));
        return Ok(());
    }
    for pr in &pulls {
        let title = ctx.store.issue(pr.issue_id)?.title;
        output::essential(&output::pull_line(pr, &title));
    }
    Ok(())
}

fn show(ctx: &Context, repo: &str, index: u64, style: Option<MergeStyle>, json: bool) -> Result<()> {
    let repo = ctx.repo(repo)?;
    let pr = ctx.pull(&repo, index)?;
    let issue = ctx.store.issue(pr.issue_id)?;
    let style = style.unwrap_or(ctx.config().pull_request.default_merge_style);

    let verdict = if ctx.has_doer() {
        let doer = ctx.doer()?;
        Some(MergeChecker::new(ctx.services.clone()).verdict(&pr, &doer, style)?)
    } else {
        None
    };

    // Either branch may be gone on a closed pull request.
    let divergence = if pr.is_open() {
        PullUpdater::new(ctx.services.clone()).divergence(pr.id).ok()
    } else {
        None
    };
    let auto_merge_scheduled = ctx.store.auto_merge(pr.id)?.is_some();

    if json {
        return print_json(&ShowOutput {
            title: &issue.title,
            pull: &pr,
            verdict: verdict.as_ref(),
            divergence,
            auto_merge_scheduled,
        });
    }

    output::essential(&output::pull_line(&pr, &issue.title));
    output::hr();
    if let Some(head) = &pr.head_commit_id {
        output::detail(&format!("head commit: {head}"));
    }
    if let Some(base) = &pr.merge_base {
        output::detail(&format!("merge base:  {base}"));
    }
    for file in pr.conflicted_files() {
        output::detail(&format!("conflict:    {file}"));
    }
    for file in &pr.changed_protected_files {
        output::detail(&format!("protected:   {file}"));
    }
    if let Some(d) = divergence {
        output::detail(&format!("divergence:  {} ahead, {} behind", d.ahead, d.behind));
    }
    if auto_merge_scheduled {
        output::detail("auto-merge:  scheduled");
    }
    match &verdict {
        Some(verdict) => output::verdict(verdict),
        None => output::info("Pass --as <USER> to see whether you can merge"),
    }
    Ok(())
}

fn check(ctx: &Context, repo: &str, index: u64) -> Result<()> {
    let repo = ctx.repo(repo)?;
    let pr = ctx.pull(&repo, index)?;
    let checker = MergeChecker::new(ctx.services.clone());
    checker.mark_checking(pr.id)?;
    let pr = checker.check(pr.id)?;

    output::success(&format!(
        "#{} is {}",
        pr.index,
        output::status_label(pr.status.kind())
    ));
    for file in pr.conflicted_files() {
        output::detail(&format!("  {file}"));
    }
    if let Some(outcome) = AutoMerger::new(ctx.services.clone()).try_merge(pr.id)? {
        auto_merged(&pr, &outcome);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn merge(
    ctx: &Context,
    repo: &str,
    index: u64,
    style: Option<MergeStyle>,
    head_commit: Option<String>,
    message: Option<&str>,
    delete_branch: bool,
    json: bool,
) -> Result<()> {
    let doer = ctx.doer()?;
    let repo = ctx.repo(repo)?;
    let pr = ctx.pull(&repo, index)?;
    let style = style.unwrap_or(ctx.config().pull_request.default_merge_style);

    let head_commit = match head_commit {
        Some(sha) => sha,
        None if pr.is_open() => MergeChecker::new(ctx.services.clone())
            .live_head(&pr)?
            .to_string(),
        None => bail!("Pull request #{index} is not open"),
    };

    if !json {
        output::info(&format!("Merging #{index} with {style}..."));
    }
    let outcome = MergeExecutor::new(ctx.services.clone()).merge(
        pr.id,
        &doer,
        style,
        &head_commit,
        message,
        delete_branch,
    )?;

    if json {
        return print_json(&outcome);
    }
    output::success(&format!(
        "Merged #{index} into {} at {}",
        pr.base_branch, outcome.merge_commit
    ));
    if outcome.head_branch_deleted {
        output::detail(&format!("  deleted {}", pr.head_branch));
    }
    if !outcome.retargeted.is_empty() {
        output::detail(&format!(
            "  {} pull request(s) retargeted to {}",
            outcome.retargeted.len(),
            repo.default_branch
        ));
    }
    Ok(())
}

fn schedule(
    ctx: &Context,
    repo: &str,
    index: u64,
    style: Option<MergeStyle>,
    message: Option<&str>,
    delete_branch: bool,
    json: bool,
) -> Result<()> {
    let doer = ctx.doer()?;
    let repo = ctx.repo(repo)?;
    let pr = ctx.pull(&repo, index)?;
    let style = style.unwrap_or(ctx.config().pull_request.default_merge_style);

    let outcome = AutoMerger::new(ctx.services.clone()).schedule(
        pr.id,
        &doer,
        style,
        message,
        delete_branch,
    )?;

    if json {
        return print_json(&outcome);
    }
    match outcome {
        ScheduleOutcome::Scheduled { waiting_on } => {
            output::success(&format!("#{index} will be merged with {style} once checks succeed"));
            output::detail(&format!("  waiting: {waiting_on}"));
        }
        ScheduleOutcome::Merged(outcome) => {
            output::success(&format!(
                "Merged #{index} into {} at {}",
                pr.base_branch, outcome.merge_commit
            ));
        }
    }
    Ok(())
}

fn cancel_auto_merge(ctx: &Context, repo: &str, index: u64) -> Result<()> {
    let doer = ctx.doer()?;
    let repo = ctx.repo(repo)?;
    let pr = ctx.pull(&repo, index)?;
    AutoMerger::new(ctx.services.clone()).cancel(pr.id, &doer)?;
    output::success(&format!("Cancelled auto-merge of #{index}"));
    Ok(())
}

fn update(ctx: &Context, repo: &str, index: u64, style: UpdateStyle, json: bool) -> Result<()> {
    let doer = ctx.doer()?;
    let repo = ctx.repo(repo)?;
    let pr = ctx.pull(&repo, index)?;

    let outcome = match PullUpdater::new(ctx.services.clone()).update(pr.id, &doer, style) {
        Ok(outcome) => outcome,
        Err(Error::HeadUpToDate(branch)) => {
            output::info(&format!("{branch} is already up to date with {}", pr.base_branch));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        return print_json(&outcome);
    }
    output::success(&format!(
        "Updated {} from {} by {style}",
        pr.head_branch, pr.base_branch
    ));
    output::detail(&format!("  {} -> {}", outcome.old_head, outcome.new_head));
    Ok(())
}

/// Report a merge that an auto-merge schedule triggered.
pub(super) fn auto_merged(pr: &PullRequest, outcome: &MergeOutcome) {
    output::success(&format!(
        "Auto-merged #{} into {} at {}",
        pr.index, pr.base_branch, outcome.merge_commit
    ));
}

fn close(ctx: &Context, repo: &str, index: u64) -> Result<()> {
    let doer = ctx.doer()?;
    let repo = ctx.repo(repo)?;
    let pr = ctx.pull(&repo, index)?;
    PullLifecycle::new(ctx.services.clone()).close(pr.id, &doer)?;
    output::success(&format!("Closed #{index}"));
    Ok(())
}

fn review(ctx: &Context, repo: &str, index: u64, kind: ReviewKind) -> Result<()> {
    let doer = ctx.doer()?;
    let repo = ctx.repo(repo)?;
    let pr = ctx.pull(&repo, index)?;
    if !pr.is_open() {
        bail!("Pull request #{index} is not open");
    }

    ctx.store.record_review(Review {
        pull_id: pr.id,
        reviewer_id: doer.id,
        kind,
        commit_id: pr.head_commit_id.clone().unwrap_or_default(),
        created_at: Utc::now(),
    })?;

    let verb = match kind {
        ReviewKind::Approve => "Approved",
        ReviewKind::Reject => "Requested changes on",
        ReviewKind::Comment => "Reviewed",
    };
    output::success(&format!("{verb} #{index}"));
    if let Some(outcome) = AutoMerger::new(ctx.services.clone()).review_submitted(pr.id)? {
        auto_merged(&pr, &outcome);
    }
    Ok(())
}
