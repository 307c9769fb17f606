//! Terminal output formatting utilities.

use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use sluice_core::{PullRequest, StatusKind, Verdict};

static QUIET_MODE: AtomicBool = AtomicBool::new(false);

/// Set quiet mode globally. Call once at startup.
pub fn set_quiet(quiet: bool) {
    QUIET_MODE.store(quiet, Ordering::Relaxed);
}

fn is_quiet() -> bool {
    QUIET_MODE.load(Ordering::Relaxed)
}

/// Print a success message (suppressed in quiet mode).
pub fn success(msg: &str) {
    if !is_quiet() {
        println!("{} {}", "✓".green(), msg);
    }
}

/// Print an error message (always prints to stderr).
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a warning message (always prints to stderr).
pub fn warn(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

/// Print an info message (suppressed in quiet mode).
pub fn info(msg: &str) {
    if !is_quiet() {
        println!("{} {}", "→".blue(), msg);
    }
}

/// Print a detail line without prefix (suppressed in quiet mode).
pub fn detail(msg: &str) {
    if !is_quiet() {
        println!("{msg}");
    }
}

/// Print essential machine-readable output (always prints).
pub fn essential(msg: &str) {
    println!("{msg}");
}

/// Colored status word for a pull request.
#[must_use]
pub fn status_label(kind: StatusKind) -> String {
    let text = kind.to_string();
    match kind {
        StatusKind::Mergeable => text.green().to_string(),
        StatusKind::Checking => text.yellow().to_string(),
        StatusKind::Conflict | StatusKind::Error => text.red().to_string(),
        StatusKind::Merged => text.magenta().to_string(),
        StatusKind::Closed => text.dimmed().to_string(),
    }
}

/// `#<index> <head> → <base>` line for a pull request.
#[must_use]
pub fn pull_line(pr: &PullRequest, title: &str) -> String {
    format!(
        "{} {} {} {} {} [{}]",
        format!("#{}", pr.index).bold(),
        title,
        pr.head_branch.cyan(),
        "→".dimmed(),
        pr.base_branch.cyan(),
        status_label(pr.status.kind())
    )
}

/// Print a verdict: success line, or the reason and every blocker.
pub fn verdict(verdict: &Verdict) {
    if verdict.can_merge_now {
        success(&verdict.reason);
    } else {
        warn(&verdict.reason);
        for blocker in verdict.blockers.iter().skip(1) {
            detail(&format!("  {} {}", "·".dimmed(), blocker.reason()));
        }
    }
    for waived in &verdict.bypassed {
        detail(&format!("  {} {}", "bypassed:".dimmed(), waived.reason()));
    }
}

/// Print a horizontal line (suppressed in quiet mode).
pub fn hr() {
    if !is_quiet() {
        println!("{}", "─".repeat(50).dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_label_colors_match_kind() {
        colored::control::set_override(true);

        assert_eq!(
            status_label(StatusKind::Mergeable),
            "mergeable".green().to_string()
        );
        assert_eq!(
            status_label(StatusKind::Conflict),
            "conflict".red().to_string()
        );
        assert_eq!(status_label(StatusKind::Closed), "closed".dimmed().to_string());

        colored::control::set_override(false);
    }

    #[test]
    fn test_quiet_mode() {
        set_quiet(true);
        assert!(is_quiet());
        set_quiet(false);
        assert!(!is_quiet());
    }
}
