//! Markdown the bot posts back to the forge
//!
//! Comment replies and the body of follow-up pull requests. Everything here
//! is pure string building so the texts can be pinned in tests.

use crate::orchestrator::SyncOutcome;
use forge_client::{Branch, Issue, PullRequest, PullRequestCommit};
use std::fmt::Write;

/// The comment a reply refers to
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    /// Link to the comment holding the command
    pub url: &'a str,
    /// Login of the comment author
    pub user: &'a str,
    /// The command text as posted
    pub command: &'a str,
}

/// Make `text` safe to place in a single markdown table cell
fn cell(text: &str) -> String {
    text.trim_end()
        .replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace('\n', "<br>")
}

fn in_response_to(out: &mut String, context: &CommandContext<'_>) {
    let _ = writeln!(out, "In response to [this]({}):", context.url);
    let _ = writeln!(out, "> {}", context.command.trim());
    out.push('\n');
    let _ = writeln!(out, "@{}", context.user);
}

/// Table of protected branches, answering `/sync-check` and greeting new PRs
///
/// `target` is highlighted when it is one of the branches. The version and
/// release columns are left for a package-spec reader to fill in.
pub fn sync_check(
    forge_url: &str,
    owner: &str,
    repo: &str,
    branches: &[Branch],
    target: Option<&str>,
) -> String {
    let mut out = String::new();
    out.push_str("This repository has the following protected branches:\n");
    out.push_str("| Protected Branch | Version | Release |\n");
    out.push_str("|---|---|---|\n");
    for branch in branches {
        let link = format!(
            "[{}]({}/{}/{}/tree/{})",
            branch.name,
            forge_url.trim_end_matches('/'),
            owner,
            repo,
            branch.name
        );
        if target == Some(branch.name.as_str()) {
            let _ = writeln!(out, "|__*__ {}| | |", link);
        } else {
            let _ = writeln!(out, "|{}| | |", link);
        }
    }
    out.push('\n');
    out.push_str(
        "Use `/sync <branch> ...` command to register the branch that the current PR changes will synchronize to.\n",
    );
    out.push_str("Once the current PR is merged, the synchronization operation will be performed.\n");
    out.push_str("(Only the last comment which include valid /sync command will be processed.)\n");
    out
}

/// Acknowledge a `/sync` posted while the PR is still open
///
/// `branches` pairs each requested branch with whether it exists.
pub fn sync_acknowledgement(context: &CommandContext<'_>, branches: &[(String, bool)]) -> String {
    let mut out = String::new();
    in_response_to(&mut out, context);
    out.push_str("Receive the synchronization command.\n");
    out.push_str(
        "Sync operation will be applied to the following branch(es), if the current PR is merged:\n",
    );
    out.push('\n');
    out.push_str("| Branch | Status |\n");
    out.push_str("|---|---|\n");
    for (name, exists) in branches {
        let status = if *exists {
            "sync operation will be performed"
        } else {
            "branch not found, ignored"
        };
        let _ = writeln!(out, "|{}|{}|", cell(name), status);
    }
    out
}

/// Title of the follow-up pull request for `pr`
pub fn sync_pull_request_title(pr: &PullRequest) -> String {
    format!("[sync] PR-{}: {}", pr.number, pr.title)
}

/// Body of the follow-up pull request: origin PR, linked issues, commits
pub fn sync_pull_request_body(
    pr: &PullRequest,
    issues: &[Issue],
    commits: &[PullRequestCommit],
) -> String {
    let mut out = String::new();
    out.push_str("### 1. Origin pull request:\n");
    let _ = writeln!(out, "{}", pr.html_url);
    out.push('\n');
    out.push_str("### 2. Original pull request related issue(s):\n");
    for issue in issues {
        let _ = writeln!(out, "{}", issue.html_url);
    }
    out.push('\n');
    out.push_str("### 3. Original pull request related commit(s):\n");
    out.push_str("| Sha | Datetime | Message |\n");
    out.push_str("|---|---|---|\n");
    for commit in commits {
        let date = commit
            .authored_at
            .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "|[{}]({})|{}|{}|",
            commit.short_sha(),
            commit.html_url,
            date,
            cell(&commit.message)
        );
    }
    out
}

/// Report of a finished sync, one row per requested branch
pub fn sync_result(context: &CommandContext<'_>, outcomes: &[SyncOutcome]) -> String {
    let mut out = String::new();
    in_response_to(&mut out, context);
    out.push('\n');
    out.push_str("The following sync operations have been performed:\n");
    out.push('\n');
    out.push_str("| Branch | Status | Pull Request |\n");
    out.push_str("|---|---|---|\n");
    for outcome in outcomes {
        let _ = writeln!(
            out,
            "|{}|{}|{}|",
            cell(&outcome.branch),
            cell(&outcome.status.to_string()),
            outcome.pull_request_url.as_deref().unwrap_or("")
        );
    }
    out
}

/// Reply to a comment that looked like `/sync` but did not parse
pub fn parse_failure(error: &dyn std::fmt::Display) -> String {
    format!(
        "Receive comment look like /sync command, but parse failed: {}",
        error
    )
}
