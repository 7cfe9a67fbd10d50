use anyhow::{anyhow, Context};
use clap::ArgMatches;
use ghview::access::{AccessLayer, LOW_QUOTA_THRESHOLD};
use ghview::cli;
use ghview::config::Config;
use ghview::error::ApiError;
use ghview::http::RateBudget;
use ghview::logs::LogOutcome;
use ghview::types::{IssueDetail, IssueItem, IssueRef, Page, PageInfo, RestPage};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::build_cli();
    let matches = cmd.get_matches();
    let log_level = matches.get_one::<String>("log-level").cloned();
    let version_flag = matches.get_flag("version");

    cli::init_logging(log_level.as_deref());

    if version_flag {
        println!("ghview {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let Some((name, sub)) = matches.subcommand() else {
        cli::build_cli().print_help()?;
        return Ok(());
    };

    let cfg = Config::from_env().map_err(|e| anyhow!(e))?;
    info!("using {:?}", cfg);
    let layer = AccessLayer::new(cfg)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match layer.validate_credential(&cancel).await {
        Ok(_) => {}
        Err(e) if e.is_cancelled() => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    match run(&layer, name, sub, &cancel).await {
        Err(e) if e.downcast_ref::<ApiError>().is_some_and(ApiError::is_cancelled) => return Ok(()),
        other => other?,
    }

    let (rest_low, graphql_low) = layer.is_approaching_limit(LOW_QUOTA_THRESHOLD);
    if rest_low || graphql_low {
        warn!("API quota is running low; see `ghview quota`");
    }
    Ok(())
}

fn repo_arg(matches: &ArgMatches) -> anyhow::Result<(String, String)> {
    let value = matches
        .get_one::<String>("repo")
        .context("--repo OWNER/REPO is required for this command")?;
    cli::parse_repo(value).map_err(|e| anyhow!(e))
}

async fn run(
    layer: &AccessLayer,
    name: &str,
    sub: &ArgMatches,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    if name == "quota" {
        let snap = layer.quota_snapshot();
        print_budget("rest", &snap.rest);
        print_budget("graphql", &snap.graphql);
        return Ok(());
    }

    if name == "repos" {
        let login = sub.get_one::<String>("login").context("LOGIN is required")?;
        let first = sub.get_one::<u32>("limit").copied().unwrap_or(30);
        let cursor = sub.get_one::<String>("cursor").map(String::as_str);
        let page = layer.list_repos(login, first, cursor, cancel).await?;
        for r in &page.items {
            println!(
                "{}\t{}\t{}",
                r.name_with_owner,
                if r.is_private { "private" } else { "public" },
                r.description.as_deref().unwrap_or("")
            );
        }
        print_page_next(&page.page_info);
        return Ok(());
    }

    // --repo is global, so it is visible from the subcommand's matches
    let (owner, repo) = repo_arg(sub)?;
    // Only the paged commands define --cursor
    let cursor = sub
        .try_get_one::<String>("cursor")
        .ok()
        .flatten()
        .map(String::as_str);

    match name {
        "runs" => {
            let page = layer
                .list_workflow_runs(&owner, &repo, &cli::run_filter(sub), cursor, cancel)
                .await?;
            for run in &page.items {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    run.id,
                    run.status_label(),
                    run.name.as_deref().unwrap_or(""),
                    run.head_branch.as_deref().unwrap_or(""),
                    run.event,
                    run.duration().unwrap_or_default()
                );
            }
            print_rest_next(&page);
        }
        "jobs" => {
            let run_id = *sub.get_one::<i64>("run-id").context("RUN_ID is required")?;
            let page = layer
                .list_workflow_jobs(&owner, &repo, run_id, &cli::job_filter(sub), cursor, cancel)
                .await?;
            for job in &page.items {
                println!(
                    "{}\t{}\t{}\t{}",
                    job.id,
                    job.status_label(),
                    job.name,
                    job.duration().unwrap_or_default()
                );
            }
            print_rest_next(&page);
        }
        "workflows" => {
            for wf in layer.list_workflows(&owner, &repo, cancel).await? {
                println!("{}\t{}\t{}\t{}", wf.id, wf.name, wf.state, wf.path);
            }
        }
        "issues" => {
            let page = layer
                .list_issues(&cli::issue_search(sub, &owner, &repo), cancel)
                .await?;
            print_issue_page(&page);
        }
        "prs" => {
            let page = layer
                .list_pull_requests(&cli::issue_search(sub, &owner, &repo), cancel)
                .await?;
            print_issue_page(&page);
        }
        "log" => {
            let job_id = *sub.get_one::<i64>("job-id").context("JOB_ID is required")?;
            let session = layer.log_session();
            let pending = session.start(&owner, &repo, job_id);
            let outcome = tokio::select! {
                outcome = pending.wait() => outcome,
                _ = cancel.cancelled() => {
                    session.cancel();
                    None
                }
            };
            match outcome {
                Some(LogOutcome::Loaded { text, .. }) => print!("{}", text),
                Some(LogOutcome::Failed { message, .. }) => return Err(anyhow!(message)),
                None => {}
            }
        }
        "issue" => {
            let number = *sub.get_one::<i64>("number").context("NUMBER is required")?;
            print_issue(&layer.get_issue(&owner, &repo, number, cancel).await?);
        }
        "comment" => {
            let number = *sub.get_one::<i64>("number").context("NUMBER is required")?;
            let body = sub.get_one::<String>("body").context("--body is required")?;
            let issue = layer.get_issue(&owner, &repo, number, cancel).await?;
            let comment = layer.add_comment(&issue.id, body, cancel).await?;
            println!("{}", comment.url);
        }
        "close" | "reopen" => {
            let number = *sub.get_one::<i64>("number").context("NUMBER is required")?;
            let issue = layer.get_issue(&owner, &repo, number, cancel).await?;
            let updated = if name == "close" {
                layer.close_issue(&issue.id, cancel).await?
            } else {
                layer.reopen_issue(&issue.id, cancel).await?
            };
            print_issue_ref(&updated);
        }
        other => return Err(anyhow!("unknown command {}", other)),
    }
    Ok(())
}

fn print_rest_next<T>(page: &RestPage<T>) {
    if let Some(next) = &page.next_cursor {
        println!("next: {}", next);
    }
}

fn print_issue_page(page: &Page<IssueItem>) {
    for item in &page.items {
        println!(
            "#{}\t{}\t{}\t{}",
            item.number,
            item.state,
            item.title,
            item.author.as_deref().unwrap_or("ghost")
        );
    }
    print_page_next(&page.page_info);
}

fn print_page_next(info: &PageInfo) {
    if info.has_next_page {
        if let Some(cursor) = &info.end_cursor {
            println!("next: {}", cursor);
        }
    }
}

fn print_issue(issue: &IssueDetail) {
    println!("#{} {} [{}]", issue.number, issue.title, issue.state);
    println!("author: {}", issue.author.as_deref().unwrap_or("ghost"));
    if !issue.labels.is_empty() {
        println!("labels: {}", issue.labels.join(", "));
    }
    if !issue.assignees.is_empty() {
        println!("assignees: {}", issue.assignees.join(", "));
    }
    if let Some(m) = &issue.milestone {
        println!("milestone: {}", m);
    }
    println!("\n{}\n", issue.body.trim_end());
    for c in &issue.comments.items {
        println!(
            "--- {} at {}\n{}\n",
            c.author.as_deref().unwrap_or("ghost"),
            c.created_at,
            c.body.trim_end()
        );
    }
    let shown = issue.comments.items.len() as i64;
    if issue.total_comments > shown {
        println!("({} more comments)", issue.total_comments - shown);
    }
}

fn print_issue_ref(issue: &IssueRef) {
    println!("#{}\t{}\t{}", issue.number, issue.state, issue.url);
}

fn print_budget(name: &str, budget: &RateBudget) {
    let reset = budget
        .reset_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".into());
    println!("{}\t{}/{}\t{}", name, budget.remaining, budget.limit, reset);
}
