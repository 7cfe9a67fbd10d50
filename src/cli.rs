use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use crate::types::{IssueSearch, IssueState, JobAttempt, JobFilter, RunFilter};

pub fn build_cli() -> Command {
    Command::new("ghview")
        .about("Browse GitHub Actions runs, issues and pull requests from the terminal")
        .disable_version_flag(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .num_args(1)
                .help("Override RUST_LOG level (e.g., info, debug)"),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .help("Print version and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("repo")
                .long("repo")
                .global(true)
                .num_args(1)
                .value_name("OWNER/REPO")
                .help("Repository to browse"),
        )
        .subcommand(
            Command::new("runs")
                .about("List workflow runs")
                .arg(Arg::new("status").long("status").num_args(1))
                .arg(Arg::new("branch").long("branch").num_args(1))
                .arg(Arg::new("event").long("event").num_args(1))
                .arg(
                    Arg::new("workflow")
                        .long("workflow")
                        .num_args(1)
                        .value_parser(value_parser!(i64))
                        .help("Only runs of this workflow id"),
                )
                .arg(per_page_arg())
                .arg(cursor_arg()),
        )
        .subcommand(
            Command::new("jobs")
                .about("List jobs of a workflow run")
                .arg(
                    Arg::new("run-id")
                        .required(true)
                        .value_parser(value_parser!(i64)),
                )
                .arg(
                    Arg::new("filter")
                        .long("filter")
                        .num_args(1)
                        .value_parser(["latest", "all"])
                        .default_value("latest"),
                )
                .arg(per_page_arg())
                .arg(cursor_arg()),
        )
        .subcommand(Command::new("workflows").about("List all workflows"))
        .subcommand(search_command("issues", "Search issues"))
        .subcommand(search_command("prs", "Search pull requests"))
        .subcommand(
            Command::new("log").about("Print a job log").arg(
                Arg::new("job-id")
                    .required(true)
                    .value_parser(value_parser!(i64)),
            ),
        )
        .subcommand(
            Command::new("issue")
                .about("Show an issue with its comments")
                .arg(issue_number_arg()),
        )
        .subcommand(
            Command::new("repos")
                .about("List repositories of a user or organization")
                .arg(Arg::new("login").required(true))
                .arg(limit_arg())
                .arg(cursor_arg()),
        )
        .subcommand(
            Command::new("comment")
                .about("Comment on an issue")
                .arg(issue_number_arg())
                .arg(
                    Arg::new("body")
                        .long("body")
                        .num_args(1)
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("close")
                .about("Close an issue")
                .arg(issue_number_arg()),
        )
        .subcommand(
            Command::new("reopen")
                .about("Reopen an issue")
                .arg(issue_number_arg()),
        )
        .subcommand(Command::new("quota").about("Show the last known API quota"))
}

fn issue_number_arg() -> Arg {
    Arg::new("number")
        .required(true)
        .value_parser(value_parser!(i64))
}

fn limit_arg() -> Arg {
    Arg::new("limit")
        .long("limit")
        .num_args(1)
        .value_parser(value_parser!(u32).range(1..=100))
        .default_value("30")
}

fn per_page_arg() -> Arg {
    Arg::new("per-page")
        .long("per-page")
        .num_args(1)
        .value_parser(value_parser!(u32).range(1..=100))
        .default_value("30")
}

fn cursor_arg() -> Arg {
    Arg::new("cursor")
        .long("cursor")
        .num_args(1)
        .help("Page token printed by a previous call")
}

fn search_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("state")
                .long("state")
                .num_args(1)
                .value_parser(["open", "closed"]),
        )
        .arg(Arg::new("search").long("search").num_args(1))
        .arg(limit_arg())
        .arg(cursor_arg())
}

pub fn parse_repo(value: &str) -> Result<(String, String), String> {
    match value.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(format!("invalid repo {:?}: expected OWNER/REPO", value)),
    }
}

fn string(m: &ArgMatches, id: &str) -> Option<String> {
    m.get_one::<String>(id).cloned()
}

pub fn run_filter(m: &ArgMatches) -> RunFilter {
    RunFilter {
        workflow_id: m.get_one::<i64>("workflow").copied(),
        status: string(m, "status"),
        branch: string(m, "branch"),
        event: string(m, "event"),
        per_page: m.get_one::<u32>("per-page").copied().unwrap_or(30),
    }
}

pub fn job_filter(m: &ArgMatches) -> JobFilter {
    JobFilter {
        attempt: m
            .get_one::<String>("filter")
            .and_then(|s| JobAttempt::parse(s))
            .unwrap_or_default(),
        per_page: m.get_one::<u32>("per-page").copied().unwrap_or(30),
    }
}

pub fn issue_search(m: &ArgMatches, owner: &str, repo: &str) -> IssueSearch {
    let mut search = IssueSearch::new(owner, repo);
    search.state = m
        .get_one::<String>("state")
        .and_then(|s| IssueState::parse(s));
    search.text = string(m, "search");
    search.first = m.get_one::<u32>("limit").copied().unwrap_or(30);
    search.after = string(m, "cursor");
    search
}

pub fn init_logging(level: Option<&str>) {
    // An explicit level wins; otherwise RUST_LOG, defaulting to info
    if let Some(lvl) = level {
        std::env::set_var("RUST_LOG", lvl);
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
