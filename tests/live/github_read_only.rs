use assert_cmd::Command;
use predicates::prelude::*;

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn should_run_live() -> bool {
    matches!(env_var("LIVE_API_TESTS").as_deref(), Some("1"))
        && (env_var("GITHUB_TOKEN").is_some() || env_var("GH_TOKEN").is_some())
}

fn live_repo() -> Option<String> {
    let owner = env_var("E2E_OWNER")?;
    let repo = env_var("E2E_REPO")?;
    Some(format!("{}/{}", owner, repo))
}

#[ignore]
#[test]
fn live_list_workflow_runs() -> anyhow::Result<()> {
    if !should_run_live() {
        eprintln!("skipping live test: LIVE_API_TESTS!=1 or token missing");
        return Ok(());
    }
    let Some(repo) = live_repo() else {
        eprintln!("skipping: E2E_OWNER/E2E_REPO not set");
        return Ok(());
    };
    Command::cargo_bin("ghview")?
        .args(["--log-level", "warn", "--repo", &repo, "runs", "--per-page", "5"])
        .assert()
        .success();
    Ok(())
}

#[ignore]
#[test]
fn live_search_issues() -> anyhow::Result<()> {
    if !should_run_live() {
        eprintln!("skipping live test: LIVE_API_TESTS!=1 or token missing");
        return Ok(());
    }
    let Some(repo) = live_repo() else {
        eprintln!("skipping: E2E_OWNER/E2E_REPO not set");
        return Ok(());
    };
    Command::cargo_bin("ghview")?
        .args(["--log-level", "warn", "--repo", &repo, "issues", "--limit", "5"])
        .assert()
        .success();
    Command::cargo_bin("ghview")?
        .args(["--log-level", "warn", "quota"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rest\t"));
    Ok(())
}
