use assert_cmd::Command;
use httpmock::{Method::GET, Method::POST, Mock, MockServer};
use predicates::prelude::*;

fn ghview(server: &MockServer) -> anyhow::Result<Command> {
    let mut cmd = Command::cargo_bin("ghview")?;
    for key in [
        "GH_TOKEN",
        "GITHUB_GRAPHQL_URL",
        "GITHUB_API_VERSION",
        "GITHUB_USER_AGENT",
        "RUST_LOG",
    ] {
        cmd.env_remove(key);
    }
    cmd.env("GITHUB_TOKEN", "t")
        .env("GITHUB_API_URL", server.base_url())
        .arg("--log-level")
        .arg("warn");
    Ok(cmd)
}

fn mock_user<'a>(server: &'a MockServer, scopes: Option<&str>) -> Mock<'a> {
    let scopes = scopes.map(str::to_string);
    server.mock(|when, then| {
        when.method(GET).path("/user");
        let then = then
            .status(200)
            .header("x-ratelimit-limit", "5000")
            .header("x-ratelimit-remaining", "4990")
            .json_body(serde_json::json!({"login": "octocat"}));
        if let Some(s) = scopes {
            then.header("X-OAuth-Scopes", s);
        }
    })
}

#[test]
fn version_flag_needs_no_token() -> anyhow::Result<()> {
    Command::cargo_bin("ghview")?
        .env_remove("GITHUB_TOKEN")
        .env_remove("GH_TOKEN")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("ghview "));
    Ok(())
}

#[test]
fn missing_token_fails() -> anyhow::Result<()> {
    Command::cargo_bin("ghview")?
        .env_remove("GITHUB_TOKEN")
        .env_remove("GH_TOKEN")
        .args(["--repo", "o/r", "runs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GITHUB_TOKEN"));
    Ok(())
}

#[test]
fn under_scoped_token_stops_before_listing() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo"));
    let runs = server.mock(|when, then| {
        when.method(GET).path("/repos/o/r/actions/runs");
        then.status(200)
            .json_body(serde_json::json!({"total_count": 0, "workflow_runs": []}));
    });
    ghview(&server)?
        .args(["--repo", "o/r", "runs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("project or read:org"));
    runs.assert_hits(0);
    Ok(())
}

#[test]
fn invalid_token_reports_status() -> anyhow::Result<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/user");
        then.status(401)
            .json_body(serde_json::json!({"message": "Bad credentials"}));
    });
    ghview(&server)?
        .args(["--repo", "o/r", "workflows"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("401"));
    Ok(())
}

#[test]
fn runs_print_rows_and_next_token() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo, read:org"));
    let link = format!(
        "<{}/repos/o/r/actions/runs?per_page=1&page=2>; rel=\"next\"",
        server.base_url()
    );
    let _runs = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/o/r/actions/runs")
            .query_param("per_page", "1")
            .query_param("branch", "main");
        then.status(200).header("link", link.as_str()).json_body(serde_json::json!({
            "total_count": 2,
            "workflow_runs": [{
                "id": 101, "name": "CI", "status": "completed", "conclusion": "failure",
                "head_branch": "main", "event": "push",
                "run_started_at": "2024-01-15T10:00:00Z", "updated_at": "2024-01-15T10:01:05Z"
            }]
        }));
    });
    ghview(&server)?
        .args(["--repo", "o/r", "runs", "--branch", "main", "--per-page", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("101\tfailure\tCI\tmain\tpush\t1m 5s"))
        .stdout(predicate::str::contains("next: "));
    Ok(())
}

#[test]
fn issues_use_graphql_search() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, None);
    let search = server.mock(|when, then| {
        when.method(POST)
            .path("/graphql")
            .body_contains("repo:o/r is:issue is:open crash");
        then.status(200).json_body(serde_json::json!({
            "data": {"search": {
                "nodes": [{"__typename": "Issue", "id": "I_1", "number": 12, "title": "Crash on start",
                           "state": "OPEN", "url": "u", "createdAt": "c", "updatedAt": "u",
                           "author": {"login": "alice"}}],
                "pageInfo": {"hasNextPage": true, "endCursor": "abc"}
            }}
        }));
    });
    ghview(&server)?
        .args(["--repo", "o/r", "issues", "--state", "open", "--search", "crash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#12\tOPEN\tCrash on start\talice"))
        .stdout(predicate::str::contains("next: abc"));
    search.assert();
    Ok(())
}

#[test]
fn log_is_downloaded_and_sanitized() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo, project"));
    let location = format!("{}/blobs/42.txt", server.base_url());
    let _logs = server.mock(|when, then| {
        when.method(GET).path("/repos/o/r/actions/jobs/42/logs");
        then.status(302).header("location", location.as_str());
    });
    let _blob = server.mock(|when, then| {
        when.method(GET).path("/blobs/42.txt");
        then.status(200)
            .body("2024-01-15T10:30:45.1234567Z \u{1b}[32mok\u{1b}[0m\n2024-01-15T10:30:46.1Z done\n");
    });
    ghview(&server)?
        .args(["--repo", "o/r", "log", "42"])
        .assert()
        .success()
        .stdout("ok\ndone\n");
    Ok(())
}

#[test]
fn expired_log_reports_not_available() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo, project"));
    server.mock(|when, then| {
        when.method(GET).path("/repos/o/r/actions/jobs/7/logs");
        then.status(404)
            .json_body(serde_json::json!({"message": "Not Found"}));
    });
    ghview(&server)?
        .args(["--repo", "o/r", "log", "7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Log not available"));
    Ok(())
}

#[test]
fn quota_reflects_validation_call() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo, project"));
    ghview(&server)?
        .arg("quota")
        .assert()
        .success()
        .stdout(predicate::str::contains("rest\t4990/5000"))
        .stdout(predicate::str::contains("graphql\t5000/5000"));
    Ok(())
}

#[test]
fn bad_repo_argument() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo, project"));
    ghview(&server)?
        .args(["--repo", "just-owner", "workflows"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OWNER/REPO"));
    Ok(())
}

#[test]
fn fine_grained_token_warns_once() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, None);
    let out = ghview(&server)?.arg("quota").assert().success();
    let stderr = String::from_utf8(out.get_output().stderr.clone())?;
    assert_eq!(
        stderr.matches("fine-grained token detected").count(),
        1,
        "stderr: {stderr}"
    );
    Ok(())
}

#[test]
fn classic_token_with_scopes_does_not_warn() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo, project"));
    ghview(&server)?
        .arg("quota")
        .assert()
        .success()
        .stderr(predicate::str::contains("fine-grained").not());
    Ok(())
}

#[test]
fn default_log_level_is_info() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo, project"));
    Command::cargo_bin("ghview")?
        .env_remove("RUST_LOG")
        .env_remove("GH_TOKEN")
        .env("GITHUB_TOKEN", "secret-value")
        .env("GITHUB_API_URL", server.base_url())
        .arg("quota")
        .assert()
        .success()
        .stderr(predicate::str::contains("INFO"))
        .stderr(predicate::str::contains("secret-value").not());
    Ok(())
}

fn mock_issue<'a>(server: &'a MockServer) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(POST)
            .path("/graphql")
            .body_contains("issue(number: $number)");
        then.status(200).json_body(serde_json::json!({
            "data": {"repository": {"issue": {
                "id": "I_12", "number": 12, "title": "Crash on start", "body": "It crashes.",
                "state": "OPEN", "url": "https://github.com/o/r/issues/12",
                "author": {"login": "alice"},
                "labels": {"nodes": [{"name": "bug"}]},
                "assignees": {"nodes": []},
                "milestone": null,
                "comments": {
                    "totalCount": 1,
                    "nodes": [{"id": "C_1", "body": "Same here", "createdAt": "2025-01-02T00:00:00Z",
                               "author": {"login": "bob"}}],
                    "pageInfo": {"hasNextPage": false, "endCursor": null}
                }
            }}}
        }));
    })
}

#[test]
fn issue_detail_prints_body_and_comments() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo, project"));
    let _issue = mock_issue(&server);
    ghview(&server)?
        .args(["--repo", "o/r", "issue", "12"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#12 Crash on start [OPEN]"))
        .stdout(predicate::str::contains("labels: bug"))
        .stdout(predicate::str::contains("It crashes."))
        .stdout(predicate::str::contains("--- bob at 2025-01-02T00:00:00Z\nSame here"));
    Ok(())
}

#[test]
fn comment_resolves_issue_then_mutates() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo, project"));
    let _issue = mock_issue(&server);
    let add = server.mock(|when, then| {
        when.method(POST)
            .path("/graphql")
            .body_contains("addComment(input: $input)")
            .json_body_partial(r#"{"variables": {"input": {"subjectId": "I_12", "body": "On it"}}}"#);
        then.status(200).json_body(serde_json::json!({
            "data": {"addComment": {"commentEdge": {"node": {
                "id": "C_2", "url": "https://github.com/o/r/issues/12#issuecomment-2"
            }}}}
        }));
    });
    ghview(&server)?
        .args(["--repo", "o/r", "comment", "12", "--body", "On it"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#issuecomment-2"));
    add.assert();
    Ok(())
}

#[test]
fn missing_issue_fails_cleanly() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _user = mock_user(&server, Some("repo, project"));
    server.mock(|when, then| {
        when.method(POST).path("/graphql");
        then.status(200)
            .json_body(serde_json::json!({"data": {"repository": {"issue": null}}}));
    });
    ghview(&server)?
        .args(["--repo", "o/r", "close", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("issue #99"));
    Ok(())
}
