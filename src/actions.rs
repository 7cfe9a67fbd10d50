//! GitHub Actions listings over REST.

use log::debug;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::http::{
    decode_rest_cursor, encode_path_segment, encode_rest_cursor, rest_get_json, RateLimitedClient,
    RestCursor,
};
use crate::types::{
    JobFilter, JobsEnvelope, RestPage, RunFilter, Workflow, WorkflowJob, WorkflowRun,
    WorkflowRunsEnvelope, WorkflowsEnvelope,
};

const MAX_PER_PAGE: u32 = 100;

fn enforce_per_page(per_page: u32) -> Result<u32, ApiError> {
    if per_page == 0 || per_page > MAX_PER_PAGE {
        return Err(ApiError::InvalidRequest("per_page must be 1..=100".into()));
    }
    Ok(per_page)
}

/// The page to request: decoded from `cursor` when present, else page one.
fn start_cursor(cursor: Option<&str>, per_page: u32) -> Result<RestCursor, ApiError> {
    match cursor {
        Some(token) => {
            let c = decode_rest_cursor(token)
                .ok_or_else(|| ApiError::InvalidRequest("malformed page token".into()))?;
            enforce_per_page(c.per_page)?;
            Ok(c)
        }
        None => Ok(RestCursor {
            page: 1,
            per_page: enforce_per_page(per_page)?,
        }),
    }
}

fn repo_path(owner: &str, repo: &str) -> String {
    format!(
        "/repos/{}/{}",
        encode_path_segment(owner),
        encode_path_segment(repo)
    )
}

/// Fetch one page and hand back the body plus the token for the next page.
async fn get_page<T: DeserializeOwned>(
    client: &RateLimitedClient,
    path: &str,
    mut query: Vec<(&str, String)>,
    cursor: RestCursor,
    cancel: &CancellationToken,
) -> Result<(T, Option<String>), ApiError> {
    query.push(("per_page", cursor.per_page.to_string()));
    query.push(("page", cursor.page.to_string()));
    let resp = rest_get_json::<T>(client, path, &query, cancel).await?;
    let next = resp.next_page().map(|page| {
        encode_rest_cursor(RestCursor {
            page,
            per_page: cursor.per_page,
        })
    });
    Ok((resp.value, next))
}

pub async fn list_workflow_runs(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    filter: &RunFilter,
    cursor: Option<&str>,
    cancel: &CancellationToken,
) -> Result<RestPage<WorkflowRun>, ApiError> {
    let start = start_cursor(cursor, filter.per_page)?;
    let path = match filter.workflow_id {
        Some(id) => format!("{}/actions/workflows/{}/runs", repo_path(owner, repo), id),
        None => format!("{}/actions/runs", repo_path(owner, repo)),
    };
    let mut query = Vec::new();
    let optional = [
        ("status", &filter.status),
        ("branch", &filter.branch),
        ("event", &filter.event),
    ];
    for (key, value) in optional {
        if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
            query.push((key, v.to_string()));
        }
    }
    let (body, next_cursor): (WorkflowRunsEnvelope, _) =
        get_page(client, &path, query, start, cancel).await?;
    debug!(
        "{} workflow runs on page {} of {}/{}",
        body.workflow_runs.len(),
        start.page,
        owner,
        repo
    );
    Ok(RestPage {
        items: body.workflow_runs,
        total_count: body.total_count,
        next_cursor,
    })
}

pub async fn list_workflow_jobs(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    run_id: i64,
    filter: &JobFilter,
    cursor: Option<&str>,
    cancel: &CancellationToken,
) -> Result<RestPage<WorkflowJob>, ApiError> {
    let start = start_cursor(cursor, filter.per_page)?;
    let path = format!("{}/actions/runs/{}/jobs", repo_path(owner, repo), run_id);
    let query = vec![("filter", filter.attempt.as_str().to_string())];
    let (body, next_cursor): (JobsEnvelope, _) =
        get_page(client, &path, query, start, cancel).await?;
    Ok(RestPage {
        items: body.jobs,
        total_count: body.total_count,
        next_cursor,
    })
}

/// Every workflow in the repository, following pages until none is left.
pub async fn list_workflows(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    cancel: &CancellationToken,
) -> Result<Vec<Workflow>, ApiError> {
    let path = format!("{}/actions/workflows", repo_path(owner, repo));
    let mut all = Vec::new();
    let mut page = 1u32;
    loop {
        let query = [
            ("per_page", MAX_PER_PAGE.to_string()),
            ("page", page.to_string()),
        ];
        let resp = rest_get_json::<WorkflowsEnvelope>(client, &path, &query, cancel).await?;
        let next = resp.next_page();
        all.extend(resp.value.workflows);
        match next {
            // A Link pointing backwards would loop forever.
            Some(n) if n > page => page = n,
            _ => break,
        }
    }
    Ok(all)
}
