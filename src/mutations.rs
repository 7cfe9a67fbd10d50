//! Issue and comment writes over GraphQL.
//!
//! These go through the same middleware as reads: they are POSTs to the GraphQL
//! endpoint, so they are billed to the GraphQL bucket and never touch the REST quota.

use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::http::{graphql_post, RateLimitedClient};
use crate::types::{CommentRef, IssueRef, IssueUpdate, NewIssue};

const CREATE_ISSUE: &str = r#"
mutation CreateIssue($input: CreateIssueInput!) {
  createIssue(input: $input) { issue { id number state url } }
}
"#;

const UPDATE_ISSUE: &str = r#"
mutation UpdateIssue($input: UpdateIssueInput!) {
  updateIssue(input: $input) { issue { id number state url } }
}
"#;

const CLOSE_ISSUE: &str = r#"
mutation CloseIssue($input: CloseIssueInput!) {
  closeIssue(input: $input) { issue { id number state url } }
}
"#;

const REOPEN_ISSUE: &str = r#"
mutation ReopenIssue($input: ReopenIssueInput!) {
  reopenIssue(input: $input) { issue { id number state url } }
}
"#;

const ADD_COMMENT: &str = r#"
mutation AddComment($input: AddCommentInput!) {
  addComment(input: $input) { commentEdge { node { id url } } }
}
"#;

const UPDATE_COMMENT: &str = r#"
mutation UpdateIssueComment($input: UpdateIssueCommentInput!) {
  updateIssueComment(input: $input) { issueComment { id url } }
}
"#;

const DELETE_COMMENT: &str = r#"
mutation DeleteIssueComment($input: DeleteIssueCommentInput!) {
  deleteIssueComment(input: $input) { clientMutationId }
}
"#;

fn require(value: &str, what: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidRequest(format!("{} must not be empty", what)));
    }
    Ok(())
}

async fn mutate<I: Serialize, T: DeserializeOwned>(
    client: &RateLimitedClient,
    document: &str,
    input: &I,
    cancel: &CancellationToken,
) -> Result<T, ApiError> {
    let variables = serde_json::json!({ "input": input });
    graphql_post(client, document, &variables, cancel).await
}

// Every issue mutation answers with `{ <field>: { issue { .. } } }`.
#[derive(Deserialize)]
struct IssuePayload {
    issue: Option<IssueRef>,
}

fn issue_from(payload: Option<IssuePayload>, action: &str) -> Result<IssueRef, ApiError> {
    payload
        .and_then(|p| p.issue)
        .ok_or_else(|| ApiError::GraphQl(format!("{} returned no issue", action)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIssueData {
    create_issue: Option<IssuePayload>,
}

pub async fn create_issue(
    client: &RateLimitedClient,
    input: &NewIssue,
    cancel: &CancellationToken,
) -> Result<IssueRef, ApiError> {
    require(&input.repository_id, "repository id")?;
    require(&input.title, "issue title")?;
    let data: CreateIssueData = mutate(client, CREATE_ISSUE, input, cancel).await?;
    let issue = issue_from(data.create_issue, "createIssue")?;
    info!("created issue #{}", issue.number);
    Ok(issue)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateIssueData {
    update_issue: Option<IssuePayload>,
}

pub async fn update_issue(
    client: &RateLimitedClient,
    input: &IssueUpdate,
    cancel: &CancellationToken,
) -> Result<IssueRef, ApiError> {
    require(&input.id, "issue id")?;
    if let Some(title) = &input.title {
        require(title, "issue title")?;
    }
    let data: UpdateIssueData = mutate(client, UPDATE_ISSUE, input, cancel).await?;
    issue_from(data.update_issue, "updateIssue")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueIdInput<'a> {
    issue_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseIssueData {
    close_issue: Option<IssuePayload>,
}

pub async fn close_issue(
    client: &RateLimitedClient,
    issue_id: &str,
    cancel: &CancellationToken,
) -> Result<IssueRef, ApiError> {
    require(issue_id, "issue id")?;
    let data: CloseIssueData =
        mutate(client, CLOSE_ISSUE, &IssueIdInput { issue_id }, cancel).await?;
    issue_from(data.close_issue, "closeIssue")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReopenIssueData {
    reopen_issue: Option<IssuePayload>,
}

pub async fn reopen_issue(
    client: &RateLimitedClient,
    issue_id: &str,
    cancel: &CancellationToken,
) -> Result<IssueRef, ApiError> {
    require(issue_id, "issue id")?;
    let data: ReopenIssueData =
        mutate(client, REOPEN_ISSUE, &IssueIdInput { issue_id }, cancel).await?;
    issue_from(data.reopen_issue, "reopenIssue")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddCommentInput<'a> {
    subject_id: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct CommentEdge {
    node: Option<CommentRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCommentPayload {
    comment_edge: Option<CommentEdge>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddCommentData {
    add_comment: Option<AddCommentPayload>,
}

/// Comment on an issue or pull request, identified by its node id.
pub async fn add_comment(
    client: &RateLimitedClient,
    subject_id: &str,
    body: &str,
    cancel: &CancellationToken,
) -> Result<CommentRef, ApiError> {
    require(subject_id, "subject id")?;
    require(body, "comment body")?;
    let data: AddCommentData =
        mutate(client, ADD_COMMENT, &AddCommentInput { subject_id, body }, cancel).await?;
    data.add_comment
        .and_then(|p| p.comment_edge)
        .and_then(|e| e.node)
        .ok_or_else(|| ApiError::GraphQl("addComment returned no comment".into()))
}

#[derive(Serialize)]
struct UpdateCommentInput<'a> {
    id: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCommentPayload {
    issue_comment: Option<CommentRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCommentData {
    update_issue_comment: Option<UpdateCommentPayload>,
}

pub async fn update_comment(
    client: &RateLimitedClient,
    comment_id: &str,
    body: &str,
    cancel: &CancellationToken,
) -> Result<CommentRef, ApiError> {
    require(comment_id, "comment id")?;
    require(body, "comment body")?;
    let input = UpdateCommentInput {
        id: comment_id,
        body,
    };
    let data: UpdateCommentData = mutate(client, UPDATE_COMMENT, &input, cancel).await?;
    data.update_issue_comment
        .and_then(|p| p.issue_comment)
        .ok_or_else(|| ApiError::GraphQl("updateIssueComment returned no comment".into()))
}

#[derive(Serialize)]
struct DeleteCommentInput<'a> {
    id: &'a str,
}

pub async fn delete_comment(
    client: &RateLimitedClient,
    comment_id: &str,
    cancel: &CancellationToken,
) -> Result<(), ApiError> {
    require(comment_id, "comment id")?;
    let _: serde_json::Value =
        mutate(client, DELETE_COMMENT, &DeleteCommentInput { id: comment_id }, cancel).await?;
    info!("deleted comment {}", comment_id);
    Ok(())
}
