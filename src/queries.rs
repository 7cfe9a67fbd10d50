//! Read queries over GraphQL: issue and pull request search, issue detail,
//! repositories and the metadata an issue form needs.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::http::{graphql_post, RateLimitedClient};
use crate::types::{
    AssignableUser, IssueComment, IssueDetail, IssueItem, IssueSearch, IssueTemplate, Label,
    Milestone, Page, PageInfo, Project, Repository,
};

/// Comments fetched along with an issue; later pages come from [`list_issue_comments`].
pub const ISSUE_COMMENTS_PAGE: u32 = 50;

const SEARCH_QUERY: &str = r#"
query Search($query: String!, $first: Int!, $after: String) {
  search(query: $query, type: ISSUE, first: $first, after: $after) {
    nodes {
      __typename
      ... on Issue {
        id number title state url createdAt updatedAt
        author { login }
        comments { totalCount }
        labels(first: 20) { nodes { name } }
      }
      ... on PullRequest {
        id number title state url createdAt updatedAt
        author { login }
        comments { totalCount }
        labels(first: 20) { nodes { name } }
      }
    }
    pageInfo { hasNextPage endCursor }
  }
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Issues,
    PullRequests,
}

impl SearchKind {
    fn qualifier(self) -> &'static str {
        match self {
            SearchKind::Issues => "is:issue",
            SearchKind::PullRequests => "is:pr",
        }
    }
}

/// `repo:owner/name is:issue [is:open] [free text]`
pub fn build_search_query(kind: SearchKind, search: &IssueSearch) -> String {
    let mut parts = vec![
        format!("repo:{}/{}", search.owner, search.repo),
        kind.qualifier().to_string(),
    ];
    if let Some(state) = search.state {
        parts.push(state.qualifier().to_string());
    }
    if let Some(text) = search.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(text.to_string());
    }
    parts.join(" ")
}

const ISSUE_QUERY: &str = r#"
query Issue($owner: String!, $name: String!, $number: Int!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    issue(number: $number) {
      id number title body state url createdAt updatedAt
      author { login }
      labels(first: 20) { nodes { name } }
      assignees(first: 20) { nodes { login } }
      milestone { title }
      comments(first: $first, after: $after) {
        totalCount
        nodes {
          id body url createdAt viewerCanUpdate viewerCanDelete
          author { login }
        }
        pageInfo { hasNextPage endCursor }
      }
    }
  }
}
"#;

const REPOS_QUERY: &str = r#"
query Repos($login: String!, $first: Int!, $after: String) {
  repositoryOwner(login: $login) {
    repositories(first: $first, after: $after, orderBy: {field: CREATED_AT, direction: DESC}) {
      nodes { id name nameWithOwner description url isPrivate isArchived stargazerCount updatedAt }
      pageInfo { hasNextPage endCursor }
    }
  }
}
"#;

const REPO_QUERY: &str = r#"
query Repo($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    id name nameWithOwner description url isPrivate isArchived stargazerCount updatedAt
  }
}
"#;

const LABELS_QUERY: &str = r#"
query Labels($owner: String!, $name: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    labels(first: $first, after: $after, orderBy: {field: CREATED_AT, direction: DESC}) {
      nodes { id name color description }
      pageInfo { hasNextPage endCursor }
    }
  }
}
"#;

const MILESTONES_QUERY: &str = r#"
query Milestones($owner: String!, $name: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    milestones(first: $first, after: $after, orderBy: {field: CREATED_AT, direction: DESC}) {
      nodes { id number title state dueOn }
      pageInfo { hasNextPage endCursor }
    }
  }
}
"#;

const PROJECTS_QUERY: &str = r#"
query Projects($owner: String!, $name: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    projectsV2(first: $first, after: $after, orderBy: {field: CREATED_AT, direction: DESC}) {
      nodes { id number title url closed }
      pageInfo { hasNextPage endCursor }
    }
  }
}
"#;

const ASSIGNABLE_USERS_QUERY: &str = r#"
query AssignableUsers($owner: String!, $name: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    assignableUsers(first: $first, after: $after) {
      nodes { id login name }
      pageInfo { hasNextPage endCursor }
    }
  }
}
"#;

const TEMPLATES_QUERY: &str = r#"
query IssueTemplates($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    issueTemplates { name title about body }
  }
}
"#;

fn enforce_first(first: u32) -> Result<u32, ApiError> {
    if first == 0 || first > 100 {
        return Err(ApiError::InvalidRequest("first must be 1..=100".into()));
    }
    Ok(first)
}

#[derive(Deserialize)]
struct Login {
    login: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Count {
    total_count: i64,
}

#[derive(Deserialize)]
struct LabelNode {
    name: String,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Nodes<T> {
    #[serde(default)]
    nodes: Vec<Option<T>>,
}

impl<T> Nodes<T> {
    fn into_vec(self) -> Vec<T> {
        self.nodes.into_iter().flatten().collect()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
struct Connection<T> {
    #[serde(default)]
    nodes: Vec<Option<T>>,
    page_info: PageInfo,
}

impl<T> Connection<T> {
    fn into_page(self) -> Page<T> {
        Page {
            items: self.nodes.into_iter().flatten().collect(),
            page_info: self.page_info,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNode {
    #[serde(rename = "__typename")]
    typename: String,
    // Search can return other node types; those come back without fields.
    id: Option<String>,
    number: Option<i64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    updated_at: String,
    author: Option<Login>,
    comments: Option<Count>,
    labels: Option<Nodes<LabelNode>>,
}

#[derive(Deserialize)]
struct Data {
    search: Connection<SearchNode>,
}

impl SearchNode {
    fn into_item(self) -> Option<IssueItem> {
        let is_pull_request = match self.typename.as_str() {
            "Issue" => false,
            "PullRequest" => true,
            _ => return None,
        };
        Some(IssueItem {
            id: self.id?,
            number: self.number?,
            title: self.title,
            state: self.state,
            url: self.url,
            author: self.author.map(|a| a.login),
            created_at: self.created_at,
            updated_at: self.updated_at,
            comments: self.comments.map(|c| c.total_count).unwrap_or(0),
            labels: label_names(self.labels),
            is_pull_request,
        })
    }
}

pub async fn search(
    client: &RateLimitedClient,
    kind: SearchKind,
    search: &IssueSearch,
    cancel: &CancellationToken,
) -> Result<Page<IssueItem>, ApiError> {
    let first = enforce_first(search.first)?;
    let variables = serde_json::json!({
        "query": build_search_query(kind, search),
        "first": first,
        "after": search.after,
    });
    let data: Data = graphql_post(client, SEARCH_QUERY, &variables, cancel).await?;
    let items = data
        .search
        .nodes
        .into_iter()
        .flatten()
        .filter_map(SearchNode::into_item)
        .collect();
    Ok(Page {
        items,
        page_info: data.search.page_info,
    })
}

pub async fn list_issues(
    client: &RateLimitedClient,
    search_params: &IssueSearch,
    cancel: &CancellationToken,
) -> Result<Page<IssueItem>, ApiError> {
    search(client, SearchKind::Issues, search_params, cancel).await
}

pub async fn list_pull_requests(
    client: &RateLimitedClient,
    search_params: &IssueSearch,
    cancel: &CancellationToken,
) -> Result<Page<IssueItem>, ApiError> {
    search(client, SearchKind::PullRequests, search_params, cancel).await
}

fn label_names(labels: Option<Nodes<LabelNode>>) -> Vec<String> {
    labels
        .map(|l| l.into_vec().into_iter().map(|n| n.name).collect())
        .unwrap_or_default()
}

fn repo_not_found(owner: &str, repo: &str) -> ApiError {
    ApiError::NotFound {
        message: format!("repository {}/{}", owner, repo),
    }
}

#[derive(Deserialize)]
struct Titled {
    title: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentNode {
    id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    viewer_can_update: bool,
    #[serde(default)]
    viewer_can_delete: bool,
    author: Option<Login>,
}

impl From<CommentNode> for IssueComment {
    fn from(c: CommentNode) -> Self {
        IssueComment {
            id: c.id,
            author: c.author.map(|a| a.login),
            body: c.body,
            url: c.url,
            created_at: c.created_at,
            viewer_can_update: c.viewer_can_update,
            viewer_can_delete: c.viewer_can_delete,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentConnection {
    #[serde(default)]
    total_count: i64,
    #[serde(default)]
    nodes: Vec<Option<CommentNode>>,
    page_info: PageInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    id: String,
    number: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    updated_at: String,
    author: Option<Login>,
    labels: Option<Nodes<LabelNode>>,
    assignees: Option<Nodes<Login>>,
    milestone: Option<Titled>,
    comments: CommentConnection,
}

impl From<IssueNode> for IssueDetail {
    fn from(n: IssueNode) -> Self {
        IssueDetail {
            id: n.id,
            number: n.number,
            title: n.title,
            body: n.body,
            state: n.state,
            url: n.url,
            author: n.author.map(|a| a.login),
            created_at: n.created_at,
            updated_at: n.updated_at,
            labels: label_names(n.labels),
            assignees: n
                .assignees
                .map(|a| a.into_vec().into_iter().map(|u| u.login).collect())
                .unwrap_or_default(),
            milestone: n.milestone.map(|m| m.title),
            total_comments: n.comments.total_count,
            comments: Page {
                items: n
                    .comments
                    .nodes
                    .into_iter()
                    .flatten()
                    .map(IssueComment::from)
                    .collect(),
                page_info: n.comments.page_info,
            },
        }
    }
}

#[derive(Deserialize)]
struct IssueRepository {
    issue: Option<IssueNode>,
}

#[derive(Deserialize)]
struct IssueData {
    repository: Option<IssueRepository>,
}

async fn fetch_issue(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    number: i64,
    first: u32,
    after: Option<&str>,
    cancel: &CancellationToken,
) -> Result<IssueDetail, ApiError> {
    let first = enforce_first(first)?;
    let variables = serde_json::json!({
        "owner": owner,
        "name": repo,
        "number": number,
        "first": first,
        "after": after,
    });
    let data: IssueData = graphql_post(client, ISSUE_QUERY, &variables, cancel).await?;
    let issue = data
        .repository
        .ok_or_else(|| repo_not_found(owner, repo))?
        .issue
        .ok_or_else(|| ApiError::NotFound {
            message: format!("issue #{} in {}/{}", number, owner, repo),
        })?;
    Ok(issue.into())
}

/// One issue with its body, labels, assignees and first page of comments.
pub async fn get_issue(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    number: i64,
    cancel: &CancellationToken,
) -> Result<IssueDetail, ApiError> {
    fetch_issue(client, owner, repo, number, ISSUE_COMMENTS_PAGE, None, cancel).await
}

pub async fn list_issue_comments(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    number: i64,
    first: u32,
    after: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Page<IssueComment>, ApiError> {
    let issue = fetch_issue(client, owner, repo, number, first, after, cancel).await?;
    Ok(issue.comments)
}

#[derive(Deserialize)]
struct OwnerRepositories {
    repositories: Connection<Repository>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReposData {
    repository_owner: Option<OwnerRepositories>,
}

/// Repositories of a user or organization, newest first.
pub async fn list_repos(
    client: &RateLimitedClient,
    login: &str,
    first: u32,
    after: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Page<Repository>, ApiError> {
    let first = enforce_first(first)?;
    let variables = serde_json::json!({ "login": login, "first": first, "after": after });
    let data: ReposData = graphql_post(client, REPOS_QUERY, &variables, cancel).await?;
    let owner = data.repository_owner.ok_or_else(|| ApiError::NotFound {
        message: format!("owner {}", login),
    })?;
    Ok(owner.repositories.into_page())
}

#[derive(Deserialize)]
struct RepoData {
    repository: Option<Repository>,
}

pub async fn get_repo(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    cancel: &CancellationToken,
) -> Result<Repository, ApiError> {
    let variables = serde_json::json!({ "owner": owner, "name": repo });
    let data: RepoData = graphql_post(client, REPO_QUERY, &variables, cancel).await?;
    data.repository.ok_or_else(|| repo_not_found(owner, repo))
}

// `repository { <field>(first, after) { nodes pageInfo } }`
#[derive(Deserialize)]
struct RepositoryConnection<T> {
    repository: Option<HashMap<String, Connection<T>>>,
}

#[allow(clippy::too_many_arguments)]
async fn repository_connection<T: DeserializeOwned>(
    client: &RateLimitedClient,
    query: &str,
    field: &str,
    owner: &str,
    repo: &str,
    first: u32,
    after: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Page<T>, ApiError> {
    let first = enforce_first(first)?;
    let variables = serde_json::json!({
        "owner": owner,
        "name": repo,
        "first": first,
        "after": after,
    });
    let data: RepositoryConnection<T> = graphql_post(client, query, &variables, cancel).await?;
    let mut fields = data.repository.ok_or_else(|| repo_not_found(owner, repo))?;
    let connection = fields
        .remove(field)
        .ok_or_else(|| ApiError::GraphQl(format!("response has no {} connection", field)))?;
    Ok(connection.into_page())
}

pub async fn list_labels(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    first: u32,
    after: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Page<Label>, ApiError> {
    repository_connection(client, LABELS_QUERY, "labels", owner, repo, first, after, cancel).await
}

pub async fn list_milestones(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    first: u32,
    after: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Page<Milestone>, ApiError> {
    repository_connection(client, MILESTONES_QUERY, "milestones", owner, repo, first, after, cancel)
        .await
}

pub async fn list_projects(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    first: u32,
    after: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Page<Project>, ApiError> {
    repository_connection(client, PROJECTS_QUERY, "projectsV2", owner, repo, first, after, cancel)
        .await
}

pub async fn list_assignable_users(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    first: u32,
    after: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Page<AssignableUser>, ApiError> {
    repository_connection(
        client,
        ASSIGNABLE_USERS_QUERY,
        "assignableUsers",
        owner,
        repo,
        first,
        after,
        cancel,
    )
    .await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplatesRepository {
    #[serde(default)]
    issue_templates: Option<Vec<IssueTemplate>>,
}

#[derive(Deserialize)]
struct TemplatesData {
    repository: Option<TemplatesRepository>,
}

/// Issue templates configured in the repository. Empty when there are none.
pub async fn list_issue_templates(
    client: &RateLimitedClient,
    owner: &str,
    repo: &str,
    cancel: &CancellationToken,
) -> Result<Vec<IssueTemplate>, ApiError> {
    let variables = serde_json::json!({ "owner": owner, "name": repo });
    let data: TemplatesData = graphql_post(client, TEMPLATES_QUERY, &variables, cancel).await?;
    Ok(data
        .repository
        .ok_or_else(|| repo_not_found(owner, repo))?
        .issue_templates
        .unwrap_or_default())
}
