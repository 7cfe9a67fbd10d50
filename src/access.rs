use std::sync::Arc;

use log::warn;
use tokio_util::sync::CancellationToken;

use crate::actions;
use crate::config::Config;
use crate::error::ApiError;
use crate::http::{build_download_client, QuotaSnapshot, RateLimitedClient};
use crate::logs::{JobLog, LogRetriever, LogSession};
use crate::scopes::{self, CredentialScopes};
use crate::types::{
    AssignableUser, CommentRef, IssueComment, IssueDetail, IssueItem, IssueRef, IssueSearch,
    IssueTemplate, IssueUpdate, JobFilter, Label, Milestone, NewIssue, Page, Project, Repository,
    RestPage, RunFilter, Workflow, WorkflowJob, WorkflowRun,
};
use crate::{mutations, queries};

/// Share of the budget below which a protocol counts as running low.
pub const LOW_QUOTA_THRESHOLD: f64 = 0.1;

/// Entry point for the UI: every GitHub call the client makes goes through here.
pub struct AccessLayer {
    client: Arc<RateLimitedClient>,
    retriever: Arc<LogRetriever>,
    session: LogSession,
}

impl AccessLayer {
    pub fn new(cfg: Config) -> Result<Self, ApiError> {
        let download = build_download_client(&cfg)?;
        let client = Arc::new(RateLimitedClient::new(cfg)?);
        Ok(Self::from_parts(client, download))
    }

    pub fn from_parts(client: Arc<RateLimitedClient>, download: reqwest::Client) -> Self {
        let retriever = Arc::new(
            LogRetriever::new(client.clone(), download)
                .with_deadline(client.config().log_timeout()),
        );
        Self {
            session: LogSession::new(retriever.clone()),
            client,
            retriever,
        }
    }

    pub fn config(&self) -> &Config {
        self.client.config()
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }

    /// Check the token under the configured validation deadline.
    pub async fn validate_credential(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CredentialScopes, ApiError> {
        let deadline = self.config().validate_timeout();
        match tokio::time::timeout(deadline, scopes::validate_credential(&self.client, cancel)).await
        {
            Ok(res) => res,
            Err(_) => Err(ApiError::Timeout(deadline)),
        }
    }

    pub async fn list_workflow_runs(
        &self,
        owner: &str,
        repo: &str,
        filter: &RunFilter,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RestPage<WorkflowRun>, ApiError> {
        let page = actions::list_workflow_runs(&self.client, owner, repo, filter, cursor, cancel)
            .await?;
        self.warn_if_low();
        Ok(page)
    }

    pub async fn list_workflow_jobs(
        &self,
        owner: &str,
        repo: &str,
        run_id: i64,
        filter: &JobFilter,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RestPage<WorkflowJob>, ApiError> {
        let page =
            actions::list_workflow_jobs(&self.client, owner, repo, run_id, filter, cursor, cancel)
                .await?;
        self.warn_if_low();
        Ok(page)
    }

    pub async fn list_workflows(
        &self,
        owner: &str,
        repo: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Workflow>, ApiError> {
        let all = actions::list_workflows(&self.client, owner, repo, cancel).await?;
        self.warn_if_low();
        Ok(all)
    }

    pub async fn list_issues(
        &self,
        search: &IssueSearch,
        cancel: &CancellationToken,
    ) -> Result<Page<IssueItem>, ApiError> {
        queries::list_issues(&self.client, search, cancel).await
    }

    pub async fn list_pull_requests(
        &self,
        search: &IssueSearch,
        cancel: &CancellationToken,
    ) -> Result<Page<IssueItem>, ApiError> {
        queries::list_pull_requests(&self.client, search, cancel).await
    }

    pub async fn get_issue(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        cancel: &CancellationToken,
    ) -> Result<IssueDetail, ApiError> {
        queries::get_issue(&self.client, owner, repo, number, cancel).await
    }

    pub async fn list_issue_comments(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        first: u32,
        after: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<IssueComment>, ApiError> {
        queries::list_issue_comments(&self.client, owner, repo, number, first, after, cancel).await
    }

    pub async fn list_repos(
        &self,
        login: &str,
        first: u32,
        after: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<Repository>, ApiError> {
        queries::list_repos(&self.client, login, first, after, cancel).await
    }

    pub async fn get_repo(
        &self,
        owner: &str,
        repo: &str,
        cancel: &CancellationToken,
    ) -> Result<Repository, ApiError> {
        queries::get_repo(&self.client, owner, repo, cancel).await
    }

    pub async fn list_labels(
        &self,
        owner: &str,
        repo: &str,
        first: u32,
        after: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<Label>, ApiError> {
        queries::list_labels(&self.client, owner, repo, first, after, cancel).await
    }

    pub async fn list_milestones(
        &self,
        owner: &str,
        repo: &str,
        first: u32,
        after: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<Milestone>, ApiError> {
        queries::list_milestones(&self.client, owner, repo, first, after, cancel).await
    }

    pub async fn list_projects(
        &self,
        owner: &str,
        repo: &str,
        first: u32,
        after: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<Project>, ApiError> {
        queries::list_projects(&self.client, owner, repo, first, after, cancel).await
    }

    pub async fn list_assignable_users(
        &self,
        owner: &str,
        repo: &str,
        first: u32,
        after: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Page<AssignableUser>, ApiError> {
        queries::list_assignable_users(&self.client, owner, repo, first, after, cancel).await
    }

    pub async fn list_issue_templates(
        &self,
        owner: &str,
        repo: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<IssueTemplate>, ApiError> {
        queries::list_issue_templates(&self.client, owner, repo, cancel).await
    }

    pub async fn create_issue(
        &self,
        input: &NewIssue,
        cancel: &CancellationToken,
    ) -> Result<IssueRef, ApiError> {
        mutations::create_issue(&self.client, input, cancel).await
    }

    pub async fn update_issue(
        &self,
        input: &IssueUpdate,
        cancel: &CancellationToken,
    ) -> Result<IssueRef, ApiError> {
        mutations::update_issue(&self.client, input, cancel).await
    }

    pub async fn close_issue(
        &self,
        issue_id: &str,
        cancel: &CancellationToken,
    ) -> Result<IssueRef, ApiError> {
        mutations::close_issue(&self.client, issue_id, cancel).await
    }

    pub async fn reopen_issue(
        &self,
        issue_id: &str,
        cancel: &CancellationToken,
    ) -> Result<IssueRef, ApiError> {
        mutations::reopen_issue(&self.client, issue_id, cancel).await
    }

    pub async fn add_comment(
        &self,
        subject_id: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> Result<CommentRef, ApiError> {
        mutations::add_comment(&self.client, subject_id, body, cancel).await
    }

    pub async fn update_comment(
        &self,
        comment_id: &str,
        body: &str,
        cancel: &CancellationToken,
    ) -> Result<CommentRef, ApiError> {
        mutations::update_comment(&self.client, comment_id, body, cancel).await
    }

    pub async fn delete_comment(
        &self,
        comment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        mutations::delete_comment(&self.client, comment_id, cancel).await
    }

    /// One-off log fetch. UI code that switches between jobs wants [`Self::log_session`].
    pub async fn fetch_log(
        &self,
        owner: &str,
        repo: &str,
        job_id: i64,
        cancel: &CancellationToken,
    ) -> Result<JobLog, ApiError> {
        self.retriever.fetch(owner, repo, job_id, cancel).await
    }

    pub fn log_session(&self) -> &LogSession {
        &self.session
    }

    pub fn quota_snapshot(&self) -> QuotaSnapshot {
        self.client.quota().snapshot()
    }

    pub fn is_approaching_limit(&self, threshold: f64) -> (bool, bool) {
        self.client.quota().is_approaching_limit(threshold)
    }

    fn warn_if_low(&self) {
        let rest = self.client.quota().rest();
        if rest.is_below(LOW_QUOTA_THRESHOLD) {
            warn!(
                "REST quota low: {}/{} remaining (resets {})",
                rest.remaining,
                rest.limit,
                rest.reset_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".into())
            );
        }
    }
}
