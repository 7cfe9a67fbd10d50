use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of a REST listing. `next_cursor` is an opaque token for the following page.
#[derive(Debug, Clone, PartialEq)]
pub struct RestPage<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// One page of a GraphQL connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub head_branch: Option<String>,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub run_number: i64,
    #[serde(default)]
    pub workflow_id: i64,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub run_started_at: Option<String>,
}

impl WorkflowRun {
    pub fn status_label(&self) -> &str {
        status_label(self.status.as_deref(), self.conclusion.as_deref())
    }

    /// Time from start to the last update, formatted for display.
    pub fn duration(&self) -> Option<String> {
        let start = parse_time(self.run_started_at.as_deref()?)?;
        let end = parse_time(self.updated_at.as_deref()?)?;
        Some(format_duration(end - start))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowJob {
    pub id: i64,
    #[serde(default)]
    pub run_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl WorkflowJob {
    pub fn status_label(&self) -> &str {
        status_label(self.status.as_deref(), self.conclusion.as_deref())
    }

    /// Only known once the job has completed.
    pub fn duration(&self) -> Option<String> {
        let start = parse_time(self.started_at.as_deref()?)?;
        let end = parse_time(self.completed_at.as_deref()?)?;
        Some(format_duration(end - start))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Workflow {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkflowRunsEnvelope {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobsEnvelope {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub jobs: Vec<WorkflowJob>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkflowsEnvelope {
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

/// Filters for workflow run listings. Empty fields are not sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFilter {
    pub workflow_id: Option<i64>,
    pub status: Option<String>,
    pub branch: Option<String>,
    pub event: Option<String>,
    pub per_page: u32,
}

impl Default for RunFilter {
    fn default() -> Self {
        Self {
            workflow_id: None,
            status: None,
            branch: None,
            event: None,
            per_page: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobAttempt {
    /// Jobs of the most recent attempt only.
    #[default]
    Latest,
    All,
}

impl JobAttempt {
    pub fn as_str(self) -> &'static str {
        match self {
            JobAttempt::Latest => "latest",
            JobAttempt::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "latest" => Some(JobAttempt::Latest),
            "all" => Some(JobAttempt::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub attempt: JobAttempt,
    pub per_page: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            attempt: JobAttempt::Latest,
            per_page: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn qualifier(self) -> &'static str {
        match self {
            IssueState::Open => "is:open",
            IssueState::Closed => "is:closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Some(IssueState::Open),
            "closed" => Some(IssueState::Closed),
            _ => None,
        }
    }
}

/// Search parameters for issue and pull request listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueSearch {
    pub owner: String,
    pub repo: String,
    pub state: Option<IssueState>,
    pub text: Option<String>,
    pub first: u32,
    pub after: Option<String>,
}

impl IssueSearch {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            state: None,
            text: None,
            first: 30,
            after: None,
        }
    }
}

/// An issue or pull request as returned by search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueItem {
    pub id: String,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub url: String,
    pub author: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub comments: i64,
    pub labels: Vec<String>,
    pub is_pull_request: bool,
}

/// A single issue with its first page of comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueDetail {
    pub id: String,
    pub number: i64,
    pub title: String,
    pub body: String,
    pub state: String,
    pub url: String,
    pub author: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub milestone: Option<String>,
    pub comments: Page<IssueComment>,
    pub total_comments: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueComment {
    pub id: String,
    pub author: Option<String>,
    pub body: String,
    pub url: String,
    pub created_at: String,
    pub viewer_can_update: bool,
    pub viewer_can_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub name_with_owner: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub stargazer_count: i64,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub number: i64,
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub due_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Project {
    pub id: String,
    pub number: i64,
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssignableUser {
    pub id: String,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssueTemplate {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Input for creating an issue. Ids are GraphQL node ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIssue {
    pub repository_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assignee_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<String>,
}

/// Partial issue update. `None` leaves a field alone; an empty list clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueUpdate {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssueRef {
    pub id: String,
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommentRef {
    pub id: String,
    #[serde(default)]
    pub url: String,
}

/// Completed runs show their conclusion; everything else shows its status.
pub fn status_label<'a>(status: Option<&'a str>, conclusion: Option<&'a str>) -> &'a str {
    match status {
        Some("completed") => conclusion.unwrap_or("completed"),
        Some(s) => s,
        None => "",
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// `45s`, `3m 12s` or `2h 5m`. Negative spans show as `0s`.
pub fn format_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_prefers_conclusion_when_completed() {
        assert_eq!(status_label(Some("completed"), Some("failure")), "failure");
        assert_eq!(status_label(Some("in_progress"), None), "in_progress");
        assert_eq!(status_label(Some("queued"), Some("")), "queued");
        assert_eq!(status_label(None, None), "");
    }

    #[test]
    fn duration_formats() {
        assert_eq!(format_duration(chrono::Duration::seconds(45)), "45s");
        assert_eq!(format_duration(chrono::Duration::seconds(192)), "3m 12s");
        assert_eq!(format_duration(chrono::Duration::seconds(7500)), "2h 5m");
        assert_eq!(format_duration(chrono::Duration::seconds(-3)), "0s");
    }

    #[test]
    fn run_deserializes_with_missing_fields() {
        let run: WorkflowRun = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "CI",
            "status": "completed",
            "conclusion": "success",
            "run_started_at": "2024-01-15T10:00:00Z",
            "updated_at": "2024-01-15T10:03:30Z"
        }))
        .unwrap();
        assert_eq!(run.status_label(), "success");
        assert_eq!(run.duration().as_deref(), Some("3m 30s"));
        assert_eq!(run.head_branch, None);
    }

    #[test]
    fn job_without_completion_has_no_duration() {
        let job: WorkflowJob = serde_json::from_value(serde_json::json!({
            "id": 1, "run_id": 7, "name": "build", "status": "in_progress",
            "started_at": "2024-01-15T10:00:00Z", "completed_at": null
        }))
        .unwrap();
        assert_eq!(job.duration(), None);
        assert_eq!(job.status_label(), "in_progress");
    }

    #[test]
    fn issue_update_sends_only_changed_fields() {
        let update = IssueUpdate {
            id: "I_1".into(),
            title: Some("New title".into()),
            label_ids: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({"id": "I_1", "title": "New title", "labelIds": []})
        );
        let new = NewIssue {
            repository_id: "R_1".into(),
            title: "Crash".into(),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&new).unwrap(),
            serde_json::json!({"repositoryId": "R_1", "title": "Crash"})
        );
    }

    #[test]
    fn attempt_and_state_parse() {
        assert_eq!(JobAttempt::parse("all"), Some(JobAttempt::All));
        assert_eq!(JobAttempt::parse("some"), None);
        assert_eq!(IssueState::parse("OPEN"), Some(IssueState::Open));
        assert_eq!(IssueState::Closed.qualifier(), "is:closed");
    }
}
