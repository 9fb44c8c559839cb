use std::time::Duration;

use async_trait::async_trait;
use formsync_common::error::{FormsyncError, FormsyncResult};
use formsync_config::{get_optional, get_var, parse_var_or};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, StatusCode};

use super::models::{
    AdfDocument, CreateIssueRequest, CreatedIssue, IssueFields, NamedRef, ProjectRef,
};
use crate::publisher::{CreatedTicket, IssueTracker, PublishError};
use crate::transform::{Priority, TicketDraft};

/// Longest `Retry-After` honoured from a 429 response.
const MAX_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct JiraClientConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub project_key: String,
    pub issue_type: String,
    pub default_priority: Priority,
    pub timeout_secs: u64,
}

impl JiraClientConfig {
    /// Load Jira config from environment.
    ///
    /// Base URL, email, token and project key are mandatory: the sync has
    /// nothing to do without a tracker, so a missing value is a startup error.
    pub fn from_env() -> FormsyncResult<Self> {
        let base_url = get_var("JIRA_BASE_URL")?.trim_end_matches('/').to_owned();
        let email = get_var("JIRA_EMAIL")?;
        let api_token = get_var("JIRA_API_TOKEN")?;
        let project_key =
            parse_project_key(&get_var("JIRA_PROJECT_KEY")?).map_err(FormsyncError::Config)?;

        let issue_type = get_optional("ISSUE_TYPE").unwrap_or_else(|| "Task".to_owned());
        let default_priority = parse_var_or("JIRA_DEFAULT_PRIORITY", Priority::Medium)?;
        let timeout_secs: u64 = parse_var_or("JIRA_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(FormsyncError::Config(
                "JIRA_TIMEOUT_SECS must be greater than 0".to_owned(),
            ));
        }

        Ok(Self {
            base_url,
            email,
            api_token,
            project_key,
            issue_type,
            default_priority,
            timeout_secs,
        })
    }
}

/// Normalise a Jira project key: trimmed, uppercased, letters/digits/underscore,
/// starting with a letter.
pub fn parse_project_key(raw: &str) -> Result<String, String> {
    let key = raw.trim().to_uppercase();
    let mut chars = key.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(format!("JIRA_PROJECT_KEY `{raw}` is not a valid project key"));
    }
    Ok(key)
}

#[derive(Clone)]
pub struct JiraClient {
    client: Client,
    config: JiraClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum JiraClientError {
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl From<JiraClientError> for PublishError {
    fn from(err: JiraClientError) -> Self {
        let reason = err.to_string();
        match err {
            JiraClientError::RequestError(e)
                if e.is_timeout() || e.is_connect() || e.is_request() =>
            {
                PublishError::Transient {
                    reason,
                    retry_after: None,
                }
            }
            JiraClientError::HttpError {
                status,
                retry_after,
                ..
            } if status == StatusCode::TOO_MANY_REQUESTS
                || status == StatusCode::REQUEST_TIMEOUT
                || status.is_server_error() =>
            {
                PublishError::Transient {
                    reason,
                    retry_after: retry_after
                        .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS))),
                }
            }
            // A success body we cannot read may still mean the issue exists
            _ => PublishError::Fatal(reason),
        }
    }
}

impl JiraClient {
    pub fn new(config: JiraClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn config(&self) -> &JiraClientConfig {
        &self.config
    }

    pub fn build_issue_request(&self, draft: &TicketDraft) -> CreateIssueRequest {
        CreateIssueRequest {
            fields: IssueFields {
                project: ProjectRef {
                    key: self.config.project_key.clone(),
                },
                summary: draft.summary.clone(),
                issuetype: NamedRef {
                    name: self.config.issue_type.clone(),
                },
                priority: NamedRef {
                    name: draft.priority.as_str().to_owned(),
                },
                labels: vec![draft.dedupe_label()],
                description: AdfDocument::from_lines(&draft.description),
            },
        }
    }

    /// Create one issue. No retries here; the publisher owns the retry loop.
    pub async fn create_issue(&self, draft: &TicketDraft) -> Result<CreatedIssue, JiraClientError> {
        let url = format!("{}/rest/api/3/issue", self.config.base_url);
        let payload = self.build_issue_request(draft);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.email, Some(&self.config.api_token))
            .header(ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();

        // Past this point the issue may exist; a retry could duplicate it
        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| JiraClientError::Decode(format!("reading response body: {e}")))?;
            return serde_json::from_str::<CreatedIssue>(&body)
                .map_err(|e| JiraClientError::Decode(format!("{e}: {body}")));
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        Err(JiraClientError::HttpError {
            status,
            body,
            retry_after,
        })
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn create_ticket(&self, draft: &TicketDraft) -> Result<CreatedTicket, PublishError> {
        let issue = self.create_issue(draft).await?;
        Ok(CreatedTicket { key: issue.key })
    }
}
