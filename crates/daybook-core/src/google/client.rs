//! Typed Google REST adapter used by the sync engine.
//!
//! One method per remote operation, each surfacing failures as [`ApiError`]
//! carrying the HTTP status and the provider reason code when one is
//! embedded in the error body. The "no usable credential" condition is a
//! dedicated variant so the orchestrator can tell it apart from everything
//! else and abort the whole cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::wire::{
    CalendarListEntry, CalendarListPage, EventsPage, GoogleEvent, GoogleTask, TaskList,
    TaskListsPage, TasksPage,
};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const TASKS_API_BASE: &str = "https://www.googleapis.com/tasks/v1";

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Reasons Google attaches to 403s that mean "slow down".
const RATE_LIMIT_REASONS: [&str; 4] = [
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
    "dailyLimitExceeded",
];

/// Error surface of the remote adapter.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable access credential. Cycle-aborting; never retried in-phase.
    #[error("no usable Google credential")]
    NoCredential,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx response from the provider.
    #[error("Google API error ({status}): {message}")]
    Status {
        status: u16,
        reason: Option<String>,
        message: String,
    },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ApiError::Status { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    /// 404 or 410: the resource is already absent on the remote side.
    pub fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404) | Some(410))
    }

    pub fn is_bad_request(&self) -> bool {
        self.status() == Some(400)
    }

    /// 429 always; 403 only with a quota/rate reason code.
    pub fn is_rate_limited(&self) -> bool {
        match self.status() {
            Some(429) => true,
            Some(403) => self
                .reason()
                .is_some_and(|r| RATE_LIMIT_REASONS.contains(&r)),
            _ => false,
        }
    }

    /// The incremental sync token is expired or invalid; a full refetch is
    /// required.
    pub fn is_sync_token_invalid(&self) -> bool {
        self.status() == Some(410) || self.reason() == Some("fullSyncRequired")
    }
}

/// Source of bearer tokens for API calls.
///
/// The keyring-backed implementation lives in `auth`; tests inject a static
/// token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A valid access token, refreshed if necessary.
    ///
    /// Returns [`ApiError::NoCredential`] when no token can be produced.
    async fn access_token(&self) -> Result<String, ApiError>;

    /// Account identity used to key sync cursors.
    fn account(&self) -> String {
        "default".to_string()
    }
}

/// Fixed-token source for tests and scripting.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, ApiError> {
        Ok(self.token.clone())
    }
}

/// Query parameters for one page of an incremental events list.
#[derive(Debug, Clone, Default)]
pub struct EventsQuery {
    /// Opaque incremental token from a previous list's `nextSyncToken`.
    pub sync_token: Option<String>,
    pub page_token: Option<String>,
    /// Lower bound on modification time, for full refetches. Mutually
    /// exclusive with `sync_token`.
    pub updated_min: Option<String>,
}

/// Thin typed wrapper over the Calendar v3 and Tasks v1 REST APIs.
pub struct GoogleClient {
    http: reqwest::Client,
    calendar_base: String,
    tasks_base: String,
    tokens: Arc<dyn TokenSource>,
}

impl GoogleClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self::with_base_urls(tokens, CALENDAR_API_BASE, TASKS_API_BASE)
    }

    /// Point the client at alternative base URLs (mock servers in tests).
    pub fn with_base_urls(
        tokens: Arc<dyn TokenSource>,
        calendar_base: impl Into<String>,
        tasks_base: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            calendar_base: calendar_base.into(),
            tasks_base: tasks_base.into(),
            tokens,
        }
    }

    /// Account identity of the underlying credential.
    pub fn account(&self) -> String {
        self.tokens.account()
    }

    async fn token(&self) -> Result<String, ApiError> {
        self.tokens.access_token().await
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            reason: parse_reason(&body),
            message: truncate(&body, 500),
        })
    }

    // === Calendar events ===

    pub async fn create_event(
        &self,
        calendar_id: &str,
        body: &Value,
    ) -> Result<GoogleEvent, ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}/calendars/{}/events",
            self.calendar_base,
            urlencoding::encode(calendar_id)
        );
        let resp = self.http.post(&url).bearer_auth(&token).json(body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        body: &Value,
    ) -> Result<GoogleEvent, ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.calendar_base,
            urlencoding::encode(calendar_id),
            urlencoding::encode(event_id)
        );
        let resp = self.http.patch(&url).bearer_auth(&token).json(body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.calendar_base,
            urlencoding::encode(calendar_id),
            urlencoding::encode(event_id)
        );
        let resp = self.http.delete(&url).bearer_auth(&token).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// One page of the events list for a calendar, incremental when
    /// `sync_token` is set, bounded by `updated_min` otherwise. Cancelled
    /// events are included so deletions propagate.
    pub async fn list_events_page(
        &self,
        calendar_id: &str,
        query: &EventsQuery,
    ) -> Result<EventsPage, ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}/calendars/{}/events",
            self.calendar_base,
            urlencoding::encode(calendar_id)
        );

        let mut params: Vec<(&str, String)> = vec![
            ("showDeleted", "true".to_string()),
            ("maxResults", "250".to_string()),
        ];
        if let Some(ref t) = query.sync_token {
            params.push(("syncToken", t.clone()));
        } else if let Some(ref min) = query.updated_min {
            params.push(("updatedMin", min.clone()));
        }
        if let Some(ref t) = query.page_token {
            params.push(("pageToken", t.clone()));
        }

        let resp = self
            .http
            .get(&url)
            .query(&params)
            .bearer_auth(&token)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn list_calendars(&self) -> Result<Vec<CalendarListEntry>, ApiError> {
        let token = self.token().await?;
        let url = format!("{}/users/me/calendarList", self.calendar_base);

        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = Vec::new();
            if let Some(ref t) = page_token {
                params.push(("pageToken", t.clone()));
            }
            let resp = self
                .http
                .get(&url)
                .query(&params)
                .bearer_auth(&token)
                .send()
                .await?;
            let page: CalendarListPage = Self::check(resp).await?.json().await?;
            out.extend(page.items);
            match page.next_page_token {
                Some(t) => page_token = Some(t),
                None => break,
            }
        }
        Ok(out)
    }

    // === Tasks ===

    pub async fn create_task(&self, list_id: &str, body: &Value) -> Result<GoogleTask, ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}/lists/{}/tasks",
            self.tasks_base,
            urlencoding::encode(list_id)
        );
        let resp = self.http.post(&url).bearer_auth(&token).json(body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn patch_task(
        &self,
        list_id: &str,
        task_id: &str,
        body: &Value,
    ) -> Result<GoogleTask, ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}/lists/{}/tasks/{}",
            self.tasks_base,
            urlencoding::encode(list_id),
            urlencoding::encode(task_id)
        );
        let resp = self.http.patch(&url).bearer_auth(&token).json(body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn delete_task(&self, list_id: &str, task_id: &str) -> Result<(), ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}/lists/{}/tasks/{}",
            self.tasks_base,
            urlencoding::encode(list_id),
            urlencoding::encode(task_id)
        );
        let resp = self.http.delete(&url).bearer_auth(&token).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// All tasks in a list modified since `updated_min` (all tasks when
    /// `None`), following pagination. Deleted and hidden tasks are included
    /// so deletions and completions propagate.
    pub async fn list_tasks_updated_since(
        &self,
        list_id: &str,
        updated_min: Option<&str>,
    ) -> Result<Vec<GoogleTask>, ApiError> {
        let token = self.token().await?;
        let url = format!(
            "{}/lists/{}/tasks",
            self.tasks_base,
            urlencoding::encode(list_id)
        );

        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("showDeleted", "true".to_string()),
                ("showHidden", "true".to_string()),
                ("showCompleted", "true".to_string()),
                ("maxResults", "100".to_string()),
            ];
            if let Some(min) = updated_min {
                params.push(("updatedMin", min.to_string()));
            }
            if let Some(ref t) = page_token {
                params.push(("pageToken", t.clone()));
            }
            let resp = self
                .http
                .get(&url)
                .query(&params)
                .bearer_auth(&token)
                .send()
                .await?;
            let page: TasksPage = Self::check(resp).await?.json().await?;
            out.extend(page.items);
            match page.next_page_token {
                Some(t) => page_token = Some(t),
                None => break,
            }
        }
        Ok(out)
    }

    pub async fn list_task_lists(&self) -> Result<Vec<TaskList>, ApiError> {
        let token = self.token().await?;
        let url = format!("{}/users/@me/lists", self.tasks_base);

        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = Vec::new();
            if let Some(ref t) = page_token {
                params.push(("pageToken", t.clone()));
            }
            let resp = self
                .http
                .get(&url)
                .query(&params)
                .bearer_auth(&token)
                .send()
                .await?;
            let page: TaskListsPage = Self::check(resp).await?.json().await?;
            out.extend(page.items);
            match page.next_page_token {
                Some(t) => page_token = Some(t),
                None => break,
            }
        }
        Ok(out)
    }

    pub async fn create_task_list(&self, title: &str) -> Result<TaskList, ApiError> {
        let token = self.token().await?;
        let url = format!("{}/users/@me/lists", self.tasks_base);
        let body = serde_json::json!({ "title": title });
        let resp = self.http.post(&url).bearer_auth(&token).json(&body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}

/// Extract the provider reason code from a Google error body.
///
/// Bodies look like `{"error":{"code":403,"message":"...",
/// "errors":[{"reason":"rateLimitExceeded",...}],"status":"..."}}`.
fn parse_reason(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    if let Some(reason) = error
        .get("errors")
        .and_then(|e| e.get(0))
        .and_then(|e| e.get("reason"))
        .and_then(|r| r.as_str())
    {
        return Some(reason.to_string());
    }
    error
        .get("status")
        .and_then(|s| s.as_str())
        .map(|s| s.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
