use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_expires_at: Option<DateTime<Utc>>,
}

impl AuthTokens {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.access_token, "tokens.access_token")?;
        validate_non_empty(&self.refresh_token, "tokens.refresh_token")?;
        Ok(())
    }

    /// A token without an expiry hint is treated as valid until the server
    /// says otherwise.
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        if self.access_token.trim().is_empty() {
            return false;
        }
        match self.access_expires_at {
            Some(expires_at) => expires_at > now + chrono::Duration::seconds(leeway_seconds),
            None => true,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.access_expires_at
            .is_some_and(|expires_at| expires_at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    tokens: Option<AuthTokens>,
    is_loading: bool,
}

impl Session {
    pub fn tokens(&self) -> Option<&AuthTokens> {
        self.tokens.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .map(|tokens| tokens.access_token.as_str())
            .filter(|token| !token.trim().is_empty())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .map(|tokens| tokens.refresh_token.as_str())
            .filter(|token| !token.trim().is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn set_loading(&mut self, is_loading: bool) {
        self.is_loading = is_loading;
    }

    /// Blank access tokens are never installed, so `is_authenticated` stays
    /// equivalent to "a non-empty access token is held".
    pub fn install(&mut self, tokens: AuthTokens) {
        if tokens.access_token.trim().is_empty() {
            self.tokens = None;
        } else {
            self.tokens = Some(tokens);
        }
    }

    pub fn clear(&mut self) {
        self.tokens = None;
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            is_authenticated: self.is_authenticated(),
            is_loading: self.is_loading,
            access_expires_at: self.tokens.as_ref().and_then(|tokens| tokens.access_expires_at),
        }
    }
}

/// Secret-free view of the session published to collaborators.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub access_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.email, "credentials.email")?;
        validate_non_empty(&self.password, "credentials.password")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryGroup {
    Agenda,
    Tasks,
    Habits,
    Boards,
    Inbox,
    Reminders,
    Pomodoro,
}

impl QueryGroup {
    pub const ALL: [QueryGroup; 7] = [
        Self::Agenda,
        Self::Tasks,
        Self::Habits,
        Self::Boards,
        Self::Inbox,
        Self::Reminders,
        Self::Pomodoro,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agenda => "agenda",
            Self::Tasks => "tasks",
            Self::Habits => "habits",
            Self::Boards => "boards",
            Self::Inbox => "inbox",
            Self::Reminders => "reminders",
            Self::Pomodoro => "pomodoro",
        }
    }
}

impl fmt::Display for QueryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type QueryGroupSet = BTreeSet<QueryGroup>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Task,
    Board,
    Column,
    Inbox,
    Reminder,
    Pomodoro,
    Subtask,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        Self::Task,
        Self::Board,
        Self::Column,
        Self::Inbox,
        Self::Reminder,
        Self::Pomodoro,
        Self::Subtask,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "task" => Some(Self::Task),
            "board" => Some(Self::Board),
            "column" => Some(Self::Column),
            "inbox" => Some(Self::Inbox),
            "reminder" => Some(Self::Reminder),
            "pomodoro" => Some(Self::Pomodoro),
            "subtask" => Some(Self::Subtask),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Board => "board",
            Self::Column => "column",
            Self::Inbox => "inbox",
            Self::Reminder => "reminder",
            Self::Pomodoro => "pomodoro",
            Self::Subtask => "subtask",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Created,
    Updated,
    Deleted,
    Reordered,
    Triggered,
    Paused,
    Completed,
    Started,
}

impl EventAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            "reordered" => Some(Self::Reordered),
            "triggered" => Some(Self::Triggered),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "started" => Some(Self::Started),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Reordered => "reordered",
            Self::Triggered => "triggered",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Started => "started",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeEvent {
    pub kind: EventKind,
    pub action: EventAction,
    pub subject_ids: BTreeMap<String, String>,
}

impl RealtimeEvent {
    pub fn subject_id(&self, role: &str) -> Option<&str> {
        self.subject_ids.get(role).map(String::as_str)
    }
}

/// One task as rendered by a view. For recurring tasks this is a single dated
/// occurrence; `completed` is the per-occurrence override when one exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskOccurrence {
    pub base_task_id: String,
    #[serde(default)]
    pub instance_date: Option<NaiveDate>,
    #[serde(default)]
    pub recurring_pattern: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub column_name: Option<String>,
}

impl TaskOccurrence {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.base_task_id, "occurrence.base_task_id")?;
        if self.instance_date.is_some() && self.recurring_pattern.is_none() {
            return Err("occurrence.instance_date requires occurrence.recurring_pattern".to_string());
        }
        Ok(())
    }

    pub fn is_recurring(&self) -> bool {
        self.recurring_pattern.is_some()
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
