//! Typed constructors for the calls the app makes against the planner API.
//!
//! Every mutating constructor tags its operation with the `MutationKind`
//! whose query groups the executor invalidates on success.

use crate::application::error::SyncError;
use crate::application::invalidation::MutationKind;
use crate::application::request_executor::ApiOperation;
use crate::domain::completion::is_completed;
use crate::domain::models::{QueryGroup, TaskOccurrence};
use crate::infrastructure::api_transport::{ApiRequest, HttpMethod};
use chrono::NaiveDate;
use serde_json::{json, Value};

const DATE_FORMAT: &str = "%Y-%m-%d";

fn required_text(value: &str, field_name: &str) -> Result<String, SyncError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SyncError::InvalidInput(format!("{field_name} must not be empty")));
    }
    Ok(value.to_string())
}

fn mutation(
    method: HttpMethod,
    segments: Vec<String>,
    body: Option<Value>,
    kind: MutationKind,
) -> ApiOperation {
    let mut request = ApiRequest::new(method, segments);
    if let Some(body) = body {
        request = request.with_body(body);
    }
    ApiOperation::mutation(request, kind)
}

fn segments(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

/// List query for one cached group. The agenda defaults to the server's
/// current window; use `agenda_range` for an explicit one.
pub fn group_query(group: QueryGroup) -> ApiOperation {
    let path = match group {
        QueryGroup::Agenda => "agenda",
        QueryGroup::Tasks => "tasks",
        QueryGroup::Habits => "habits",
        QueryGroup::Boards => "boards",
        QueryGroup::Inbox => "inbox",
        QueryGroup::Reminders => "reminders",
        QueryGroup::Pomodoro => "pomodoro",
    };
    ApiOperation::query(ApiRequest::new(HttpMethod::Get, ["api", path]))
}

pub fn agenda_range(start: NaiveDate, end: NaiveDate) -> Result<ApiOperation, SyncError> {
    if end < start {
        return Err(SyncError::InvalidInput(format!(
            "agenda range ends ({end}) before it starts ({start})"
        )));
    }
    Ok(ApiOperation::query(
        ApiRequest::new(HttpMethod::Get, ["api", "agenda"])
            .with_query("start", start.format(DATE_FORMAT).to_string())
            .with_query("end", end.format(DATE_FORMAT).to_string()),
    ))
}

pub fn create_task(fields: Value) -> ApiOperation {
    mutation(
        HttpMethod::Post,
        segments(&["api", "tasks"]),
        Some(fields),
        MutationKind::TaskCreate,
    )
}

pub fn update_task(task_id: &str, fields: Value) -> Result<ApiOperation, SyncError> {
    let task_id = required_text(task_id, "task_id")?;
    Ok(mutation(
        HttpMethod::Patch,
        segments(&["api", "tasks", &task_id]),
        Some(fields),
        MutationKind::TaskUpdate,
    ))
}

pub fn delete_task(task_id: &str) -> Result<ApiOperation, SyncError> {
    let task_id = required_text(task_id, "task_id")?;
    Ok(mutation(
        HttpMethod::Delete,
        segments(&["api", "tasks", &task_id]),
        None,
        MutationKind::TaskDelete,
    ))
}

pub fn reorder_tasks(column_id: &str, task_ids: &[String]) -> Result<ApiOperation, SyncError> {
    let column_id = required_text(column_id, "column_id")?;
    Ok(mutation(
        HttpMethod::Put,
        segments(&["api", "tasks", "reorder"]),
        Some(json!({ "columnId": column_id, "taskIds": task_ids })),
        MutationKind::TaskReorder,
    ))
}

/// Flips the completion state a view currently shows for `item`. Recurring
/// items are addressed per occurrence so only that date changes.
pub fn toggle_completion_request(item: &TaskOccurrence) -> Result<ApiOperation, SyncError> {
    item.validate().map_err(SyncError::InvalidInput)?;
    let task_id = required_text(&item.base_task_id, "base_task_id")?;
    let completed = !is_completed(item);

    let operation = match (item.is_recurring(), item.instance_date) {
        (true, Some(instance_date)) => mutation(
            HttpMethod::Put,
            segments(&[
                "api",
                "tasks",
                &task_id,
                "occurrences",
                &instance_date.format(DATE_FORMAT).to_string(),
            ]),
            Some(json!({ "completed": completed })),
            MutationKind::TaskToggleCompletion,
        ),
        (true, None) => {
            return Err(SyncError::InvalidInput(
                "recurring task needs an instance_date to toggle".to_string(),
            ));
        }
        (false, _) => mutation(
            HttpMethod::Post,
            segments(&["api", "tasks", &task_id, "toggle"]),
            Some(json!({ "completed": completed })),
            MutationKind::TaskToggleCompletion,
        ),
    };
    Ok(operation)
}

pub fn create_subtask(task_id: &str, title: &str) -> Result<ApiOperation, SyncError> {
    let task_id = required_text(task_id, "task_id")?;
    let title = required_text(title, "title")?;
    Ok(mutation(
        HttpMethod::Post,
        segments(&["api", "tasks", &task_id, "subtasks"]),
        Some(json!({ "title": title })),
        MutationKind::SubtaskCreate,
    ))
}

pub fn update_subtask(
    task_id: &str,
    subtask_id: &str,
    fields: Value,
) -> Result<ApiOperation, SyncError> {
    let task_id = required_text(task_id, "task_id")?;
    let subtask_id = required_text(subtask_id, "subtask_id")?;
    Ok(mutation(
        HttpMethod::Patch,
        segments(&["api", "tasks", &task_id, "subtasks", &subtask_id]),
        Some(fields),
        MutationKind::SubtaskUpdate,
    ))
}

pub fn delete_subtask(task_id: &str, subtask_id: &str) -> Result<ApiOperation, SyncError> {
    let task_id = required_text(task_id, "task_id")?;
    let subtask_id = required_text(subtask_id, "subtask_id")?;
    Ok(mutation(
        HttpMethod::Delete,
        segments(&["api", "tasks", &task_id, "subtasks", &subtask_id]),
        None,
        MutationKind::SubtaskDelete,
    ))
}

pub fn toggle_subtask(task_id: &str, subtask_id: &str) -> Result<ApiOperation, SyncError> {
    let task_id = required_text(task_id, "task_id")?;
    let subtask_id = required_text(subtask_id, "subtask_id")?;
    Ok(mutation(
        HttpMethod::Post,
        segments(&["api", "tasks", &task_id, "subtasks", &subtask_id, "toggle"]),
        None,
        MutationKind::SubtaskToggle,
    ))
}

pub fn create_habit(fields: Value) -> ApiOperation {
    mutation(
        HttpMethod::Post,
        segments(&["api", "habits"]),
        Some(fields),
        MutationKind::HabitCreate,
    )
}

pub fn update_habit(habit_id: &str, fields: Value) -> Result<ApiOperation, SyncError> {
    let habit_id = required_text(habit_id, "habit_id")?;
    Ok(mutation(
        HttpMethod::Patch,
        segments(&["api", "habits", &habit_id]),
        Some(fields),
        MutationKind::HabitUpdate,
    ))
}

pub fn delete_habit(habit_id: &str) -> Result<ApiOperation, SyncError> {
    let habit_id = required_text(habit_id, "habit_id")?;
    Ok(mutation(
        HttpMethod::Delete,
        segments(&["api", "habits", &habit_id]),
        None,
        MutationKind::HabitDelete,
    ))
}

pub fn toggle_habit_completion(habit_id: &str, date: NaiveDate) -> Result<ApiOperation, SyncError> {
    let habit_id = required_text(habit_id, "habit_id")?;
    Ok(mutation(
        HttpMethod::Post,
        segments(&["api", "habits", &habit_id, "toggle"]),
        Some(json!({ "date": date.format(DATE_FORMAT).to_string() })),
        MutationKind::HabitToggleCompletion,
    ))
}

pub fn create_board(name: &str) -> Result<ApiOperation, SyncError> {
    let name = required_text(name, "name")?;
    Ok(mutation(
        HttpMethod::Post,
        segments(&["api", "boards"]),
        Some(json!({ "name": name })),
        MutationKind::BoardCreate,
    ))
}

pub fn update_board(board_id: &str, fields: Value) -> Result<ApiOperation, SyncError> {
    let board_id = required_text(board_id, "board_id")?;
    Ok(mutation(
        HttpMethod::Patch,
        segments(&["api", "boards", &board_id]),
        Some(fields),
        MutationKind::BoardUpdate,
    ))
}

pub fn delete_board(board_id: &str) -> Result<ApiOperation, SyncError> {
    let board_id = required_text(board_id, "board_id")?;
    Ok(mutation(
        HttpMethod::Delete,
        segments(&["api", "boards", &board_id]),
        None,
        MutationKind::BoardDelete,
    ))
}

pub fn create_column(board_id: &str, name: &str) -> Result<ApiOperation, SyncError> {
    let board_id = required_text(board_id, "board_id")?;
    let name = required_text(name, "name")?;
    Ok(mutation(
        HttpMethod::Post,
        segments(&["api", "boards", &board_id, "columns"]),
        Some(json!({ "name": name })),
        MutationKind::ColumnCreate,
    ))
}

pub fn update_column(
    board_id: &str,
    column_id: &str,
    fields: Value,
) -> Result<ApiOperation, SyncError> {
    let board_id = required_text(board_id, "board_id")?;
    let column_id = required_text(column_id, "column_id")?;
    Ok(mutation(
        HttpMethod::Patch,
        segments(&["api", "boards", &board_id, "columns", &column_id]),
        Some(fields),
        MutationKind::ColumnUpdate,
    ))
}

pub fn delete_column(board_id: &str, column_id: &str) -> Result<ApiOperation, SyncError> {
    let board_id = required_text(board_id, "board_id")?;
    let column_id = required_text(column_id, "column_id")?;
    Ok(mutation(
        HttpMethod::Delete,
        segments(&["api", "boards", &board_id, "columns", &column_id]),
        None,
        MutationKind::ColumnDelete,
    ))
}

pub fn reorder_columns(board_id: &str, column_ids: &[String]) -> Result<ApiOperation, SyncError> {
    let board_id = required_text(board_id, "board_id")?;
    Ok(mutation(
        HttpMethod::Put,
        segments(&["api", "boards", &board_id, "columns", "reorder"]),
        Some(json!({ "columnIds": column_ids })),
        MutationKind::ColumnReorder,
    ))
}

pub fn capture_inbox(content: &str) -> Result<ApiOperation, SyncError> {
    let content = required_text(content, "content")?;
    Ok(mutation(
        HttpMethod::Post,
        segments(&["api", "inbox"]),
        Some(json!({ "content": content })),
        MutationKind::InboxCapture,
    ))
}

/// Turns an inbox item into a task on the given board column.
pub fn process_inbox(item_id: &str, fields: Value) -> Result<ApiOperation, SyncError> {
    let item_id = required_text(item_id, "item_id")?;
    Ok(mutation(
        HttpMethod::Post,
        segments(&["api", "inbox", &item_id, "process"]),
        Some(fields),
        MutationKind::InboxProcess,
    ))
}

pub fn delete_inbox(item_id: &str) -> Result<ApiOperation, SyncError> {
    let item_id = required_text(item_id, "item_id")?;
    Ok(mutation(
        HttpMethod::Delete,
        segments(&["api", "inbox", &item_id]),
        None,
        MutationKind::InboxDelete,
    ))
}

pub fn create_reminder(fields: Value) -> ApiOperation {
    mutation(
        HttpMethod::Post,
        segments(&["api", "reminders"]),
        Some(fields),
        MutationKind::ReminderCreate,
    )
}

pub fn dismiss_reminder(reminder_id: &str) -> Result<ApiOperation, SyncError> {
    let reminder_id = required_text(reminder_id, "reminder_id")?;
    Ok(mutation(
        HttpMethod::Post,
        segments(&["api", "reminders", &reminder_id, "dismiss"]),
        None,
        MutationKind::ReminderDismiss,
    ))
}

pub fn start_pomodoro(task_id: Option<&str>) -> ApiOperation {
    let task_id = task_id.map(str::trim).filter(|value| !value.is_empty());
    mutation(
        HttpMethod::Post,
        segments(&["api", "pomodoro", "start"]),
        Some(json!({ "taskId": task_id })),
        MutationKind::PomodoroStart,
    )
}

pub fn pause_pomodoro() -> ApiOperation {
    mutation(
        HttpMethod::Post,
        segments(&["api", "pomodoro", "pause"]),
        None,
        MutationKind::PomodoroPause,
    )
}

pub fn complete_pomodoro() -> ApiOperation {
    mutation(
        HttpMethod::Post,
        segments(&["api", "pomodoro", "complete"]),
        None,
        MutationKind::PomodoroComplete,
    )
}

/// Natural-language command, e.g. "move standup to 10am tomorrow".
pub fn execute_command(input: &str) -> Result<ApiOperation, SyncError> {
    let input = required_text(input, "input")?;
    Ok(mutation(
        HttpMethod::Post,
        segments(&["api", "commands"]),
        Some(json!({ "input": input })),
        MutationKind::ExecuteCommand,
    ))
}
