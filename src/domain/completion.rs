use crate::domain::models::TaskOccurrence;

pub const DONE_COLUMN_NAME: &str = "done";

/// Derives whether a task or recurring occurrence reads as done.
///
/// A recurring occurrence carrying an explicit `completed` override is
/// decided by that override alone, so a base card parked in the Done column
/// does not mark a pending future occurrence done (and vice versa). Every
/// other item is done exactly when its column is named "done", compared
/// case-insensitively.
pub fn is_completed(item: &TaskOccurrence) -> bool {
    if item.recurring_pattern.is_some() {
        if let Some(completed) = item.completed {
            return completed;
        }
    }
    is_done_column(item.column_name.as_deref())
}

pub fn is_done_column(column_name: Option<&str>) -> bool {
    column_name.is_some_and(|name| name.eq_ignore_ascii_case(DONE_COLUMN_NAME))
}
