use crate::errors::{AppError, AppResult};
use crate::models::{Note, Priority};
use chrono::{DateTime, Utc};

/// Marks an incomplete note as completed and remembers its priority.
///
/// `priority` itself is left alone; [`uncomplete`] restores from
/// `previous_priority`.
pub fn complete(note: &Note, now: DateTime<Utc>) -> AppResult<Note> {
    if note.is_completed {
        return Err(AppError::InvalidState(format!("Note {} is already completed", note.id)));
    }

    let mut updated = note.clone();
    updated.is_completed = true;
    updated.previous_priority = Some(note.priority);
    updated.updated_at = now.max(note.updated_at);
    Ok(updated)
}

/// Reopens a completed note, restoring the priority it had when completed.
pub fn uncomplete(note: &Note, now: DateTime<Utc>) -> AppResult<Note> {
    if !note.is_completed {
        return Err(AppError::InvalidState(format!("Note {} is not completed", note.id)));
    }

    let mut updated = note.clone();
    updated.is_completed = false;
    updated.priority = note.previous_priority.unwrap_or(note.priority);
    updated.previous_priority = None;
    updated.updated_at = now.max(note.updated_at);
    Ok(updated)
}

/// Branches on the current state and applies exactly one transition.
pub fn toggle_completion(note: &Note, now: DateTime<Utc>) -> AppResult<Note> {
    if note.is_completed {
        uncomplete(note, now)
    } else {
        complete(note, now)
    }
}

/// Priority the user assigned, which is what lists should show and sort by.
pub fn display_priority(note: &Note) -> Priority {
    match (note.is_completed, note.previous_priority) {
        (true, Some(previous)) => previous,
        _ => note.priority,
    }
}
