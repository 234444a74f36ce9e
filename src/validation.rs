use crate::errors::{AppError, AppResult};
use crate::models::{CreateLocationPayload, CreateNotePayload, GeoPoint, UpdateNotePayload};

const MIN_EDIT_TITLE_CHARS: usize = 3;
const MIN_EDIT_CONTENT_CHARS: usize = 5;
const MIN_LOCATION_NAME_CHARS: usize = 2;

/// The add-note form only requires both fields to be present.
pub fn validate_new_note(payload: &CreateNotePayload) -> AppResult<()> {
    let mut problems = Vec::new();
    if payload.title.trim().is_empty() {
        problems.push("Title is required".to_string());
    }
    if payload.content.trim().is_empty() {
        problems.push("Content is required".to_string());
    }
    into_result(problems)
}

/// Editing also enforces minimum lengths on the trimmed text.
pub fn validate_note_edit(payload: &UpdateNotePayload) -> AppResult<()> {
    let mut problems = Vec::new();
    check_min_length(&payload.title, "Title", MIN_EDIT_TITLE_CHARS, &mut problems);
    check_min_length(&payload.content, "Content", MIN_EDIT_CONTENT_CHARS, &mut problems);
    into_result(problems)
}

/// Returns the picked point once the name and coordinates check out.
pub fn validate_new_location(payload: &CreateLocationPayload) -> AppResult<GeoPoint> {
    let mut problems = Vec::new();
    check_min_length(&payload.name, "Location name", MIN_LOCATION_NAME_CHARS, &mut problems);

    if payload.radius == Some(0) {
        problems.push("Radius must be greater than zero".to_string());
    }

    match payload.point {
        None => problems.push("Please select a location on the map or from search results".to_string()),
        Some(point) => {
            if let Err(message) = check_point(point) {
                problems.push(message);
            }
        }
    }

    into_result(problems)?;
    payload
        .point
        .ok_or_else(|| AppError::Validation("Please select a location on the map or from search results".to_string()))
}

fn check_point(point: GeoPoint) -> Result<(), String> {
    if !point.latitude.is_finite() || !(-90.0..=90.0).contains(&point.latitude) {
        return Err(format!("Latitude {} is out of range", point.latitude));
    }
    if !point.longitude.is_finite() || !(-180.0..=180.0).contains(&point.longitude) {
        return Err(format!("Longitude {} is out of range", point.longitude));
    }
    Ok(())
}

fn check_min_length(value: &str, field: &str, min_chars: usize, problems: &mut Vec<String>) {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        problems.push(format!("{} is required", field));
    } else if trimmed.chars().count() < min_chars {
        problems.push(format!("{} must be at least {} characters", field, min_chars));
    }
}

fn into_result(problems: Vec<String>) -> AppResult<()> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(problems.join("; ")))
    }
}
