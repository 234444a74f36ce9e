use crate::db::{timestamp_now, Database};
use crate::errors::{AppError, AppResult};
use crate::filter::{LiveFilter, LocationsView, NotesView};
use crate::geofence::targets_at;
use crate::lifecycle;
use crate::models::{
    BooleanResponse, CreateLocationPayload, CreateNotePayload, GeoPoint, HomeSummary, Location, Note, NoteFilter,
    NoteQuery, NoteWithLocation, NotificationLog, PlaceSearchResult, PlannerSettings, UpdateNotePayload, UserAction,
};
use crate::places::{location_draft_from_place, PlaceSearch, PlaceSearchRequest};
use crate::repository::Repository;
use crate::validation::{validate_new_location, validate_new_note, validate_note_edit};
use chrono::Duration;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

pub const DATABASE_FILE: &str = "soft_planning.db";

/// Process-level entry point. Built once at startup and cloned into whatever
/// needs it; there is no global instance.
#[derive(Clone)]
pub struct Planner {
    repository: Arc<Repository>,
    notes_view: Arc<NotesView>,
    locations_view: Arc<LocationsView>,
}

impl Planner {
    /// Opens `<data_dir>/soft_planning.db`. The async operations need a Tokio
    /// runtime; opening does not.
    pub fn open(data_dir: impl Into<PathBuf>) -> AppResult<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let db = Database::new(&data_dir.join(DATABASE_FILE))?;
        tracing::info!(path = %db.path().display(), "planner store opened");
        Self::with_database(db)
    }

    /// The live views are attached to the repository, so every mutation has
    /// refreshed them by the time it returns.
    pub fn with_database(db: Database) -> AppResult<Self> {
        let repository = Arc::new(Repository::new(Arc::new(db))?);
        let notes_view = Arc::new(LiveFilter::new());
        let locations_view = Arc::new(LiveFilter::new());
        repository.attach_notes_view(notes_view.clone())?;
        repository.attach_locations_view(locations_view.clone())?;

        Ok(Self {
            repository,
            notes_view,
            locations_view,
        })
    }

    // Notes

    pub async fn add_note(&self, payload: CreateNotePayload) -> AppResult<Note> {
        validate_new_note(&payload)?;
        let note = self
            .blocking(move |repository| {
                if let Some(location_id) = payload.location_id {
                    ensure_location_exists(repository, location_id)?;
                }
                repository.create_note(&payload)
            })
            .await?;
        tracing::info!(note_id = note.id, "note added");
        Ok(note)
    }

    /// Applies the edit form. Completion state and `previous_priority` are
    /// left as they are.
    pub async fn edit_note(&self, note_id: i64, payload: UpdateNotePayload) -> AppResult<Note> {
        validate_note_edit(&payload)?;
        self.blocking(move |repository| {
            let mut note = repository.require_note(note_id)?;
            if let Some(location_id) = payload.location_id {
                ensure_location_exists(repository, location_id)?;
            }
            note.title = payload.title;
            note.content = payload.content;
            note.note_type = payload.note_type;
            note.priority = payload.priority;
            note.location_id = payload.location_id;
            note.updated_at = timestamp_now().max(note.updated_at);
            repository.update_note(&note)?;
            Ok(note)
        })
        .await
    }

    /// Completes an open note or reopens a completed one. Two toggles racing
    /// on the same note resolve last-write-wins.
    pub async fn toggle_note_completion(&self, note_id: i64) -> AppResult<Note> {
        let note = self
            .transition(note_id, |note| lifecycle::toggle_completion(note, timestamp_now()))
            .await?;
        tracing::info!(note_id, completed = note.is_completed, "note completion toggled");
        Ok(note)
    }

    pub async fn complete_note(&self, note_id: i64) -> AppResult<Note> {
        self.transition(note_id, |note| lifecycle::complete(note, timestamp_now()))
            .await
    }

    pub async fn reopen_note(&self, note_id: i64) -> AppResult<Note> {
        self.transition(note_id, |note| lifecycle::uncomplete(note, timestamp_now()))
            .await
    }

    pub async fn delete_note(&self, note_id: i64) -> AppResult<BooleanResponse> {
        self.blocking(move |repository| repository.delete_note(note_id))
            .await?;
        tracing::info!(note_id, "note deleted");
        Ok(BooleanResponse { success: true })
    }

    pub async fn delete_all_completed(&self) -> AppResult<usize> {
        let removed = self
            .blocking(|repository| repository.delete_all_completed())
            .await?;
        tracing::info!(removed, "completed notes cleared");
        Ok(removed)
    }

    pub async fn get_note(&self, note_id: i64) -> AppResult<Note> {
        self.blocking(move |repository| repository.require_note(note_id))
            .await
    }

    pub async fn list_notes(&self, query: NoteQuery) -> AppResult<Vec<Note>> {
        self.blocking(move |repository| repository.list_notes(&query))
            .await
    }

    pub async fn notes_for_location(&self, location_id: i64) -> AppResult<Vec<Note>> {
        self.list_notes(NoteQuery::ForLocation(location_id)).await
    }

    pub async fn home_summary(&self) -> AppResult<HomeSummary> {
        self.blocking(|repository| {
            let limit = repository.get_settings()?.recent_notes_limit as usize;
            let notes = repository.list_notes(&NoteQuery::All)?;
            let completed_notes = notes.iter().filter(|note| note.is_completed).count();
            let recent_notes = notes
                .iter()
                .filter(|note| !note.is_completed)
                .take(limit)
                .cloned()
                .collect();
            Ok(HomeSummary {
                total_notes: notes.len(),
                completed_notes,
                active_notes: notes.len() - completed_notes,
                recent_notes,
            })
        })
        .await
    }

    // Note list screen

    pub fn search_notes(&self, query: &str) {
        self.notes_view.set_query(query);
    }

    pub fn filter_notes(&self, filter: NoteFilter) {
        self.notes_view.set_category(filter);
    }

    pub fn visible_notes(&self) -> Vec<Note> {
        self.notes_view.current()
    }

    pub fn watch_notes(&self) -> watch::Receiver<Vec<Note>> {
        self.notes_view.subscribe()
    }

    // Locations

    pub async fn add_location(&self, payload: CreateLocationPayload) -> AppResult<Location> {
        let point = validate_new_location(&payload)?;
        let location = self
            .blocking(move |repository| {
                let radius = match payload.radius {
                    Some(radius) => radius,
                    None => repository.get_settings()?.default_radius_m,
                };
                repository.create_location(payload.name.trim(), payload.address.trim(), point, radius)
            })
            .await?;
        tracing::info!(location_id = location.id, "location added");
        Ok(location)
    }

    pub async fn add_location_from_place(&self, place: PlaceSearchResult, radius: Option<u32>) -> AppResult<Location> {
        let radius = match radius {
            Some(radius) => radius,
            None => self.settings().await?.default_radius_m,
        };
        self.add_location(location_draft_from_place(&place, radius)).await
    }

    /// Flips the soft-delete flag. Referencing notes are untouched.
    pub async fn toggle_location_active(&self, location_id: i64) -> AppResult<Location> {
        self.blocking(move |repository| {
            let mut location = repository.require_location(location_id)?;
            location.is_active = !location.is_active;
            repository.set_location_active(location_id, location.is_active)?;
            Ok(location)
        })
        .await
    }

    /// Returns how many notes lost their location reference.
    pub async fn delete_location(&self, location_id: i64) -> AppResult<usize> {
        let cleared = self
            .blocking(move |repository| repository.delete_location(location_id))
            .await?;
        tracing::info!(location_id, cleared_notes = cleared, "location deleted");
        Ok(cleared)
    }

    pub async fn get_location(&self, location_id: i64) -> AppResult<Location> {
        self.blocking(move |repository| repository.require_location(location_id))
            .await
    }

    pub async fn active_locations(&self) -> AppResult<Vec<Location>> {
        self.blocking(|repository| repository.list_active_locations())
            .await
    }

    pub fn search_locations(&self, query: &str) {
        self.locations_view.set_query(query);
    }

    pub fn visible_locations(&self) -> Vec<Location> {
        self.locations_view.current()
    }

    pub fn watch_locations(&self) -> watch::Receiver<Vec<Location>> {
        self.locations_view.subscribe()
    }

    // Place lookup

    pub async fn search_places(
        &self,
        search: Arc<dyn PlaceSearch>,
        query: &str,
        center: GeoPoint,
    ) -> AppResult<Vec<PlaceSearchResult>> {
        let settings = self.settings().await?;
        self.run_place_search(search, PlaceSearchRequest::text(query, center, &settings))
            .await
    }

    pub async fn search_nearby_places(
        &self,
        search: Arc<dyn PlaceSearch>,
        place_type: &str,
        center: GeoPoint,
    ) -> AppResult<Vec<PlaceSearchResult>> {
        let settings = self.settings().await?;
        self.run_place_search(search, PlaceSearchRequest::nearby(place_type, center, &settings))
            .await
    }

    async fn run_place_search(
        &self,
        search: Arc<dyn PlaceSearch>,
        request: PlaceSearchRequest,
    ) -> AppResult<Vec<PlaceSearchResult>> {
        if request.query.is_empty() {
            return Err(AppError::Validation("Search text is required".to_string()));
        }
        let max_results = request.max_results as usize;
        let mut results = tokio::task::spawn_blocking(move || search.search_places(&request)).await??;
        results.truncate(max_results);
        tracing::debug!(results = results.len(), "place search finished");
        Ok(results)
    }

    // Geofencing and notification history

    /// Open notes whose active location fence contains `point`, highest
    /// priority first.
    pub async fn geofence_targets_at(&self, point: GeoPoint) -> AppResult<Vec<NoteWithLocation>> {
        let targets = self
            .blocking(|repository| repository.active_notes_with_location_details())
            .await?;
        Ok(targets_at(&targets, point))
    }

    pub async fn record_notification(&self, note_id: i64, location_id: i64) -> AppResult<NotificationLog> {
        self.blocking(move |repository| {
            repository.require_note(note_id)?;
            ensure_location_exists(repository, location_id)?;
            repository.insert_notification_log(note_id, location_id, timestamp_now(), UserAction::NoAction)
        })
        .await
    }

    pub async fn respond_to_notification(&self, log_id: i64, user_action: UserAction) -> AppResult<()> {
        self.blocking(move |repository| repository.update_user_action(log_id, user_action, timestamp_now()))
            .await
    }

    pub async fn notification_history(&self, limit: Option<u32>) -> AppResult<Vec<NotificationLog>> {
        self.blocking(move |repository| match limit {
            Some(limit) => repository.recent_notification_logs(limit),
            None => repository.list_notification_logs(),
        })
        .await
    }

    /// Drops notification logs older than the configured retention window.
    pub async fn run_retention(&self) -> AppResult<usize> {
        let removed = self
            .blocking(|repository| {
                let days = repository.get_settings()?.notification_log_retention_days;
                let cutoff = timestamp_now() - Duration::days(i64::from(days));
                repository.delete_logs_before(cutoff)
            })
            .await?;
        if removed > 0 {
            tracing::info!(removed, "old notification logs removed");
        }
        Ok(removed)
    }

    // Settings

    pub async fn settings(&self) -> AppResult<PlannerSettings> {
        self.blocking(|repository| repository.get_settings())
            .await
    }

    pub async fn update_settings(&self, update: serde_json::Value) -> AppResult<PlannerSettings> {
        self.blocking(move |repository| repository.update_settings(update))
            .await
    }

    async fn transition<F>(&self, note_id: i64, apply: F) -> AppResult<Note>
    where
        F: FnOnce(&Note) -> AppResult<Note> + Send + 'static,
    {
        self.blocking(move |repository| {
            let note = repository.require_note(note_id)?;
            let updated = apply(&note)?;
            repository.update_note(&updated)?;
            Ok(updated)
        })
        .await
    }

    async fn blocking<T, F>(&self, op: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Repository) -> AppResult<T> + Send + 'static,
    {
        let repository = self.repository.clone();
        tokio::task::spawn_blocking(move || op(&repository)).await?
    }
}

fn ensure_location_exists(repository: &Repository, location_id: i64) -> AppResult<()> {
    if !repository.location_exists(location_id)? {
        return Err(AppError::NotFound(format!("Location {} not found", location_id)));
    }
    Ok(())
}
