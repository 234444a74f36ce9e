use crate::db::{timestamp_now, Database};
use crate::errors::{AppError, AppResult};
use crate::filter::{LocationsView, NotesView};
use crate::models::{
    CreateNotePayload, GeoPoint, Location, Note, NoteQuery, NoteType, NoteWithLocation, NotificationLog,
    PlannerSettings, Priority, UserAction,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Default)]
struct NoteObservers {
    queries: Vec<(NoteQuery, watch::Sender<Vec<Note>>)>,
    views: Vec<Arc<NotesView>>,
}

/// Sole writer for notes, locations and notification logs.
///
/// Every committed mutation republishes the observed collections before it
/// returns. Receivers handed out by the `observe_*` methods and attached live
/// views therefore hold the current store contents as soon as the write call
/// comes back.
pub struct Repository {
    db: Arc<Database>,
    all_notes: watch::Sender<Vec<Note>>,
    note_observers: Mutex<NoteObservers>,
    all_locations: watch::Sender<Vec<Location>>,
    active_locations: watch::Sender<Vec<Location>>,
    // Also serializes location republishing so a slower refresh cannot overwrite a newer one.
    location_views: Mutex<Vec<Arc<LocationsView>>>,
}

impl Repository {
    pub fn new(db: Arc<Database>) -> AppResult<Self> {
        let (all_notes, _) = watch::channel(db.list_notes(&NoteQuery::All)?);
        let (all_locations, _) = watch::channel(db.list_locations(false)?);
        let (active_locations, _) = watch::channel(db.list_locations(true)?);
        Ok(Self {
            db,
            all_notes,
            note_observers: Mutex::new(NoteObservers::default()),
            all_locations,
            active_locations,
            location_views: Mutex::new(Vec::new()),
        })
    }

    // Notes

    pub fn create_note(&self, payload: &CreateNotePayload) -> AppResult<Note> {
        let note = self.db.insert_note(payload, timestamp_now())?;
        tracing::debug!(note_id = note.id, note_type = note.note_type.as_str(), "note created");
        self.publish_notes();
        Ok(note)
    }

    pub fn update_note(&self, note: &Note) -> AppResult<()> {
        self.db.update_note(note)?;
        tracing::debug!(note_id = note.id, completed = note.is_completed, "note updated");
        self.publish_notes();
        Ok(())
    }

    pub fn update_note_priority(
        &self,
        note_id: i64,
        priority: Priority,
        previous_priority: Option<Priority>,
        updated_at: DateTime<Utc>,
    ) -> AppResult<()> {
        if !self
            .db
            .update_note_priority(note_id, priority, previous_priority, updated_at)?
        {
            return Err(AppError::NotFound(format!("Note {} not found", note_id)));
        }
        self.publish_notes();
        Ok(())
    }

    pub fn delete_note(&self, note_id: i64) -> AppResult<()> {
        if !self.db.delete_note(note_id)? {
            return Err(AppError::NotFound(format!("Note {} not found", note_id)));
        }
        tracing::debug!(note_id, "note deleted");
        self.publish_notes();
        Ok(())
    }

    pub fn delete_all_completed(&self) -> AppResult<usize> {
        let removed = self.db.delete_all_completed_notes()?;
        tracing::debug!(removed, "completed notes deleted");
        if removed > 0 {
            self.publish_notes();
        }
        Ok(removed)
    }

    pub fn get_note(&self, note_id: i64) -> AppResult<Option<Note>> {
        self.db.get_note(note_id)
    }

    pub fn require_note(&self, note_id: i64) -> AppResult<Note> {
        self.db
            .get_note(note_id)?
            .ok_or_else(|| AppError::NotFound(format!("Note {} not found", note_id)))
    }

    pub fn list_notes(&self, query: &NoteQuery) -> AppResult<Vec<Note>> {
        self.db.list_notes(query)
    }

    pub fn observe_all_notes(&self) -> watch::Receiver<Vec<Note>> {
        self.all_notes.subscribe()
    }

    /// Live result of a store-side query, refreshed after every note mutation.
    pub fn observe_notes(&self, query: NoteQuery) -> AppResult<watch::Receiver<Vec<Note>>> {
        if query == NoteQuery::All {
            return Ok(self.observe_all_notes());
        }

        let mut observers = self.lock_observers()?;
        let (sender, receiver) = watch::channel(self.db.list_notes(&query)?);
        observers.queries.push((query, sender));
        Ok(receiver)
    }

    /// Makes `view` follow the full note list. Its source is replaced inside
    /// every note mutation, before the mutation returns.
    pub fn attach_notes_view(&self, view: Arc<NotesView>) -> AppResult<()> {
        let mut observers = self.lock_observers()?;
        view.set_source(self.all_notes.borrow().clone());
        observers.views.push(view);
        Ok(())
    }

    pub fn notes_count(&self) -> AppResult<i64> {
        self.db.notes_count()
    }

    pub fn note_count_by_type(&self, note_type: NoteType) -> AppResult<i64> {
        self.db.note_count_by_type(note_type)
    }

    pub fn incomplete_note_count(&self) -> AppResult<i64> {
        self.db.incomplete_note_count()
    }

    pub fn active_note_count_for_location(&self, location_id: i64) -> AppResult<i64> {
        self.db.active_note_count_for_location(location_id)
    }

    pub fn active_notes_with_location_details(&self) -> AppResult<Vec<NoteWithLocation>> {
        self.db.active_notes_with_location_details()
    }

    // Locations

    pub fn create_location(&self, name: &str, address: &str, point: GeoPoint, radius: u32) -> AppResult<Location> {
        let location = self.db.insert_location(name, address, point, radius, timestamp_now())?;
        tracing::debug!(location_id = location.id, radius, "location created");
        self.publish_locations();
        Ok(location)
    }

    pub fn update_location(&self, location: &Location) -> AppResult<()> {
        self.db.update_location(location)?;
        tracing::debug!(location_id = location.id, active = location.is_active, "location updated");
        self.publish_locations();
        Ok(())
    }

    /// Soft delete or reactivation. Notes pointing at the location are untouched.
    pub fn set_location_active(&self, location_id: i64, active: bool) -> AppResult<()> {
        if !self.db.set_location_active(location_id, active)? {
            return Err(AppError::NotFound(format!("Location {} not found", location_id)));
        }
        tracing::debug!(location_id, active, "location activity changed");
        self.publish_locations();
        Ok(())
    }

    /// Removes the location and clears it from every note that referenced it.
    /// Returns how many notes were cleared.
    pub fn delete_location(&self, location_id: i64) -> AppResult<usize> {
        let cleared = self
            .db
            .delete_location(location_id)?
            .ok_or_else(|| AppError::NotFound(format!("Location {} not found", location_id)))?;
        tracing::debug!(location_id, cleared_notes = cleared, "location deleted");
        self.publish_locations();
        if cleared > 0 {
            self.publish_notes();
        }
        Ok(cleared)
    }

    pub fn get_location(&self, location_id: i64) -> AppResult<Option<Location>> {
        self.db.get_location(location_id)
    }

    pub fn require_location(&self, location_id: i64) -> AppResult<Location> {
        self.db
            .get_location(location_id)?
            .ok_or_else(|| AppError::NotFound(format!("Location {} not found", location_id)))
    }

    pub fn location_exists(&self, location_id: i64) -> AppResult<bool> {
        self.db.location_exists(location_id)
    }

    pub fn list_locations(&self) -> AppResult<Vec<Location>> {
        self.db.list_locations(false)
    }

    pub fn list_active_locations(&self) -> AppResult<Vec<Location>> {
        self.db.list_locations(true)
    }

    pub fn search_locations(&self, query: &str) -> AppResult<Vec<Location>> {
        self.db.search_locations(query)
    }

    pub fn observe_all_locations(&self) -> watch::Receiver<Vec<Location>> {
        self.all_locations.subscribe()
    }

    pub fn observe_active_locations(&self) -> watch::Receiver<Vec<Location>> {
        self.active_locations.subscribe()
    }

    /// Location counterpart of [`Repository::attach_notes_view`].
    pub fn attach_locations_view(&self, view: Arc<LocationsView>) -> AppResult<()> {
        let mut views = self.lock_location_views()?;
        view.set_source(self.all_locations.borrow().clone());
        views.push(view);
        Ok(())
    }

    // Notification logs

    pub fn insert_notification_log(
        &self,
        note_id: i64,
        location_id: i64,
        triggered_at: DateTime<Utc>,
        user_action: UserAction,
    ) -> AppResult<NotificationLog> {
        self.db
            .insert_notification_log(note_id, location_id, triggered_at, user_action)
    }

    pub fn list_notification_logs(&self) -> AppResult<Vec<NotificationLog>> {
        self.db.list_notification_logs(None)
    }

    pub fn recent_notification_logs(&self, limit: u32) -> AppResult<Vec<NotificationLog>> {
        self.db.list_notification_logs(Some(limit))
    }

    pub fn logs_for_note(&self, note_id: i64) -> AppResult<Vec<NotificationLog>> {
        self.db.logs_for_note(note_id)
    }

    pub fn action_count(&self, user_action: UserAction) -> AppResult<i64> {
        self.db.action_count(user_action)
    }

    pub fn update_user_action(
        &self,
        log_id: i64,
        user_action: UserAction,
        action_time: DateTime<Utc>,
    ) -> AppResult<()> {
        if !self.db.update_user_action(log_id, user_action, action_time)? {
            return Err(AppError::NotFound(format!("Notification log {} not found", log_id)));
        }
        Ok(())
    }

    pub fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        self.db.delete_logs_before(cutoff)
    }

    // Settings

    pub fn get_settings(&self) -> AppResult<PlannerSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<PlannerSettings> {
        self.db.update_settings(update)
    }

    fn lock_observers(&self) -> AppResult<MutexGuard<'_, NoteObservers>> {
        self.note_observers
            .lock()
            .map_err(|_| AppError::Internal("note observers mutex poisoned".to_string()))
    }

    // A failed refresh does not undo the committed write, so it is logged
    // rather than returned.
    fn publish_notes(&self) {
        if let Err(error) = self.try_publish_notes() {
            tracing::warn!(error = %error, "note observers refresh failed");
        }
    }

    fn try_publish_notes(&self) -> AppResult<()> {
        // Held across the reads so publications happen in store order.
        let mut observers = self.lock_observers()?;
        let notes = self.db.list_notes(&NoteQuery::All)?;
        for view in &observers.views {
            view.set_source(notes.clone());
        }
        self.all_notes.send_replace(notes);

        observers.queries.retain(|(_, sender)| !sender.is_closed());
        for (query, sender) in observers.queries.iter() {
            sender.send_replace(self.db.list_notes(query)?);
        }
        Ok(())
    }

    fn publish_locations(&self) {
        if let Err(error) = self.try_publish_locations() {
            tracing::warn!(error = %error, "location observers refresh failed");
        }
    }

    fn try_publish_locations(&self) -> AppResult<()> {
        let views = self.lock_location_views()?;
        let locations = self.db.list_locations(false)?;
        for view in views.iter() {
            view.set_source(locations.clone());
        }
        self.all_locations.send_replace(locations);
        self.active_locations.send_replace(self.db.list_locations(true)?);
        Ok(())
    }

    fn lock_location_views(&self) -> AppResult<MutexGuard<'_, Vec<Arc<LocationsView>>>> {
        self.location_views
            .lock()
            .map_err(|_| AppError::Internal("location views mutex poisoned".to_string()))
    }
}
