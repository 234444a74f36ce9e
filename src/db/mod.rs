use crate::errors::{AppError, AppResult};
use crate::models::{
    CreateNotePayload, GeoPoint, Location, Note, NoteQuery, NoteType, NoteWithLocation, NotificationLog,
    PlannerSettings, Priority, UserAction,
};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

pub const SCHEMA_VERSION: i64 = 3;

const NOTE_COLUMNS: &str = "id, title, content, note_type, location_id, is_completed, created_at, updated_at, \
                            reminder_time, priority, previous_priority";
const LOCATION_COLUMNS: &str = "id, name, address, latitude, longitude, radius, is_active, created_at";
const LOG_COLUMNS: &str = "id, note_id, location_id, triggered_at, user_action, action_time";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        Self::from_connection(conn, path.to_path_buf())
    }

    fn from_connection(conn: Connection, db_path: PathBuf) -> AppResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path,
        };
        db.ensure_schema_extensions()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn schema_version(&self) -> AppResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    // Notes

    pub fn insert_note(&self, payload: &CreateNotePayload, now: DateTime<Utc>) -> AppResult<Note> {
        let now = now.trunc_subsecs(3);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notes (
               title, content, note_type, location_id, is_completed, created_at, updated_at,
               reminder_time, priority, previous_priority
             ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5, ?6, ?7, NULL)",
            params![
                payload.title,
                payload.content,
                payload.note_type.as_str(),
                payload.location_id,
                format_time(now),
                payload.reminder_time.map(format_time),
                payload.priority.rank(),
            ],
        )?;

        Ok(Note {
            id: conn.last_insert_rowid(),
            title: payload.title.clone(),
            content: payload.content.clone(),
            note_type: payload.note_type,
            location_id: payload.location_id,
            is_completed: false,
            created_at: now,
            updated_at: now,
            reminder_time: payload.reminder_time.map(|value| value.trunc_subsecs(3)),
            priority: payload.priority,
            previous_priority: None,
        })
    }

    /// Writes every mutable column of `note`. `created_at` is never rewritten.
    pub fn update_note(&self, note: &Note) -> AppResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE notes SET
               title = ?1, content = ?2, note_type = ?3, location_id = ?4, is_completed = ?5,
               updated_at = ?6, reminder_time = ?7, priority = ?8, previous_priority = ?9
             WHERE id = ?10",
            params![
                note.title,
                note.content,
                note.note_type.as_str(),
                note.location_id,
                note.is_completed,
                format_time(note.updated_at),
                note.reminder_time.map(format_time),
                note.priority.rank(),
                note.previous_priority.map(Priority::rank),
                note.id,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("Note {} not found", note.id)));
        }
        Ok(())
    }

    pub fn update_note_priority(
        &self,
        note_id: i64,
        priority: Priority,
        previous_priority: Option<Priority>,
        updated_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE notes SET priority = ?1, previous_priority = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                priority.rank(),
                previous_priority.map(Priority::rank),
                format_time(updated_at),
                note_id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_note(&self, note_id: i64) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM notes WHERE id = ?1", [note_id])?;
        Ok(changed > 0)
    }

    pub fn delete_all_completed_notes(&self) -> AppResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM notes WHERE is_completed = 1", [])?)
    }

    pub fn get_note(&self, note_id: i64) -> AppResult<Option<Note>> {
        let conn = self.conn()?;
        let note = conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
                [note_id],
                parse_note_row,
            )
            .optional()?;
        Ok(note)
    }

    pub fn list_notes(&self, query: &NoteQuery) -> AppResult<Vec<Note>> {
        let (clause, args) = note_query_clause(query);
        let sql = format!("SELECT {NOTE_COLUMNS} FROM notes {clause}");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), parse_note_row)?;
        let notes = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    pub fn notes_count(&self) -> AppResult<i64> {
        self.count("SELECT COUNT(*) FROM notes", &[])
    }

    pub fn note_count_by_type(&self, note_type: NoteType) -> AppResult<i64> {
        self.count(
            "SELECT COUNT(*) FROM notes WHERE note_type = ?1",
            &[SqlValue::Text(note_type.as_str().to_string())],
        )
    }

    pub fn incomplete_note_count(&self) -> AppResult<i64> {
        self.count("SELECT COUNT(*) FROM notes WHERE is_completed = 0", &[])
    }

    pub fn active_note_count_for_location(&self, location_id: i64) -> AppResult<i64> {
        self.count(
            "SELECT COUNT(*) FROM notes WHERE location_id = ?1 AND is_completed = 0",
            &[SqlValue::Integer(location_id)],
        )
    }

    pub fn active_notes_with_location_details(&self) -> AppResult<Vec<NoteWithLocation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT n.id, n.title, n.content, n.note_type, n.location_id, n.is_completed, n.priority,
                    l.name, l.latitude, l.longitude, l.radius
             FROM notes n
             INNER JOIN locations l ON n.location_id = l.id
             WHERE n.is_completed = 0 AND l.is_active = 1
             ORDER BY n.priority DESC, n.created_at DESC, n.id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(NoteWithLocation {
                id: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
                note_type: parse_note_type(&row.get::<_, String>(3)?)?,
                location_id: row.get(4)?,
                is_completed: row.get(5)?,
                priority: parse_priority(row.get(6)?)?,
                location_name: row.get(7)?,
                latitude: row.get(8)?,
                longitude: row.get(9)?,
                radius: row.get(10)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // Locations

    pub fn insert_location(
        &self,
        name: &str,
        address: &str,
        point: GeoPoint,
        radius: u32,
        now: DateTime<Utc>,
    ) -> AppResult<Location> {
        let now = now.trunc_subsecs(3);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO locations (name, address, latitude, longitude, radius, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![name, address, point.latitude, point.longitude, radius, format_time(now)],
        )?;

        Ok(Location {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            address: address.to_string(),
            latitude: point.latitude,
            longitude: point.longitude,
            radius,
            is_active: true,
            created_at: now,
        })
    }

    pub fn update_location(&self, location: &Location) -> AppResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE locations SET name = ?1, address = ?2, latitude = ?3, longitude = ?4, radius = ?5, is_active = ?6
             WHERE id = ?7",
            params![
                location.name,
                location.address,
                location.latitude,
                location.longitude,
                location.radius,
                location.is_active,
                location.id,
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("Location {} not found", location.id)));
        }
        Ok(())
    }

    pub fn set_location_active(&self, location_id: i64, active: bool) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE locations SET is_active = ?1 WHERE id = ?2",
            params![active, location_id],
        )?;
        Ok(changed > 0)
    }

    /// Deletes a location and clears every note reference to it in one
    /// transaction. Returns the number of notes cleared, or `None` when the
    /// location does not exist.
    pub fn delete_location(&self, location_id: i64) -> AppResult<Option<usize>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let cleared = tx.execute(
            "UPDATE notes SET location_id = NULL WHERE location_id = ?1",
            [location_id],
        )?;
        let deleted = tx.execute("DELETE FROM locations WHERE id = ?1", [location_id])?;
        if deleted == 0 {
            tx.rollback()?;
            return Ok(None);
        }
        tx.commit()?;
        Ok(Some(cleared))
    }

    pub fn get_location(&self, location_id: i64) -> AppResult<Option<Location>> {
        let conn = self.conn()?;
        let location = conn
            .query_row(
                &format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE id = ?1"),
                [location_id],
                parse_location_row,
            )
            .optional()?;
        Ok(location)
    }

    pub fn location_exists(&self, location_id: i64) -> AppResult<bool> {
        let count = self.count(
            "SELECT COUNT(*) FROM locations WHERE id = ?1",
            &[SqlValue::Integer(location_id)],
        )?;
        Ok(count > 0)
    }

    pub fn list_locations(&self, active_only: bool) -> AppResult<Vec<Location>> {
        let sql = if active_only {
            format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE is_active = 1 ORDER BY name ASC, id ASC")
        } else {
            format!("SELECT {LOCATION_COLUMNS} FROM locations ORDER BY name ASC, id ASC")
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], parse_location_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn search_locations(&self, query: &str) -> AppResult<Vec<Location>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOCATION_COLUMNS} FROM locations
             WHERE name LIKE '%' || ?1 || '%' OR address LIKE '%' || ?1 || '%'
             ORDER BY name ASC, id ASC"
        ))?;
        let rows = stmt.query_map([query], parse_location_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // Notification logs

    pub fn insert_notification_log(
        &self,
        note_id: i64,
        location_id: i64,
        triggered_at: DateTime<Utc>,
        user_action: UserAction,
    ) -> AppResult<NotificationLog> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO notification_logs (note_id, location_id, triggered_at, user_action, action_time)
             VALUES (?1, ?2, ?3, ?4, NULL)",
            params![note_id, location_id, format_time(triggered_at), user_action.as_str()],
        )?;
        Ok(NotificationLog {
            id: conn.last_insert_rowid(),
            note_id,
            location_id,
            triggered_at: triggered_at.trunc_subsecs(3),
            user_action,
            action_time: None,
        })
    }

    pub fn list_notification_logs(&self, limit: Option<u32>) -> AppResult<Vec<NotificationLog>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM notification_logs ORDER BY triggered_at DESC, id DESC LIMIT ?1"
        ))?;
        let limit = limit.map(i64::from).unwrap_or(-1);
        let rows = stmt.query_map([limit], parse_log_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn logs_for_note(&self, note_id: i64) -> AppResult<Vec<NotificationLog>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM notification_logs WHERE note_id = ?1 ORDER BY triggered_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([note_id], parse_log_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn action_count(&self, user_action: UserAction) -> AppResult<i64> {
        self.count(
            "SELECT COUNT(*) FROM notification_logs WHERE user_action = ?1",
            &[SqlValue::Text(user_action.as_str().to_string())],
        )
    }

    pub fn update_user_action(
        &self,
        log_id: i64,
        user_action: UserAction,
        action_time: DateTime<Utc>,
    ) -> AppResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE notification_logs SET user_action = ?1, action_time = ?2 WHERE id = ?3",
            params![user_action.as_str(), format_time(action_time), log_id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM notification_logs WHERE triggered_at < ?1",
            [format_time(cutoff)],
        )?)
    }

    // Settings

    pub fn get_settings(&self) -> AppResult<PlannerSettings> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'planner'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<PlannerSettings>(&raw).unwrap_or_default()),
            None => Ok(PlannerSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<PlannerSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: PlannerSettings = serde_json::from_value(merged)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('planner', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, format_time(Utc::now())],
        )?;

        Ok(settings)
    }

    fn count(&self, sql: &str, args: &[SqlValue]) -> AppResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(sql, params_from_iter(args.iter()), |row| row.get(0))?)
    }

    fn ensure_schema_extensions(&self) -> AppResult<()> {
        let mut conn = self.conn()?;

        // v1 stores had no previous_priority column.
        if !column_exists(&conn, "notes", "previous_priority")? {
            conn.execute("ALTER TABLE notes ADD COLUMN previous_priority INTEGER", [])?;
        }

        // v2 stores had no foreign key on location_id. SQLite cannot add one in
        // place, so the table is rebuilt and copied.
        if !location_foreign_key_exists(&conn)? {
            tracing::info!("rebuilding notes table to add location foreign key");
            rebuild_notes_with_location_fk(&mut conn)?;
        }

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_notes_location ON notes(location_id);
             CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(created_at DESC);
             CREATE INDEX IF NOT EXISTS idx_notes_completed_updated ON notes(is_completed, updated_at DESC);",
        )?;
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        Ok(())
    }
}

fn note_query_clause(query: &NoteQuery) -> (String, Vec<SqlValue>) {
    const NEWEST_FIRST: &str = "ORDER BY created_at DESC, id DESC";
    match query {
        NoteQuery::All => (NEWEST_FIRST.to_string(), Vec::new()),
        NoteQuery::ByType(note_type) => (
            format!("WHERE note_type = ?1 {NEWEST_FIRST}"),
            vec![SqlValue::Text(note_type.as_str().to_string())],
        ),
        NoteQuery::Completed => (
            "WHERE is_completed = 1 ORDER BY updated_at DESC, id DESC".to_string(),
            Vec::new(),
        ),
        NoteQuery::Incomplete => (format!("WHERE is_completed = 0 {NEWEST_FIRST}"), Vec::new()),
        NoteQuery::ByPriority(priority) => (
            format!("WHERE priority = ?1 {NEWEST_FIRST}"),
            vec![SqlValue::Integer(priority.rank())],
        ),
        NoteQuery::Search(text) => (
            format!("WHERE title LIKE '%' || ?1 || '%' OR content LIKE '%' || ?1 || '%' {NEWEST_FIRST}"),
            vec![SqlValue::Text(text.clone())],
        ),
        NoteQuery::Recent(limit) => (
            format!("{NEWEST_FIRST} LIMIT ?1"),
            vec![SqlValue::Integer(i64::from(*limit))],
        ),
        NoteQuery::ActiveWithLocation => (
            format!("WHERE is_completed = 0 AND location_id IS NOT NULL {NEWEST_FIRST}"),
            Vec::new(),
        ),
        NoteQuery::ForLocation(location_id) => (
            "WHERE location_id = ?1 AND is_completed = 0 ORDER BY priority DESC, created_at DESC, id DESC"
                .to_string(),
            vec![SqlValue::Integer(*location_id)],
        ),
        NoteQuery::AllForLocation(location_id) => (
            "WHERE location_id = ?1 ORDER BY is_completed ASC, priority DESC, created_at DESC, id DESC".to_string(),
            vec![SqlValue::Integer(*location_id)],
        ),
        NoteQuery::UpcomingReminders(now) => (
            "WHERE reminder_time IS NOT NULL AND reminder_time > ?1 ORDER BY reminder_time ASC, id ASC".to_string(),
            vec![SqlValue::Text(format_time(*now))],
        ),
    }
}

fn rebuild_notes_with_location_fk(conn: &mut Connection) -> AppResult<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE notes_new (
           id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
           title TEXT NOT NULL,
           content TEXT NOT NULL,
           note_type TEXT NOT NULL,
           location_id INTEGER,
           is_completed INTEGER NOT NULL DEFAULT 0,
           created_at TEXT NOT NULL,
           updated_at TEXT NOT NULL,
           reminder_time TEXT,
           priority INTEGER NOT NULL DEFAULT 2,
           previous_priority INTEGER,
           FOREIGN KEY(location_id) REFERENCES locations(id) ON UPDATE NO ACTION ON DELETE SET NULL
         );
         INSERT INTO notes_new
           SELECT id, title, content, note_type,
                  CASE WHEN location_id IN (SELECT id FROM locations) THEN location_id ELSE NULL END,
                  is_completed, created_at, updated_at, reminder_time, priority, previous_priority
           FROM notes;
         DROP TABLE notes;
         ALTER TABLE notes_new RENAME TO notes;",
    )?;
    tx.commit()?;
    Ok(())
}

fn location_foreign_key_exists(conn: &Connection) -> AppResult<bool> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_list(notes)")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let table: String = row.get(2)?;
        let from: String = row.get(3)?;
        let on_delete: String = row.get(6)?;
        if table == "locations" && from == "location_id" && on_delete.eq_ignore_ascii_case("SET NULL") {
            return Ok(true);
        }
    }
    Ok(false)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let pragma = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&pragma)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn parse_note_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        note_type: parse_note_type(&row.get::<_, String>(3)?)?,
        location_id: row.get(4)?,
        is_completed: row.get(5)?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
        updated_at: parse_time(&row.get::<_, String>(7)?)?,
        reminder_time: row
            .get::<_, Option<String>>(8)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
        priority: parse_priority(row.get(9)?)?,
        previous_priority: row.get::<_, Option<i64>>(10)?.map(parse_priority).transpose()?,
    })
}

fn parse_location_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Location> {
    Ok(Location {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        radius: row.get(5)?,
        is_active: row.get(6)?,
        created_at: parse_time(&row.get::<_, String>(7)?)?,
    })
}

fn parse_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationLog> {
    Ok(NotificationLog {
        id: row.get(0)?,
        note_id: row.get(1)?,
        location_id: row.get(2)?,
        triggered_at: parse_time(&row.get::<_, String>(3)?)?,
        user_action: parse_user_action(&row.get::<_, String>(4)?)?,
        action_time: row
            .get::<_, Option<String>>(5)?
            .map(|raw| parse_time(&raw))
            .transpose()?,
    })
}

fn invalid_data(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_note_type(raw: &str) -> rusqlite::Result<NoteType> {
    match raw {
        "ACTIVITY" => Ok(NoteType::Activity),
        "IDEA_DUMP" => Ok(NoteType::IdeaDump),
        other => Err(invalid_data(format!("Unknown note type '{}'", other))),
    }
}

fn parse_priority(rank: i64) -> rusqlite::Result<Priority> {
    Priority::from_rank(rank).ok_or_else(|| invalid_data(format!("Unknown priority rank {}", rank)))
}

fn parse_user_action(raw: &str) -> rusqlite::Result<UserAction> {
    match raw {
        "ACCEPTED" => Ok(UserAction::Accepted),
        "DISMISSED" => Ok(UserAction::Dismissed),
        "SNOOZED" => Ok(UserAction::Snoozed),
        "NO_ACTION" => Ok(UserAction::NoAction),
        other => Err(invalid_data(format!("Unknown user action '{}'", other))),
    }
}

/// Current time at the precision the store keeps.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| invalid_data(error.to_string()))
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{timestamp_now, Database, SCHEMA_VERSION};
    use crate::models::{CreateNotePayload, GeoPoint, Note, NoteQuery, NoteType, Priority, UserAction};
    use chrono::{Duration, TimeZone, Timelike, Utc};
    use rusqlite::Connection;

    fn payload(title: &str, note_type: NoteType, priority: Priority, location_id: Option<i64>) -> CreateNotePayload {
        CreateNotePayload {
            title: title.to_string(),
            content: format!("{title} content"),
            note_type,
            priority,
            location_id,
            reminder_time: None,
        }
    }

    fn titles(notes: Vec<Note>) -> Vec<String> {
        notes.into_iter().map(|note| note.title).collect()
    }

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        (dir, db)
    }

    #[test]
    fn database_can_insert_and_read_note() {
        let (_dir, db) = test_db();
        let now = timestamp_now();
        let created = db
            .insert_note(&payload("Buy milk", NoteType::Activity, Priority::Low, None), now)
            .expect("insert note");

        let loaded = db.get_note(created.id).expect("get note").expect("note exists");
        assert_eq!(loaded, created);
        assert!(!loaded.is_completed);
        assert!(loaded.previous_priority.is_none());
        assert_eq!(db.schema_version().expect("version"), SCHEMA_VERSION);
    }

    #[test]
    fn list_all_returns_newest_first() {
        let (_dir, db) = test_db();
        let base = timestamp_now();
        for (offset, title) in ["first", "second", "third"].iter().enumerate() {
            db.insert_note(
                &payload(title, NoteType::IdeaDump, Priority::Medium, None),
                base + Duration::seconds(offset as i64),
            )
            .expect("insert");
        }

        let titles: Vec<String> = db
            .list_notes(&NoteQuery::All)
            .expect("list")
            .into_iter()
            .map(|note| note.title)
            .collect();
        assert_eq!(titles, vec!["third", "second", "first"]);

        let recent = db.list_notes(&NoteQuery::Recent(2)).expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].title, "third");
    }

    #[test]
    fn location_notes_sort_by_priority_then_newest() {
        let (_dir, db) = test_db();
        let location = db
            .insert_location("Store", "1 Main St", GeoPoint::new(40.0, -73.0), 200, timestamp_now())
            .expect("location");
        let base = timestamp_now();
        db.insert_note(&payload("low", NoteType::Activity, Priority::Low, Some(location.id)), base)
            .expect("insert");
        db.insert_note(
            &payload("high-old", NoteType::Activity, Priority::High, Some(location.id)),
            base + Duration::seconds(1),
        )
        .expect("insert");
        db.insert_note(
            &payload("high-new", NoteType::Activity, Priority::High, Some(location.id)),
            base + Duration::seconds(2),
        )
        .expect("insert");
        db.insert_note(&payload("elsewhere", NoteType::Activity, Priority::High, None), base)
            .expect("insert");

        let titles: Vec<String> = db
            .list_notes(&NoteQuery::ForLocation(location.id))
            .expect("list")
            .into_iter()
            .map(|note| note.title)
            .collect();
        assert_eq!(titles, vec!["high-new", "high-old", "low"]);
        assert_eq!(db.active_note_count_for_location(location.id).expect("count"), 3);

        let joined = db.active_notes_with_location_details().expect("joined");
        assert_eq!(joined.len(), 3);
        assert_eq!(joined[0].location_name, "Store");
    }

    #[test]
    fn deleting_location_clears_note_references() {
        let (_dir, db) = test_db();
        let location = db
            .insert_location("Gym", "", GeoPoint::new(1.0, 2.0), 150, timestamp_now())
            .expect("location");
        let note = db
            .insert_note(
                &payload("Stretch", NoteType::Activity, Priority::Medium, Some(location.id)),
                timestamp_now(),
            )
            .expect("note");

        let cleared = db.delete_location(location.id).expect("delete");
        assert_eq!(cleared, Some(1));
        let reloaded = db.get_note(note.id).expect("get").expect("note survives");
        assert!(reloaded.location_id.is_none());
        assert!(db.get_location(location.id).expect("get").is_none());
        assert_eq!(db.delete_location(location.id).expect("delete again"), None);
    }

    #[test]
    fn delete_all_completed_keeps_open_notes() {
        let (_dir, db) = test_db();
        let mut done = db
            .insert_note(&payload("done", NoteType::Activity, Priority::High, None), timestamp_now())
            .expect("insert");
        db.insert_note(&payload("open", NoteType::Activity, Priority::High, None), timestamp_now())
            .expect("insert");
        done.is_completed = true;
        done.previous_priority = Some(Priority::High);
        db.update_note(&done).expect("update");

        assert_eq!(db.delete_all_completed_notes().expect("delete"), 1);
        assert_eq!(db.notes_count().expect("count"), 1);
        assert_eq!(db.incomplete_note_count().expect("count"), 1);
    }

    #[test]
    fn update_missing_note_is_not_found() {
        let (_dir, db) = test_db();
        let mut note = db
            .insert_note(&payload("temp", NoteType::IdeaDump, Priority::Low, None), timestamp_now())
            .expect("insert");
        db.delete_note(note.id).expect("delete");
        note.title = "changed".to_string();
        let err = db.update_note(&note).expect_err("missing note");
        assert!(err.to_string().starts_with("NOT_FOUND"));
    }

    #[test]
    fn location_soft_delete_toggles_active_flag() {
        let (_dir, db) = test_db();
        let location = db
            .insert_location("Office", "", GeoPoint::new(0.0, 0.0), 200, timestamp_now())
            .expect("location");
        assert!(db.set_location_active(location.id, false).expect("deactivate"));
        assert!(db.list_locations(true).expect("active").is_empty());
        assert_eq!(db.list_locations(false).expect("all").len(), 1);
        assert!(db.set_location_active(location.id, true).expect("reactivate"));
        assert_eq!(db.list_locations(true).expect("active").len(), 1);
    }

    #[test]
    fn notification_logs_track_user_actions() {
        let (_dir, db) = test_db();
        let now = timestamp_now();
        let log = db
            .insert_notification_log(7, 3, now - Duration::days(40), UserAction::NoAction)
            .expect("insert");
        db.insert_notification_log(7, 3, now, UserAction::NoAction).expect("insert");

        assert!(db.update_user_action(log.id, UserAction::Accepted, now).expect("update"));
        assert_eq!(db.action_count(UserAction::Accepted).expect("count"), 1);
        assert_eq!(db.logs_for_note(7).expect("logs").len(), 2);

        let removed = db.delete_logs_before(now - Duration::days(30)).expect("cleanup");
        assert_eq!(removed, 1);
        let remaining = db.list_notification_logs(Some(10)).expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user_action, UserAction::NoAction);
    }

    #[test]
    fn inserted_rows_keep_store_precision() {
        let (_dir, db) = test_db();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::nanoseconds(123_456_789);

        let note = db
            .insert_note(&payload("Precise", NoteType::IdeaDump, Priority::Low, None), now)
            .expect("insert");
        assert_eq!(note.created_at.nanosecond(), 123_000_000);
        assert_eq!(note.updated_at, note.created_at);
        assert_eq!(db.get_note(note.id).expect("get").expect("note"), note);

        let location = db
            .insert_location("Depot", "", GeoPoint::new(1.0, 2.0), 200, now)
            .expect("location");
        assert_eq!(db.get_location(location.id).expect("get").expect("location"), location);
    }

    #[test]
    fn queries_filter_by_type_priority_and_text() {
        let (_dir, db) = test_db();
        let base = timestamp_now();
        db.insert_note(&payload("Buy milk", NoteType::Activity, Priority::Low, None), base)
            .expect("insert");
        db.insert_note(
            &payload("Learn Spanish", NoteType::IdeaDump, Priority::High, None),
            base + Duration::seconds(1),
        )
        .expect("insert");
        db.insert_note(
            &payload("Milk frother", NoteType::IdeaDump, Priority::Low, None),
            base + Duration::seconds(2),
        )
        .expect("insert");

        assert_eq!(
            titles(db.list_notes(&NoteQuery::ByType(NoteType::IdeaDump)).expect("by type")),
            vec!["Milk frother", "Learn Spanish"]
        );
        assert_eq!(
            titles(db.list_notes(&NoteQuery::ByType(NoteType::Activity)).expect("by type")),
            vec!["Buy milk"]
        );
        assert_eq!(
            titles(db.list_notes(&NoteQuery::ByPriority(Priority::Low)).expect("by priority")),
            vec!["Milk frother", "Buy milk"]
        );
        assert!(db
            .list_notes(&NoteQuery::ByPriority(Priority::Medium))
            .expect("by priority")
            .is_empty());
        assert_eq!(
            titles(db.list_notes(&NoteQuery::Search("MILK".to_string())).expect("search")),
            vec!["Milk frother", "Buy milk"]
        );
        assert_eq!(
            titles(db.list_notes(&NoteQuery::Search("spanish cont".to_string())).expect("search")),
            vec!["Learn Spanish"]
        );
    }

    #[test]
    fn completed_query_orders_by_last_update() {
        let (_dir, db) = test_db();
        let base = timestamp_now();
        let mut first = db
            .insert_note(&payload("first", NoteType::Activity, Priority::Medium, None), base)
            .expect("insert");
        let mut second = db
            .insert_note(&payload("second", NoteType::Activity, Priority::Medium, None), base)
            .expect("insert");
        db.insert_note(
            &payload("open", NoteType::Activity, Priority::Medium, None),
            base + Duration::seconds(1),
        )
        .expect("insert");

        second.is_completed = true;
        second.previous_priority = Some(second.priority);
        second.updated_at = base + Duration::seconds(5);
        db.update_note(&second).expect("update");
        first.is_completed = true;
        first.previous_priority = Some(first.priority);
        first.updated_at = base + Duration::seconds(10);
        db.update_note(&first).expect("update");

        assert_eq!(
            titles(db.list_notes(&NoteQuery::Completed).expect("completed")),
            vec!["first", "second"]
        );
        assert_eq!(titles(db.list_notes(&NoteQuery::Incomplete).expect("incomplete")), vec!["open"]);
    }

    #[test]
    fn location_history_puts_open_notes_first_by_rank() {
        let (_dir, db) = test_db();
        let location = db
            .insert_location("Hardware store", "", GeoPoint::new(10.0, 10.0), 200, timestamp_now())
            .expect("location");
        let base = timestamp_now();
        let mut done = db
            .insert_note(
                &payload("done-high", NoteType::Activity, Priority::High, Some(location.id)),
                base + Duration::seconds(3),
            )
            .expect("insert");
        done.is_completed = true;
        done.previous_priority = Some(Priority::High);
        db.update_note(&done).expect("complete");
        db.insert_note(&payload("open-low", NoteType::Activity, Priority::Low, Some(location.id)), base)
            .expect("insert");
        db.insert_note(
            &payload("open-high", NoteType::Activity, Priority::High, Some(location.id)),
            base + Duration::seconds(1),
        )
        .expect("insert");
        db.insert_note(
            &payload("open-medium", NoteType::Activity, Priority::Medium, Some(location.id)),
            base + Duration::seconds(2),
        )
        .expect("insert");
        db.insert_note(&payload("unplaced", NoteType::Activity, Priority::High, None), base)
            .expect("insert");

        // Alphabetical priority names would give MEDIUM, LOW, HIGH here.
        assert_eq!(
            titles(db.list_notes(&NoteQuery::AllForLocation(location.id)).expect("history")),
            vec!["open-high", "open-medium", "open-low", "done-high"]
        );
        assert_eq!(
            titles(db.list_notes(&NoteQuery::ActiveWithLocation).expect("active")),
            vec!["open-medium", "open-high", "open-low"]
        );
    }

    #[test]
    fn upcoming_reminders_skip_past_and_unset() {
        let (_dir, db) = test_db();
        let now = timestamp_now();
        for (title, reminder) in [
            ("later", Some(now + Duration::hours(2))),
            ("past", Some(now - Duration::hours(1))),
            ("none", None),
            ("sooner", Some(now + Duration::hours(1))),
        ] {
            let mut note = payload(title, NoteType::Activity, Priority::Medium, None);
            note.reminder_time = reminder;
            db.insert_note(&note, now).expect("insert");
        }

        assert_eq!(
            titles(db.list_notes(&NoteQuery::UpcomingReminders(now)).expect("reminders")),
            vec!["sooner", "later"]
        );
    }

    #[test]
    fn settings_merge_updates() {
        let (_dir, db) = test_db();
        assert_eq!(db.get_settings().expect("settings").default_radius_m, 200);
        let updated = db
            .update_settings(serde_json::json!({ "defaultRadiusM": 350 }))
            .expect("update");
        assert_eq!(updated.default_radius_m, 350);
        assert_eq!(db.get_settings().expect("settings").recent_notes_limit, 5);
    }

    #[test]
    fn legacy_store_gains_location_foreign_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).expect("open");
            conn.execute_batch(
                "CREATE TABLE locations (
                   id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                   name TEXT NOT NULL, address TEXT NOT NULL DEFAULT '',
                   latitude REAL NOT NULL, longitude REAL NOT NULL,
                   radius INTEGER NOT NULL DEFAULT 200, is_active INTEGER NOT NULL DEFAULT 1,
                   created_at TEXT NOT NULL
                 );
                 CREATE TABLE notes (
                   id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                   title TEXT NOT NULL, content TEXT NOT NULL, note_type TEXT NOT NULL,
                   location_id INTEGER, is_completed INTEGER NOT NULL DEFAULT 0,
                   created_at TEXT NOT NULL, updated_at TEXT NOT NULL, reminder_time TEXT,
                   priority INTEGER NOT NULL DEFAULT 2
                 );
                 INSERT INTO locations (id, name, latitude, longitude, created_at)
                   VALUES (1, 'Home', 0.0, 0.0, '2024-01-01T00:00:00.000Z');
                 INSERT INTO notes (title, content, note_type, location_id, created_at, updated_at)
                   VALUES ('kept', 'body', 'ACTIVITY', 1, '2024-01-01T00:00:00.000Z', '2024-01-01T00:00:00.000Z');
                 INSERT INTO notes (title, content, note_type, location_id, created_at, updated_at)
                   VALUES ('dangling', 'body', 'IDEA_DUMP', 99, '2024-01-02T00:00:00.000Z', '2024-01-02T00:00:00.000Z');",
            )
            .expect("legacy schema");
        }

        let db = Database::new(&path).expect("migrated db");
        let notes = db.list_notes(&NoteQuery::All).expect("list");
        assert_eq!(notes.len(), 2);
        let dangling = notes.iter().find(|note| note.title == "dangling").expect("dangling");
        assert!(dangling.location_id.is_none());

        db.delete_location(1).expect("delete");
        let kept = db
            .list_notes(&NoteQuery::All)
            .expect("list")
            .into_iter()
            .find(|note| note.title == "kept")
            .expect("kept");
        assert!(kept.location_id.is_none());
    }
}
