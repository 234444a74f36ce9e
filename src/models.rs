use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoteType {
    /// Has context such as a place or time: "buy milk when near the store".
    Activity,
    /// Free-floating idea without context.
    IdeaDump,
}

impl NoteType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "ACTIVITY",
            Self::IdeaDump => "IDEA_DUMP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    /// Stored rank; higher ranks sort first in priority-descending queries.
    pub fn rank(self) -> i64 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub note_type: NoteType,
    pub location_id: Option<i64>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reminder_time: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub previous_priority: Option<Priority>,
}

/// Category chip applied on top of the free-text search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoteFilter {
    #[default]
    All,
    Ongoing,
    Activity,
    Idea,
    Completed,
}

impl NoteFilter {
    pub fn matches(self, note: &Note) -> bool {
        match self {
            Self::All => true,
            Self::Ongoing => !note.is_completed,
            Self::Activity => note.note_type == NoteType::Activity && !note.is_completed,
            Self::Idea => note.note_type == NoteType::IdeaDump && !note.is_completed,
            Self::Completed => note.is_completed,
        }
    }
}

/// Store-side note queries. Each variant carries its own ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteQuery {
    /// Newest `created_at` first.
    All,
    ByType(NoteType),
    /// Most recently updated first.
    Completed,
    Incomplete,
    ByPriority(Priority),
    /// SQL `LIKE` over title and content.
    Search(String),
    Recent(u32),
    /// Incomplete notes that carry a location.
    ActiveWithLocation,
    /// Incomplete notes at a location, priority descending then newest first.
    ForLocation(i64),
    /// Every note at a location, incomplete first.
    AllForLocation(i64),
    UpcomingReminders(DateTime<Utc>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotePayload {
    pub title: String,
    pub content: String,
    pub note_type: NoteType,
    #[serde(default)]
    pub priority: Priority,
    pub location_id: Option<i64>,
    pub reminder_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNotePayload {
    pub title: String,
    pub content: String,
    pub note_type: NoteType,
    pub priority: Priority,
    pub location_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

pub const DEFAULT_LOCATION_RADIUS_M: u32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Location {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLocationPayload {
    pub name: String,
    #[serde(default)]
    pub address: String,
    /// Picked on the map or taken from a place search result.
    pub point: Option<GeoPoint>,
    pub radius: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserAction {
    Accepted,
    Dismissed,
    Snoozed,
    NoAction,
}

impl UserAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Dismissed => "DISMISSED",
            Self::Snoozed => "SNOOZED",
            Self::NoAction => "NO_ACTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLog {
    pub id: i64,
    pub note_id: i64,
    pub location_id: i64,
    pub triggered_at: DateTime<Utc>,
    pub user_action: UserAction,
    pub action_time: Option<DateTime<Utc>>,
}

/// Incomplete note joined with its active location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteWithLocation {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub note_type: NoteType,
    pub location_id: i64,
    pub is_completed: bool,
    pub priority: Priority,
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceSearchResult {
    pub place_id: String,
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub types: Vec<String>,
    pub rating: Option<f32>,
    pub price_level: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeSummary {
    pub total_notes: usize,
    pub completed_notes: usize,
    pub active_notes: usize,
    pub recent_notes: Vec<Note>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerSettings {
    pub default_radius_m: u32,
    pub recent_notes_limit: u32,
    pub place_search_radius_m: u32,
    pub place_search_max_results: u32,
    pub nearby_search_radius_m: u32,
    pub nearby_search_max_results: u32,
    pub notification_log_retention_days: u32,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            default_radius_m: DEFAULT_LOCATION_RADIUS_M,
            recent_notes_limit: 5,
            place_search_radius_m: 5_000,
            place_search_max_results: 10,
            nearby_search_radius_m: 2_000,
            nearby_search_max_results: 15,
            notification_log_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::{NoteFilter, NoteType, PlannerSettings, Priority};

    #[test]
    fn priority_orders_low_to_high() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert_eq!(Priority::from_rank(Priority::High.rank()), Some(Priority::High));
        assert_eq!(Priority::from_rank(0), None);
    }

    #[test]
    fn enums_serialize_with_stored_names() {
        assert_eq!(serde_json::to_string(&NoteType::IdeaDump).expect("json"), "\"IDEA_DUMP\"");
        assert_eq!(serde_json::to_string(&NoteFilter::Ongoing).expect("json"), "\"ONGOING\"");
        assert_eq!(serde_json::to_string(&Priority::High).expect("json"), "\"HIGH\"");
    }

    #[test]
    fn settings_fill_missing_fields_with_defaults() {
        let settings: PlannerSettings =
            serde_json::from_value(serde_json::json!({ "recentNotesLimit": 3 })).expect("settings");
        assert_eq!(settings.recent_notes_limit, 3);
        assert_eq!(settings.default_radius_m, 200);
        assert_eq!(settings.place_search_max_results, 10);
    }
}
