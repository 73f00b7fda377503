use chrono::Utc;
use ulid::Ulid;

/// Generate a lexicographically-sortable 26-char identifier (ULID).
///
/// Used for every entity id across the feature stores, so listings sorted
/// by id also sort by creation order without a secondary `createdAt` key.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// ISO-8601 timestamp with millisecond precision, matching the format every
/// persisted entity uses for `createdAt`/`updatedAt`/`timestamp` fields.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
