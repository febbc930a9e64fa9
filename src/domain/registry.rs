//! Table registry: the static watch list driving subscription fan-out.
//!
//! Each entry maps a watched table to the cache keys that must be refreshed
//! when it changes, plus an optional throttle interval for high-volume
//! tables. The registry is the single source of truth consulted by both the
//! subscription layer (what to subscribe to) and the polling scheduler (what
//! to fall back to); it is never inferred dynamically, so every table has
//! deterministic, auditable fan-out.

use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;

use super::{CacheKey, SyncError};

/// One watched table and its invalidation fan-out.
///
/// Immutable for the process lifetime once the registry is built.
#[derive(Debug, Clone)]
pub struct TableWatch {
    /// Table name; unique within a registry.
    pub table: String,

    /// Cache keys refreshed when this table changes. Keys may overlap
    /// across tables.
    pub cache_keys: Vec<CacheKey>,

    /// Coalescing window for high-volume tables. `None` means invalidate
    /// immediately on each event.
    pub throttle_interval: Option<Duration>,
}

impl TableWatch {
    /// Creates an unthrottled watch (invalidate on every event).
    pub fn new(table: impl Into<String>, cache_keys: Vec<CacheKey>) -> Self {
        Self {
            table: table.into(),
            cache_keys,
            throttle_interval: None,
        }
    }

    /// Sets a throttle window, marking the table high-volume.
    pub fn throttled(mut self, interval: Duration) -> Self {
        self.throttle_interval = Some(interval);
        self
    }

    /// True for tables that coalesce bursts before invalidating.
    pub fn is_high_volume(&self) -> bool {
        self.throttle_interval.is_some()
    }
}

/// Read-only, ordered collection of [`TableWatch`] entries.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    watches: Vec<TableWatch>,
}

impl TableRegistry {
    /// Builds a registry, rejecting duplicate table names.
    pub fn new(watches: Vec<TableWatch>) -> Result<Self, SyncError> {
        let mut seen = HashSet::new();
        for watch in &watches {
            if !seen.insert(watch.table.clone()) {
                return Err(SyncError::configuration(
                    &watch.table,
                    "table appears more than once in the registry",
                ));
            }
        }
        Ok(Self { watches })
    }

    /// Returns the watch for a table, if registered.
    pub fn get(&self, table: &str) -> Option<&TableWatch> {
        self.watches.iter().find(|w| w.table == table)
    }

    /// Iterates over all watches in declaration order.
    pub fn watches(&self) -> impl Iterator<Item = &TableWatch> {
        self.watches.iter()
    }

    /// Number of watched tables.
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// True when no tables are watched.
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// The standard watch list for the school portals.
    ///
    /// High-volume tables (live exam answers, attendance, chat, notification
    /// feeds) carry a throttle window; administrative tables invalidate
    /// immediately because their change rate is low and staleness is more
    /// visible.
    pub fn school_portal() -> Self {
        Self {
            watches: SCHOOL_PORTAL_WATCHES.clone(),
        }
    }
}

static SCHOOL_PORTAL_WATCHES: Lazy<Vec<TableWatch>> = Lazy::new(|| {
    vec![
        TableWatch::new(
            "attendance",
            vec![
                CacheKey::new(["attendance"]),
                CacheKey::new(["dashboard", "attendance-summary"]),
            ],
        )
        .throttled(Duration::from_millis(1500)),
        TableWatch::new(
            "exam_answers",
            vec![
                CacheKey::new(["exams", "answers"]),
                CacheKey::new(["exams", "live-progress"]),
            ],
        )
        .throttled(Duration::from_millis(1000)),
        TableWatch::new(
            "messages",
            vec![
                CacheKey::new(["messages"]),
                CacheKey::new(["dashboard", "unread-count"]),
            ],
        )
        .throttled(Duration::from_millis(2000)),
        TableWatch::new(
            "notifications",
            vec![CacheKey::new(["notifications"])],
        )
        .throttled(Duration::from_millis(2000)),
        TableWatch::new(
            "exams",
            vec![CacheKey::new(["exams", "list"]), CacheKey::new(["exams", "schedule"])],
        ),
        TableWatch::new(
            "grades",
            vec![CacheKey::new(["grades"]), CacheKey::new(["report-cards"])],
        ),
        TableWatch::new(
            "students",
            vec![CacheKey::new(["students"]), CacheKey::new(["dashboard", "enrollment"])],
        ),
        TableWatch::new("announcements", vec![CacheKey::new(["announcements"])]),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_tables() {
        let result = TableRegistry::new(vec![
            TableWatch::new("grades", vec![CacheKey::new(["grades"])]),
            TableWatch::new("grades", vec![CacheKey::new(["report-cards"])]),
        ]);

        assert!(matches!(result, Err(SyncError::Configuration { .. })));
    }

    #[test]
    fn get_finds_registered_table() {
        let registry = TableRegistry::new(vec![TableWatch::new(
            "exams",
            vec![CacheKey::new(["exams", "list"])],
        )])
        .unwrap();

        assert!(registry.get("exams").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn school_portal_defaults_throttle_high_volume_tables() {
        let registry = TableRegistry::school_portal();

        let attendance = registry.get("attendance").unwrap();
        assert_eq!(attendance.throttle_interval, Some(Duration::from_millis(1500)));
        assert!(attendance.is_high_volume());

        let grades = registry.get("grades").unwrap();
        assert!(grades.throttle_interval.is_none());
        assert!(!grades.is_high_volume());
    }

    #[test]
    fn school_portal_defaults_have_no_empty_key_sets() {
        let registry = TableRegistry::school_portal();
        for watch in registry.watches() {
            assert!(
                !watch.cache_keys.is_empty(),
                "watch for '{}' has no cache keys",
                watch.table
            );
        }
    }
}
