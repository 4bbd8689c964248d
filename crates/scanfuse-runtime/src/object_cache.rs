//! [`ObjectCache`] – the live set of correlated objects.
//!
//! Entries are keyed by [`object_id`][scanfuse_types::object_id]. A newer
//! correlation for the same id replaces the old one wholesale; nothing is
//! merged. Each entry expires on its own once it has not been refreshed for
//! longer than the configured maximum age.
//!
//! Ages are measured on the monotonic timeline (`now_ms` arguments). The
//! object's own `last_update_ms` is the wall-clock stamp that goes on the
//! wire.

use std::collections::BTreeMap;

use scanfuse_types::TrackedObject;
use tracing::debug;

/// Result of an [`ObjectCache::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

#[derive(Debug, Clone)]
struct Entry {
    object: TrackedObject,
    refreshed_ms: u64,
}

/// Aged id → object map owned by the acquisition loop.
#[derive(Debug, Clone)]
pub struct ObjectCache {
    max_age_ms: u64,
    entries: BTreeMap<String, Entry>,
}

impl ObjectCache {
    pub fn new(max_age_ms: u64) -> Self {
        Self {
            max_age_ms,
            entries: BTreeMap::new(),
        }
    }

    pub fn max_age_ms(&self) -> u64 {
        self.max_age_ms
    }

    /// Insert or overwrite the entry for `object.id`, refreshed at monotonic
    /// `now_ms`.
    ///
    /// Neither the refresh time nor the object's `last_update_ms` ever moves
    /// backwards: an older stamp keeps the stored one.
    pub fn upsert(&mut self, mut object: TrackedObject, now_ms: u64) -> Upsert {
        match self.entries.get_mut(&object.id) {
            Some(existing) => {
                object.last_update_ms = existing.object.last_update_ms.max(object.last_update_ms);
                existing.refreshed_ms = existing.refreshed_ms.max(now_ms);
                existing.object = object;
                Upsert::Updated
            }
            None => {
                debug!(id = %object.id, "new object");
                self.entries.insert(
                    object.id.clone(),
                    Entry {
                        object,
                        refreshed_ms: now_ms,
                    },
                );
                Upsert::Inserted
            }
        }
    }

    /// Drop every entry not refreshed within the maximum age of monotonic
    /// `now_ms`. Returns the number removed.
    pub fn evict_expired(&mut self, now_ms: u64) -> usize {
        let max_age = self.max_age_ms;
        let before = self.entries.len();
        self.entries.retain(|id, entry| {
            let age_ms = now_ms.saturating_sub(entry.refreshed_ms);
            let keep = age_ms <= max_age;
            if !keep {
                debug!(%id, age_ms, "object expired");
            }
            keep
        });
        before - self.entries.len()
    }

    /// Copy of every live entry, ordered by id.
    pub fn snapshot(&self) -> Vec<TrackedObject> {
        self.entries.values().map(|e| e.object.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&TrackedObject> {
        self.entries.get(id).map(|e| &e.object)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanfuse_types::object_id;

    fn object(label: &str, angle_deg: f32, distance_mm: f32, wall_ms: u64) -> TrackedObject {
        TrackedObject {
            id: object_id(label, angle_deg),
            label: label.to_string(),
            confidence: 0.8,
            angle_deg,
            distance_mm,
            area: 100.0,
            last_update_ms: wall_ms,
        }
    }

    #[test]
    fn entry_expires_after_max_age() {
        let mut cache = ObjectCache::new(500);
        cache.upsert(object("car", 5.0, 900.0, 1_000), 1_000);

        assert_eq!(cache.evict_expired(1_400), 0);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.evict_expired(1_600), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn age_exactly_at_limit_is_kept() {
        let mut cache = ObjectCache::new(500);
        cache.upsert(object("car", 5.0, 900.0, 1_000), 1_000);
        assert_eq!(cache.evict_expired(1_500), 0);
        assert_eq!(cache.evict_expired(1_501), 1);
    }

    #[test]
    fn same_whole_degree_overwrites() {
        let mut cache = ObjectCache::new(500);
        assert_eq!(
            cache.upsert(object("car", 12.4, 900.0, 1_000), 1_000),
            Upsert::Inserted
        );
        assert_eq!(
            cache.upsert(object("car", 12.6, 700.0, 1_100), 1_100),
            Upsert::Updated
        );

        assert_eq!(cache.len(), 1);
        let car = cache.get("car_12").unwrap();
        assert_eq!(car.angle_deg, 12.6);
        assert_eq!(car.distance_mm, 700.0);
        assert_eq!(car.last_update_ms, 1_100);
    }

    #[test]
    fn different_whole_degree_coexists() {
        let mut cache = ObjectCache::new(500);
        cache.upsert(object("car", 12.4, 900.0, 1_000), 1_000);
        cache.upsert(object("car", 13.1, 880.0, 1_100), 1_100);

        let ids: Vec<_> = cache.snapshot().into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["car_12", "car_13"]);

        // The older slot ages out on its own.
        cache.evict_expired(1_550);
        assert!(cache.get("car_12").is_none());
        assert!(cache.get("car_13").is_some());
    }

    #[test]
    fn last_update_never_moves_backwards() {
        let mut cache = ObjectCache::new(500);
        cache.upsert(object("person", -3.0, 1_500.0, 2_000), 2_000);
        cache.upsert(object("person", -3.5, 1_400.0, 1_900), 1_900);

        let person = cache.get("person_-3").unwrap();
        assert_eq!(person.last_update_ms, 2_000);
        assert_eq!(person.distance_mm, 1_400.0);
        // Refresh time kept at 2_000 too.
        assert_eq!(cache.evict_expired(2_500), 0);
        assert_eq!(cache.evict_expired(2_501), 1);
    }

    #[test]
    fn ageing_ignores_wall_clock_stamp() {
        let mut cache = ObjectCache::new(500);
        // Wall clock far in the future relative to the monotonic timeline.
        cache.upsert(object("car", 0.0, 900.0, 9_000_000), 100);
        assert_eq!(cache.evict_expired(601), 1);
    }

    #[test]
    fn refresh_ahead_of_now_does_not_evict() {
        let mut cache = ObjectCache::new(500);
        cache.upsert(object("car", 0.0, 900.0, 10_000), 10_000);
        assert_eq!(cache.evict_expired(5_000), 0);
    }

    #[test]
    fn snapshot_is_detached_copy() {
        let mut cache = ObjectCache::new(500);
        cache.upsert(object("car", 0.0, 900.0, 1_000), 1_000);
        let snap = cache.snapshot();
        cache.evict_expired(10_000);
        assert_eq!(snap.len(), 1);
        assert!(cache.is_empty());
    }
}
