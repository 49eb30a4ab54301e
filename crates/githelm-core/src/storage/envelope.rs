use serde::{Deserialize, Serialize};

/// A payload paired with the wall-clock time (Unix ms) of its last
/// successful write. Persisted as `{"lastUpdated": <ms>, "data": <T>}`.
///
/// An absent entry reads as `lastUpdated == 0` with `T::default()` data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageEnvelope<T> {
    pub last_updated: i64,
    pub data: T,
}

impl<T> StorageEnvelope<T> {
    pub fn new(last_updated: i64, data: T) -> Self {
        Self { last_updated, data }
    }

    /// True when this envelope came from an actual write.
    pub fn has_data(&self) -> bool {
        self.last_updated > 0
    }

    /// Milliseconds since the last write, as seen at `now_millis`.
    pub fn age_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.last_updated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_camel_case_field() {
        let env = StorageEnvelope::new(1_000, json!({"items": [1, 2]}));
        let raw = serde_json::to_value(&env).unwrap();
        assert_eq!(raw, json!({"lastUpdated": 1_000, "data": {"items": [1, 2]}}));
    }

    #[test]
    fn default_envelope_has_no_data() {
        let env: StorageEnvelope<Vec<u32>> = StorageEnvelope::default();
        assert!(!env.has_data());
        assert!(env.data.is_empty());
        assert_eq!(env.age_millis(500), 500);
    }
}
