//! Master-data restoration.
//!
//! Nuverse snapshots ship master data in compact encodings to save CDN
//! bytes; this crate expands them back into the fully keyed records the
//! rest of the gateway (and its downstream consumers) expect. Individual
//! record types that fail to restore are reported and skipped; only a
//! malformed structure file aborts a run.

pub mod restore;

use std::path::Path;

use sekai_core::{Result, SekaiError};
use serde_json::Value as JsonValue;
use tracing::warn;

pub use restore::{JsonMap, rename_compact_key, restore_compact, restore_dict};

pub(crate) const COMPACT_PREFIX: &str = "compact";

/// The one record type that is merged incrementally across snapshots.
const EVENT_CARDS_KEY: &str = "eventCards";
const EVENT_CARDS_ID: &str = "cardId";

/// What wins when an incoming event card carries an id that already exists
/// in the previously restored set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Keep the record already present; drop the incoming duplicate.
    #[default]
    PreferExisting,
    /// Replace the existing record with the incoming one.
    PreferIncoming,
}

/// One record type that could not be restored.
#[derive(Debug)]
pub struct RestoreFailure {
    pub key: String,
    pub message: String,
}

/// A restoration run: the expanded data plus the per-key failures that
/// were skipped.
#[derive(Debug)]
pub struct RestoreOutcome {
    pub data: JsonMap,
    pub failures: Vec<RestoreFailure>,
}

/// Schema-driven restorer for one region's master data.
pub struct MasterRestorer {
    structures: JsonMap,
    merge_policy: MergePolicy,
}

impl MasterRestorer {
    pub fn new(structures: JsonMap) -> Self {
        Self {
            structures,
            merge_policy: MergePolicy::default(),
        }
    }

    /// Loads the structure file. A malformed file is fatal for the run.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            SekaiError::parse(format!(
                "failed to read structure file {}: {}",
                path.display(),
                e
            ))
        })?;
        let structures: JsonMap = serde_json::from_slice(&data)
            .map_err(|e| SekaiError::parse(format!("malformed structure file: {}", e)))?;
        Ok(Self::new(structures))
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Restores a raw master-data snapshot.
    ///
    /// `previous_event_cards` is the already-restored event card set from
    /// an earlier run (the snapshot only carries the recent window);
    /// duplicates between the two are resolved by the merge policy and the
    /// merged set is sorted ascending by id. A failure on one key is
    /// recorded and the rest of the snapshot still restores.
    pub fn restore(
        &self,
        raw: &JsonMap,
        previous_event_cards: &[JsonValue],
    ) -> RestoreOutcome {
        let mut data = JsonMap::new();
        let mut failures = Vec::new();

        for (key, value) in raw {
            if key.is_empty() {
                continue;
            }
            if let Some(renamed) = rename_compact_key(key) {
                match value.as_object() {
                    Some(columns) => {
                        let rows = restore_compact(columns)
                            .into_iter()
                            .map(JsonValue::Object)
                            .collect();
                        data.insert(renamed, JsonValue::Array(rows));
                    }
                    None => {
                        warn!("skipping compact key {}: not an object", key);
                        failures.push(RestoreFailure {
                            key: key.clone(),
                            message: "compact data is not an object".to_string(),
                        });
                    }
                }
                continue;
            }

            let projected = match (self.structures.get(key), value.as_array()) {
                (Some(JsonValue::Array(structure)), Some(items)) => {
                    let restored: Vec<JsonValue> = items
                        .iter()
                        .filter_map(|item| item.as_array())
                        .map(|item| JsonValue::Object(restore_dict(item, structure)))
                        .collect();
                    JsonValue::Array(restored)
                }
                _ => value.clone(),
            };

            if key == EVENT_CARDS_KEY {
                match projected {
                    JsonValue::Array(incoming) => {
                        let merged =
                            merge_by_id(incoming, previous_event_cards, self.merge_policy);
                        data.insert(key.clone(), JsonValue::Array(merged));
                    }
                    other => {
                        warn!("skipping {} merge: not an array", key);
                        failures.push(RestoreFailure {
                            key: key.clone(),
                            message: "event card data is not an array".to_string(),
                        });
                        data.insert(key.clone(), other);
                    }
                }
            } else {
                data.insert(key.clone(), projected);
            }
        }

        RestoreOutcome { data, failures }
    }
}

/// Merges incoming event cards with the previously restored set,
/// deduplicating by id and sorting the result ascending.
fn merge_by_id(
    incoming: Vec<JsonValue>,
    existing: &[JsonValue],
    policy: MergePolicy,
) -> Vec<JsonValue> {
    let record_id = |record: &JsonValue| record.get(EVENT_CARDS_ID).and_then(JsonValue::as_i64);

    // The winning side is kept wholesale; the other side is deduplicated
    // against it.
    let (winners, losers) = match policy {
        MergePolicy::PreferExisting => (existing.to_vec(), incoming),
        MergePolicy::PreferIncoming => (incoming, existing.to_vec()),
    };
    let winner_ids: std::collections::HashSet<i64> =
        winners.iter().filter_map(record_id).collect();

    let mut merged: Vec<JsonValue> = losers
        .into_iter()
        .filter(|record| match record_id(record) {
            Some(id) => !winner_ids.contains(&id),
            None => true,
        })
        .collect();
    merged.extend(winners);
    merged.sort_by_key(|record| record_id(record).unwrap_or(0));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: JsonValue) -> JsonMap {
        value.as_object().unwrap().clone()
    }

    fn restorer() -> MasterRestorer {
        MasterRestorer::new(as_map(json!({
            "actionSets": ["id", "areaId"],
        })))
    }

    #[test]
    fn test_restore_expands_compact_keys() {
        let raw = as_map(json!({
            "compactAreaItems": {
                "id": [1, 2],
                "level": [10, 20],
            },
        }));
        let outcome = restorer().restore(&raw, &[]);
        assert!(outcome.failures.is_empty());
        assert_eq!(
            outcome.data["areaItems"],
            json!([{"id": 1, "level": 10}, {"id": 2, "level": 20}])
        );
        // The raw compact entry is replaced by its expansion.
        assert!(!outcome.data.contains_key("compactAreaItems"));
    }

    #[test]
    fn test_restore_projects_schema_keys() {
        let raw = as_map(json!({
            "actionSets": [[1, 5], [2, 6]],
        }));
        let outcome = restorer().restore(&raw, &[]);
        assert_eq!(
            outcome.data["actionSets"],
            json!([{"id": 1, "areaId": 5}, {"id": 2, "areaId": 6}])
        );
    }

    #[test]
    fn test_restore_passes_unknown_keys_through() {
        let raw = as_map(json!({"events": [{"id": 9}]}));
        let outcome = restorer().restore(&raw, &[]);
        assert_eq!(outcome.data["events"], json!([{"id": 9}]));
    }

    #[test]
    fn test_event_card_merge_prefers_existing() {
        let existing = vec![
            json!({"cardId": 1, "source": "existing"}),
            json!({"cardId": 3, "source": "existing"}),
        ];
        let raw = as_map(json!({
            "eventCards": [
                {"cardId": 1, "dup": true},
                {"cardId": 2, "source": "incoming"},
            ],
        }));
        let outcome = restorer().restore(&raw, &existing);
        assert_eq!(
            outcome.data["eventCards"],
            json!([
                {"cardId": 1, "source": "existing"},
                {"cardId": 2, "source": "incoming"},
                {"cardId": 3, "source": "existing"},
            ])
        );
    }

    #[test]
    fn test_event_card_merge_prefer_incoming_policy() {
        let existing = vec![json!({"cardId": 1, "source": "existing"})];
        let raw = as_map(json!({
            "eventCards": [{"cardId": 1, "source": "incoming"}],
        }));
        let outcome = restorer()
            .with_merge_policy(MergePolicy::PreferIncoming)
            .restore(&raw, &existing);
        assert_eq!(
            outcome.data["eventCards"],
            json!([{"cardId": 1, "source": "incoming"}])
        );
    }

    #[test]
    fn test_bad_compact_key_is_isolated() {
        let raw = as_map(json!({
            "compactBroken": [1, 2, 3],
            "events": [{"id": 1}],
        }));
        let outcome = restorer().restore(&raw, &[]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].key, "compactBroken");
        // The rest of the snapshot still restored.
        assert_eq!(outcome.data["events"], json!([{"id": 1}]));
    }

    #[test]
    fn test_from_file_rejects_malformed_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("structure.json");
        std::fs::write(&path, "{broken").unwrap();
        assert!(MasterRestorer::from_file(&path).is_err());
    }

    #[test]
    fn test_from_file_loads_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("structure.json");
        std::fs::write(&path, r#"{"cards": ["id", "name"]}"#).unwrap();
        let restorer = MasterRestorer::from_file(&path).unwrap();
        let raw = as_map(json!({"cards": [[1, "miku"]]}));
        let outcome = restorer.restore(&raw, &[]);
        assert_eq!(outcome.data["cards"], json!([{"id": 1, "name": "miku"}]));
    }
}
