//! The low-level restoration primitives.
//!
//! Nuverse master data arrives in two compact encodings: columnar data with
//! an optional enum table (`restore_compact`) and positional arrays whose
//! field names live in a separate structure file (`restore_dict`). Both
//! expand into ordered keyed records.

use serde_json::Value as JsonValue;

/// An ordered JSON object. `serde_json` is built with `preserve_order`, so
/// insertion order survives serialization.
pub type JsonMap = serde_json::Map<String, JsonValue>;

const ENUM_KEY: &str = "__ENUM__";
const TUPLE_KEY: &str = "__tuple__";

/// Projects a positional array back into a named record.
///
/// Each structure entry is either a plain field name, a
/// `[name, substructure]` pair producing a list of nested records, or a
/// `[name, {"__tuple__": [...]}]` pair projecting the slot into a small
/// named mapping. Absent and null source values are skipped.
pub fn restore_dict(array_data: &[JsonValue], key_structure: &[JsonValue]) -> JsonMap {
    let mut result = JsonMap::new();
    for (i, key) in key_structure.iter().enumerate() {
        if i >= array_data.len() {
            break;
        }
        let value = &array_data[i];
        if value.is_null() {
            continue;
        }
        match key {
            JsonValue::String(name) => {
                result.insert(name.clone(), value.clone());
            }
            JsonValue::Array(pair) if pair.len() >= 2 => {
                let Some(name) = pair[0].as_str() else {
                    continue;
                };
                match &pair[1] {
                    JsonValue::Array(substructure) => {
                        if let Some(items) = value.as_array() {
                            let restored: Vec<JsonValue> = items
                                .iter()
                                .filter(|item| !item.is_null())
                                .map(|item| match item.as_array() {
                                    Some(sub) => {
                                        JsonValue::Object(restore_dict(sub, substructure))
                                    }
                                    None => item.clone(),
                                })
                                .collect();
                            result.insert(name.to_string(), JsonValue::Array(restored));
                        }
                    }
                    JsonValue::Object(marker) => {
                        let Some(tuple_keys) =
                            marker.get(TUPLE_KEY).and_then(|v| v.as_array())
                        else {
                            continue;
                        };
                        if let Some(items) = value.as_array() {
                            let mut tuple = JsonMap::new();
                            for (j, item) in items.iter().enumerate() {
                                if item.is_null() {
                                    continue;
                                }
                                if let Some(field) =
                                    tuple_keys.get(j).and_then(|k| k.as_str())
                                {
                                    tuple.insert(field.to_string(), item.clone());
                                }
                            }
                            result.insert(name.to_string(), JsonValue::Object(tuple));
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
    result
}

/// Expands a columnar record into row-oriented records.
///
/// The optional `__ENUM__` table maps column names to an index→value
/// lookup, either as an array or as an object with numeric keys. Null
/// indices stay null, numeric coercion accepts int/float/string encodings,
/// and out-of-range indices pass through unchanged.
pub fn restore_compact(data: &JsonMap) -> Vec<JsonMap> {
    let enums = data.get(ENUM_KEY).and_then(|v| v.as_object());

    let mut column_labels: Vec<&String> = Vec::new();
    let mut columns: Vec<Vec<JsonValue>> = Vec::new();
    for (column, values) in data {
        if column == ENUM_KEY {
            continue;
        }
        column_labels.push(column);
        let raw: Vec<JsonValue> = values.as_array().cloned().unwrap_or_default();
        let mapped = match enums.and_then(|e| e.get(column)) {
            Some(table) => raw
                .into_iter()
                .map(|v| substitute_enum(table, v))
                .collect(),
            None => raw,
        };
        columns.push(mapped);
    }

    if columns.is_empty() {
        return Vec::new();
    }
    let num_entries = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut result = Vec::with_capacity(num_entries);
    for i in 0..num_entries {
        let mut entry = JsonMap::new();
        for (label, column) in column_labels.iter().zip(&columns) {
            entry.insert((*label).clone(), column[i].clone());
        }
        result.push(entry);
    }
    result
}

fn substitute_enum(table: &JsonValue, value: JsonValue) -> JsonValue {
    if value.is_null() {
        return JsonValue::Null;
    }
    let Some(index) = coerce_index(&value) else {
        return value;
    };
    let looked_up = match table {
        JsonValue::Array(entries) => entries.get(index as usize),
        JsonValue::Object(map) => map.get(&index.to_string()),
        _ => None,
    };
    match looked_up {
        Some(v) => v.clone(),
        None => value,
    }
}

fn coerce_index(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| u as i64))
            .or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Strips the compact marker and lowercases the first character:
/// `compactEventCards` becomes `eventCards`.
pub fn rename_compact_key(key: &str) -> Option<String> {
    let stripped = key.strip_prefix(super::COMPACT_PREFIX)?;
    let mut chars = stripped.chars();
    let first = chars.next()?;
    Some(first.to_lowercase().chain(chars).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: JsonValue) -> JsonMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_restore_dict_plain_names() {
        let result = restore_dict(
            &[json!("x"), json!(5)],
            &[json!("name"), json!("age")],
        );
        assert_eq!(JsonValue::Object(result), json!({"name": "x", "age": 5}));
    }

    #[test]
    fn test_restore_dict_skips_null_and_missing_slots() {
        let result = restore_dict(
            &[json!(1), json!(null)],
            &[json!("id"), json!("skipped"), json!("absent")],
        );
        assert_eq!(JsonValue::Object(result), json!({"id": 1}));
    }

    #[test]
    fn test_restore_dict_nested_list() {
        let result = restore_dict(
            &[json!(1), json!([[100, 10], [200, 20]])],
            &[json!("id"), json!(["costs", ["resourceId", "quantity"]])],
        );
        assert_eq!(
            JsonValue::Object(result),
            json!({
                "id": 1,
                "costs": [
                    {"resourceId": 100, "quantity": 10},
                    {"resourceId": 200, "quantity": 20},
                ],
            })
        );
    }

    #[test]
    fn test_restore_dict_tuple_marker() {
        let result = restore_dict(
            &[json!(1), json!([100, 10])],
            &[
                json!("id"),
                json!(["cost", {"__tuple__": ["resourceId", "quantity"]}]),
            ],
        );
        assert_eq!(
            JsonValue::Object(result),
            json!({"id": 1, "cost": {"resourceId": 100, "quantity": 10}})
        );
    }

    #[test]
    fn test_restore_compact_enum_substitution() {
        let data = as_map(json!({
            "col": [0, 1, null],
            "__ENUM__": {"col": ["a", "b", "c"]},
        }));
        let rows = restore_compact(&data);
        let rows: Vec<JsonValue> = rows.into_iter().map(JsonValue::Object).collect();
        assert_eq!(
            rows,
            vec![json!({"col": "a"}), json!({"col": "b"}), json!({"col": null})]
        );
    }

    #[test]
    fn test_restore_compact_object_enum_and_string_indices() {
        let data = as_map(json!({
            "status": ["0", 1.0, 7],
            "__ENUM__": {"status": {"0": "inactive", "1": "active"}},
        }));
        let rows = restore_compact(&data);
        assert_eq!(rows[0]["status"], "inactive");
        assert_eq!(rows[1]["status"], "active");
        // Out-of-range index passes through unchanged.
        assert_eq!(rows[2]["status"], 7);
    }

    #[test]
    fn test_restore_compact_pivots_to_shortest_column() {
        let data = as_map(json!({
            "id": [1, 2, 3],
            "name": ["a", "b"],
        }));
        let rows = restore_compact(&data);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["id"], 2);
        assert_eq!(rows[1]["name"], "b");
    }

    #[test]
    fn test_restore_compact_keeps_column_order() {
        let data = as_map(json!({"zebra": [1], "apple": [2]}));
        let rows = restore_compact(&data);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["zebra", "apple"]);
    }

    #[test]
    fn test_rename_compact_key() {
        assert_eq!(
            rename_compact_key("compactEventCards").as_deref(),
            Some("eventCards")
        );
        assert_eq!(rename_compact_key("compactX").as_deref(), Some("x"));
        assert_eq!(rename_compact_key("notCompact"), None);
        assert_eq!(rename_compact_key("compact"), None);
    }
}
