//! Entity-map extraction
//!
//! Responses look like `{"_root": {...}, "card": {"<id>": {...}}, "deck": {...}}`.
//! Extraction keeps upstream order and never mutates the response.

use serde_json::{Map, Value};

use crate::{Error, Result};

/// A loosely typed upstream record
pub type Record = Map<String, Value>;

fn entity_map<'a>(response: &'a Value, entity_key: &str) -> Result<Option<&'a Record>> {
    let Some(root) = response.as_object() else {
        return Err(Error::protocol(format!(
            "expected a JSON object response, got {}",
            kind_of(response)
        )));
    };
    match root.get(entity_key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(Error::protocol(format!(
            "expected an entity map under `{entity_key}`, got {}",
            kind_of(other)
        ))),
    }
}

fn with_id(id: &str, record: &Record) -> Record {
    let mut out = record.clone();
    out.entry("id").or_insert_with(|| Value::String(id.to_string()));
    out
}

/// Flatten the entity map under `entity_key` into a list, in map order.
///
/// Non-object entries are skipped. A missing key means "no entities".
pub fn extract_entities(response: &Value, entity_key: &str) -> Result<Vec<Record>> {
    Ok(entity_map(response, entity_key)?
        .map(|map| {
            map.iter()
                .filter_map(|(id, value)| value.as_object().map(|r| with_id(id, r)))
                .collect()
        })
        .unwrap_or_default())
}

/// Extract a top-level collection whose container key is named
/// inconsistently: the singular key is tried first, then the plural.
pub fn extract_collection(response: &Value, singular: &str, plural: &str) -> Result<Vec<Record>> {
    if entity_map(response, singular)?.is_some() {
        extract_entities(response, singular)
    } else {
        extract_entities(response, plural)
    }
}

/// Records for `ids`, in the order given. Unknown ids are skipped.
pub fn select_entities(response: &Value, entity_key: &str, ids: &[String]) -> Result<Vec<Record>> {
    let Some(map) = entity_map(response, entity_key)? else {
        return Ok(Vec::new());
    };
    Ok(ids
        .iter()
        .filter_map(|id| {
            map.get(id)
                .and_then(Value::as_object)
                .map(|r| with_id(id, r))
        })
        .collect())
}

/// Look up one referenced entity
pub fn resolve_ref<'a>(response: &'a Value, entity_key: &str, id: &str) -> Option<&'a Record> {
    response.get(entity_key)?.get(id)?.as_object()
}

/// Id of a root relation such as `_root.account`
pub fn root_id(response: &Value, relation: &str) -> Result<String> {
    response
        .get("_root")
        .and_then(|root| root.get(relation))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::protocol(format!("response has no `_root.{relation}` reference")))
}

/// Ids stored under a relation key of a record (single id or id list)
#[must_use]
pub fn related_ids(record: &Record, key: &str) -> Vec<String> {
    match record.get(key) {
        Some(Value::String(id)) => vec![id.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response() -> Value {
        json!({
            "_root": {"account": "acc-1"},
            "account": {"acc-1": {"name": "Studio", "decks": ["d-2", "d-1"]}},
            "card": {
                "c-3": {"title": "Third"},
                "c-1": {"title": "First"},
                "bogus": "not a record",
                "c-2": {"title": "Second", "id": "c-2"}
            },
            "deck": {"d-1": {"title": "Backlog"}, "d-2": {"title": "Sprint"}}
        })
    }

    #[test]
    fn keeps_map_order_and_skips_non_objects() {
        let cards = extract_entities(&response(), "card").unwrap();
        let titles: Vec<_> = cards.iter().map(|c| c["title"].as_str().unwrap()).collect();
        assert_eq!(titles, ["Third", "First", "Second"]);
        assert_eq!(cards[0]["id"], "c-3");
    }

    #[test]
    fn does_not_mutate_input() {
        let input = response();
        let before = input.clone();
        let _ = extract_entities(&input, "card").unwrap();
        assert_eq!(input, before);
    }

    #[test]
    fn missing_key_is_empty_but_wrong_shape_is_an_error() {
        assert!(extract_entities(&response(), "milestone").unwrap().is_empty());
        let broken = json!({"card": ["c-1"]});
        assert!(matches!(
            extract_entities(&broken, "card"),
            Err(Error::Protocol(_))
        ));
        assert!(extract_entities(&json!([1, 2]), "card").is_err());
    }

    #[test]
    fn singular_container_wins_over_plural() {
        let both = json!({
            "deck": {"d-1": {"title": "Singular"}},
            "decks": {"d-9": {"title": "Plural"}}
        });
        let decks = extract_collection(&both, "deck", "decks").unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0]["title"], "Singular");

        let plural_only = json!({"decks": {"d-9": {"title": "Plural"}}});
        let decks = extract_collection(&plural_only, "deck", "decks").unwrap();
        assert_eq!(decks[0]["title"], "Plural");
    }

    #[test]
    fn selects_by_relation_order() {
        let resp = response();
        let account = resolve_ref(&resp, "account", "acc-1").unwrap();
        let ids = related_ids(account, "decks");
        let decks = select_entities(&resp, "deck", &ids).unwrap();
        let titles: Vec<_> = decks.iter().map(|d| d["title"].as_str().unwrap()).collect();
        assert_eq!(titles, ["Sprint", "Backlog"]);
    }

    #[test]
    fn root_reference() {
        assert_eq!(root_id(&response(), "account").unwrap(), "acc-1");
        assert!(root_id(&json!({}), "account").is_err());
    }
}
