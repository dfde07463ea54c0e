//! Result envelopes handed back to the agent
//!
//! Every tool result passes through [`normalize`] and then [`finalize`];
//! every failure is built with [`error_envelope`]. Error envelopes look the
//! same in both presentation modes.

use serde_json::{Map, Value, json};

use crate::config::ContractMode;

/// Version stamped on every envelope
pub const SCHEMA_VERSION: &str = "1.0";

const OK: &str = "ok";
const VERSION: &str = "schema_version";
const DATA: &str = "data";
const ERROR: &str = "error";
const ERROR_DETAIL: &str = "error_detail";

/// Build a failure envelope
#[must_use]
pub fn error_envelope(message: &str, kind: &str) -> Value {
    json!({
        OK: false,
        VERSION: SCHEMA_VERSION,
        ERROR: message,
        ERROR_DETAIL: {"type": kind, "message": message},
    })
}

/// Stamp `ok` and `schema_version` onto an object payload.
///
/// Only absent keys are added, so normalizing twice changes nothing. A
/// payload with `ok: false`, or with an `error` key and no `ok`, is a
/// failure and gets `error_detail` backfilled from `type` and `error`.
/// Non-object payloads are returned untouched.
#[must_use]
pub fn normalize(payload: Value) -> Value {
    let Value::Object(mut map) = payload else {
        return payload;
    };
    if !map.contains_key(OK) {
        let failed = map.contains_key(ERROR);
        map.insert(OK.into(), Value::Bool(!failed));
    }
    map.entry(VERSION)
        .or_insert_with(|| Value::String(SCHEMA_VERSION.into()));

    if is_failure(&map) && !map.contains_key(ERROR_DETAIL) {
        let message = match map.get(ERROR) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        };
        let kind = map
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("error")
            .to_string();
        map.insert(
            ERROR_DETAIL.into(),
            json!({"type": kind, "message": message}),
        );
    }
    Value::Object(map)
}

/// Present a result in the configured mode.
///
/// In envelope mode a success is nested under `data`; failures and
/// results that are already enveloped pass through as they are.
#[must_use]
pub fn finalize(payload: Value, mode: ContractMode) -> Value {
    let normalized = normalize(payload);
    if mode == ContractMode::Legacy {
        return normalized;
    }
    match normalized {
        Value::Object(map) if is_failure(&map) || is_enveloped(&map) => Value::Object(map),
        Value::Object(mut map) => {
            map.remove(OK);
            map.remove(VERSION);
            json!({OK: true, VERSION: SCHEMA_VERSION, DATA: map})
        }
        other => json!({OK: true, VERSION: SCHEMA_VERSION, DATA: other}),
    }
}

/// Whether a finalized result reports a failure
#[must_use]
pub fn is_error(result: &Value) -> bool {
    result.get(OK) == Some(&Value::Bool(false))
}

fn is_failure(map: &Map<String, Value>) -> bool {
    map.get(OK) == Some(&Value::Bool(false))
}

fn is_enveloped(map: &Map<String, Value>) -> bool {
    map.len() == 3
        && map.contains_key(DATA)
        && map.contains_key(VERSION)
        && map.get(OK) == Some(&Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn error_envelope_shape() {
        assert_eq!(
            error_envelope("deck \"X\" not found", "not_found"),
            json!({
                "ok": false,
                "schema_version": "1.0",
                "error": "deck \"X\" not found",
                "error_detail": {"type": "not_found", "message": "deck \"X\" not found"}
            })
        );
    }

    #[test]
    fn normalize_adds_missing_keys_only() {
        let out = normalize(json!({"cards": [], "count": 0}));
        assert_eq!(out["ok"], true);
        assert_eq!(out["schema_version"], "1.0");

        let custom = normalize(json!({"ok": true, "schema_version": "0.9"}));
        assert_eq!(custom["schema_version"], "0.9");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize(json!({"card_id": "x", "updated_fields": ["status"]}));
        let twice = normalize(once.clone());
        assert_eq!(once, twice);

        let failure = normalize(json!({"ok": false, "error": "boom"}));
        assert_eq!(normalize(failure.clone()), failure);
    }

    #[test]
    fn normalize_backfills_error_detail() {
        let out = normalize(json!({"ok": false, "error": "boom", "type": "validation"}));
        assert_eq!(out["error_detail"], json!({"type": "validation", "message": "boom"}));

        let implicit = normalize(json!({"error": "gone"}));
        assert_eq!(implicit["ok"], false);
        assert_eq!(implicit["error_detail"]["type"], "error");
    }

    #[test]
    fn normalize_leaves_lists_alone() {
        let list = json!([{"id": "d-1"}]);
        assert_eq!(normalize(list.clone()), list);
    }

    #[test]
    fn legacy_mode_returns_normalized_payload() {
        let out = finalize(json!({"count": 2}), ContractMode::Legacy);
        assert_eq!(out, json!({"count": 2, "ok": true, "schema_version": "1.0"}));
        assert_eq!(finalize(json!([1, 2]), ContractMode::Legacy), json!([1, 2]));
    }

    #[test]
    fn envelope_mode_wraps_success_once() {
        let out = finalize(json!({"count": 2}), ContractMode::Envelope);
        assert_eq!(
            out,
            json!({"ok": true, "schema_version": "1.0", "data": {"count": 2}})
        );
        assert_eq!(finalize(out.clone(), ContractMode::Envelope), out);
    }

    #[test]
    fn envelope_mode_wraps_lists() {
        let out = finalize(json!([{"id": "d-1"}]), ContractMode::Envelope);
        assert_eq!(out["data"], json!([{"id": "d-1"}]));
    }

    #[test]
    fn errors_are_never_wrapped() {
        let err = error_envelope("boom", "transport");
        assert_eq!(finalize(err.clone(), ContractMode::Envelope), err);
        assert_eq!(finalize(err.clone(), ContractMode::Legacy), err);
        assert!(is_error(&err));
    }
}
