//! Selection-tree query builder

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

/// One node of a selection tree
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Plain attribute
    Field(String),
    /// Nested relation, optionally filtered
    Relation {
        /// Relation name (`cards`, `deck`, ...)
        name: String,
        /// Filter object embedded into the key
        filter: Option<Value>,
        /// Selected children
        fields: Vec<Selection>,
    },
}

impl Selection {
    /// Plain attribute
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    /// Several plain attributes at once
    pub fn fields<I, S>(names: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().map(Self::field).collect()
    }

    /// Unfiltered relation
    pub fn relation(name: impl Into<String>, fields: Vec<Selection>) -> Self {
        Self::Relation {
            name: name.into(),
            filter: None,
            fields,
        }
    }

    /// Relation with a filter embedded in its key
    pub fn filtered(name: impl Into<String>, filter: Value, fields: Vec<Selection>) -> Self {
        Self::Relation {
            name: name.into(),
            filter: Some(filter),
            fields,
        }
    }

    /// The key this node is selected (and answered) under
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Field(name) => name.clone(),
            Self::Relation { name, filter, .. } => relation_key(name, filter.as_ref()),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Field(name) => Value::String(name.clone()),
            Self::Relation { fields, .. } => {
                let children: Vec<Value> = fields.iter().map(Self::to_value).collect();
                let mut node = Map::new();
                node.insert(self.key(), Value::Array(children));
                Value::Object(node)
            }
        }
    }
}

/// Build the key for a relation, embedding a canonical filter if present.
///
/// An empty filter object is omitted so `cards({})` and `cards` agree.
#[must_use]
pub fn relation_key(name: &str, filter: Option<&Value>) -> String {
    match filter {
        Some(Value::Object(map)) if map.is_empty() => name.to_string(),
        Some(filter) => format!("{name}({})", canonical_json(filter)),
        None => name.to_string(),
    }
}

/// Compact JSON with object keys sorted at every depth
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (key, entry) in sorted {
                out.insert(key.clone(), entry);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        _ => value.clone(),
    }
}

/// Wrap root selections into a query document
#[must_use]
pub fn build_query(root: &[Selection]) -> Value {
    json!({ "_root": root.iter().map(Selection::to_value).collect::<Vec<_>>() })
}
