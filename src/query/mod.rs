//! Query dialect adapter
//!
//! Codecks reads are selection trees. Filters travel inside relation key
//! names (`cards({"status":"started"})`), so they must serialize
//! identically every time. Responses come back normalized: one map per
//! entity type, keyed by entity id. This module builds the former and
//! flattens the latter into ordered record lists. Nothing here touches the
//! network.

mod builder;
mod extract;

pub use builder::{Selection, build_query, canonical_json, relation_key};
pub use extract::{
    Record, extract_collection, extract_entities, related_ids, resolve_ref, root_id,
    select_entities,
};
