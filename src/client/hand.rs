//! Hand queue: a user's personal ordered list of cards

use serde_json::{Value, json};
use tracing::info;

use super::{
    CodecksClient, account_record,
    model::{CardDetail, card_selection, normalize_card},
};
use crate::{
    Error, Result,
    query::{Record, Selection, related_ids, relation_key, resolve_ref, select_entities},
    security::validate_identifiers,
};

impl CodecksClient {
    /// Cards in the configured user's hand, in queue order
    pub async fn list_hand(&self) -> Result<Vec<Record>> {
        let user_id = self.user_id()?;
        let filter = json!({"userId": user_id, "$order": "sortIndex"});
        let response = self
            .query_account(vec![Selection::filtered(
                "queueEntries",
                filter.clone(),
                vec![
                    Selection::field("sortIndex"),
                    Selection::relation("card", card_selection(CardDetail::default())),
                ],
            )])
            .await?;

        let account = account_record(&response)?;
        let key = relation_key("queueEntries", Some(&filter));
        if !account.contains_key(&key) {
            return Err(Error::protocol(format!(
                "account record has no `{key}` relation"
            )));
        }
        let entries = select_entities(&response, "queueEntry", &related_ids(account, &key))?;

        let mut cards = Vec::with_capacity(entries.len());
        for entry in &entries {
            let Some(card_id) = related_ids(entry, "card").into_iter().next() else {
                continue;
            };
            let Some(raw) = resolve_ref(&response, "card", &card_id) else {
                continue;
            };
            let mut card = normalize_card(&response, &card_id, raw, CardDetail::default());
            card.insert("hand_position".into(), json!(cards.len() + 1));
            cards.push(card);
        }
        Ok(cards)
    }

    /// Append cards to the hand; cards already there keep their place.
    ///
    /// The queue is replaced as a whole, so repeating the call is harmless.
    pub async fn add_to_hand(&self, card_ids: &[String]) -> Result<Value> {
        let card_ids = validate_identifiers(card_ids)?;
        let user_id = self.user_id()?.to_string();

        let mut order: Vec<String> = self
            .list_hand()
            .await?
            .iter()
            .filter_map(|c| c.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();

        let mut added = Vec::new();
        let mut already = Vec::new();
        for id in card_ids {
            if added.contains(&id) {
                continue;
            }
            if order.contains(&id) {
                if !already.contains(&id) {
                    already.push(id);
                }
            } else {
                order.push(id.clone());
                added.push(id);
            }
        }

        if !added.is_empty() {
            self.dispatch_idempotent(
                "handQueue/setCardOrders",
                json!({"sessionId": user_id, "cardIds": order}),
            )
            .await?;
            info!(added = added.len(), hand_size = order.len(), "Updated hand");
        }

        Ok(json!({
            "added": added,
            "already_in_hand": already,
            "hand_size": order.len(),
        }))
    }

    /// Remove cards from the hand
    pub async fn remove_from_hand(&self, card_ids: &[String]) -> Result<Value> {
        let card_ids = validate_identifiers(card_ids)?;
        let user_id = self.user_id()?;
        self.dispatch_idempotent(
            "handQueue/removeCards",
            json!({"sessionId": user_id, "cardIds": card_ids}),
        )
        .await?;
        Ok(json!({"removed": card_ids}))
    }
}
