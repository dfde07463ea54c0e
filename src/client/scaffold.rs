//! Feature scaffolding: hero cards with one child card per discipline lane

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{
    CodecksClient,
    lookups::Lookups,
    model::{CardDetail, Lane},
    mutations::{compose_content, non_empty_title},
};
use crate::{
    Error, Result,
    security::{strip_control_chars, validate_optional_text, validate_text},
};

/// Per-lane deck names; unset lanes use the hero's deck
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LaneDecks {
    /// Deck for the code lane
    pub code_deck: Option<String>,
    /// Deck for the design lane
    pub design_deck: Option<String>,
    /// Deck for the art lane
    pub art_deck: Option<String>,
    /// Deck for the audio lane
    pub audio_deck: Option<String>,
    /// Skip the art lane
    pub skip_art: bool,
    /// Skip the audio lane
    pub skip_audio: bool,
}

/// Input for [`CodecksClient::scaffold_feature`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScaffoldRequest {
    /// Feature title
    pub title: String,
    /// Feature description for the hero card
    pub description: Option<String>,
    /// Deck of the hero card
    pub deck: String,
    /// Lane configuration
    #[serde(flatten)]
    pub lanes: LaneDecks,
}

/// Input for [`CodecksClient::split_features`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SplitRequest {
    /// Deck whose un-split cards are treated as features
    pub deck: String,
    /// Lane configuration
    #[serde(flatten)]
    pub lanes: LaneDecks,
    /// Only report what would be split
    pub dry_run: bool,
}

/// A lane with its resolved deck
struct LanePlan {
    lane: Lane,
    deck_id: String,
}

impl LaneDecks {
    fn wanted(&self) -> Vec<(Lane, Option<&str>)> {
        let mut lanes = vec![
            (Lane::Code, self.code_deck.as_deref()),
            (Lane::Design, self.design_deck.as_deref()),
        ];
        if !self.skip_art {
            lanes.push((Lane::Art, self.art_deck.as_deref()));
        }
        if !self.skip_audio {
            lanes.push((Lane::Audio, self.audio_deck.as_deref()));
        }
        lanes
    }

    fn skipped(&self) -> Vec<Lane> {
        let mut skipped = Vec::new();
        if self.skip_art {
            skipped.push(Lane::Art);
        }
        if self.skip_audio {
            skipped.push(Lane::Audio);
        }
        skipped
    }

    /// Validate lane deck names without touching the network
    fn validate(&self) -> Result<()> {
        for (_, deck) in self.wanted() {
            validate_optional_text(deck, "deck")?;
        }
        Ok(())
    }

    fn resolve(&self, lookups: &Lookups, default_deck: &str) -> Result<Vec<LanePlan>> {
        self.wanted()
            .into_iter()
            .map(|(lane, deck)| {
                let deck_id = match deck {
                    Some(name) => lookups.deck(&strip_control_chars(name))?.id.clone(),
                    None => default_deck.to_string(),
                };
                Ok(LanePlan { lane, deck_id })
            })
            .collect()
    }
}

fn lane_title(lane: Lane, title: &str) -> String {
    format!("[{}] {title}", lane.label())
}

fn required_deck(deck: &str) -> Result<String> {
    let deck = validate_text(deck, "deck")?;
    if deck.trim().is_empty() {
        return Err(Error::validation("deck is required"));
    }
    Ok(deck)
}

impl CodecksClient {
    /// Create lane cards under an existing hero, one call per lane.
    ///
    /// Stops at the first failure; earlier lane cards stay in place.
    async fn create_lanes(
        &self,
        hero_id: &str,
        title: &str,
        plan: &[LanePlan],
        hero_is_new: bool,
    ) -> Result<Vec<Value>> {
        let mut created = Vec::with_capacity(plan.len());
        for step in plan {
            let lane_title = lane_title(step.lane, title);
            let content = compose_content(&lane_title, Some(step.lane.checklist()));
            match self.create_raw(&content, Some(&step.deck_id), Some(hero_id)).await {
                Ok(id) => created.push(json!({
                    "lane": step.lane,
                    "id": id,
                    "title": lane_title,
                    "deck_id": step.deck_id,
                })),
                Err(e) => {
                    let lanes = format!("{} of {} lane cards", created.len(), plan.len());
                    let completed = if hero_is_new {
                        format!("hero card {hero_id} and {lanes} were created")
                    } else {
                        format!("{lanes} under card {hero_id} were created")
                    };
                    return Err(Error::PartialFailure {
                        completed,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(created)
    }

    /// Create a hero card and its lane cards.
    ///
    /// Every deck name is resolved before the first card is created.
    pub async fn scaffold_feature(&self, request: &ScaffoldRequest) -> Result<Value> {
        let title = non_empty_title(&request.title)?;
        let description = validate_optional_text(request.description.as_deref(), "content")?;
        let deck = required_deck(&request.deck)?;
        request.lanes.validate()?;

        let lookups = self.fetch_lookups().await?;
        let hero_deck = lookups.deck(&deck)?.id.clone();
        let plan = request.lanes.resolve(&lookups, &hero_deck)?;

        let hero_content = compose_content(&title, description.as_deref());
        let hero_id = self.create_raw(&hero_content, Some(&hero_deck), None).await?;
        let lanes = self.create_lanes(&hero_id, &title, &plan, true).await?;
        info!(hero_id = %hero_id, lanes = lanes.len(), "Scaffolded feature");

        Ok(json!({
            "hero": {"id": hero_id, "title": title, "deck_id": hero_deck},
            "lanes": lanes,
            "skipped": request.lanes.skipped(),
        }))
    }

    /// Scaffold lanes under every card in a deck that has no children yet.
    ///
    /// A failing feature is recorded and the batch moves on. With
    /// `dry_run` only the discovery query is issued.
    pub async fn split_features(&self, request: &SplitRequest) -> Result<Value> {
        let deck = required_deck(&request.deck)?;
        request.lanes.validate()?;

        let lookups = self.fetch_lookups().await?;
        let deck_id = lookups.deck(&deck)?.id.clone();
        let plan = request.lanes.resolve(&lookups, &deck_id)?;

        let cards = self
            .fetch_cards(
                &json!({"deckId": deck_id, "visibility": "default"}),
                CardDetail::default(),
            )
            .await?;
        let features: Vec<(String, String)> = cards
            .iter()
            .filter(|c| {
                c.get("parent_id").is_none_or(Value::is_null)
                    && c.get("sub_cards")
                        .and_then(Value::as_array)
                        .is_none_or(Vec::is_empty)
            })
            .filter_map(|c| {
                let id = c.get("id")?.as_str()?.to_string();
                let title = c.get("title").and_then(Value::as_str).unwrap_or_default();
                Some((id, strip_control_chars(title)))
            })
            .collect();

        if request.dry_run {
            let listed: Vec<Value> = features
                .iter()
                .map(|(id, title)| json!({"id": id, "title": title}))
                .collect();
            return Ok(json!({
                "dry_run": true,
                "deck_id": deck_id,
                "count": listed.len(),
                "features": listed,
                "lanes": plan.iter().map(|p| p.lane).collect::<Vec<_>>(),
            }));
        }

        let mut results = Vec::with_capacity(features.len());
        let mut succeeded = 0usize;
        for (id, title) in &features {
            match self.create_lanes(id, title, &plan, false).await {
                Ok(lanes) => {
                    succeeded += 1;
                    results.push(json!({
                        "card_id": id,
                        "title": title,
                        "ok": true,
                        "lanes": lanes,
                    }));
                }
                Err(e) => {
                    warn!(card_id = %id, error = %e, "Splitting feature failed");
                    results.push(json!({
                        "card_id": id,
                        "title": title,
                        "ok": false,
                        "error": e.to_string(),
                        "error_type": e.kind(),
                    }));
                }
            }
        }
        info!(processed = features.len(), succeeded, "Split features");

        Ok(json!({
            "dry_run": false,
            "deck_id": deck_id,
            "processed": features.len(),
            "succeeded": succeeded,
            "failed": features.len() - succeeded,
            "results": results,
        }))
    }
}
