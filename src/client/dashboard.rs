//! Dashboards built from one card fetch each

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    CardFilter, CodecksClient,
    model::{CardStatus, Priority, days_before, parse_timestamp},
};
use crate::{Error, Result, query::Record};

/// Items shown per standup section
const STANDUP_LIMIT: usize = 10;
const MAX_FOCUS_LIMIT: usize = 50;
const MAX_STANDUP_DAYS: u32 = 30;

/// Options for [`CodecksClient::pm_focus`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PmFocusOptions {
    /// Project name
    pub project: Option<String>,
    /// Owner name
    pub owner: Option<String>,
    /// Cards shown per section
    pub limit: usize,
    /// Days without update before a card counts as stale
    pub stale_days: u32,
}

impl Default for PmFocusOptions {
    fn default() -> Self {
        Self {
            project: None,
            owner: None,
            limit: 5,
            stale_days: 14,
        }
    }
}

/// Options for [`CodecksClient::standup`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StandupOptions {
    /// Look-back window for finished work
    pub days: u32,
    /// Project name
    pub project: Option<String>,
    /// Owner name
    pub owner: Option<String>,
}

impl Default for StandupOptions {
    fn default() -> Self {
        Self {
            days: 2,
            project: None,
            owner: None,
        }
    }
}

fn status_of(card: &Record) -> Option<CardStatus> {
    card.get("status")?.as_str()?.parse().ok()
}

fn updated_before(card: &Record, cutoff: DateTime<Utc>) -> bool {
    parse_timestamp(card.get("updated_at")).is_some_and(|t| t < cutoff)
}

/// One dashboard section: the capped list plus its full size
struct Section {
    cards: Vec<Record>,
    total: usize,
}

impl Section {
    fn new(mut cards: Vec<Record>, limit: usize) -> Self {
        let total = cards.len();
        cards.truncate(limit);
        Self { cards, total }
    }

    fn select(cards: &[Record], limit: usize, keep: impl Fn(&Record) -> bool) -> Self {
        Self::new(cards.iter().filter(|c| keep(c)).cloned().collect(), limit)
    }

    fn truncated(&self) -> bool {
        self.total > self.cards.len()
    }
}

impl CodecksClient {
    /// What needs attention: blocked, in review, stale and next-up cards.
    ///
    /// Counts are totals before the per-section `limit` is applied.
    pub async fn pm_focus(&self, options: &PmFocusOptions) -> Result<Value> {
        self.pm_focus_at(options, Utc::now()).await
    }

    pub(crate) async fn pm_focus_at(
        &self,
        options: &PmFocusOptions,
        now: DateTime<Utc>,
    ) -> Result<Value> {
        if options.limit == 0 || options.limit > MAX_FOCUS_LIMIT {
            return Err(Error::validation(format!(
                "limit must be between 1 and {MAX_FOCUS_LIMIT}"
            )));
        }
        let cutoff = days_before(now, options.stale_days, "stale_days")?;
        let filter = CardFilter {
            status: Some("not_started,started,in_progress,in_review,blocked".into()),
            project: options.project.clone(),
            owner: options.owner.clone(),
            ..CardFilter::default()
        };
        let active = self.list_cards_at(&filter, now).await?.cards;

        let with_status = |wanted: CardStatus| -> Vec<Record> {
            active
                .iter()
                .filter(|c| status_of(c) == Some(wanted))
                .cloned()
                .collect()
        };
        let blocked = with_status(CardStatus::Blocked);
        let in_review = with_status(CardStatus::InReview);
        // stale never repeats a blocked card
        let stale: Vec<Record> = active
            .iter()
            .filter(|c| status_of(c) != Some(CardStatus::Blocked) && updated_before(c, cutoff))
            .cloned()
            .collect();
        let mut suggested = with_status(CardStatus::NotStarted);
        suggested.sort_by_key(|c| Priority::from_upstream(c.get("priority")));

        let limit = options.limit;
        let blocked = Section::new(blocked, limit);
        let in_review = Section::new(in_review, limit);
        let stale = Section::new(stale, limit);
        let suggested = Section::new(suggested, limit);

        Ok(json!({
            "active": active.len(),
            "counts": {
                "blocked": blocked.total,
                "in_review": in_review.total,
                "stale": stale.total,
                "suggested": suggested.total,
            },
            "truncated": {
                "blocked": blocked.truncated(),
                "in_review": in_review.truncated(),
                "stale": stale.truncated(),
                "suggested": suggested.truncated(),
            },
            "blocked": blocked.cards,
            "in_review": in_review.cards,
            "stale": stale.cards,
            "suggested": suggested.cards,
            "limit": limit,
            "stale_days": options.stale_days,
        }))
    }

    /// Recently finished, in-flight and blocked work
    pub async fn standup(&self, options: &StandupOptions) -> Result<Value> {
        self.standup_at(options, Utc::now()).await
    }

    pub(crate) async fn standup_at(
        &self,
        options: &StandupOptions,
        now: DateTime<Utc>,
    ) -> Result<Value> {
        if options.days == 0 || options.days > MAX_STANDUP_DAYS {
            return Err(Error::validation(format!(
                "days must be between 1 and {MAX_STANDUP_DAYS}"
            )));
        }
        let since = days_before(now, options.days, "days")?;
        let filter = CardFilter {
            project: options.project.clone(),
            owner: options.owner.clone(),
            ..CardFilter::default()
        };
        let cards = self.list_cards_at(&filter, now).await?.cards;

        let done = Section::select(&cards, STANDUP_LIMIT, |c| {
            status_of(c) == Some(CardStatus::Done) && !updated_before(c, since)
        });
        let in_progress = Section::select(&cards, STANDUP_LIMIT, |c| {
            matches!(
                status_of(c),
                Some(CardStatus::Started | CardStatus::InProgress)
            )
        });
        let blocked = Section::select(&cards, STANDUP_LIMIT, |c| {
            status_of(c) == Some(CardStatus::Blocked)
        });

        Ok(json!({
            "days": options.days,
            "counts": {
                "recently_done": done.total,
                "in_progress": in_progress.total,
                "blocked": blocked.total,
            },
            "recently_done": done.cards,
            "in_progress": in_progress.cards,
            "blocked": blocked.cards,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use pretty_assertions::assert_eq;

    const ACTIVE: &str = r#"cards({"visibility":"default"})"#;

    fn now() -> DateTime<Utc> {
        "2026-10-18T12:00:00Z".parse().unwrap()
    }

    fn card(n: u32, status: &str, priority: Option<&str>, updated: &str) -> (String, Value) {
        (
            id(n),
            json!({"title": format!("Card {n}"), "status": status, "priority": priority, "lastUpdatedAt": updated}),
        )
    }

    fn board() -> Vec<(String, Value)> {
        vec![
            card(1, "blocked", None, "2026-08-01T00:00:00Z"),
            card(2, "blocked", None, "2026-10-17T00:00:00Z"),
            card(3, "in_review", None, "2026-10-17T00:00:00Z"),
            card(4, "started", None, "2026-09-01T00:00:00Z"),
            card(5, "not_started", Some("c"), "2026-10-16T00:00:00Z"),
            card(6, "not_started", Some("a"), "2026-10-16T00:00:00Z"),
            card(7, "not_started", None, "2026-09-15T00:00:00Z"),
            card(8, "done", None, "2026-10-17T00:00:00Z"),
            card(9, "done", None, "2026-10-01T00:00:00Z"),
        ]
    }

    fn titles(value: &Value) -> Vec<&str> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["title"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn focus_partitions_and_counts_before_truncation() {
        let transport = ScriptedTransport::new(vec![Ok(cards_response(ACTIVE, &board()))]);
        let options = PmFocusOptions {
            limit: 1,
            ..PmFocusOptions::default()
        };
        let focus = client(&transport).pm_focus_at(&options, now()).await.unwrap();

        assert_eq!(focus["active"], 7);
        assert_eq!(
            focus["counts"],
            json!({"blocked": 2, "in_review": 1, "stale": 2, "suggested": 3})
        );
        assert_eq!(
            focus["truncated"],
            json!({"blocked": true, "in_review": false, "stale": true, "suggested": true})
        );
        assert_eq!(titles(&focus["blocked"]), ["Card 1"]);
        // stale: card 4 and card 7; card 1 is old but blocked
        assert_eq!(titles(&focus["stale"]), ["Card 4"]);
        assert_eq!(titles(&focus["suggested"]), ["Card 6"]);
    }

    #[tokio::test]
    async fn focus_limit_is_validated() {
        let transport = ScriptedTransport::new(vec![]);
        let options = PmFocusOptions {
            limit: 0,
            ..PmFocusOptions::default()
        };
        assert!(client(&transport).pm_focus(&options).await.is_err());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn huge_stale_window_is_a_validation_error() {
        let transport = ScriptedTransport::new(vec![]);
        let options = PmFocusOptions {
            stale_days: u32::MAX,
            ..PmFocusOptions::default()
        };
        let err = client(&transport).pm_focus_at(&options, now()).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn standup_uses_one_fetch() {
        let transport = ScriptedTransport::new(vec![Ok(cards_response(ACTIVE, &board()))]);
        let standup = client(&transport)
            .standup_at(&StandupOptions::default(), now())
            .await
            .unwrap();

        assert_eq!(titles(&standup["recently_done"]), ["Card 8"]);
        assert_eq!(titles(&standup["in_progress"]), ["Card 4"]);
        assert_eq!(titles(&standup["blocked"]), ["Card 1", "Card 2"]);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn standup_caps_sections_at_ten() {
        let many: Vec<_> = (1..=12)
            .map(|n| card(n, "started", None, "2026-10-17T00:00:00Z"))
            .collect();
        let transport = ScriptedTransport::new(vec![Ok(cards_response(ACTIVE, &many))]);
        let standup = client(&transport)
            .standup_at(&StandupOptions::default(), now())
            .await
            .unwrap();
        assert_eq!(standup["in_progress"].as_array().unwrap().len(), 10);
        assert_eq!(standup["counts"]["in_progress"], 12);
    }
}
