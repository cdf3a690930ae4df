//! Deterministic enrichment of accepted events
//!
//! Derived fields depend only on the event and on the configured cost and
//! engagement models. A model that cannot produce a value leaves its field
//! empty; the event itself is always kept.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::events::{Event, EventKind, TokenUsage, UserActivity};
use crate::domain::metrics::{
    constants::{metric_names, tag_keys},
    MetricName, Tags, TimeSeriesPoint,
};

/// Price of a model in currency units per thousand tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenRate {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

/// Estimates the cost of a token usage event
pub trait CostModel: Send + Sync {
    fn estimate(&self, usage: &TokenUsage) -> Option<f64>;
}

/// Scores a user activity event
pub trait EngagementModel: Send + Sync {
    fn score(&self, activity: &UserActivity) -> Option<f64>;
}

/// Static per-model rate table with an optional fallback rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    pub default_rate: Option<TokenRate>,
    #[serde(default)]
    pub models: HashMap<String, TokenRate>,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            default_rate: Some(TokenRate {
                prompt_per_1k: 0.0015,
                completion_per_1k: 0.002,
            }),
            models: HashMap::new(),
        }
    }
}

impl RateTable {
    pub fn with_model(mut self, model: impl Into<String>, rate: TokenRate) -> Self {
        self.models.insert(model.into(), rate);
        self
    }
}

impl CostModel for RateTable {
    fn estimate(&self, usage: &TokenUsage) -> Option<f64> {
        let rate = self.models.get(&usage.model).or(self.default_rate.as_ref())?;
        let cost = usage.prompt_tokens as f64 / 1000.0 * rate.prompt_per_1k
            + usage.completion_tokens as f64 / 1000.0 * rate.completion_per_1k;
        cost.is_finite().then_some(cost)
    }
}

/// Linear engagement score over session length and message count, capped
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedEngagement {
    pub per_session_minute: f64,
    pub per_message: f64,
    pub max_score: f64,
}

impl Default for WeightedEngagement {
    fn default() -> Self {
        Self {
            per_session_minute: 1.0,
            per_message: 2.0,
            max_score: 100.0,
        }
    }
}

impl EngagementModel for WeightedEngagement {
    fn score(&self, activity: &UserActivity) -> Option<f64> {
        if activity.session_seconds.is_none() && activity.messages_in_session.is_none() {
            return None;
        }
        let minutes = activity.session_seconds.unwrap_or(0) as f64 / 60.0;
        let messages = activity.messages_in_session.unwrap_or(0) as f64;
        let score = minutes * self.per_session_minute + messages * self.per_message;
        score.is_finite().then(|| score.min(self.max_score))
    }
}

/// Fields derived from an event at enrichment time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFields {
    /// Hour of day in UTC, 0-23
    pub hour_of_day: u32,
    /// Day of week, 0 = Monday .. 6 = Sunday
    pub day_of_week: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement_score: Option<f64>,
}

/// An accepted event plus its derived fields; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    event: Event,
    derived: DerivedFields,
}

impl EnrichedEvent {
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn derived(&self) -> &DerivedFields {
        &self.derived
    }

    /// Raw points contributed by this event
    pub fn points(&self) -> Vec<TimeSeriesPoint> {
        let timestamp = self.event.timestamp();
        let mut points = Vec::new();
        let mut push = |name: &str, value: f64, tags: &Tags| {
            if let Ok(metric) = MetricName::try_new(name) {
                points.push(TimeSeriesPoint::new(metric, timestamp, value).with_tags(tags.clone()));
            }
        };

        match self.event.kind() {
            EventKind::ConversationCreated(_) => {
                push(metric_names::CONVERSATIONS_CREATED, 1.0, &Tags::new());
            }
            EventKind::MessageSent(message) => {
                let tags = Tags::new().with(tag_keys::ROLE, message.role.as_str());
                push(metric_names::MESSAGES_SENT, 1.0, &tags);
                if let Some(length) = self.derived.message_length {
                    push(metric_names::MESSAGE_LENGTH, length as f64, &tags);
                }
            }
            EventKind::TokenUsage(usage) => {
                let tags = Tags::new().with(tag_keys::MODEL, usage.model.as_str());
                let total = self.derived.total_tokens.unwrap_or_else(|| usage.total_tokens());
                push(metric_names::TOKENS, total as f64, &tags);
                push(metric_names::PROMPT_TOKENS, usage.prompt_tokens as f64, &tags);
                push(
                    metric_names::COMPLETION_TOKENS,
                    usage.completion_tokens as f64,
                    &tags,
                );
                if let Some(cost) = self.derived.cost_estimate {
                    push(metric_names::TOKEN_COST, cost, &tags);
                }
            }
            EventKind::UserActivity(activity) => {
                let tags = Tags::new().with(tag_keys::ACTION, activity.action.as_str());
                push(metric_names::USER_ACTIVITY, 1.0, &tags);
                if let Some(score) = self.derived.engagement_score {
                    push(metric_names::USER_ENGAGEMENT, score, &tags);
                }
            }
        }

        points
    }
}

/// Attaches derived fields using pluggable cost and engagement models
#[derive(Clone)]
pub struct Enricher {
    cost: Arc<dyn CostModel>,
    engagement: Arc<dyn EngagementModel>,
}

impl Enricher {
    pub fn new(cost: Arc<dyn CostModel>, engagement: Arc<dyn EngagementModel>) -> Self {
        Self { cost, engagement }
    }

    pub fn enrich(&self, event: Event) -> EnrichedEvent {
        let timestamp = event.timestamp();
        let mut derived = DerivedFields {
            hour_of_day: timestamp.hour(),
            day_of_week: timestamp.weekday().num_days_from_monday(),
            total_tokens: None,
            cost_estimate: None,
            message_length: None,
            engagement_score: None,
        };

        match event.kind() {
            EventKind::ConversationCreated(_) => {}
            EventKind::MessageSent(message) => {
                derived.message_length = Some(message.content_length);
            }
            EventKind::TokenUsage(usage) => {
                derived.total_tokens = Some(usage.total_tokens());
                derived.cost_estimate = self.cost.estimate(usage);
            }
            EventKind::UserActivity(activity) => {
                derived.engagement_score = self.engagement.score(activity);
            }
        }

        EnrichedEvent { event, derived }
    }
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new(
            Arc::new(RateTable::default()),
            Arc::new(WeightedEngagement::default()),
        )
    }
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher").finish_non_exhaustive()
    }
}
