//! Units of real-time publication

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::domain::enrichment::EnrichedEvent;
use crate::domain::events::{ConversationId, EventId, EventType, UserId};
use crate::domain::metrics::{IntervalType, TimeSeriesPoint};

/// Name of a publication channel
///
/// One of `global`, `type:{event_type}`, `conversation:{id}` or `user:{id}`.
#[nutype(
    validate(
        not_empty,
        len_char_max = 256,
        regex = r"^(?s)(global|type:[a-z_]+|conversation:.+|user:.+)$"
    ),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        AsRef,
        Display
    )
)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn global() -> Result<Self, ChannelNameError> {
        Self::try_new("global")
    }

    pub fn for_type(event_type: EventType) -> Result<Self, ChannelNameError> {
        Self::try_new(format!("type:{event_type}"))
    }

    pub fn conversation(id: &ConversationId) -> Result<Self, ChannelNameError> {
        Self::try_new(format!("conversation:{id}"))
    }

    pub fn user(id: &UserId) -> Result<Self, ChannelNameError> {
        Self::try_new(format!("user:{id}"))
    }
}

/// Incremental update produced by one processed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub event_id: EventId,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Start of the 1m bucket the event landed in
    pub bucket_start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub points: Vec<TimeSeriesPoint>,
}

impl Delta {
    pub fn from_enriched(enriched: &EnrichedEvent) -> Self {
        let event = enriched.event();
        Self {
            event_id: event.id().clone(),
            event_type: event.event_type(),
            timestamp: event.timestamp(),
            bucket_start: IntervalType::OneMinute.bucket_start(event.timestamp()),
            conversation_id: event.conversation_id().cloned(),
            user_id: event.user_id().cloned(),
            points: enriched.points(),
        }
    }

    /// Every channel this delta is published on
    pub fn channels(&self) -> Vec<ChannelName> {
        let mut channels = vec![
            ChannelName::global(),
            ChannelName::for_type(self.event_type),
        ];
        if let Some(id) = &self.conversation_id {
            channels.push(ChannelName::conversation(id));
        }
        if let Some(id) = &self.user_id {
            channels.push(ChannelName::user(id));
        }
        channels.into_iter().filter_map(Result::ok).collect()
    }
}

/// Batched message delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaBatch {
    pub channel: ChannelName,
    pub updates: Vec<Delta>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::enrichment::Enricher;
    use crate::domain::events::{Event, EventKind, MessageRole, MessageSent};
    use chrono::TimeZone;

    #[test]
    fn channel_names_are_validated() {
        assert!(ChannelName::try_new("global").is_ok());
        assert!(ChannelName::try_new("type:token_usage").is_ok());
        assert!(ChannelName::try_new("conversation:X").is_ok());
        assert!(ChannelName::try_new("user:42").is_ok());
        assert!(ChannelName::try_new("").is_err());
        assert!(ChannelName::try_new("conversation:").is_err());
        assert!(ChannelName::try_new("everything").is_err());
    }

    #[test]
    fn delta_targets_scoped_channels() {
        let event = Event::new(
            EventId::try_new("m-1").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 42).unwrap(),
            EventKind::MessageSent(MessageSent {
                role: MessageRole::Assistant,
                content_length: 12,
                model: None,
            }),
        )
        .with_conversation(ConversationId::try_new("X").unwrap())
        .with_user(UserId::try_new("u-1").unwrap());

        let delta = Delta::from_enriched(&Enricher::default().enrich(event));
        let channels: Vec<String> = delta.channels().iter().map(ToString::to_string).collect();

        assert_eq!(
            channels,
            vec!["global", "type:message_sent", "conversation:X", "user:u-1"]
        );
        assert_eq!(
            delta.bucket_start,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(delta.points.len(), 2);
    }

    #[test]
    fn delta_serialises_with_camel_case_fields() {
        let event = Event::new(
            EventId::try_new("m-2").unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            EventKind::MessageSent(MessageSent {
                role: MessageRole::User,
                content_length: 3,
                model: None,
            }),
        )
        .with_conversation(ConversationId::try_new("c").unwrap());
        let delta = Delta::from_enriched(&Enricher::default().enrich(event));
        let json = serde_json::to_value(&delta).unwrap();

        assert_eq!(json["eventId"], "m-2");
        assert_eq!(json["eventType"], "message_sent");
        assert!(json.get("bucketStart").is_some());
        assert!(json.get("userId").is_none());
    }
}
