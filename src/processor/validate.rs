//! First pipeline stage: reject malformed, future-dated and duplicate events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::events::{Event, EventId, EventKind};
use crate::processor::dedup::DedupWindow;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Event {event_id} is missing required field '{field}'")]
    MissingField {
        event_id: EventId,
        field: &'static str,
    },

    #[error("Event {event_id} timestamp {timestamp} is in the future (now {now})")]
    FutureTimestamp {
        event_id: EventId,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("Event {event_id} was already processed")]
    Duplicate { event_id: EventId },
}

/// Counter key for rejected events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MissingField,
    FutureTimestamp,
    Duplicate,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::MissingField => "missing_field",
            Self::FutureTimestamp => "future_timestamp",
            Self::Duplicate => "duplicate",
        };
        f.write_str(reason)
    }
}

impl ValidationError {
    pub fn reason(&self) -> RejectionReason {
        match self {
            Self::MissingField { .. } => RejectionReason::MissingField,
            Self::FutureTimestamp { .. } => RejectionReason::FutureTimestamp,
            Self::Duplicate { .. } => RejectionReason::Duplicate,
        }
    }

    pub fn event_id(&self) -> &EventId {
        match self {
            Self::MissingField { event_id, .. }
            | Self::FutureTimestamp { event_id, .. }
            | Self::Duplicate { event_id } => event_id,
        }
    }
}

/// Stateless checks: required fields and timestamp bound
///
/// Used at the ingestion boundary so callers get validation errors
/// synchronously; the processor repeats them before consulting the dedup window.
pub fn check_event(
    event: &Event,
    now: DateTime<Utc>,
    max_clock_skew: Duration,
) -> Result<(), ValidationError> {
    let missing = |field| ValidationError::MissingField {
        event_id: event.id().clone(),
        field,
    };

    match event.kind() {
        EventKind::ConversationCreated(_) | EventKind::MessageSent(_) => {
            if event.conversation_id().is_none() {
                return Err(missing("conversationId"));
            }
        }
        EventKind::TokenUsage(usage) => {
            if usage.model.trim().is_empty() {
                return Err(missing("payload.model"));
            }
        }
        EventKind::UserActivity(activity) => {
            if event.user_id().is_none() {
                return Err(missing("userId"));
            }
            if activity.action.trim().is_empty() {
                return Err(missing("payload.action"));
            }
        }
    }

    let skew = chrono::Duration::from_std(max_clock_skew).unwrap_or_else(|_| chrono::Duration::zero());
    if event.timestamp() > now + skew {
        return Err(ValidationError::FutureTimestamp {
            event_id: event.id().clone(),
            timestamp: event.timestamp(),
            now,
        });
    }

    Ok(())
}

/// Full validation including the shared dedup window
#[derive(Debug, Clone)]
pub struct Validator {
    dedup: Arc<DedupWindow>,
    max_clock_skew: Duration,
}

impl Validator {
    pub fn new(dedup: Arc<DedupWindow>, max_clock_skew: Duration) -> Self {
        Self {
            dedup,
            max_clock_skew,
        }
    }

    /// Validate and, if accepted, record the event id as seen
    ///
    /// The dedup check runs last so rejected events never occupy the window.
    pub fn validate(&self, event: &Event, now: DateTime<Utc>) -> Result<(), ValidationError> {
        check_event(event, now, self.max_clock_skew)?;
        if !self.dedup.observe(event.id()) {
            return Err(ValidationError::Duplicate {
                event_id: event.id().clone(),
            });
        }
        Ok(())
    }

    pub fn dedup(&self) -> &Arc<DedupWindow> {
        &self.dedup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{
        ConversationCreated, ConversationId, TokenUsage, UserActivity, UserId,
    };

    fn validator() -> Validator {
        Validator::new(
            Arc::new(DedupWindow::new(Duration::from_secs(600), 1000)),
            Duration::from_secs(5),
        )
    }

    fn created(id: &str, timestamp: DateTime<Utc>) -> Event {
        Event::new(
            EventId::try_new(id).unwrap(),
            timestamp,
            EventKind::ConversationCreated(ConversationCreated::default()),
        )
        .with_conversation(ConversationId::try_new("conv").unwrap())
    }

    #[test]
    fn accepts_well_formed_event_once() {
        let validator = validator();
        let now = Utc::now();
        let event = created("e-1", now);

        assert!(validator.validate(&event, now).is_ok());
        let err = validator.validate(&event, now).unwrap_err();
        assert_eq!(err.reason(), RejectionReason::Duplicate);
        assert_eq!(err.event_id().as_ref(), "e-1");
    }

    #[test]
    fn rejects_missing_conversation() {
        let now = Utc::now();
        let event = Event::new(
            EventId::try_new("e-2").unwrap(),
            now,
            EventKind::ConversationCreated(ConversationCreated::default()),
        );
        let err = check_event(&event, now, Duration::ZERO).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                event_id: EventId::try_new("e-2").unwrap(),
                field: "conversationId",
            }
        );
    }

    #[test]
    fn rejects_activity_without_user() {
        let now = Utc::now();
        let event = Event::new(
            EventId::try_new("e-3").unwrap(),
            now,
            EventKind::UserActivity(UserActivity {
                action: "login".to_string(),
                session_seconds: None,
                messages_in_session: None,
            }),
        );
        assert_eq!(
            check_event(&event, now, Duration::ZERO).unwrap_err().reason(),
            RejectionReason::MissingField
        );

        let with_user = event.with_user(UserId::try_new("u").unwrap());
        assert!(check_event(&with_user, now, Duration::ZERO).is_ok());
    }

    #[test]
    fn rejects_blank_model() {
        let now = Utc::now();
        let event = Event::new(
            EventId::try_new("e-4").unwrap(),
            now,
            EventKind::TokenUsage(TokenUsage {
                model: "  ".to_string(),
                prompt_tokens: 1,
                completion_tokens: 1,
            }),
        );
        assert!(check_event(&event, now, Duration::ZERO).is_err());
    }

    #[test]
    fn future_timestamps_beyond_skew_are_rejected() {
        let now = Utc::now();
        let skew = Duration::from_secs(5);

        let within = created("e-5", now + chrono::Duration::seconds(4));
        assert!(check_event(&within, now, skew).is_ok());

        let beyond = created("e-6", now + chrono::Duration::seconds(6));
        assert_eq!(
            check_event(&beyond, now, skew).unwrap_err().reason(),
            RejectionReason::FutureTimestamp
        );
    }

    #[test]
    fn rejected_events_do_not_enter_dedup_window() {
        let validator = validator();
        let now = Utc::now();
        let future = created("e-7", now + chrono::Duration::hours(1));
        assert!(validator.validate(&future, now).is_err());
        assert!(validator.dedup().is_empty());

        let corrected = created("e-7", now);
        assert!(validator.validate(&corrected, now).is_ok());
    }
}
