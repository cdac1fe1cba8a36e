use crate::id::{AccountId, BoardId, EventId, UserId};
use crate::model::ContentRef;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Caller identity threaded through every operation: the tenant and the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Tenant the request runs in.
    pub account: AccountId,
    /// Acting user.
    pub user: UserId,
}

impl Actor {
    /// Build an actor for `user` inside `account`.
    #[must_use]
    pub const fn new(account: AccountId, user: UserId) -> Self {
        Self { account, user }
    }
}

/// Audit action recorded with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// A card was created and published.
    #[serde(rename = "card.published")]
    CardPublished,
    /// A card was closed.
    #[serde(rename = "card.closed")]
    CardClosed,
    /// A closed card was reopened.
    #[serde(rename = "card.reopened")]
    CardReopened,
    /// A card was postponed (moved to "not now").
    #[serde(rename = "card.postponed")]
    CardPostponed,
    /// A postponed card was resumed.
    #[serde(rename = "card.resumed")]
    CardResumed,
    /// A card was placed into a real column.
    #[serde(rename = "card.triaged")]
    CardTriaged,
    /// A card lost its column and awaits triage.
    #[serde(rename = "card.sent_back_to_triage")]
    CardSentBackToTriage,
    /// A user was assigned.
    #[serde(rename = "card.assigned")]
    CardAssigned,
    /// A user was unassigned.
    #[serde(rename = "card.unassigned")]
    CardUnassigned,
    /// The workflow stage changed.
    #[serde(rename = "card.staged")]
    CardStaged,
    /// The title changed.
    #[serde(rename = "card.title_changed")]
    CardTitleChanged,
    /// Content started referencing another card.
    #[serde(rename = "card.linked")]
    CardLinked,
    /// A comment was added.
    #[serde(rename = "comment.created")]
    CommentCreated,
}

impl Action {
    /// Dotted action name as persisted.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CardPublished => "card.published",
            Self::CardClosed => "card.closed",
            Self::CardReopened => "card.reopened",
            Self::CardPostponed => "card.postponed",
            Self::CardResumed => "card.resumed",
            Self::CardTriaged => "card.triaged",
            Self::CardSentBackToTriage => "card.sent_back_to_triage",
            Self::CardAssigned => "card.assigned",
            Self::CardUnassigned => "card.unassigned",
            Self::CardStaged => "card.staged",
            Self::CardTitleChanged => "card.title_changed",
            Self::CardLinked => "card.linked",
            Self::CommentCreated => "comment.created",
        }
    }
}

/// Audit record persisted alongside the write that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Schema identifier for forward compatibility.
    pub schema: String,
    /// Unique event identifier.
    pub id: EventId,
    #[serde(with = "time::serde::rfc3339")]
    /// Event timestamp.
    pub ts: OffsetDateTime,
    /// Tenant.
    pub account: AccountId,
    /// User who caused the event.
    pub actor: UserId,
    /// Content the event is about.
    pub subject: ContentRef,
    /// Board of the subject.
    pub board: BoardId,
    /// What happened.
    pub action: Action,
    /// Action-specific payload (always a JSON object).
    #[serde(default)]
    pub particulars: serde_json::Value,
}

impl Event {
    /// Create an event with empty particulars.
    #[must_use]
    pub fn new(
        actor: &Actor,
        subject: ContentRef,
        board: BoardId,
        action: Action,
        ts: OffsetDateTime,
    ) -> Self {
        Self {
            schema: "tack-event@1".to_owned(),
            id: EventId::new(),
            ts,
            account: actor.account,
            actor: actor.user,
            subject,
            board,
            action,
            particulars: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Replace the particulars payload.
    #[must_use]
    pub fn with_particulars(mut self, particulars: serde_json::Value) -> Self {
        self.particulars = particulars;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::CardId;
    use serde_json::json;

    #[test]
    fn actions_serialize_as_dotted_names() {
        for action in [
            Action::CardPublished,
            Action::CardSentBackToTriage,
            Action::CardLinked,
            Action::CommentCreated,
        ] {
            let json = serde_json::to_value(action).unwrap_or_else(|err| panic!("serialize: {err}"));
            assert_eq!(json, json!(action.as_str()));
        }
    }

    #[test]
    fn event_envelope_carries_particulars() {
        let actor = Actor::new(AccountId::new(), UserId::new());
        let card = CardId::new();
        let event = Event::new(
            &actor,
            ContentRef::Card(card),
            BoardId::new(),
            Action::CardLinked,
            OffsetDateTime::UNIX_EPOCH,
        )
        .with_particulars(json!({ "linked_card_id": 12, "linked_card_title": "Ship it" }));

        let value = serde_json::to_value(&event).unwrap_or_else(|err| panic!("serialize: {err}"));
        assert_eq!(value["action"], "card.linked");
        assert_eq!(value["subject"]["kind"], "card");
        assert_eq!(value["particulars"]["linked_card_id"], 12);
        assert_eq!(value["ts"], "1970-01-01T00:00:00Z");
        assert_eq!(value["actor"], actor.user.to_string());
    }
}
