//! Persisted entities of a tenant: users, boards, columns, cards and the rows derived from content.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::id::{
    AccountId, BoardId, CardId, CardLinkId, CardNumber, ColumnId, CommentId, MentionId, StageId,
    TagId, UserId,
};
use crate::scan;

/// Title given to cards created without one.
pub const DEFAULT_CARD_TITLE: &str = "Untitled";

/// Member of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identifier of the user.
    pub id: UserId,
    /// Owning account.
    pub account: AccountId,
    /// Display name.
    pub name: String,
    /// Identity email address, when known.
    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    /// Lowercased part of the email before `@`.
    #[must_use]
    pub fn email_local_part(&self) -> Option<String> {
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .map(str::to_lowercase)
    }

    /// Lowercased name with whitespace runs replaced by dots (`Kevin Mc` -> `kevin.mc`).
    #[must_use]
    pub fn dotted_name(&self) -> String {
        self.name
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Board with its member set (the users allowed to read it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// Identifier of the board.
    pub id: BoardId,
    /// Owning account.
    pub account: AccountId,
    /// Display name.
    pub name: String,
    /// Users with access to the board.
    #[serde(default)]
    pub members: BTreeSet<UserId>,
}

/// Ordered bucket on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Identifier of the column.
    pub id: ColumnId,
    /// Board the column belongs to.
    pub board: BoardId,
    /// Display name.
    pub name: String,
    /// Display color.
    #[serde(default)]
    pub color: Option<String>,
    /// Sort position on the board.
    #[serde(default)]
    pub position: u32,
}

impl Column {
    /// Case-insensitive name comparison after trimming.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.trim().to_lowercase() == name.trim().to_lowercase()
    }
}

/// Tenant-scoped tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Identifier of the tag.
    pub id: TagId,
    /// Owning account.
    pub account: AccountId,
    /// Normalized title (see [`Tag::normalize_title`]).
    pub title: String,
}

impl Tag {
    /// Strip a leading `#`, trim and lowercase.
    #[must_use]
    pub fn normalize_title(raw: &str) -> String {
        let trimmed = raw.trim();
        trimmed.strip_prefix('#').unwrap_or(trimmed).trim().to_lowercase()
    }

    /// Title rendered with a leading `#`.
    #[must_use]
    pub fn hashtag(&self) -> String {
        format!("#{}", self.title)
    }
}

/// Rich-text body as supplied by the content storage: raw markup plus its plain-text rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichText {
    /// Raw markup (HTML).
    pub markup: String,
    /// Plain-text rendering of the markup.
    pub plain_text: String,
}

impl RichText {
    /// Body whose markup and plain text are already known.
    pub fn new(markup: impl Into<String>, plain_text: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            plain_text: plain_text.into(),
        }
    }

    /// Body built from markup; the plain text is the markup with tags removed.
    pub fn from_markup(markup: impl Into<String>) -> Self {
        let markup = markup.into();
        let plain_text = scan::strip_tags(&markup);
        Self { markup, plain_text }
    }

    /// Returns true when the body has no visible text.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.plain_text.trim().is_empty() && self.markup.trim().is_empty()
    }

    /// Hex SHA-256 of the markup.
    #[must_use]
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.markup.as_bytes()))
    }
}

/// Publication status of a card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    /// Not yet visible to queries.
    Drafted,
    /// Visible; the status every new card gets.
    #[default]
    Published,
}

/// Card row. Closure and postponement live in separate marker rows (see [`crate::state`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Identifier of the card.
    pub id: CardId,
    /// Owning account.
    pub account: AccountId,
    /// Tenant-unique display number.
    pub number: CardNumber,
    /// Board the card lives on.
    pub board: BoardId,
    /// Real column, `None` while awaiting triage.
    #[serde(default)]
    pub column: Option<ColumnId>,
    /// Workflow stage.
    #[serde(default)]
    pub stage: Option<StageId>,
    /// Title.
    pub title: String,
    /// Description body.
    #[serde(default)]
    pub description: RichText,
    /// Author of the card.
    pub creator: UserId,
    /// Publication status.
    #[serde(default)]
    pub status: CardStatus,
    /// Assigned users.
    #[serde(default)]
    pub assignees: BTreeSet<UserId>,
    /// Attached tags.
    #[serde(default)]
    pub tags: BTreeSet<TagId>,
    /// Users watching the card.
    #[serde(default)]
    pub watchers: BTreeSet<UserId>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last write to the row.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Last activity (transitions, comments), used by the `latest` ordering.
    #[serde(with = "time::serde::rfc3339")]
    pub last_active_at: OffsetDateTime,
    /// Optimistic lock counter, bumped on every write.
    #[serde(default)]
    pub lock_version: u64,
}

impl Card {
    /// Returns true once the card is published.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.status == CardStatus::Published
    }

    /// Copy of the row prepared for a write at `at`: version bumped, timestamps touched.
    #[must_use]
    pub fn touched(&self, at: OffsetDateTime) -> Self {
        let mut next = self.clone();
        next.lock_version = self.lock_version.saturating_add(1);
        next.updated_at = at;
        next.last_active_at = at;
        next
    }
}

/// Comment on a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Identifier of the comment.
    pub id: CommentId,
    /// Owning account.
    pub account: AccountId,
    /// Card the comment belongs to.
    pub card: CardId,
    /// Board of the card.
    pub board: BoardId,
    /// Author.
    pub creator: UserId,
    /// Comment body.
    pub body: RichText,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Reference to a content-bearing entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ContentRef {
    /// A card description.
    Card(CardId),
    /// A comment body.
    Comment(CommentId),
}

impl ContentRef {
    /// Kind label used in logs and error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Card(_) => "card",
            Self::Comment(_) => "comment",
        }
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Card(id) => write!(f, "card:{id}"),
            Self::Comment(id) => write!(f, "comment:{id}"),
        }
    }
}

/// Recorded reference from content to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// Identifier of the mention.
    pub id: MentionId,
    /// Owning account.
    pub account: AccountId,
    /// Content that mentions the user.
    pub source: ContentRef,
    /// User who wrote the content.
    pub mentioner: UserId,
    /// User being mentioned.
    pub mentionee: UserId,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Mention {
    /// Returns true when the author mentioned themselves.
    #[must_use]
    pub fn is_self_mention(&self) -> bool {
        self.mentioner == self.mentionee
    }
}

/// Recorded reference from content to another card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardLink {
    /// Identifier of the link.
    pub id: CardLinkId,
    /// Owning account.
    pub account: AccountId,
    /// Content containing the reference.
    pub source: ContentRef,
    /// Referenced card.
    pub card: CardId,
    /// User on whose behalf the link was recorded.
    pub creator: UserId,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Digest of the content last scanned for a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMark {
    /// Scanned content.
    pub source: ContentRef,
    /// Digest at scan time.
    pub digest: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, email: Option<&str>) -> User {
        User {
            id: UserId::new(),
            account: AccountId::new(),
            name: name.into(),
            email: email.map(str::to_owned),
        }
    }

    #[test]
    fn user_handles_are_derived_from_name_and_email() {
        let kevin = user("Kevin  Mc Callister", Some("KMC@example.com"));
        assert_eq!(kevin.dotted_name(), "kevin.mc.callister");
        assert_eq!(kevin.email_local_part().as_deref(), Some("kmc"));
        assert!(user("Jo", None).email_local_part().is_none());
    }

    #[test]
    fn tag_titles_are_normalized() {
        assert_eq!(Tag::normalize_title("  #Mobile "), "mobile");
        assert_eq!(Tag::normalize_title("bug"), "bug");
        assert_eq!(Tag::normalize_title("#"), "");
    }

    #[test]
    fn rich_text_digest_tracks_markup() {
        let a = RichText::from_markup("<p>hello <b>world</b></p>");
        let b = RichText::from_markup("<p>hello <b>world</b></p>");
        let c = RichText::from_markup("<p>hello world</p>");
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.plain_text, "hello world");
    }

    #[test]
    fn content_refs_serialize_as_tagged_union() {
        let id = CardId::new();
        let json = serde_json::to_value(ContentRef::Card(id))
            .unwrap_or_else(|err| panic!("serialize: {err}"));
        assert_eq!(json["kind"], "card");
        assert_eq!(json["id"], id.to_string());
    }
}
