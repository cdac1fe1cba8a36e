//! Query criteria, their canonical form and fingerprint, and saved filters.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::event::Actor;
use crate::id::{AccountId, BoardId, CardId, FilterId, TagId, UserId};
use crate::model::Tag;

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Most recently active first.
    #[default]
    Latest,
    /// Most recently created first.
    Newest,
    /// Oldest created first.
    Oldest,
}

impl SortOrder {
    /// Parse a sort token.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for unknown tokens.
    pub fn parse(token: &str) -> Result<Self> {
        match token.trim().to_lowercase().as_str() {
            "latest" => Ok(Self::Latest),
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            other => Err(Error::validation("sort", format!("unknown sort `{other}`"))),
        }
    }

    /// Token as accepted by [`SortOrder::parse`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Newest => "newest",
            Self::Oldest => "oldest",
        }
    }
}

/// Status restriction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusIndex {
    /// Open, closed and postponed cards.
    #[default]
    All,
    /// Closed cards only.
    Closed,
    /// Postponed cards only.
    NotNow,
}

impl StatusIndex {
    /// Parse a status token.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for unknown tokens.
    pub fn parse(token: &str) -> Result<Self> {
        match token.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "closed" => Ok(Self::Closed),
            "not_now" => Ok(Self::NotNow),
            other => Err(Error::validation("status", format!("unknown status `{other}`"))),
        }
    }

    /// Token as accepted by [`StatusIndex::parse`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Closed => "closed",
            Self::NotNow => "not_now",
        }
    }
}

/// Assignment restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Cards nobody is assigned to.
    Unassigned,
}

/// Bag of optional criteria.
///
/// `None` means "not supplied". For assignees, creators and tags an explicit
/// empty list is meaningful (it yields an empty result) and survives normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Restrict to these boards.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub board_ids: Vec<BoardId>,
    /// Restrict to these cards.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub card_ids: Vec<CardId>,
    /// Assignment restriction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_status: Option<AssignmentStatus>,
    /// Cards assigned to any of these users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_ids: Option<Vec<UserId>>,
    /// Cards created by any of these users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_ids: Option<Vec<UserId>>,
    /// Column or virtual column name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Tag titles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Tag ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<TagId>>,
    /// Creation date expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<String>,
    /// Closure date expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closure: Option<String>,
    /// Cards closed by any of these users.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub closer_ids: Vec<UserId>,
    /// Status token (`all`, `closed`, `not_now`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Sort token (`latest`, `newest`, `oldest`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    /// Search terms: card numbers or text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<String>,
}

impl FilterParams {
    /// Canonical form: trimmed, blanks dropped, lists sorted and deduplicated, defaults removed.
    #[must_use]
    pub fn normalize(&self) -> Self {
        Self {
            board_ids: sorted(self.board_ids.clone()),
            card_ids: sorted(self.card_ids.clone()),
            assignment_status: self.assignment_status,
            assignee_ids: self.assignee_ids.clone().map(sorted),
            creator_ids: self.creator_ids.clone().map(sorted),
            column: non_blank(self.column.as_deref()),
            tags: self.tags.as_ref().map(|titles| {
                sorted(
                    titles
                        .iter()
                        .map(|title| Tag::normalize_title(title))
                        .filter(|title| !title.is_empty())
                        .collect(),
                )
            }),
            tag_ids: self.tag_ids.clone().map(sorted),
            creation: non_blank(self.creation.as_deref()),
            closure: non_blank(self.closure.as_deref()),
            closer_ids: sorted(self.closer_ids.clone()),
            status: non_default_token(self.status.as_deref(), StatusIndex::All.as_str()),
            sort: non_default_token(self.sort.as_deref(), SortOrder::Latest.as_str()),
            terms: sorted(
                self.terms
                    .iter()
                    .map(|term| term.trim().to_owned())
                    .filter(|term| !term.is_empty())
                    .collect(),
            ),
        }
    }

    /// Parsed status, defaulting to [`StatusIndex::All`].
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for unknown tokens.
    pub fn status_index(&self) -> Result<StatusIndex> {
        non_blank(self.status.as_deref()).map_or(Ok(StatusIndex::All), |token| StatusIndex::parse(&token))
    }

    /// Parsed sort, defaulting to [`SortOrder::Latest`].
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for unknown tokens.
    pub fn sort_order(&self) -> Result<SortOrder> {
        non_blank(self.sort.as_deref()).map_or(Ok(SortOrder::Latest), |token| SortOrder::parse(&token))
    }

    /// Check the tokens that have a closed vocabulary.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for an unknown status or sort.
    pub fn validate(&self) -> Result<()> {
        self.status_index()?;
        self.sort_order()?;
        Ok(())
    }

    /// Hex SHA-256 of the canonical JSON of the normalized params.
    #[must_use]
    pub fn digest(&self) -> String {
        // Serializing a plain struct of strings and ids cannot fail.
        let canonical = serde_json::to_vec(&self.normalize()).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    /// Returns true when the normalized params carry no criterion.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.normalize() == Self::default()
    }
}

/// Saved, fingerprinted criteria owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Identifier of the filter.
    pub id: FilterId,
    /// Owning account.
    pub account: AccountId,
    /// Owner.
    pub owner: UserId,
    /// Normalized criteria.
    pub params: FilterParams,
    /// Fingerprint of `params`.
    pub params_digest: String,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last time the criteria were saved.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Filter {
    /// Unsaved filter for `actor` holding the normalized `params`.
    #[must_use]
    pub fn build(actor: &Actor, params: &FilterParams, at: OffsetDateTime) -> Self {
        let params = params.normalize();
        let params_digest = params.digest();
        Self {
            id: FilterId::new(),
            account: actor.account,
            owner: actor.user,
            params,
            params_digest,
            created_at: at,
            updated_at: at,
        }
    }

    /// Cache key derived from the fingerprint.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("filter/{}", self.params_digest)
    }

    /// Returns true when the filter carries no criterion.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_default()
    }
}

fn sorted<T: Ord>(mut values: Vec<T>) -> Vec<T> {
    values.sort();
    values.dedup();
    values
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_owned)
}

fn non_default_token(value: Option<&str>, default: &str) -> Option<String> {
    non_blank(value)
        .map(|token| token.to_lowercase())
        .filter(|token| token != default)
}
