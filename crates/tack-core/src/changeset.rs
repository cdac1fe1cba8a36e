//! Atomic unit of write handed to the store.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::event::Event;
use crate::filter::Filter;
use crate::id::{CardId, FilterId, UserId};
use crate::model::{Card, CardLink, Comment, Mention, ScanMark, Tag};
use crate::state::{Closure, Postponement};

/// Optimistic lock check: the card row must still carry `expected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guard {
    /// Guarded card.
    pub card: CardId,
    /// `lock_version` observed when the change was planned.
    pub expected: u64,
}

/// Row-level change applied by a store in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Insert a new card; its number must be unused in the tenant.
    InsertCard(Card),
    /// Replace an existing card row.
    PutCard(Card),
    /// Create the closure marker of a card.
    InsertClosure(Closure),
    /// Destroy the closure marker of a card.
    DeleteClosure {
        /// Card whose marker goes away.
        card: CardId,
    },
    /// Create the postponement marker of a card.
    InsertPostponement(Postponement),
    /// Destroy the postponement marker of a card.
    DeletePostponement {
        /// Card whose marker goes away.
        card: CardId,
    },
    /// Create a tenant tag; the normalized title must be unused.
    InsertTag(Tag),
    /// Insert or replace a comment.
    PutComment(Comment),
    /// Record a mention; unique per source and mentionee.
    InsertMention(Mention),
    /// Record a card link; unique per source and target.
    InsertCardLink(CardLink),
    /// Add a user to a card's watcher set; bumps the card version when the user is new.
    AddWatcher {
        /// Watched card.
        card: CardId,
        /// Watching user.
        user: UserId,
    },
    /// Store the digest of the content last scanned for a source.
    RecordScan(ScanMark),
    /// Save a filter; unique per owner and params digest.
    InsertFilter(Filter),
    /// Bump `updated_at` of a saved filter.
    TouchFilter {
        /// Saved filter.
        id: FilterId,
        /// New `updated_at`.
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
}

/// Version guards, mutations and events committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    /// Cards whose version must be unchanged at commit time.
    pub guards: Vec<Guard>,
    /// Mutations in application order.
    pub mutations: Vec<Mutation>,
    /// Events persisted with the mutations.
    pub events: Vec<Event>,
}

impl Changeset {
    /// Empty changeset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `card` to still be at version `expected`. Repeated guards on one card keep the first.
    pub fn guard(&mut self, card: CardId, expected: u64) -> &mut Self {
        if !self.guards.iter().any(|guard| guard.card == card) {
            self.guards.push(Guard { card, expected });
        }
        self
    }

    /// Append a mutation.
    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    /// Append an event.
    pub fn emit(&mut self, event: Event) -> &mut Self {
        self.events.push(event);
        self
    }

    /// Append everything from `other` after the current contents.
    pub fn extend(&mut self, other: Self) {
        for guard in other.guards {
            self.guard(guard.card, guard.expected);
        }
        self.mutations.extend(other.mutations);
        self.events.extend(other.events);
    }

    /// Returns true when there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty() && self.events.is_empty()
    }
}

/// Why a store refused a changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A guard did not match the stored version (`actual` is `None` for a missing card).
    StaleCard {
        /// Guarded card.
        card: CardId,
        /// Version the writer planned against.
        expected: u64,
        /// Version found in the store.
        actual: Option<u64>,
    },
    /// A uniqueness constraint was violated.
    Duplicate(String),
    /// A mutation referenced a row that does not exist.
    Missing(String),
    /// The staged state would leave a card both closed and postponed.
    Integrity {
        /// Offending card.
        card: CardId,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleCard {
                card,
                expected,
                actual: Some(actual),
            } => write!(f, "card {card} is at version {actual}, expected {expected}"),
            Self::StaleCard { card, .. } => write!(f, "card {card} no longer exists"),
            Self::Duplicate(what) => write!(f, "duplicate {what}"),
            Self::Missing(what) => write!(f, "missing {what}"),
            Self::Integrity { card } => write!(f, "card {card} would be both closed and postponed"),
        }
    }
}

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Everything was written.
    Applied,
    /// Nothing was written.
    Rejected(Rejection),
}

impl CommitOutcome {
    /// Returns true when the changeset was written.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_keep_the_first_expectation() {
        let card = CardId::new();
        let mut changeset = Changeset::new();
        changeset.guard(card, 3).guard(card, 4);
        assert_eq!(changeset.guards, vec![Guard { card, expected: 3 }]);
        assert!(changeset.is_empty());
    }

    #[test]
    fn extend_merges_guards_and_mutations() {
        let card = CardId::new();
        let mut first = Changeset::new();
        first
            .guard(card, 1)
            .push(Mutation::DeleteClosure { card });
        let mut second = Changeset::new();
        second
            .guard(card, 1)
            .push(Mutation::DeletePostponement { card });

        first.extend(second);
        assert_eq!(first.guards.len(), 1);
        assert_eq!(first.mutations.len(), 2);
        assert!(!first.is_empty());
    }

    #[test]
    fn rejection_messages_name_the_card() {
        let card = CardId::new();
        let stale = Rejection::StaleCard {
            card,
            expected: 1,
            actual: Some(2),
        };
        assert!(stale.to_string().contains("version 2"));
        assert!(Rejection::Integrity { card }.to_string().contains(&card.to_string()));
    }
}
