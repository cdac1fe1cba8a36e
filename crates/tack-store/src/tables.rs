//! Row storage and mutation application with uniqueness checks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tack_core::Mutation;
use tack_core::changeset::Rejection;
use tack_core::event::Event;
use tack_core::filter::Filter;
use tack_core::id::{BoardId, CardId, ColumnId, CommentId, FilterId, TagId, UserId};
use tack_core::model::{Board, Card, CardLink, Column, Comment, Mention, ScanMark, Tag, User};
use tack_core::state::{CardRecord, Closure, Postponement};

/// Every row the store holds, across tenants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    /// Users by id.
    pub users: BTreeMap<UserId, User>,
    /// Boards by id.
    pub boards: BTreeMap<BoardId, Board>,
    /// Columns by id.
    pub columns: BTreeMap<ColumnId, Column>,
    /// Tags by id.
    pub tags: BTreeMap<TagId, Tag>,
    /// Cards by id.
    pub cards: BTreeMap<CardId, Card>,
    /// Closure markers by card.
    pub closures: BTreeMap<CardId, Closure>,
    /// Postponement markers by card.
    pub postponements: BTreeMap<CardId, Postponement>,
    /// Comments by id.
    pub comments: BTreeMap<CommentId, Comment>,
    /// Mention rows.
    pub mentions: Vec<Mention>,
    /// Card link rows.
    pub card_links: Vec<CardLink>,
    /// Last scanned digest per source.
    pub scan_marks: Vec<ScanMark>,
    /// Saved filters by id.
    pub filters: BTreeMap<FilterId, Filter>,
    /// Audit log in commit order.
    pub events: Vec<Event>,
}

impl Tables {
    /// Card with its markers.
    #[must_use]
    pub fn record(&self, card: &Card) -> CardRecord {
        CardRecord {
            card: card.clone(),
            closure: self.closures.get(&card.id).cloned(),
            postponement: self.postponements.get(&card.id).cloned(),
        }
    }

    /// Apply one mutation, refusing it when a constraint would break.
    ///
    /// # Errors
    /// Returns the [`Rejection`] describing the violated constraint.
    pub fn apply(&mut self, mutation: &Mutation) -> Result<(), Rejection> {
        match mutation {
            Mutation::InsertCard(card) => {
                if self.cards.contains_key(&card.id) {
                    return Err(Rejection::Duplicate(format!("card {}", card.id)));
                }
                if self
                    .cards
                    .values()
                    .any(|existing| existing.account == card.account && existing.number == card.number)
                {
                    return Err(Rejection::Duplicate(format!("card number #{}", card.number)));
                }
                self.cards.insert(card.id, card.clone());
            }
            Mutation::PutCard(card) => {
                let slot = self
                    .cards
                    .get_mut(&card.id)
                    .ok_or_else(|| Rejection::Missing(format!("card {}", card.id)))?;
                *slot = card.clone();
            }
            Mutation::InsertClosure(closure) => {
                self.require_card(closure.card)?;
                if self.closures.contains_key(&closure.card) {
                    return Err(Rejection::Duplicate(format!("closure of card {}", closure.card)));
                }
                self.closures.insert(closure.card, closure.clone());
            }
            Mutation::DeleteClosure { card } => {
                self.closures
                    .remove(card)
                    .ok_or_else(|| Rejection::Missing(format!("closure of card {card}")))?;
            }
            Mutation::InsertPostponement(postponement) => {
                self.require_card(postponement.card)?;
                if self.postponements.contains_key(&postponement.card) {
                    return Err(Rejection::Duplicate(format!(
                        "postponement of card {}",
                        postponement.card
                    )));
                }
                self.postponements.insert(postponement.card, postponement.clone());
            }
            Mutation::DeletePostponement { card } => {
                self.postponements
                    .remove(card)
                    .ok_or_else(|| Rejection::Missing(format!("postponement of card {card}")))?;
            }
            Mutation::InsertTag(tag) => {
                if self
                    .tags
                    .values()
                    .any(|existing| existing.account == tag.account && existing.title == tag.title)
                {
                    return Err(Rejection::Duplicate(format!("tag {}", tag.hashtag())));
                }
                self.tags.insert(tag.id, tag.clone());
            }
            Mutation::PutComment(comment) => {
                self.require_card(comment.card)?;
                self.comments.insert(comment.id, comment.clone());
            }
            Mutation::InsertMention(mention) => {
                if self
                    .mentions
                    .iter()
                    .any(|existing| existing.source == mention.source && existing.mentionee == mention.mentionee)
                {
                    return Err(Rejection::Duplicate(format!(
                        "mention of {} in {}",
                        mention.mentionee, mention.source
                    )));
                }
                self.mentions.push(mention.clone());
            }
            Mutation::InsertCardLink(link) => {
                if self
                    .card_links
                    .iter()
                    .any(|existing| existing.source == link.source && existing.card == link.card)
                {
                    return Err(Rejection::Duplicate(format!(
                        "link to card {} from {}",
                        link.card, link.source
                    )));
                }
                self.card_links.push(link.clone());
            }
            Mutation::AddWatcher { card, user } => {
                let row = self
                    .cards
                    .get_mut(card)
                    .ok_or_else(|| Rejection::Missing(format!("card {card}")))?;
                if row.watchers.insert(*user) {
                    row.lock_version = row.lock_version.saturating_add(1);
                }
            }
            Mutation::RecordScan(mark) => {
                match self.scan_marks.iter_mut().find(|existing| existing.source == mark.source) {
                    Some(existing) => existing.digest.clone_from(&mark.digest),
                    None => self.scan_marks.push(mark.clone()),
                }
            }
            Mutation::InsertFilter(filter) => {
                if self.filters.values().any(|existing| {
                    existing.owner == filter.owner && existing.params_digest == filter.params_digest
                }) {
                    return Err(Rejection::Duplicate(format!("filter {}", filter.cache_key())));
                }
                self.filters.insert(filter.id, filter.clone());
            }
            Mutation::TouchFilter { id, at } => {
                let filter = self
                    .filters
                    .get_mut(id)
                    .ok_or_else(|| Rejection::Missing(format!("filter {id}")))?;
                filter.updated_at = *at;
            }
        }
        Ok(())
    }

    fn require_card(&self, card: CardId) -> Result<(), Rejection> {
        if self.cards.contains_key(&card) {
            Ok(())
        } else {
            Err(Rejection::Missing(format!("card {card}")))
        }
    }
}
