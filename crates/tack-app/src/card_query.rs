//! Card query composer: resolves a [`FilterParams`] bag into predicates, then applies them.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use tack_core::event::Actor;
use tack_core::filter::{AssignmentStatus, FilterParams, SortOrder, StatusIndex};
use tack_core::id::{BoardId, CardId, CardNumber, ColumnId, TagId, UserId};
use tack_core::state::Position;
use tack_core::text_matcher::TextMatcher;
use tack_core::time_window::CreationWindow;
use tack_core::{CardRecord, Closable, Error, Postponable, VirtualColumn};
use tracing::debug;

use crate::collaborators::Collaborators;
use crate::error::{ServiceError, ServiceResult};
use crate::store::CardStore;

/// One resolved criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Card is on one of the boards.
    Boards(BTreeSet<BoardId>),
    /// Card is one of the ids.
    Cards(BTreeSet<CardId>),
    /// Card has no assignee.
    Unassigned,
    /// Card is assigned to any of the users.
    Assignees(BTreeSet<UserId>),
    /// Card was created by any of the users.
    Creators(BTreeSet<UserId>),
    /// Card's effective position displays as this virtual column.
    Virtual(VirtualColumn),
    /// Card's effective position is one of the columns.
    Columns(BTreeSet<ColumnId>),
    /// Card carries any of the tags.
    Tags(BTreeSet<TagId>),
    /// Card creation time falls in the window.
    Created(CreationWindow),
    /// Card is closed and its closure time falls in the window.
    ClosedWithin(CreationWindow),
    /// Card was closed by any of the users.
    Closers(BTreeSet<UserId>),
    /// Status restriction other than `all`.
    Status(StatusIndex),
    /// Card numbers and free-text terms.
    Search {
        /// Cards the numeric terms resolved to.
        resolved: BTreeSet<CardId>,
        /// Whether any numeric term was supplied.
        had_numeric: bool,
        /// Textual terms, AND-combined.
        texts: Vec<TextMatcher>,
    },
    /// Forces an empty result.
    Nothing,
}

impl Predicate {
    fn retains(&self, record: &CardRecord) -> bool {
        let card = &record.card;
        match self {
            Self::Boards(boards) => boards.contains(&card.board),
            Self::Cards(cards) => cards.contains(&card.id),
            Self::Unassigned => card.assignees.is_empty(),
            Self::Assignees(users) => !card.assignees.is_disjoint(users),
            Self::Creators(users) => users.contains(&card.creator),
            Self::Virtual(column) => record.position().virtual_column() == Some(*column),
            Self::Columns(columns) => {
                matches!(record.position(), Position::Column(id) if columns.contains(&id))
            }
            Self::Tags(tags) => !card.tags.is_disjoint(tags),
            Self::Created(window) => window.contains(card.created_at),
            Self::ClosedWithin(window) => record.closed_at().is_some_and(|at| window.contains(at)),
            Self::Closers(users) => record.closed_by().is_some_and(|user| users.contains(&user)),
            Self::Status(StatusIndex::All) => true,
            Self::Status(StatusIndex::Closed) => record.is_closed(),
            Self::Status(StatusIndex::NotNow) => record.is_postponed(),
            Self::Search {
                resolved,
                had_numeric,
                texts,
            } => {
                let text_match = || texts.iter().all(|matcher| matcher.matches(card));
                match (*had_numeric, resolved.is_empty(), texts.is_empty()) {
                    (false, _, _) | (true, true, false) => text_match(),
                    (true, false, false) => resolved.contains(&card.id) || text_match(),
                    (true, false, true) => resolved.contains(&card.id),
                    (true, true, true) => false,
                }
            }
            Self::Nothing => false,
        }
    }
}

/// Resolved query, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// Predicates in application order.
    pub predicates: Vec<Predicate>,
    /// Result ordering.
    pub sort: SortOrder,
    /// Boards the caller can read; applied before every predicate.
    pub accessible: BTreeSet<BoardId>,
}

/// Read-only card query service.
#[derive(Debug, Clone)]
pub struct CardQuery<S> {
    store: S,
    collab: Collaborators,
}

impl<S> CardQuery<S> {
    /// Construct a query service.
    pub const fn new(store: S, collab: Collaborators) -> Self {
        Self { store, collab }
    }
}

impl<S> CardQuery<S>
where
    S: CardStore,
{
    fn store_error(err: S::Error) -> ServiceError {
        ServiceError::store(err)
    }

    /// Resolve and apply `params` for `actor`.
    ///
    /// # Errors
    /// Returns `Validation` for unknown sort/status tokens and `NotFound` for
    /// inaccessible boards or unknown column names.
    pub fn run(&self, actor: &Actor, params: &FilterParams) -> ServiceResult<Vec<CardRecord>> {
        let plan = self.resolve(actor, params)?;
        self.apply(actor, &plan)
    }

    /// Validate `params` and resolve every criterion into a predicate.
    ///
    /// # Errors
    /// See [`CardQuery::run`]. Nothing is read beyond what resolution needs.
    pub fn resolve(&self, actor: &Actor, params: &FilterParams) -> ServiceResult<QueryPlan> {
        let params = params.normalize();
        let status = params.status_index()?;
        let sort = params.sort_order()?;
        let accessible = self.collab.access.accessible_board_ids(actor)?;
        let now = self.collab.clock.now();
        let mut predicates = Vec::new();

        if !params.board_ids.is_empty() {
            if let Some(board) = params.board_ids.iter().find(|board| !accessible.contains(board)) {
                return Err(Error::not_found("board", board).into());
            }
            predicates.push(Predicate::Boards(params.board_ids.iter().copied().collect()));
        }

        if !params.card_ids.is_empty() {
            predicates.push(Predicate::Cards(params.card_ids.iter().copied().collect()));
        }

        if params.assignment_status == Some(AssignmentStatus::Unassigned) {
            predicates.push(Predicate::Unassigned);
        }

        if let Some(assignees) = &params.assignee_ids {
            let users = self.store.users(actor.account).map_err(Self::store_error)?;
            let resolved: BTreeSet<UserId> = users
                .iter()
                .map(|user| user.id)
                .filter(|id| assignees.contains(id))
                .collect();
            predicates.push(if resolved.is_empty() {
                Predicate::Nothing
            } else {
                Predicate::Assignees(resolved)
            });
        }

        if let Some(creators) = &params.creator_ids {
            predicates.push(if creators.is_empty() {
                Predicate::Nothing
            } else {
                Predicate::Creators(creators.iter().copied().collect())
            });
        }

        if let Some(name) = &params.column {
            predicates.push(self.column_predicate(name, &accessible)?);
        }

        if params.tags.is_some() || params.tag_ids.is_some() {
            let tags = self.store.tags(actor.account).map_err(Self::store_error)?;
            let titles = params.tags.clone().unwrap_or_default();
            let ids = params.tag_ids.clone().unwrap_or_default();
            let resolved: BTreeSet<TagId> = tags
                .iter()
                .filter(|tag| titles.contains(&tag.title) || ids.contains(&tag.id))
                .map(|tag| tag.id)
                .collect();
            predicates.push(if resolved.is_empty() {
                Predicate::Nothing
            } else {
                Predicate::Tags(resolved)
            });
        }

        if let Some(text) = &params.creation {
            match CreationWindow::parse(text, now) {
                Some(window) => predicates.push(Predicate::Created(window)),
                None => debug!(expression = %text, "Ignoring unparseable creation window"),
            }
        }

        if let Some(text) = &params.closure {
            match CreationWindow::parse(text, now) {
                Some(window) => predicates.push(Predicate::ClosedWithin(window)),
                None => debug!(expression = %text, "Ignoring unparseable closure window"),
            }
        }

        if !params.closer_ids.is_empty() {
            predicates.push(Predicate::Closers(params.closer_ids.iter().copied().collect()));
        }

        if status != StatusIndex::All {
            predicates.push(Predicate::Status(status));
        }

        if !params.terms.is_empty() {
            predicates.push(self.search_predicate(actor, &params.terms, &accessible)?);
        }

        Ok(QueryPlan {
            predicates,
            sort,
            accessible,
        })
    }

    /// Apply a resolved plan: access pre-filter, predicates in order, dedupe, sort.
    ///
    /// # Errors
    /// Returns a store error when the cards cannot be loaded.
    pub fn apply(&self, actor: &Actor, plan: &QueryPlan) -> ServiceResult<Vec<CardRecord>> {
        if plan.predicates.contains(&Predicate::Nothing) {
            return Ok(Vec::new());
        }
        let mut cards: Vec<CardRecord> = self
            .store
            .cards(actor.account)
            .map_err(Self::store_error)?
            .into_iter()
            .filter(|record| record.card.is_published() && plan.accessible.contains(&record.card.board))
            .collect();

        for predicate in &plan.predicates {
            cards.retain(|record| predicate.retains(record));
            if cards.is_empty() {
                break;
            }
        }

        let mut seen = BTreeSet::new();
        cards.retain(|record| seen.insert(record.card.id));
        sort_cards(&mut cards, plan.sort);
        Ok(cards)
    }

    /// Display label of a card's effective position.
    ///
    /// # Errors
    /// Returns a store error when the column cannot be loaded.
    pub fn column_label(&self, record: &CardRecord) -> ServiceResult<String> {
        let position = record.position();
        let name = match position {
            Position::Column(id) => self.store.column(id).map_err(Self::store_error)?.map(|column| column.name),
            _ => None,
        };
        Ok(position.label(|_| name))
    }

    fn column_predicate(&self, name: &str, accessible: &BTreeSet<BoardId>) -> ServiceResult<Predicate> {
        if let Some(column) = VirtualColumn::parse(name) {
            return Ok(Predicate::Virtual(column));
        }
        let boards: Vec<BoardId> = accessible.iter().copied().collect();
        let matching: BTreeSet<ColumnId> = self
            .store
            .columns(&boards)
            .map_err(Self::store_error)?
            .into_iter()
            .filter(|column| column.is_named(name))
            .map(|column| column.id)
            .collect();
        if matching.is_empty() {
            return Err(Error::not_found("column", name).into());
        }
        Ok(Predicate::Columns(matching))
    }

    fn search_predicate(
        &self,
        actor: &Actor,
        terms: &[String],
        accessible: &BTreeSet<BoardId>,
    ) -> ServiceResult<Predicate> {
        let (numeric, textual): (Vec<&str>, Vec<&str>) = terms
            .iter()
            .map(|term| term.trim())
            .filter(|term| !term.is_empty())
            .partition(|term| term.bytes().all(|byte| byte.is_ascii_digit()));

        let mut resolved = BTreeSet::new();
        for term in &numeric {
            let Ok(number) = term.parse::<u64>() else {
                continue;
            };
            let card = self
                .store
                .card_by_number(actor.account, CardNumber(number))
                .map_err(Self::store_error)?;
            if let Some(record) = card.filter(|record| {
                record.card.is_published() && accessible.contains(&record.card.board)
            }) {
                resolved.insert(record.card.id);
            }
        }

        Ok(Predicate::Search {
            resolved,
            had_numeric: !numeric.is_empty(),
            texts: textual.into_iter().filter_map(TextMatcher::new).collect(),
        })
    }
}

fn sort_cards(cards: &mut [CardRecord], sort: SortOrder) {
    match sort {
        SortOrder::Latest => {
            cards.sort_by_key(|record| Reverse((record.card.last_active_at, record.card.id)));
        }
        SortOrder::Newest => {
            cards.sort_by_key(|record| Reverse((record.card.created_at, record.card.id)));
        }
        SortOrder::Oldest => cards.sort_by_key(|record| (record.card.created_at, record.card.id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tack_core::id::AccountId;
    use tack_core::model::{Board, Card, CardStatus, Column, RichText, Tag, User};
    use tack_core::state::Closure;
    use tack_store::MemoryStore;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    use crate::collaborators::FixedClock;

    const NOW: OffsetDateTime = datetime!(2024-05-15 12:00 UTC);

    struct Fixture {
        query: CardQuery<Arc<MemoryStore>>,
        store: Arc<MemoryStore>,
        actor: Actor,
        board: BoardId,
        hidden: BoardId,
        doing: ColumnId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::in_memory());
        let account = AccountId::new();
        let user = UserId::new();
        let board = BoardId::new();
        let hidden = BoardId::new();
        let doing = ColumnId::new();
        store
            .seed(|tables| {
                tables.users.insert(
                    user,
                    User {
                        id: user,
                        account,
                        name: "Ada".into(),
                        email: None,
                    },
                );
                for (id, members) in [(board, BTreeSet::from([user])), (hidden, BTreeSet::new())] {
                    tables.boards.insert(
                        id,
                        Board {
                            id,
                            account,
                            name: "Board".into(),
                            members,
                        },
                    );
                }
                tables.columns.insert(
                    doing,
                    Column {
                        id: doing,
                        board,
                        name: "Doing".into(),
                        color: None,
                        position: 0,
                    },
                );
            })
            .unwrap_or_else(|err| panic!("seed: {err}"));
        let collab = Collaborators::from_store(store.clone()).with_clock(FixedClock(NOW));
        Fixture {
            query: CardQuery::new(store.clone(), collab),
            store,
            actor: Actor::new(account, user),
            board,
            hidden,
            doing,
        }
    }

    fn add_card(fx: &Fixture, number: u64, title: &str, board: BoardId, age_days: i64) -> CardId {
        let id = CardId::new();
        let at = NOW - Duration::days(age_days);
        let card = Card {
            id,
            account: fx.actor.account,
            number: CardNumber(number),
            board,
            column: None,
            stage: None,
            title: title.into(),
            description: RichText::default(),
            creator: fx.actor.user,
            status: CardStatus::Published,
            assignees: BTreeSet::new(),
            tags: BTreeSet::new(),
            watchers: BTreeSet::new(),
            created_at: at,
            updated_at: at,
            last_active_at: at,
            lock_version: 0,
        };
        fx.store
            .seed(|tables| {
                tables.cards.insert(id, card);
            })
            .unwrap_or_else(|err| panic!("seed card: {err}"));
        id
    }

    fn ids(records: &[CardRecord]) -> Vec<CardId> {
        records.iter().map(|record| record.card.id).collect()
    }

    #[test]
    fn inaccessible_boards_are_excluded_and_rejected() -> ServiceResult<()> {
        let fx = fixture();
        let visible = add_card(&fx, 1, "Visible", fx.board, 1);
        add_card(&fx, 2, "Hidden", fx.hidden, 1);

        assert_eq!(ids(&fx.query.run(&fx.actor, &FilterParams::default())?), vec![visible]);

        let params = FilterParams {
            board_ids: vec![fx.hidden],
            ..FilterParams::default()
        };
        let Err(err) = fx.query.run(&fx.actor, &params) else {
            panic!("hidden board must be rejected");
        };
        assert!(err.is_not_found());
        Ok(())
    }

    #[test]
    fn bad_tokens_fail_before_any_read() {
        let fx = fixture();
        let params = FilterParams {
            sort: Some("random".into()),
            ..FilterParams::default()
        };
        let Err(err) = fx.query.resolve(&fx.actor, &params) else {
            panic!("unknown sort must fail");
        };
        assert!(matches!(err.domain(), Some(Error::Validation { field: "sort", .. })));
    }

    #[test]
    fn sort_orders_break_ties_by_id() -> ServiceResult<()> {
        let fx = fixture();
        let old = add_card(&fx, 1, "Old", fx.board, 5);
        let twin_a = add_card(&fx, 2, "Twin", fx.board, 1);
        let twin_b = add_card(&fx, 3, "Twin", fx.board, 1);
        let (low, high) = if twin_a < twin_b { (twin_a, twin_b) } else { (twin_b, twin_a) };

        let newest = FilterParams {
            sort: Some("newest".into()),
            ..FilterParams::default()
        };
        assert_eq!(ids(&fx.query.run(&fx.actor, &newest)?), vec![high, low, old]);

        let oldest = FilterParams {
            sort: Some("oldest".into()),
            ..FilterParams::default()
        };
        assert_eq!(ids(&fx.query.run(&fx.actor, &oldest)?), vec![old, low, high]);
        Ok(())
    }

    #[test]
    fn unresolved_lists_force_empty_results() -> ServiceResult<()> {
        let fx = fixture();
        add_card(&fx, 1, "Card", fx.board, 1);

        let assignees = FilterParams {
            assignee_ids: Some(vec![UserId::new()]),
            ..FilterParams::default()
        };
        assert!(fx.query.run(&fx.actor, &assignees)?.is_empty());

        let creators = FilterParams {
            creator_ids: Some(Vec::new()),
            ..FilterParams::default()
        };
        assert!(fx.query.run(&fx.actor, &creators)?.is_empty());

        let tags = FilterParams {
            tags: Some(vec!["#nope".into()]),
            ..FilterParams::default()
        };
        assert!(fx.query.run(&fx.actor, &tags)?.is_empty());
        Ok(())
    }

    #[test]
    fn tag_titles_and_ids_are_unioned() -> ServiceResult<()> {
        let fx = fixture();
        let mobile = Tag {
            id: TagId::new(),
            account: fx.actor.account,
            title: "mobile".into(),
        };
        let web = Tag {
            id: TagId::new(),
            account: fx.actor.account,
            title: "web".into(),
        };
        let on_mobile = add_card(&fx, 1, "Phone", fx.board, 1);
        let on_web = add_card(&fx, 2, "Site", fx.board, 2);
        add_card(&fx, 3, "Plain", fx.board, 3);
        fx.store.seed(|tables| {
            for (card, tag) in [(on_mobile, &mobile), (on_web, &web)] {
                tables.tags.insert(tag.id, tag.clone());
                if let Some(row) = tables.cards.get_mut(&card) {
                    row.tags.insert(tag.id);
                }
            }
        })?;

        let params = FilterParams {
            tags: Some(vec!["#Mobile".into()]),
            tag_ids: Some(vec![web.id]),
            ..FilterParams::default()
        };
        assert_eq!(ids(&fx.query.run(&fx.actor, &params)?), vec![on_mobile, on_web]);
        Ok(())
    }

    #[test]
    fn numeric_miss_falls_back_to_text_search() -> ServiceResult<()> {
        let fx = fixture();
        let urgent = add_card(&fx, 7, "Urgent fix", fx.board, 1);
        let numbered = add_card(&fx, 42, "Routine", fx.board, 2);

        let fallback = FilterParams {
            terms: vec!["4242".into(), "urgent".into()],
            ..FilterParams::default()
        };
        assert_eq!(ids(&fx.query.run(&fx.actor, &fallback)?), vec![urgent]);

        let either = FilterParams {
            terms: vec!["42".into(), "urgent".into()],
            ..FilterParams::default()
        };
        assert_eq!(ids(&fx.query.run(&fx.actor, &either)?), vec![urgent, numbered]);

        let miss = FilterParams {
            terms: vec!["4242".into()],
            ..FilterParams::default()
        };
        assert!(fx.query.run(&fx.actor, &miss)?.is_empty());
        Ok(())
    }

    #[test]
    fn column_filter_uses_effective_position() -> ServiceResult<()> {
        let fx = fixture();
        let in_doing = add_card(&fx, 1, "Doing", fx.board, 1);
        let closed_in_doing = add_card(&fx, 2, "Closed", fx.board, 2);
        fx.store.seed(|tables| {
            for card in [in_doing, closed_in_doing] {
                if let Some(row) = tables.cards.get_mut(&card) {
                    row.column = Some(fx.doing);
                }
            }
            tables.closures.insert(
                closed_in_doing,
                Closure {
                    card: closed_in_doing,
                    user: fx.actor.user,
                    created_at: NOW - Duration::hours(1),
                },
            );
        })?;

        let doing = FilterParams {
            column: Some("doing".into()),
            ..FilterParams::default()
        };
        assert_eq!(ids(&fx.query.run(&fx.actor, &doing)?), vec![in_doing]);

        let done = FilterParams {
            column: Some("DONE".into()),
            closure: Some("today".into()),
            ..FilterParams::default()
        };
        let records = fx.query.run(&fx.actor, &done)?;
        assert_eq!(ids(&records), vec![closed_in_doing]);
        assert_eq!(fx.query.column_label(&records[0])?, "DONE");

        let unknown = FilterParams {
            column: Some("Review".into()),
            ..FilterParams::default()
        };
        assert!(fx.query.run(&fx.actor, &unknown).is_err());
        Ok(())
    }

    #[test]
    fn unparseable_windows_are_ignored() -> ServiceResult<()> {
        let fx = fixture();
        let recent = add_card(&fx, 1, "Recent", fx.board, 0);
        let old = add_card(&fx, 2, "Old", fx.board, 30);

        let garbage = FilterParams {
            creation: Some("whenever".into()),
            ..FilterParams::default()
        };
        assert_eq!(fx.query.run(&fx.actor, &garbage)?.len(), 2);

        let week = FilterParams {
            creation: Some("last 7 days".into()),
            ..FilterParams::default()
        };
        let found = ids(&fx.query.run(&fx.actor, &week)?);
        assert_eq!(found, vec![recent]);
        assert!(!found.contains(&old));
        Ok(())
    }
}
