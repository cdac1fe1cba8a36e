//! Card lifecycle: effective position resolution and transition planning.
//!
//! A card sits in exactly one effective position. Closed and postponed are
//! overlays recorded as marker rows; the column reference persists beneath them
//! and shows through again when the overlay goes away. Transitions are planned
//! here as [`Changeset`]s and executed by the application layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::changeset::{Changeset, Mutation};
use crate::error::{Error, Result};
use crate::event::{Action, Actor, Event};
use crate::id::{BoardId, CardId, CardNumber, ColumnId, StageId, UserId};
use crate::model::{
    Card, CardStatus, Column, Comment, ContentRef, DEFAULT_CARD_TITLE, RichText, Tag,
};

/// Marker recording that a card is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    /// Closed card.
    pub card: CardId,
    /// User who closed it.
    pub user: UserId,
    /// When it was closed.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Marker recording that a card is postponed ("not now").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Postponement {
    /// Postponed card.
    pub card: CardId,
    /// User who postponed it.
    pub user: UserId,
    /// When it was postponed.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One of the three states shown in place of a real column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualColumn {
    /// Postponed.
    NotNow,
    /// Awaiting triage.
    Maybe,
    /// Closed.
    Done,
}

impl VirtualColumn {
    /// Recognise a virtual column name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "NOT NOW" => Some(Self::NotNow),
            "MAYBE?" => Some(Self::Maybe),
            "DONE" => Some(Self::Done),
            _ => None,
        }
    }

    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotNow => "NOT NOW",
            Self::Maybe => "MAYBE?",
            Self::Done => "DONE",
        }
    }
}

impl fmt::Display for VirtualColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Effective position of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    /// Closure marker present.
    Closed,
    /// Postponement marker present.
    Postponed,
    /// No column and no overlay.
    AwaitingTriage,
    /// Sitting in a real column.
    Column(ColumnId),
}

impl Position {
    /// The virtual column this position displays as, if any.
    #[must_use]
    pub const fn virtual_column(self) -> Option<VirtualColumn> {
        match self {
            Self::Closed => Some(VirtualColumn::Done),
            Self::Postponed => Some(VirtualColumn::NotNow),
            Self::AwaitingTriage => Some(VirtualColumn::Maybe),
            Self::Column(_) => None,
        }
    }

    /// Display label; `column_name` supplies names of real columns.
    pub fn label<F>(self, column_name: F) -> String
    where
        F: FnOnce(ColumnId) -> Option<String>,
    {
        match self {
            Self::Column(id) => column_name(id).unwrap_or_else(|| id.to_string()),
            other => other
                .virtual_column()
                .map(VirtualColumn::label)
                .unwrap_or_default()
                .to_owned(),
        }
    }
}

/// Outcome of planning a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The card is already in the requested state.
    Noop,
    /// Changes to commit.
    Apply(Changeset),
}

impl Transition {
    /// Returns true for [`Transition::Noop`].
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }
}

/// Ability to be closed and reopened.
pub trait Closable {
    /// Returns true while a closure marker exists.
    fn is_closed(&self) -> bool;
    /// When the card was closed.
    fn closed_at(&self) -> Option<OffsetDateTime>;
    /// Who closed the card.
    fn closed_by(&self) -> Option<UserId>;
    /// Plan closing the card.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] when the markers are inconsistent.
    fn close(&self, actor: &Actor, at: OffsetDateTime) -> Result<Transition>;
    /// Plan reopening the card.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] when the markers are inconsistent.
    fn reopen(&self, actor: &Actor, at: OffsetDateTime) -> Result<Transition>;
}

/// Ability to be postponed and resumed.
pub trait Postponable {
    /// Returns true while a postponement marker exists.
    fn is_postponed(&self) -> bool;
    /// When the card was postponed.
    fn postponed_at(&self) -> Option<OffsetDateTime>;
    /// Plan postponing the card.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] for closed cards and
    /// [`Error::Conflict`] when the markers are inconsistent.
    fn postpone(&self, actor: &Actor, at: OffsetDateTime) -> Result<Transition>;
    /// Plan resuming the card.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] when the markers are inconsistent.
    fn resume(&self, actor: &Actor, at: OffsetDateTime) -> Result<Transition>;
}

/// Fields of a card about to be created.
#[derive(Debug, Clone)]
pub struct NewCard {
    /// Number allocated for the card.
    pub number: CardNumber,
    /// Owning board.
    pub board: BoardId,
    /// Title; blank becomes [`DEFAULT_CARD_TITLE`].
    pub title: String,
    /// Description.
    pub description: RichText,
    /// Tags to attach.
    pub tags: Vec<Tag>,
}

/// Where a newly created card lands.
#[derive(Debug, Clone, Copy)]
pub enum Placement<'a> {
    /// Awaiting triage.
    Triage,
    /// A real column of the card's board.
    Column(&'a Column),
    /// Directly into a virtual state.
    Virtual(VirtualColumn),
}

/// A card together with its marker rows, the unit every transition is planned on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRecord {
    /// Card row.
    pub card: Card,
    /// Active closure marker.
    pub closure: Option<Closure>,
    /// Active postponement marker.
    pub postponement: Option<Postponement>,
}

impl CardRecord {
    /// Wrap a card without markers.
    #[must_use]
    pub const fn new(card: Card) -> Self {
        Self {
            card,
            closure: None,
            postponement: None,
        }
    }

    /// Fail when the card carries both overlays.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] when closed and postponed at once.
    pub fn check_integrity(&self) -> Result<()> {
        if self.closure.is_some() && self.postponement.is_some() {
            return Err(Error::Conflict {
                card: self.card.id,
                reason: "card is both closed and postponed".to_owned(),
            });
        }
        Ok(())
    }

    /// Effective position: closed, then postponed, then awaiting triage, then the column.
    #[must_use]
    pub const fn position(&self) -> Position {
        if self.closure.is_some() {
            Position::Closed
        } else if self.postponement.is_some() {
            Position::Postponed
        } else {
            match self.card.column {
                Some(column) => Position::Column(column),
                None => Position::AwaitingTriage,
            }
        }
    }

    /// Returns true when the card has no column and no overlay.
    #[must_use]
    pub const fn is_awaiting_triage(&self) -> bool {
        matches!(self.position(), Position::AwaitingTriage)
    }

    /// Plan creating a card at `placement`.
    ///
    /// Returns the record as it will exist after commit along with the changeset.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when the column belongs to another board.
    pub fn publish(
        actor: &Actor,
        new_card: NewCard,
        placement: Placement<'_>,
        at: OffsetDateTime,
    ) -> Result<(Self, Changeset)> {
        let title = if new_card.title.trim().is_empty() {
            DEFAULT_CARD_TITLE.to_owned()
        } else {
            new_card.title.trim().to_owned()
        };
        let column = match placement {
            Placement::Column(column) if column.board != new_card.board => {
                return Err(Error::not_found("column", column.id));
            }
            Placement::Column(column) => Some(column.id),
            Placement::Triage | Placement::Virtual(_) => None,
        };
        let card = Card {
            id: CardId::new(),
            account: actor.account,
            number: new_card.number,
            board: new_card.board,
            column,
            stage: None,
            title,
            description: new_card.description,
            creator: actor.user,
            status: CardStatus::Published,
            assignees: std::collections::BTreeSet::new(),
            tags: new_card.tags.iter().map(|tag| tag.id).collect(),
            watchers: std::iter::once(actor.user).collect(),
            created_at: at,
            updated_at: at,
            last_active_at: at,
            lock_version: 0,
        };
        let mut record = Self::new(card);
        let mut changeset = Changeset::new();
        changeset.push(Mutation::InsertCard(record.card.clone()));
        changeset.emit(record.event(actor, Action::CardPublished, at));

        match placement {
            Placement::Virtual(VirtualColumn::Done) => {
                let closure = Closure {
                    card: record.card.id,
                    user: actor.user,
                    created_at: at,
                };
                changeset.push(Mutation::InsertClosure(closure.clone()));
                changeset.emit(record.event(actor, Action::CardClosed, at));
                record.closure = Some(closure);
            }
            Placement::Virtual(VirtualColumn::NotNow) => {
                let postponement = Postponement {
                    card: record.card.id,
                    user: actor.user,
                    created_at: at,
                };
                changeset.push(Mutation::InsertPostponement(postponement.clone()));
                changeset.emit(record.event(actor, Action::CardPostponed, at));
                record.postponement = Some(postponement);
            }
            Placement::Virtual(VirtualColumn::Maybe) | Placement::Triage | Placement::Column(_) => {
            }
        }
        Ok((record, changeset))
    }

    /// Plan clearing the column so the card awaits triage. Markers are untouched.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] when the markers are inconsistent.
    pub fn send_back_to_triage(&self, actor: &Actor, at: OffsetDateTime) -> Result<Transition> {
        self.check_integrity()?;
        if self.card.column.is_none() {
            return Ok(Transition::Noop);
        }
        let mut card = self.card.touched(at);
        card.column = None;
        let mut changeset = self.begin();
        changeset.push(Mutation::PutCard(card)).emit(self.event(
            actor,
            Action::CardSentBackToTriage,
            at,
        ));
        Ok(Transition::Apply(changeset))
    }

    /// Plan placing the card into a real column, clearing both overlays.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when the column belongs to another board and
    /// [`Error::Conflict`] when the markers are inconsistent.
    pub fn triage_into(
        &self,
        column: &Column,
        actor: &Actor,
        at: OffsetDateTime,
    ) -> Result<Transition> {
        self.check_integrity()?;
        if column.board != self.card.board {
            return Err(Error::not_found("column", column.id));
        }
        if self.position() == Position::Column(column.id) {
            return Ok(Transition::Noop);
        }
        let mut card = self.card.touched(at);
        card.column = Some(column.id);
        let mut changeset = self.begin();
        changeset.push(Mutation::PutCard(card));
        if self.closure.is_some() {
            changeset.push(Mutation::DeleteClosure { card: self.card.id });
        }
        if self.postponement.is_some() {
            changeset.push(Mutation::DeletePostponement { card: self.card.id });
        }
        changeset.emit(
            self.event(actor, Action::CardTriaged, at)
                .with_particulars(json!({ "column": column.name })),
        );
        Ok(Transition::Apply(changeset))
    }

    /// Plan toggling `user` in the assignee set.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] when the markers are inconsistent.
    pub fn toggle_assignment(
        &self,
        user: UserId,
        actor: &Actor,
        at: OffsetDateTime,
    ) -> Result<Transition> {
        self.check_integrity()?;
        let mut card = self.card.touched(at);
        let action = if card.assignees.remove(&user) {
            Action::CardUnassigned
        } else {
            card.assignees.insert(user);
            card.watchers.insert(user);
            Action::CardAssigned
        };
        let mut changeset = self.begin();
        changeset.push(Mutation::PutCard(card)).emit(
            self.event(actor, action, at)
                .with_particulars(json!({ "assignee_ids": [user.to_string()] })),
        );
        Ok(Transition::Apply(changeset))
    }

    /// Plan toggling `tag` on the card; `create` also inserts the tenant tag row.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] when the markers are inconsistent.
    pub fn toggle_tag(&self, tag: &Tag, create: bool, at: OffsetDateTime) -> Result<Transition> {
        self.check_integrity()?;
        let mut card = self.card.touched(at);
        if !card.tags.remove(&tag.id) {
            card.tags.insert(tag.id);
        }
        let mut changeset = self.begin();
        if create {
            changeset.push(Mutation::InsertTag(tag.clone()));
        }
        changeset.push(Mutation::PutCard(card));
        Ok(Transition::Apply(changeset))
    }

    /// Plan setting the workflow stage.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] when the markers are inconsistent.
    pub fn change_stage(
        &self,
        stage: Option<StageId>,
        actor: &Actor,
        at: OffsetDateTime,
    ) -> Result<Transition> {
        self.check_integrity()?;
        if self.card.stage == stage {
            return Ok(Transition::Noop);
        }
        let mut card = self.card.touched(at);
        card.stage = stage;
        let mut changeset = self.begin();
        changeset.push(Mutation::PutCard(card)).emit(
            self.event(actor, Action::CardStaged, at)
                .with_particulars(json!({ "stage_id": stage.map(|id| id.to_string()) })),
        );
        Ok(Transition::Apply(changeset))
    }

    /// Plan overwriting title and/or description.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] when the markers are inconsistent.
    pub fn update(
        &self,
        title: Option<&str>,
        description: Option<RichText>,
        actor: &Actor,
        at: OffsetDateTime,
    ) -> Result<Transition> {
        self.check_integrity()?;
        let mut card = self.card.touched(at);
        let mut changed = false;
        let mut title_event = None;
        if let Some(title) = title {
            let title = if title.trim().is_empty() {
                DEFAULT_CARD_TITLE
            } else {
                title.trim()
            };
            if title != self.card.title {
                title_event = Some(
                    self.event(actor, Action::CardTitleChanged, at)
                        .with_particulars(json!({
                            "old_title": self.card.title,
                            "new_title": title,
                        })),
                );
                title.clone_into(&mut card.title);
                changed = true;
            }
        }
        if let Some(description) = description
            && description != self.card.description
        {
            card.description = description;
            changed = true;
        }
        if !changed {
            return Ok(Transition::Noop);
        }
        let mut changeset = self.begin();
        changeset.push(Mutation::PutCard(card));
        if let Some(event) = title_event {
            changeset.emit(event);
        }
        Ok(Transition::Apply(changeset))
    }

    /// Plan storing a comment and bumping the card's activity.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when the comment belongs to another card.
    pub fn add_comment(
        &self,
        comment: Comment,
        actor: &Actor,
        at: OffsetDateTime,
    ) -> Result<Transition> {
        if comment.card != self.card.id {
            return Err(Error::not_found("card", comment.card));
        }
        let mut card = self.card.touched(at);
        card.watchers.insert(comment.creator);
        let event = Event::new(
            actor,
            ContentRef::Comment(comment.id),
            self.card.board,
            Action::CommentCreated,
            at,
        )
        .with_particulars(json!({ "card_id": self.card.id.to_string() }));
        let mut changeset = self.begin();
        changeset
            .push(Mutation::PutComment(comment))
            .push(Mutation::PutCard(card))
            .emit(event);
        Ok(Transition::Apply(changeset))
    }

    fn begin(&self) -> Changeset {
        let mut changeset = Changeset::new();
        changeset.guard(self.card.id, self.card.lock_version);
        changeset
    }

    fn event(&self, actor: &Actor, action: Action, at: OffsetDateTime) -> Event {
        Event::new(
            actor,
            ContentRef::Card(self.card.id),
            self.card.board,
            action,
            at,
        )
    }
}

impl Closable for CardRecord {
    fn is_closed(&self) -> bool {
        self.closure.is_some()
    }

    fn closed_at(&self) -> Option<OffsetDateTime> {
        self.closure.as_ref().map(|closure| closure.created_at)
    }

    fn closed_by(&self) -> Option<UserId> {
        self.closure.as_ref().map(|closure| closure.user)
    }

    fn close(&self, actor: &Actor, at: OffsetDateTime) -> Result<Transition> {
        self.check_integrity()?;
        if self.is_closed() {
            return Ok(Transition::Noop);
        }
        let mut changeset = self.begin();
        changeset
            .push(Mutation::PutCard(self.card.touched(at)))
            .push(Mutation::InsertClosure(Closure {
                card: self.card.id,
                user: actor.user,
                created_at: at,
            }));
        if self.postponement.is_some() {
            changeset.push(Mutation::DeletePostponement { card: self.card.id });
        }
        changeset.emit(self.event(actor, Action::CardClosed, at));
        Ok(Transition::Apply(changeset))
    }

    fn reopen(&self, actor: &Actor, at: OffsetDateTime) -> Result<Transition> {
        self.check_integrity()?;
        if !self.is_closed() {
            return Ok(Transition::Noop);
        }
        let mut changeset = self.begin();
        changeset
            .push(Mutation::PutCard(self.card.touched(at)))
            .push(Mutation::DeleteClosure { card: self.card.id })
            .emit(self.event(actor, Action::CardReopened, at));
        Ok(Transition::Apply(changeset))
    }
}

impl Postponable for CardRecord {
    fn is_postponed(&self) -> bool {
        self.postponement.is_some()
    }

    fn postponed_at(&self) -> Option<OffsetDateTime> {
        self.postponement
            .as_ref()
            .map(|postponement| postponement.created_at)
    }

    fn postpone(&self, actor: &Actor, at: OffsetDateTime) -> Result<Transition> {
        self.check_integrity()?;
        if self.is_closed() {
            return Err(Error::InvalidTransition {
                card: self.card.id,
                action: "postpone",
                reason: "card is closed",
            });
        }
        if self.is_postponed() {
            return Ok(Transition::Noop);
        }
        let mut changeset = self.begin();
        changeset
            .push(Mutation::PutCard(self.card.touched(at)))
            .push(Mutation::InsertPostponement(Postponement {
                card: self.card.id,
                user: actor.user,
                created_at: at,
            }))
            .emit(self.event(actor, Action::CardPostponed, at));
        Ok(Transition::Apply(changeset))
    }

    fn resume(&self, actor: &Actor, at: OffsetDateTime) -> Result<Transition> {
        self.check_integrity()?;
        if !self.is_postponed() {
            return Ok(Transition::Noop);
        }
        let mut changeset = self.begin();
        changeset
            .push(Mutation::PutCard(self.card.touched(at)))
            .push(Mutation::DeletePostponement { card: self.card.id })
            .emit(self.event(actor, Action::CardResumed, at));
        Ok(Transition::Apply(changeset))
    }
}

/// Apply a planned changeset to a record in memory, mirroring what a store commit does to its rows.
///
/// Mutations that do not concern this record are ignored.
pub fn apply_to_record(record: &mut CardRecord, changeset: &Changeset) {
    for mutation in &changeset.mutations {
        match mutation {
            Mutation::PutCard(card) | Mutation::InsertCard(card) if card.id == record.card.id => {
                record.card = card.clone();
            }
            Mutation::InsertClosure(closure) if closure.card == record.card.id => {
                record.closure = Some(closure.clone());
            }
            Mutation::DeleteClosure { card } if *card == record.card.id => record.closure = None,
            Mutation::InsertPostponement(postponement) if postponement.card == record.card.id => {
                record.postponement = Some(postponement.clone());
            }
            Mutation::DeletePostponement { card } if *card == record.card.id => {
                record.postponement = None;
            }
            Mutation::AddWatcher { card, user } if *card == record.card.id => {
                if record.card.watchers.insert(*user) {
                    record.card.lock_version = record.card.lock_version.saturating_add(1);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AccountId;

    fn actor() -> Actor {
        Actor::new(AccountId::new(), UserId::new())
    }

    fn column(board: BoardId, name: &str) -> Column {
        Column {
            id: ColumnId::new(),
            board,
            name: name.to_owned(),
            color: None,
            position: 0,
        }
    }

    fn record_in(column: Option<&Column>, actor: &Actor) -> CardRecord {
        let board = column.map_or_else(BoardId::new, |column| column.board);
        let placement = column.map_or(Placement::Triage, Placement::Column);
        let (record, _) = CardRecord::publish(
            actor,
            NewCard {
                number: CardNumber(1),
                board,
                title: "Card".into(),
                description: RichText::default(),
                tags: Vec::new(),
            },
            placement,
            OffsetDateTime::UNIX_EPOCH,
        )
        .unwrap_or_else(|err| panic!("publish: {err}"));
        record
    }

    fn apply(record: &mut CardRecord, transition: Result<Transition>) -> Changeset {
        match transition.unwrap_or_else(|err| panic!("transition: {err}")) {
            Transition::Apply(changeset) => {
                apply_to_record(record, &changeset);
                changeset
            }
            Transition::Noop => panic!("expected a change"),
        }
    }

    fn actions(changeset: &Changeset) -> Vec<Action> {
        changeset.events.iter().map(|event| event.action).collect()
    }

    #[test]
    fn close_then_reopen_restores_the_column() {
        let actor = actor();
        let backlog = column(BoardId::new(), "Backlog");
        let mut record = record_in(Some(&backlog), &actor);
        let at = OffsetDateTime::UNIX_EPOCH;

        let closed = {
            let transition = record.close(&actor, at);
            apply(&mut record, transition)
        };
        assert_eq!(actions(&closed), vec![Action::CardClosed]);
        assert_eq!(record.position(), Position::Closed);
        assert_eq!(record.card.column, Some(backlog.id));
        assert_eq!(record.closed_by(), Some(actor.user));

        {
            let transition = record.reopen(&actor, at);
            apply(&mut record, transition)
        };
        assert_eq!(record.position(), Position::Column(backlog.id));
    }

    #[test]
    fn reopen_without_column_lands_in_triage() {
        let actor = actor();
        let mut record = record_in(None, &actor);
        let at = OffsetDateTime::UNIX_EPOCH;
        {
            let transition = record.close(&actor, at);
            apply(&mut record, transition)
        };
        {
            let transition = record.reopen(&actor, at);
            apply(&mut record, transition)
        };
        assert!(record.is_awaiting_triage());
    }

    #[test]
    fn repeated_transitions_are_noops() {
        let actor = actor();
        let mut record = record_in(None, &actor);
        let at = OffsetDateTime::UNIX_EPOCH;
        assert!(
            record
                .reopen(&actor, at)
                .unwrap_or_else(|err| panic!("{err}"))
                .is_noop()
        );
        assert!(
            record
                .send_back_to_triage(&actor, at)
                .unwrap_or_else(|err| panic!("{err}"))
                .is_noop()
        );
        {
            let transition = record.postpone(&actor, at);
            apply(&mut record, transition)
        };
        assert!(
            record
                .postpone(&actor, at)
                .unwrap_or_else(|err| panic!("{err}"))
                .is_noop()
        );
    }

    #[test]
    fn close_removes_postponement() {
        let actor = actor();
        let mut record = record_in(None, &actor);
        let at = OffsetDateTime::UNIX_EPOCH;
        {
            let transition = record.postpone(&actor, at);
            apply(&mut record, transition)
        };
        assert_eq!(record.position(), Position::Postponed);

        let closed = {
            let transition = record.close(&actor, at);
            apply(&mut record, transition)
        };
        assert!(
            closed
                .mutations
                .iter()
                .any(|mutation| matches!(mutation, Mutation::DeletePostponement { .. }))
        );
        assert!(record.postponement.is_none());
        assert_eq!(record.position(), Position::Closed);
    }

    #[test]
    fn postpone_while_closed_is_refused() {
        let actor = actor();
        let mut record = record_in(None, &actor);
        let at = OffsetDateTime::UNIX_EPOCH;
        {
            let transition = record.close(&actor, at);
            apply(&mut record, transition)
        };
        let err = record
            .postpone(&actor, at)
            .err()
            .unwrap_or_else(|| panic!("postpone must fail"));
        assert!(matches!(
            err,
            Error::InvalidTransition {
                action: "postpone",
                ..
            }
        ));
    }

    #[test]
    fn triage_into_clears_overlays() {
        let actor = actor();
        let backlog = column(BoardId::new(), "Backlog");
        let doing = column(backlog.board, "Doing");
        let mut record = record_in(Some(&backlog), &actor);
        let at = OffsetDateTime::UNIX_EPOCH;
        {
            let transition = record.postpone(&actor, at);
            apply(&mut record, transition)
        };

        let moved = {
            let transition = record.triage_into(&doing, &actor, at);
            apply(&mut record, transition)
        };
        assert_eq!(record.position(), Position::Column(doing.id));
        assert_eq!(moved.events[0].particulars["column"], "Doing");

        assert!(
            record
                .triage_into(&doing, &actor, at)
                .unwrap_or_else(|err| panic!("{err}"))
                .is_noop()
        );
    }

    #[test]
    fn triage_into_foreign_column_is_not_found() {
        let actor = actor();
        let record = record_in(None, &actor);
        let foreign = column(BoardId::new(), "Elsewhere");
        let err = record
            .triage_into(&foreign, &actor, OffsetDateTime::UNIX_EPOCH)
            .err()
            .unwrap_or_else(|| panic!("foreign column must fail"));
        assert!(err.is_not_found());
    }

    #[test]
    fn both_markers_is_a_conflict() {
        let actor = actor();
        let mut record = record_in(None, &actor);
        record.closure = Some(Closure {
            card: record.card.id,
            user: actor.user,
            created_at: OffsetDateTime::UNIX_EPOCH,
        });
        record.postponement = Some(Postponement {
            card: record.card.id,
            user: actor.user,
            created_at: OffsetDateTime::UNIX_EPOCH,
        });
        let err = record
            .close(&actor, OffsetDateTime::UNIX_EPOCH)
            .err()
            .unwrap_or_else(|| panic!("conflict expected"));
        assert!(err.is_conflict());
    }

    #[test]
    fn every_write_bumps_the_lock_version_and_guards_the_old_one() {
        let actor = actor();
        let mut record = record_in(None, &actor);
        let at = OffsetDateTime::UNIX_EPOCH;
        let changeset = {
            let transition = record.toggle_assignment(actor.user, &actor, at);
            apply(&mut record, transition)
        };
        assert_eq!(changeset.guards[0].expected, 0);
        assert_eq!(record.card.lock_version, 1);
        assert!(record.card.assignees.contains(&actor.user));
        assert_eq!(actions(&changeset), vec![Action::CardAssigned]);

        let changeset = {
            let transition = record.toggle_assignment(actor.user, &actor, at);
            apply(&mut record, transition)
        };
        assert_eq!(changeset.guards[0].expected, 1);
        assert_eq!(actions(&changeset), vec![Action::CardUnassigned]);
        assert!(record.card.assignees.is_empty());
    }

    #[test]
    fn publish_into_done_closes_in_the_same_changeset() {
        let actor = actor();
        let (record, changeset) = CardRecord::publish(
            &actor,
            NewCard {
                number: CardNumber(7),
                board: BoardId::new(),
                title: "   ".into(),
                description: RichText::default(),
                tags: Vec::new(),
            },
            Placement::Virtual(VirtualColumn::Done),
            OffsetDateTime::UNIX_EPOCH,
        )
        .unwrap_or_else(|err| panic!("publish: {err}"));
        assert_eq!(record.card.title, DEFAULT_CARD_TITLE);
        assert!(record.is_closed());
        assert_eq!(
            actions(&changeset),
            vec![Action::CardPublished, Action::CardClosed]
        );
        assert!(changeset.guards.is_empty());
    }

    #[test]
    fn update_reports_title_changes() {
        let actor = actor();
        let record = record_in(None, &actor);
        let at = OffsetDateTime::UNIX_EPOCH;
        assert!(
            record
                .update(Some("Card"), None, &actor, at)
                .unwrap_or_else(|err| panic!("{err}"))
                .is_noop()
        );
        match record
            .update(Some("Renamed"), None, &actor, at)
            .unwrap_or_else(|err| panic!("{err}"))
        {
            Transition::Apply(changeset) => {
                assert_eq!(actions(&changeset), vec![Action::CardTitleChanged]);
                assert_eq!(changeset.events[0].particulars["new_title"], "Renamed");
            }
            Transition::Noop => panic!("title change expected"),
        }
    }

    #[test]
    fn labels_follow_position_priority() {
        let column = ColumnId::new();
        assert_eq!(Position::Closed.label(|_| None), "DONE");
        assert_eq!(Position::Postponed.label(|_| None), "NOT NOW");
        assert_eq!(Position::AwaitingTriage.label(|_| None), "MAYBE?");
        assert_eq!(
            Position::Column(column).label(|_| Some("Doing".into())),
            "Doing"
        );
        assert_eq!(
            VirtualColumn::parse(" not now "),
            Some(VirtualColumn::NotNow)
        );
        assert_eq!(VirtualColumn::parse("maybe?"), Some(VirtualColumn::Maybe));
        assert_eq!(VirtualColumn::parse("Doing"), None);
    }
}
