//! Executes card transitions planned by `tack-core` against a [`CardStore`].
//!
//! Every operation loads the card, checks board access, plans a changeset and
//! commits it. When the commit is rejected (a concurrent writer bumped the
//! card or took the same number) the writer reloads and plans again once; a
//! second rejection surfaces as [`tack_core::Error::Conflict`].

use std::collections::BTreeSet;

use tack_core::changeset::{CommitOutcome, Mutation, Rejection};
use tack_core::event::{Actor, Event};
use tack_core::id::{BoardId, CardId, ColumnId, CommentId, StageId, TagId, UserId};
use tack_core::model::{Column, Comment, RichText, Tag};
use tack_core::state::{NewCard, Placement, apply_to_record};
use tack_core::{CardRecord, Closable, Error, Postponable, Transition, VirtualColumn};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::collaborators::Collaborators;
use crate::error::{ServiceError, ServiceResult};
use crate::store::CardStore;

const MAX_ATTEMPTS: usize = 2;

/// Input for [`CardWriter::create_card`].
#[derive(Debug, Clone, Default)]
pub struct CreateCardRequest {
    /// Board the card is created on.
    pub board: BoardId,
    /// Title; blank becomes `Untitled`.
    pub title: String,
    /// Description body.
    pub description: RichText,
    /// Column or virtual column name; `None` leaves the card awaiting triage.
    pub column: Option<String>,
    /// Tag titles, created on demand.
    pub tags: Vec<String>,
}

/// Result of a card write.
#[derive(Debug, Clone)]
pub struct WriteResult {
    /// Card as committed (unchanged for no-ops).
    pub record: CardRecord,
    /// Events emitted by the write; empty for no-ops and for silent changes
    /// such as tag toggles.
    pub events: Vec<Event>,
    /// Whether a changeset was committed.
    pub changed: bool,
}

impl WriteResult {
    /// Returns true when nothing was written.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        !self.changed
    }
}

/// Result of [`CardWriter::update_card`].
#[derive(Debug, Clone)]
pub struct UpdateResult {
    /// Card as committed.
    pub record: CardRecord,
    /// Events emitted by the write.
    pub events: Vec<Event>,
    /// Whether the description content changed, in which case extraction should run.
    pub description_changed: bool,
}

/// Result of [`CardWriter::add_comment`].
#[derive(Debug, Clone)]
pub struct CommentResult {
    /// Stored comment.
    pub comment: Comment,
    /// Card after its activity was bumped.
    pub record: CardRecord,
    /// Events emitted by the write.
    pub events: Vec<Event>,
}

struct Committed {
    before: CardRecord,
    after: CardRecord,
    events: Vec<Event>,
    changed: bool,
}

/// Application service that mutates cards.
#[derive(Debug, Clone)]
pub struct CardWriter<S> {
    store: S,
    collab: Collaborators,
}

impl<S> CardWriter<S> {
    /// Construct a new writer.
    pub const fn new(store: S, collab: Collaborators) -> Self {
        Self { store, collab }
    }

    /// Expose a reference to the underlying store (read-only operations).
    pub const fn store(&self) -> &S {
        &self.store
    }
}

impl<S> CardWriter<S>
where
    S: CardStore,
{
    fn store_error(err: S::Error) -> ServiceError {
        ServiceError::store(err)
    }

    /// Load a card the actor can read.
    ///
    /// # Errors
    /// Returns `NotFound` when the card does not exist in the tenant or sits on
    /// a board the actor cannot read.
    pub fn load(&self, actor: &Actor, card: CardId) -> ServiceResult<CardRecord> {
        let record = self
            .store
            .card(actor.account, card)
            .map_err(Self::store_error)?
            .ok_or_else(|| Error::not_found("card", card))?;
        if !self.collab.access.can_read_board(actor, record.card.board)? {
            return Err(Error::not_found("card", card).into());
        }
        Ok(record)
    }

    /// Close the card.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown cards and `Conflict` when the markers are
    /// inconsistent or the write keeps losing to concurrent updates.
    pub fn close(&self, actor: &Actor, card: CardId) -> ServiceResult<WriteResult> {
        self.transition(actor, card, "close", |record, at| Ok(record.close(actor, at)?))
            .map(Committed::into_write)
    }

    /// Reopen the card; it reverts to its column or to triage.
    ///
    /// # Errors
    /// See [`CardWriter::close`].
    pub fn reopen(&self, actor: &Actor, card: CardId) -> ServiceResult<WriteResult> {
        self.transition(actor, card, "reopen", |record, at| Ok(record.reopen(actor, at)?))
            .map(Committed::into_write)
    }

    /// Postpone the card ("not now").
    ///
    /// # Errors
    /// Returns `InvalidTransition` for closed cards; otherwise see [`CardWriter::close`].
    pub fn postpone(&self, actor: &Actor, card: CardId) -> ServiceResult<WriteResult> {
        self.transition(actor, card, "postpone", |record, at| Ok(record.postpone(actor, at)?))
            .map(Committed::into_write)
    }

    /// Resume a postponed card.
    ///
    /// # Errors
    /// See [`CardWriter::close`].
    pub fn resume(&self, actor: &Actor, card: CardId) -> ServiceResult<WriteResult> {
        self.transition(actor, card, "resume", |record, at| Ok(record.resume(actor, at)?))
            .map(Committed::into_write)
    }

    /// Clear the card's column so it awaits triage.
    ///
    /// # Errors
    /// See [`CardWriter::close`].
    pub fn send_back_to_triage(&self, actor: &Actor, card: CardId) -> ServiceResult<WriteResult> {
        self.transition(actor, card, "send_back_to_triage", |record, at| {
            Ok(record.send_back_to_triage(actor, at)?)
        })
        .map(Committed::into_write)
    }

    /// Place the card into a real column of its board, clearing any overlay.
    ///
    /// # Errors
    /// Returns `NotFound` when the column does not exist or belongs to another board.
    pub fn triage_into(&self, actor: &Actor, card: CardId, column: ColumnId) -> ServiceResult<WriteResult> {
        let column = self
            .store
            .column(column)
            .map_err(Self::store_error)?
            .ok_or_else(|| Error::not_found("column", column))?;
        self.triage_into_column(actor, card, &column)
    }

    /// Move the card to a column or virtual column by name.
    ///
    /// `NOT NOW` postpones, `DONE` closes and `MAYBE?` sends the card back to
    /// triage; any other name is looked up case-insensitively on the card's board.
    ///
    /// # Errors
    /// Returns `Validation` for a blank name and `NotFound` when no column matches.
    pub fn move_to(&self, actor: &Actor, card: CardId, name: &str) -> ServiceResult<WriteResult> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("column", "column name must not be blank").into());
        }
        match VirtualColumn::parse(name) {
            Some(VirtualColumn::Done) => self.close(actor, card),
            Some(VirtualColumn::NotNow) => self.postpone(actor, card),
            Some(VirtualColumn::Maybe) => self.send_back_to_triage(actor, card),
            None => {
                let record = self.load(actor, card)?;
                let column = self.column_named(record.card.board, name)?;
                self.triage_into_column(actor, card, &column)
            }
        }
    }

    /// Toggle `user` in the card's assignees.
    ///
    /// # Errors
    /// Returns `NotFound` when the user is not a member of the tenant.
    pub fn toggle_assignment(&self, actor: &Actor, card: CardId, user: UserId) -> ServiceResult<WriteResult> {
        let users = self.store.users(actor.account).map_err(Self::store_error)?;
        if !users.iter().any(|candidate| candidate.id == user) {
            return Err(Error::not_found("user", user).into());
        }
        self.transition(actor, card, "toggle_assignment", |record, at| {
            Ok(record.toggle_assignment(user, actor, at)?)
        })
        .map(Committed::into_write)
    }

    /// Toggle a tag on the card, creating the tenant tag when it does not exist yet.
    ///
    /// # Errors
    /// Returns `Validation` when the title is blank after normalization.
    pub fn toggle_tag(&self, actor: &Actor, card: CardId, title: &str) -> ServiceResult<WriteResult> {
        let title = Tag::normalize_title(title);
        if title.is_empty() {
            return Err(Error::validation("tag", "tag title must not be blank").into());
        }
        self.transition(actor, card, "toggle_tag", |record, at| {
            let existing = self
                .store
                .tags(actor.account)
                .map_err(Self::store_error)?
                .into_iter()
                .find(|tag| tag.title == title);
            let (tag, create) = existing.map_or_else(
                || {
                    (
                        Tag {
                            id: TagId::new(),
                            account: actor.account,
                            title: title.clone(),
                        },
                        true,
                    )
                },
                |tag| (tag, false),
            );
            Ok(record.toggle_tag(&tag, create, at)?)
        })
        .map(Committed::into_write)
    }

    /// Set or clear the card's workflow stage.
    ///
    /// # Errors
    /// See [`CardWriter::close`].
    pub fn change_stage(&self, actor: &Actor, card: CardId, stage: Option<StageId>) -> ServiceResult<WriteResult> {
        self.transition(actor, card, "change_stage", |record, at| {
            Ok(record.change_stage(stage, actor, at)?)
        })
        .map(Committed::into_write)
    }

    /// Overwrite title and/or description.
    ///
    /// # Errors
    /// See [`CardWriter::close`].
    pub fn update_card(
        &self,
        actor: &Actor,
        card: CardId,
        title: Option<&str>,
        description: Option<RichText>,
    ) -> ServiceResult<UpdateResult> {
        let committed = self.transition(actor, card, "update", |record, at| {
            Ok(record.update(title, description.clone(), actor, at)?)
        })?;
        let description_changed = committed.before.card.description.digest()
            != committed.after.card.description.digest();
        Ok(UpdateResult {
            record: committed.after,
            events: committed.events,
            description_changed,
        })
    }

    /// Store a comment on the card and bump its activity.
    ///
    /// # Errors
    /// Returns `Validation` for a blank body; otherwise see [`CardWriter::close`].
    pub fn add_comment(&self, actor: &Actor, card: CardId, body: RichText) -> ServiceResult<CommentResult> {
        if body.is_blank() {
            return Err(Error::validation("body", "comment body must not be blank").into());
        }
        let id = CommentId::new();
        let build = |record: &CardRecord, at: OffsetDateTime| Comment {
            id,
            account: actor.account,
            card: record.card.id,
            board: record.card.board,
            creator: actor.user,
            body: body.clone(),
            created_at: at,
        };
        let committed = self.transition(actor, card, "comment", |record, at| {
            Ok(record.add_comment(build(record, at), actor, at)?)
        })?;
        let comment = build(&committed.after, committed.after.card.last_active_at);
        Ok(CommentResult {
            comment,
            record: committed.after,
            events: committed.events,
        })
    }

    /// Create a published card, optionally placed and tagged.
    ///
    /// # Errors
    /// Returns `NotFound` when the board is missing or not readable by the
    /// actor, or when the column name matches nothing on the board.
    pub fn create_card(&self, actor: &Actor, request: CreateCardRequest) -> ServiceResult<WriteResult> {
        let CreateCardRequest {
            board,
            title,
            description,
            column,
            tags,
        } = request;

        let boards = self.store.boards(actor.account).map_err(Self::store_error)?;
        if !boards.iter().any(|candidate| candidate.id == board)
            || !self.collab.access.can_read_board(actor, board)?
        {
            return Err(Error::not_found("board", board).into());
        }

        let column_name = column.as_deref().map(str::trim).filter(|name| !name.is_empty());
        let virtual_column = column_name.and_then(VirtualColumn::parse);
        let real_column = match (column_name, virtual_column) {
            (Some(name), None) => Some(self.column_named(board, name)?),
            _ => None,
        };
        let placement = match (&real_column, virtual_column) {
            (Some(column), _) => Placement::Column(column),
            (None, Some(virtual_column)) => Placement::Virtual(virtual_column),
            (None, None) => Placement::Triage,
        };

        let titles: BTreeSet<String> = tags
            .iter()
            .map(|raw| Tag::normalize_title(raw))
            .filter(|title| !title.is_empty())
            .collect();

        let mut rejection = None;
        let mut last_card = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let at = self.collab.clock.now();
            let existing = self.store.tags(actor.account).map_err(Self::store_error)?;
            let mut card_tags = Vec::new();
            let mut created_tags = Vec::new();
            for title in &titles {
                match existing.iter().find(|tag| &tag.title == title) {
                    Some(tag) => card_tags.push(tag.clone()),
                    None => {
                        let tag = Tag {
                            id: TagId::new(),
                            account: actor.account,
                            title: title.clone(),
                        };
                        created_tags.push(tag.clone());
                        card_tags.push(tag);
                    }
                }
            }

            let number = self.store.next_card_number(actor.account).map_err(Self::store_error)?;
            let (record, mut changeset) = CardRecord::publish(
                actor,
                NewCard {
                    number,
                    board,
                    title: title.clone(),
                    description: description.clone(),
                    tags: card_tags,
                },
                placement,
                at,
            )?;
            for tag in created_tags {
                changeset.mutations.insert(0, Mutation::InsertTag(tag));
            }

            match self.store.commit(&changeset).map_err(Self::store_error)? {
                CommitOutcome::Applied => {
                    info!(
                        card = %record.card.id,
                        number = %record.card.number,
                        board = %board,
                        "Card created"
                    );
                    self.publish(&changeset.events);
                    return Ok(WriteResult {
                        record,
                        events: changeset.events,
                        changed: true,
                    });
                }
                CommitOutcome::Rejected(reason) => {
                    warn!(attempt, %reason, "Card creation rejected");
                    last_card = Some(record.card.id);
                    rejection = Some(reason);
                }
            }
        }
        Err(Self::conflict(last_card.unwrap_or_default(), "create", rejection))
    }

    fn triage_into_column(&self, actor: &Actor, card: CardId, column: &Column) -> ServiceResult<WriteResult> {
        self.transition(actor, card, "triage", |record, at| {
            Ok(record.triage_into(column, actor, at)?)
        })
        .map(Committed::into_write)
    }

    fn column_named(&self, board: BoardId, name: &str) -> ServiceResult<Column> {
        self.store
            .columns(&[board])
            .map_err(Self::store_error)?
            .into_iter()
            .find(|column| column.is_named(name))
            .ok_or_else(|| Error::not_found("column", name).into())
    }

    fn transition<F>(&self, actor: &Actor, card: CardId, action: &'static str, plan: F) -> ServiceResult<Committed>
    where
        F: Fn(&CardRecord, OffsetDateTime) -> ServiceResult<Transition>,
    {
        let mut rejection = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let before = self.load(actor, card)?;
            let at = self.collab.clock.now();
            let changeset = match plan(&before, at)? {
                Transition::Noop => {
                    debug!(%card, action, "Transition is a no-op");
                    return Ok(Committed {
                        after: before.clone(),
                        before,
                        events: Vec::new(),
                        changed: false,
                    });
                }
                Transition::Apply(changeset) => changeset,
            };

            match self.store.commit(&changeset).map_err(Self::store_error)? {
                CommitOutcome::Applied => {
                    let mut after = before.clone();
                    apply_to_record(&mut after, &changeset);
                    info!(%card, action, position = ?after.position(), "Card updated");
                    self.publish(&changeset.events);
                    return Ok(Committed {
                        before,
                        after,
                        events: changeset.events,
                        changed: true,
                    });
                }
                CommitOutcome::Rejected(reason) => {
                    warn!(%card, action, attempt, %reason, "Card write rejected, replanning");
                    rejection = Some(reason);
                }
            }
        }
        Err(Self::conflict(card, action, rejection))
    }

    fn conflict(card: CardId, action: &str, rejection: Option<Rejection>) -> ServiceError {
        let reason = rejection.map_or_else(|| "unknown rejection".to_owned(), |reason| reason.to_string());
        Error::Conflict {
            card,
            reason: format!("{action} lost to concurrent updates: {reason}"),
        }
        .into()
    }

    fn publish(&self, events: &[Event]) {
        for event in events {
            self.collab.events.publish(event);
        }
    }
}

impl Committed {
    fn into_write(self) -> WriteResult {
        WriteResult {
            record: self.after,
            events: self.events,
            changed: self.changed,
        }
    }
}
