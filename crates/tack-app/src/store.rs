//! Storage abstraction consumed by the application services.

use std::sync::Arc;

use anyhow::Error;
use tack_core::changeset::{Changeset, CommitOutcome};
use tack_core::filter::Filter;
use tack_core::id::{AccountId, BoardId, CardId, CardNumber, ColumnId, CommentId, UserId};
use tack_core::model::{Board, CardLink, Column, Comment, ContentRef, Mention, Tag, User};
use tack_core::state::CardRecord;
use tack_store::MemoryStore;

/// Tenant-scoped reads plus atomic changeset commits.
pub trait CardStore {
    /// Error type bubbled up from the backing store.
    type Error: Into<Error>;

    /// Load a card with its markers.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn card(&self, account: AccountId, id: CardId) -> Result<Option<CardRecord>, Self::Error>;

    /// Load a card by display number.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn card_by_number(&self, account: AccountId, number: CardNumber) -> Result<Option<CardRecord>, Self::Error>;

    /// Load every card of the tenant.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn cards(&self, account: AccountId) -> Result<Vec<CardRecord>, Self::Error>;

    /// Number the next created card should get.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn next_card_number(&self, account: AccountId) -> Result<CardNumber, Self::Error>;

    /// Load a comment.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn comment(&self, account: AccountId, id: CommentId) -> Result<Option<Comment>, Self::Error>;

    /// Comments of a card, oldest first.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn comments(&self, account: AccountId, card: CardId) -> Result<Vec<Comment>, Self::Error>;

    /// Boards of the tenant.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn boards(&self, account: AccountId) -> Result<Vec<Board>, Self::Error>;

    /// Columns of the given boards.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn columns(&self, boards: &[BoardId]) -> Result<Vec<Column>, Self::Error>;

    /// Load a column.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn column(&self, id: ColumnId) -> Result<Option<Column>, Self::Error>;

    /// Users of the tenant.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn users(&self, account: AccountId) -> Result<Vec<User>, Self::Error>;

    /// Tags of the tenant.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn tags(&self, account: AccountId) -> Result<Vec<Tag>, Self::Error>;

    /// Mentions recorded for a source.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn mentions(&self, account: AccountId, source: ContentRef) -> Result<Vec<Mention>, Self::Error>;

    /// Card links recorded for a source.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn card_links(&self, account: AccountId, source: ContentRef) -> Result<Vec<CardLink>, Self::Error>;

    /// Digest of the content last scanned for a source.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn scan_digest(&self, source: ContentRef) -> Result<Option<String>, Self::Error>;

    /// Saved filter of `owner` with the given fingerprint.
    ///
    /// # Errors
    /// Returns a store-specific error when the read fails.
    fn filter_by_digest(&self, account: AccountId, owner: UserId, digest: &str) -> Result<Option<Filter>, Self::Error>;

    /// Commit a changeset atomically.
    ///
    /// # Errors
    /// Returns a store-specific error when persisting fails. Constraint
    /// violations are reported as [`CommitOutcome::Rejected`] instead.
    fn commit(&self, changeset: &Changeset) -> Result<CommitOutcome, Self::Error>;
}

impl CardStore for MemoryStore {
    type Error = Error;

    fn card(&self, account: AccountId, id: CardId) -> Result<Option<CardRecord>, Self::Error> {
        Self::card(self, account, id)
    }

    fn card_by_number(&self, account: AccountId, number: CardNumber) -> Result<Option<CardRecord>, Self::Error> {
        Self::card_by_number(self, account, number)
    }

    fn cards(&self, account: AccountId) -> Result<Vec<CardRecord>, Self::Error> {
        Self::cards(self, account)
    }

    fn next_card_number(&self, account: AccountId) -> Result<CardNumber, Self::Error> {
        Self::next_card_number(self, account)
    }

    fn comment(&self, account: AccountId, id: CommentId) -> Result<Option<Comment>, Self::Error> {
        Self::comment(self, account, id)
    }

    fn comments(&self, account: AccountId, card: CardId) -> Result<Vec<Comment>, Self::Error> {
        Self::comments(self, account, card)
    }

    fn boards(&self, account: AccountId) -> Result<Vec<Board>, Self::Error> {
        Self::boards(self, account)
    }

    fn columns(&self, boards: &[BoardId]) -> Result<Vec<Column>, Self::Error> {
        Self::columns(self, boards)
    }

    fn column(&self, id: ColumnId) -> Result<Option<Column>, Self::Error> {
        Self::column(self, id)
    }

    fn users(&self, account: AccountId) -> Result<Vec<User>, Self::Error> {
        Self::users(self, account)
    }

    fn tags(&self, account: AccountId) -> Result<Vec<Tag>, Self::Error> {
        Self::tags(self, account)
    }

    fn mentions(&self, account: AccountId, source: ContentRef) -> Result<Vec<Mention>, Self::Error> {
        Self::mentions(self, account, source)
    }

    fn card_links(&self, account: AccountId, source: ContentRef) -> Result<Vec<CardLink>, Self::Error> {
        Self::card_links(self, account, source)
    }

    fn scan_digest(&self, source: ContentRef) -> Result<Option<String>, Self::Error> {
        Self::scan_digest(self, source)
    }

    fn filter_by_digest(&self, account: AccountId, owner: UserId, digest: &str) -> Result<Option<Filter>, Self::Error> {
        Self::filter_by_digest(self, account, owner, digest)
    }

    fn commit(&self, changeset: &Changeset) -> Result<CommitOutcome, Self::Error> {
        Self::commit(self, changeset)
    }
}

impl<S> CardStore for &S
where
    S: CardStore + ?Sized,
{
    type Error = S::Error;

    fn card(&self, account: AccountId, id: CardId) -> Result<Option<CardRecord>, Self::Error> {
        (*self).card(account, id)
    }

    fn card_by_number(&self, account: AccountId, number: CardNumber) -> Result<Option<CardRecord>, Self::Error> {
        (*self).card_by_number(account, number)
    }

    fn cards(&self, account: AccountId) -> Result<Vec<CardRecord>, Self::Error> {
        (*self).cards(account)
    }

    fn next_card_number(&self, account: AccountId) -> Result<CardNumber, Self::Error> {
        (*self).next_card_number(account)
    }

    fn comment(&self, account: AccountId, id: CommentId) -> Result<Option<Comment>, Self::Error> {
        (*self).comment(account, id)
    }

    fn comments(&self, account: AccountId, card: CardId) -> Result<Vec<Comment>, Self::Error> {
        (*self).comments(account, card)
    }

    fn boards(&self, account: AccountId) -> Result<Vec<Board>, Self::Error> {
        (*self).boards(account)
    }

    fn columns(&self, boards: &[BoardId]) -> Result<Vec<Column>, Self::Error> {
        (*self).columns(boards)
    }

    fn column(&self, id: ColumnId) -> Result<Option<Column>, Self::Error> {
        (*self).column(id)
    }

    fn users(&self, account: AccountId) -> Result<Vec<User>, Self::Error> {
        (*self).users(account)
    }

    fn tags(&self, account: AccountId) -> Result<Vec<Tag>, Self::Error> {
        (*self).tags(account)
    }

    fn mentions(&self, account: AccountId, source: ContentRef) -> Result<Vec<Mention>, Self::Error> {
        (*self).mentions(account, source)
    }

    fn card_links(&self, account: AccountId, source: ContentRef) -> Result<Vec<CardLink>, Self::Error> {
        (*self).card_links(account, source)
    }

    fn scan_digest(&self, source: ContentRef) -> Result<Option<String>, Self::Error> {
        (*self).scan_digest(source)
    }

    fn filter_by_digest(&self, account: AccountId, owner: UserId, digest: &str) -> Result<Option<Filter>, Self::Error> {
        (*self).filter_by_digest(account, owner, digest)
    }

    fn commit(&self, changeset: &Changeset) -> Result<CommitOutcome, Self::Error> {
        (*self).commit(changeset)
    }
}

impl<S> CardStore for Arc<S>
where
    S: CardStore + ?Sized,
{
    type Error = S::Error;

    fn card(&self, account: AccountId, id: CardId) -> Result<Option<CardRecord>, Self::Error> {
        (**self).card(account, id)
    }

    fn card_by_number(&self, account: AccountId, number: CardNumber) -> Result<Option<CardRecord>, Self::Error> {
        (**self).card_by_number(account, number)
    }

    fn cards(&self, account: AccountId) -> Result<Vec<CardRecord>, Self::Error> {
        (**self).cards(account)
    }

    fn next_card_number(&self, account: AccountId) -> Result<CardNumber, Self::Error> {
        (**self).next_card_number(account)
    }

    fn comment(&self, account: AccountId, id: CommentId) -> Result<Option<Comment>, Self::Error> {
        (**self).comment(account, id)
    }

    fn comments(&self, account: AccountId, card: CardId) -> Result<Vec<Comment>, Self::Error> {
        (**self).comments(account, card)
    }

    fn boards(&self, account: AccountId) -> Result<Vec<Board>, Self::Error> {
        (**self).boards(account)
    }

    fn columns(&self, boards: &[BoardId]) -> Result<Vec<Column>, Self::Error> {
        (**self).columns(boards)
    }

    fn column(&self, id: ColumnId) -> Result<Option<Column>, Self::Error> {
        (**self).column(id)
    }

    fn users(&self, account: AccountId) -> Result<Vec<User>, Self::Error> {
        (**self).users(account)
    }

    fn tags(&self, account: AccountId) -> Result<Vec<Tag>, Self::Error> {
        (**self).tags(account)
    }

    fn mentions(&self, account: AccountId, source: ContentRef) -> Result<Vec<Mention>, Self::Error> {
        (**self).mentions(account, source)
    }

    fn card_links(&self, account: AccountId, source: ContentRef) -> Result<Vec<CardLink>, Self::Error> {
        (**self).card_links(account, source)
    }

    fn scan_digest(&self, source: ContentRef) -> Result<Option<String>, Self::Error> {
        (**self).scan_digest(source)
    }

    fn filter_by_digest(&self, account: AccountId, owner: UserId, digest: &str) -> Result<Option<Filter>, Self::Error> {
        (**self).filter_by_digest(account, owner, digest)
    }

    fn commit(&self, changeset: &Changeset) -> Result<CommitOutcome, Self::Error> {
        (**self).commit(changeset)
    }
}
