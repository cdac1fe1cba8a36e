//! In-memory reference store for tack with optional JSON snapshot persistence.
//!
//! Commits are serialized behind one mutex. Guards and constraints are checked
//! against a staged copy of the tables, which replaces the live tables only when
//! every mutation applied cleanly.

/// Error types.
pub mod error;
/// Row storage.
pub mod tables;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use tack_core::changeset::{Changeset, CommitOutcome, Rejection};
use tack_core::event::Event;
use tack_core::filter::Filter;
use tack_core::id::{AccountId, BoardId, CardId, CardNumber, ColumnId, CommentId, UserId};
use tack_core::model::{Board, CardLink, Column, Comment, ContentRef, Mention, Tag, User};
use tack_core::state::CardRecord;
use tack_core::Mutation;
use tracing::{debug, info, warn};

pub use crate::error::StoreError;
pub use crate::tables::Tables;

/// Store holding all tenants' rows in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Empty store that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path` (an empty store when the file does not exist yet).
    /// Every successful commit rewrites the snapshot.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not hold valid tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| StoreError::Snapshot {
                path: path.clone(),
                source,
            })?
        } else {
            debug!(path = %path.display(), "Snapshot missing; starting empty");
            Tables::default()
        };
        Ok(Self {
            tables: Mutex::new(tables),
            path: Some(path),
        })
    }

    /// Snapshot file, when the store is persistent.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write rows directly, bypassing changeset checks. Meant for fixtures and setup.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned or the snapshot cannot be written.
    pub fn seed<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Tables),
    {
        let mut tables = self.lock()?;
        f(&mut tables);
        self.persist(&tables)
    }

    /// Copy of every row.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn snapshot(&self) -> Result<Tables> {
        Ok(self.lock()?.clone())
    }

    /// Commit a changeset atomically.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned or the snapshot cannot be written.
    /// Constraint violations are reported as [`CommitOutcome::Rejected`].
    pub fn commit(&self, changeset: &Changeset) -> Result<CommitOutcome> {
        let mut tables = self.lock()?;

        for guard in &changeset.guards {
            let actual = tables.cards.get(&guard.card).map(|card| card.lock_version);
            if actual != Some(guard.expected) {
                let rejection = Rejection::StaleCard {
                    card: guard.card,
                    expected: guard.expected,
                    actual,
                };
                debug!(%rejection, "Rejected changeset");
                return Ok(CommitOutcome::Rejected(rejection));
            }
        }

        let mut staged = tables.clone();
        let mut touched = BTreeSet::new();
        for mutation in &changeset.mutations {
            if let Err(rejection) = staged.apply(mutation) {
                debug!(%rejection, "Rejected changeset");
                return Ok(CommitOutcome::Rejected(rejection));
            }
            if let Some(card) = touched_card(mutation) {
                touched.insert(card);
            }
        }
        if let Some(card) = touched
            .into_iter()
            .find(|card| staged.closures.contains_key(card) && staged.postponements.contains_key(card))
        {
            let rejection = Rejection::Integrity { card };
            warn!(%rejection, "Rejected changeset");
            return Ok(CommitOutcome::Rejected(rejection));
        }

        staged.events.extend(changeset.events.iter().cloned());
        self.persist(&staged)?;
        *tables = staged;
        drop(tables);

        info!(
            mutations = changeset.mutations.len(),
            events = changeset.events.len(),
            "Committed changeset"
        );
        Ok(CommitOutcome::Applied)
    }

    /// Card with its markers.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn card(&self, account: AccountId, id: CardId) -> Result<Option<CardRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .cards
            .get(&id)
            .filter(|card| card.account == account)
            .map(|card| tables.record(card)))
    }

    /// Card by display number.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn card_by_number(&self, account: AccountId, number: CardNumber) -> Result<Option<CardRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .cards
            .values()
            .find(|card| card.account == account && card.number == number)
            .map(|card| tables.record(card)))
    }

    /// Every card of the tenant with its markers.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn cards(&self, account: AccountId) -> Result<Vec<CardRecord>> {
        let tables = self.lock()?;
        Ok(tables
            .cards
            .values()
            .filter(|card| card.account == account)
            .map(|card| tables.record(card))
            .collect())
    }

    /// Number the next created card gets.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn next_card_number(&self, account: AccountId) -> Result<CardNumber> {
        let tables = self.lock()?;
        Ok(tables
            .cards
            .values()
            .filter(|card| card.account == account)
            .map(|card| card.number)
            .max()
            .unwrap_or_default()
            .next())
    }

    /// Comment by id.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn comment(&self, account: AccountId, id: CommentId) -> Result<Option<Comment>> {
        Ok(self
            .lock()?
            .comments
            .get(&id)
            .filter(|comment| comment.account == account)
            .cloned())
    }

    /// Comments on a card, oldest first.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn comments(&self, account: AccountId, card: CardId) -> Result<Vec<Comment>> {
        let mut comments: Vec<Comment> = self
            .lock()?
            .comments
            .values()
            .filter(|comment| comment.account == account && comment.card == card)
            .cloned()
            .collect();
        comments.sort_by_key(|comment| (comment.created_at, comment.id));
        Ok(comments)
    }

    /// Boards of the tenant.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn boards(&self, account: AccountId) -> Result<Vec<Board>> {
        Ok(self
            .lock()?
            .boards
            .values()
            .filter(|board| board.account == account)
            .cloned()
            .collect())
    }

    /// Columns of the given boards, ordered by board then position.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn columns(&self, boards: &[BoardId]) -> Result<Vec<Column>> {
        let mut columns: Vec<Column> = self
            .lock()?
            .columns
            .values()
            .filter(|column| boards.contains(&column.board))
            .cloned()
            .collect();
        columns.sort_by_key(|column| (column.board, column.position, column.id));
        Ok(columns)
    }

    /// Column by id.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn column(&self, id: ColumnId) -> Result<Option<Column>> {
        Ok(self.lock()?.columns.get(&id).cloned())
    }

    /// Users of the tenant.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn users(&self, account: AccountId) -> Result<Vec<User>> {
        Ok(self
            .lock()?
            .users
            .values()
            .filter(|user| user.account == account)
            .cloned()
            .collect())
    }

    /// Tags of the tenant.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn tags(&self, account: AccountId) -> Result<Vec<Tag>> {
        Ok(self
            .lock()?
            .tags
            .values()
            .filter(|tag| tag.account == account)
            .cloned()
            .collect())
    }

    /// Mentions recorded for a source.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn mentions(&self, account: AccountId, source: ContentRef) -> Result<Vec<Mention>> {
        Ok(self
            .lock()?
            .mentions
            .iter()
            .filter(|mention| mention.account == account && mention.source == source)
            .cloned()
            .collect())
    }

    /// Card links recorded for a source.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn card_links(&self, account: AccountId, source: ContentRef) -> Result<Vec<CardLink>> {
        Ok(self
            .lock()?
            .card_links
            .iter()
            .filter(|link| link.account == account && link.source == source)
            .cloned()
            .collect())
    }

    /// Digest stored by the last scan of a source.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn scan_digest(&self, source: ContentRef) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .scan_marks
            .iter()
            .find(|mark| mark.source == source)
            .map(|mark| mark.digest.clone()))
    }

    /// Saved filter of `owner` with the given fingerprint.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn filter_by_digest(&self, account: AccountId, owner: UserId, digest: &str) -> Result<Option<Filter>> {
        Ok(self
            .lock()?
            .filters
            .values()
            .find(|filter| filter.account == account && filter.owner == owner && filter.params_digest == digest)
            .cloned())
    }

    /// Audit log of the tenant in commit order.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn events(&self, account: AccountId) -> Result<Vec<Event>> {
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|event| event.account == account)
            .cloned()
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::LockPoisoned.into())
    }

    fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_string_pretty(tables).context("Failed to serialize tables")?;
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, body).map_err(|source| StoreError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "Wrote snapshot");
        Ok(())
    }
}

const fn touched_card(mutation: &Mutation) -> Option<CardId> {
    match mutation {
        Mutation::InsertCard(card) | Mutation::PutCard(card) => Some(card.id),
        Mutation::InsertClosure(closure) => Some(closure.card),
        Mutation::InsertPostponement(postponement) => Some(postponement.card),
        Mutation::DeleteClosure { card } | Mutation::DeletePostponement { card } => Some(*card),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tack_core::event::Actor;
    use tack_core::model::RichText;
    use tack_core::state::{Closable, NewCard, Placement, Postponement, Transition};
    use time::OffsetDateTime;

    fn publish(store: &MemoryStore, actor: &Actor, number: u64) -> Result<CardRecord> {
        let (record, changeset) = CardRecord::publish(
            actor,
            NewCard {
                number: CardNumber(number),
                board: BoardId::new(),
                title: format!("Card {number}"),
                description: RichText::default(),
                tags: Vec::new(),
            },
            Placement::Triage,
            OffsetDateTime::UNIX_EPOCH,
        )?;
        assert_eq!(store.commit(&changeset)?, CommitOutcome::Applied);
        Ok(record)
    }

    fn planned(transition: tack_core::Result<Transition>) -> Result<Changeset> {
        match transition? {
            Transition::Apply(changeset) => Ok(changeset),
            Transition::Noop => anyhow::bail!("expected a change"),
        }
    }

    #[test]
    fn commit_applies_mutations_and_events() -> Result<()> {
        let store = MemoryStore::in_memory();
        let actor = Actor::new(AccountId::new(), UserId::new());
        let record = publish(&store, &actor, 1)?;

        let loaded = store
            .card(actor.account, record.card.id)?
            .context("card must exist")?;
        assert_eq!(loaded, record);
        assert_eq!(store.events(actor.account)?.len(), 1);
        assert_eq!(store.next_card_number(actor.account)?, CardNumber(2));
        assert!(store.card(AccountId::new(), record.card.id)?.is_none());
        Ok(())
    }

    #[test]
    fn stale_guard_rejects_everything() -> Result<()> {
        let store = MemoryStore::in_memory();
        let actor = Actor::new(AccountId::new(), UserId::new());
        let record = publish(&store, &actor, 1)?;
        let at = OffsetDateTime::UNIX_EPOCH;

        let first = planned(record.close(&actor, at))?;
        let second = planned(record.close(&actor, at))?;
        assert_eq!(store.commit(&first)?, CommitOutcome::Applied);

        let outcome = store.commit(&second)?;
        assert_eq!(
            outcome,
            CommitOutcome::Rejected(Rejection::StaleCard {
                card: record.card.id,
                expected: 0,
                actual: Some(1),
            })
        );
        assert_eq!(store.events(actor.account)?.len(), 2);
        Ok(())
    }

    #[test]
    fn duplicate_card_numbers_are_rejected() -> Result<()> {
        let store = MemoryStore::in_memory();
        let actor = Actor::new(AccountId::new(), UserId::new());
        publish(&store, &actor, 1)?;
        let (_, changeset) = CardRecord::publish(
            &actor,
            NewCard {
                number: CardNumber(1),
                board: BoardId::new(),
                title: String::new(),
                description: RichText::default(),
                tags: Vec::new(),
            },
            Placement::Triage,
            OffsetDateTime::UNIX_EPOCH,
        )?;
        assert!(matches!(
            store.commit(&changeset)?,
            CommitOutcome::Rejected(Rejection::Duplicate(_))
        ));
        assert_eq!(store.cards(actor.account)?.len(), 1);
        Ok(())
    }

    #[test]
    fn integrity_violations_leave_tables_untouched() -> Result<()> {
        let store = MemoryStore::in_memory();
        let actor = Actor::new(AccountId::new(), UserId::new());
        let record = publish(&store, &actor, 1)?;
        let close = planned(record.close(&actor, OffsetDateTime::UNIX_EPOCH))?;
        assert!(store.commit(&close)?.is_applied());

        let mut sneaky = Changeset::new();
        sneaky.push(Mutation::InsertPostponement(Postponement {
            card: record.card.id,
            user: actor.user,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }));
        assert_eq!(
            store.commit(&sneaky)?,
            CommitOutcome::Rejected(Rejection::Integrity { card: record.card.id })
        );
        let loaded = store
            .card(actor.account, record.card.id)?
            .context("card must exist")?;
        assert!(loaded.postponement.is_none());
        Ok(())
    }

    #[test]
    fn snapshot_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data").join("tack.json");
        let actor = Actor::new(AccountId::new(), UserId::new());
        let board = BoardId::new();

        let store = MemoryStore::open(&path)?;
        store.seed(|tables| {
            tables.boards.insert(
                board,
                Board {
                    id: board,
                    account: actor.account,
                    name: "Roadmap".into(),
                    members: BTreeSet::from([actor.user]),
                },
            );
        })?;
        let record = publish(&store, &actor, 1)?;
        drop(store);

        let reopened = MemoryStore::open(&path)?;
        assert_eq!(reopened.boards(actor.account)?.len(), 1);
        assert!(reopened.card(actor.account, record.card.id)?.is_some());
        assert_eq!(reopened.events(actor.account)?.len(), 1);
        Ok(())
    }

    #[test]
    fn malformed_snapshot_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tack.json");
        fs::write(&path, "{not json")?;
        let err = MemoryStore::open(&path)
            .err()
            .context("malformed snapshot must fail")?;
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Snapshot { .. })
        ));
        Ok(())
    }
}
