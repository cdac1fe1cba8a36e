//! Narrow interfaces to the systems around the core: access control, identity,
//! audit event delivery, watcher notifications and time.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tack_core::event::{Actor, Event};
use tack_core::id::{AccountId, BoardId, CardId, UserId};
use tack_core::model::{Mention, User};
use time::{OffsetDateTime, UtcOffset};
use tracing::info;

use crate::store::CardStore;

/// Decides which boards an actor may read.
pub trait AccessControl: Send + Sync {
    /// Boards the actor can read.
    ///
    /// # Errors
    /// Returns an error when the access data cannot be loaded.
    fn accessible_board_ids(&self, actor: &Actor) -> Result<BTreeSet<BoardId>>;

    /// Whether the actor can read `board`.
    ///
    /// # Errors
    /// Returns an error when the access data cannot be loaded.
    fn can_read_board(&self, actor: &Actor, board: BoardId) -> Result<bool> {
        Ok(self.accessible_board_ids(actor)?.contains(&board))
    }
}

/// Looks users up by identity email.
pub trait IdentityDirectory: Send + Sync {
    /// Users of `account` whose email equals `email`, case-insensitively.
    ///
    /// # Errors
    /// Returns an error when the directory cannot be queried.
    fn users_by_email(&self, account: AccountId, email: &str) -> Result<Vec<User>>;
}

/// Receives audit events after they were committed.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn publish(&self, event: &Event);
}

/// Receives watcher and mention signals after extraction committed.
pub trait WatchNotifier: Send + Sync {
    /// `user` now watches `card`.
    fn watcher_registered(&self, card: CardId, user: UserId);
    /// A mention was recorded.
    fn mentioned(&self, mention: &Mention);
}

/// Source of the current time. The returned offset is the one date windows resolve in.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock reporting in a fixed offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    /// Wall clock reporting in `offset`.
    #[must_use]
    pub const fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(UtcOffset::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Event sink that logs every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &Event) {
        info!(
            action = event.action.as_str(),
            subject = %event.subject,
            board = %event.board,
            actor = %event.actor,
            "Event recorded"
        );
    }
}

/// Notifier that logs every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl WatchNotifier for TracingNotifier {
    fn watcher_registered(&self, card: CardId, user: UserId) {
        info!(%card, %user, "Watcher registered");
    }

    fn mentioned(&self, mention: &Mention) {
        info!(
            source = %mention.source,
            mentioner = %mention.mentioner,
            mentionee = %mention.mentionee,
            "User mentioned"
        );
    }
}

/// Access control and identity lookups answered from the store: board members
/// can read a board and users are found by their stored email.
#[derive(Debug, Clone)]
pub struct StoreDirectory<S> {
    store: S,
}

impl<S> StoreDirectory<S> {
    /// Directory backed by `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S> AccessControl for StoreDirectory<S>
where
    S: CardStore + Send + Sync,
{
    fn accessible_board_ids(&self, actor: &Actor) -> Result<BTreeSet<BoardId>> {
        let boards = self.store.boards(actor.account).map_err(Into::<anyhow::Error>::into)?;
        Ok(boards
            .into_iter()
            .filter(|board| board.members.contains(&actor.user))
            .map(|board| board.id)
            .collect())
    }
}

impl<S> IdentityDirectory for StoreDirectory<S>
where
    S: CardStore + Send + Sync,
{
    fn users_by_email(&self, account: AccountId, email: &str) -> Result<Vec<User>> {
        let email = email.trim().to_lowercase();
        let users = self.store.users(account).map_err(Into::<anyhow::Error>::into)?;
        Ok(users
            .into_iter()
            .filter(|user| user.email.as_deref().is_some_and(|candidate| candidate.to_lowercase() == email))
            .collect())
    }
}

/// Bundle of collaborators handed to every service.
#[derive(Clone)]
pub struct Collaborators {
    /// Board access decisions.
    pub access: Arc<dyn AccessControl>,
    /// Identity lookups.
    pub identity: Arc<dyn IdentityDirectory>,
    /// Audit event delivery.
    pub events: Arc<dyn EventSink>,
    /// Watcher and mention signals.
    pub notifier: Arc<dyn WatchNotifier>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Collaborators answering access and identity from `store`, logging events and
    /// notifications, with a UTC wall clock.
    pub fn from_store<S>(store: S) -> Self
    where
        S: CardStore + Send + Sync + 'static,
    {
        let directory = Arc::new(StoreDirectory::new(store));
        Self {
            access: directory.clone(),
            identity: directory,
            events: Arc::new(TracingEventSink),
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock::default()),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replace the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replace the notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn WatchNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tack_core::model::Board;
    use tack_store::MemoryStore;
    use time::macros::datetime;

    #[test]
    fn store_directory_uses_board_membership_and_emails() -> Result<()> {
        let store = Arc::new(MemoryStore::in_memory());
        let account = AccountId::new();
        let member = UserId::new();
        let outsider = UserId::new();
        let board = BoardId::new();
        store.seed(|tables| {
            tables.boards.insert(
                board,
                Board {
                    id: board,
                    account,
                    name: "Roadmap".into(),
                    members: BTreeSet::from([member]),
                },
            );
            tables.users.insert(
                member,
                User {
                    id: member,
                    account,
                    name: "Kevin Mc".into(),
                    email: Some("Kevin@Example.com".into()),
                },
            );
        })?;

        let directory = StoreDirectory::new(store);
        assert!(directory.can_read_board(&Actor::new(account, member), board)?);
        assert!(!directory.can_read_board(&Actor::new(account, outsider), board)?);
        assert_eq!(directory.users_by_email(account, "kevin@example.COM")?.len(), 1);
        assert!(directory.users_by_email(AccountId::new(), "kevin@example.com")?.is_empty());
        Ok(())
    }

    #[test]
    fn clocks_report_in_their_offset() {
        let fixed = FixedClock(datetime!(2024-05-15 10:00 +02:00));
        assert_eq!(fixed.now(), datetime!(2024-05-15 8:00 UTC));

        let clock = SystemClock::new(UtcOffset::from_hms(5, 30, 0).unwrap_or(UtcOffset::UTC));
        assert_eq!(clock.now().offset(), UtcOffset::from_hms(5, 30, 0).unwrap_or(UtcOffset::UTC));
    }
}
