//! Shared fixture for the tack-app integration tests: one tenant with two
//! boards, a handful of users and recording collaborators.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tack_app::{
    CardQuery, CardWriter, Collaborators, CreateCardRequest, EventSink, FilterRepository, FixedClock,
    RelationshipExtractor, WatchNotifier,
};
use tack_core::event::{Actor, Event};
use tack_core::id::{AccountId, BoardId, CardId, ColumnId, UserId};
use tack_core::model::{Board, Column, Mention, RichText, User};
use tack_core::scan::ScanLimits;
use tack_core::CardRecord;
use tack_store::MemoryStore;
use time::macros::datetime;

/// Event sink keeping every published event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<Event>>,
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &Event) {
        self.events.lock().expect("sink lock").push(event.clone());
    }
}

/// Notifier keeping every signal.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub watchers: Mutex<Vec<(CardId, UserId)>>,
    pub mentions: Mutex<Vec<Mention>>,
}

impl WatchNotifier for RecordingNotifier {
    fn watcher_registered(&self, card: CardId, user: UserId) {
        self.watchers.lock().expect("notifier lock").push((card, user));
    }

    fn mentioned(&self, mention: &Mention) {
        self.mentions.lock().expect("notifier lock").push(mention.clone());
    }
}

pub struct World {
    pub store: Arc<MemoryStore>,
    pub collab: Collaborators,
    pub sink: Arc<RecordingSink>,
    pub notifier: Arc<RecordingNotifier>,
    pub account: AccountId,
    pub alice: User,
    pub kevin: User,
    pub kevina: User,
    pub outsider: User,
    pub board: BoardId,
    pub other_board: BoardId,
    pub backlog: ColumnId,
    pub doing: ColumnId,
    pub other_doing: ColumnId,
}

fn user(account: AccountId, name: &str, email: &str) -> User {
    User {
        id: UserId::new(),
        account,
        name: name.to_owned(),
        email: Some(email.to_owned()),
    }
}

fn column(board: BoardId, name: &str, position: u32) -> Column {
    Column {
        id: ColumnId::new(),
        board,
        name: name.to_owned(),
        color: None,
        position,
    }
}

impl World {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::in_memory());
        let account = AccountId::new();
        let alice = user(account, "Alice Doe", "alice@example.com");
        let kevin = user(account, "Kevin Mc", "kmc@example.com");
        let kevina = user(account, "Kevina Smith", "ksmith@example.com");
        let outsider = user(account, "Kevin Outsider", "kout@example.com");
        let board = BoardId::new();
        let other_board = BoardId::new();
        let backlog = column(board, "Backlog", 0);
        let doing = column(board, "Doing", 1);
        let other_doing = column(other_board, "doing", 0);

        let ids = (backlog.id, doing.id, other_doing.id);
        store
            .seed(|tables| {
                for user in [&alice, &kevin, &kevina, &outsider] {
                    tables.users.insert(user.id, user.clone());
                }
                tables.boards.insert(
                    board,
                    Board {
                        id: board,
                        account,
                        name: "Product".into(),
                        members: BTreeSet::from([alice.id, kevin.id, kevina.id]),
                    },
                );
                tables.boards.insert(
                    other_board,
                    Board {
                        id: other_board,
                        account,
                        name: "Ops".into(),
                        members: BTreeSet::from([alice.id, outsider.id]),
                    },
                );
                for column in [backlog, doing, other_doing] {
                    tables.columns.insert(column.id, column);
                }
            })
            .expect("seed world");

        let sink = Arc::new(RecordingSink::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let collab = Collaborators::from_store(store.clone())
            .with_clock(FixedClock(datetime!(2024-05-15 10:00 UTC)))
            .with_events(sink.clone())
            .with_notifier(notifier.clone());

        Self {
            store,
            collab,
            sink,
            notifier,
            account,
            alice,
            kevin,
            kevina,
            outsider,
            board,
            other_board,
            backlog: ids.0,
            doing: ids.1,
            other_doing: ids.2,
        }
    }

    pub fn actor(&self, user: &User) -> Actor {
        Actor::new(self.account, user.id)
    }

    pub fn writer(&self) -> CardWriter<Arc<MemoryStore>> {
        CardWriter::new(self.store.clone(), self.collab.clone())
    }

    pub fn query(&self) -> CardQuery<Arc<MemoryStore>> {
        CardQuery::new(self.store.clone(), self.collab.clone())
    }

    pub fn filters(&self) -> FilterRepository<Arc<MemoryStore>> {
        FilterRepository::new(self.store.clone(), &self.collab)
    }

    pub fn extractor(&self) -> RelationshipExtractor<Arc<MemoryStore>> {
        RelationshipExtractor::new(self.store.clone(), self.collab.clone(), ScanLimits::default())
    }

    /// Create a card on the main board as Alice.
    pub fn card(&self, title: &str, markup: &str, column: Option<&str>) -> CardRecord {
        self.writer()
            .create_card(
                &self.actor(&self.alice),
                CreateCardRequest {
                    board: self.board,
                    title: title.to_owned(),
                    description: RichText::from_markup(markup),
                    column: column.map(str::to_owned),
                    tags: Vec::new(),
                },
            )
            .expect("create card")
            .record
    }

    /// Add a user to the main board.
    pub fn add_member(&self, name: &str, email: &str) -> User {
        let member = user(self.account, name, email);
        let seeded = member.clone();
        let board = self.board;
        self.store
            .seed(move |tables| {
                if let Some(board) = tables.boards.get_mut(&board) {
                    board.members.insert(seeded.id);
                }
                tables.users.insert(seeded.id, seeded);
            })
            .expect("seed member");
        member
    }

    pub fn reload(&self, card: CardId) -> CardRecord {
        self.store
            .card(self.account, card)
            .expect("load card")
            .expect("card exists")
    }

    pub fn published_events(&self) -> Vec<Event> {
        self.sink.events.lock().expect("sink lock").clone()
    }
}
