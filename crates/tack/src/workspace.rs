//! Data file, configuration and name lookups behind the CLI.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tack_app::{
    CONFIG_DIR, CardQuery, CardWriter, Collaborators, FilterRepository, ProjectConfig, RelationshipExtractor,
    SystemClock,
};
use tack_core::event::Actor;
use tack_core::id::{AccountId, BoardId, CardId, CardNumber, ColumnId, UserId};
use tack_core::model::{Board, Column, User};
use tack_store::{MemoryStore, Tables};

/// Snapshot file inside the config directory.
pub const DATA_FILE: &str = "data.json";

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("no account here yet; run `tack init` first")]
    Uninitialized,
    #[error("account already initialized")]
    AlreadyInitialized,
    #[error("pass --as <email> to pick the acting user")]
    NoActor,
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("unknown board: {0}")]
    UnknownBoard(String),
    #[error("card #{0} not found")]
    UnknownCard(CardNumber),
    #[error("a user with email {0} already exists")]
    DuplicateEmail(String),
}

/// Store, configuration and collaborators for one project directory.
pub struct Workspace {
    pub store: Arc<MemoryStore>,
    pub config: ProjectConfig,
    pub collab: Collaborators,
}

impl Workspace {
    pub fn open(dir: &Path) -> Result<Self> {
        let config = ProjectConfig::from_dir(dir)?;
        let data = dir.join(CONFIG_DIR).join(DATA_FILE);
        let store = Arc::new(
            MemoryStore::open(&data).with_context(|| format!("failed to open {}", data.display()))?,
        );
        let collab = Collaborators::from_store(Arc::clone(&store)).with_clock(SystemClock::new(config.query.offset()?));
        Ok(Self { store, config, collab })
    }

    pub fn writer(&self) -> CardWriter<Arc<MemoryStore>> {
        CardWriter::new(Arc::clone(&self.store), self.collab.clone())
    }

    pub fn query(&self) -> CardQuery<Arc<MemoryStore>> {
        CardQuery::new(Arc::clone(&self.store), self.collab.clone())
    }

    pub fn filters(&self) -> FilterRepository<Arc<MemoryStore>> {
        FilterRepository::new(Arc::clone(&self.store), &self.collab)
    }

    pub fn extractor(&self) -> RelationshipExtractor<Arc<MemoryStore>> {
        RelationshipExtractor::new(Arc::clone(&self.store), self.collab.clone(), self.config.extraction.limits())
    }

    /// The single account this data file holds.
    pub fn account(&self) -> Result<AccountId> {
        let tables = self.store.snapshot()?;
        Ok(account_of(&tables).ok_or(LookupError::Uninitialized)?)
    }

    pub fn actor(&self, email: Option<&str>) -> Result<Actor> {
        let email = email.ok_or(LookupError::NoActor)?;
        let account = self.account()?;
        let user = self.user(account, email)?;
        Ok(Actor::new(account, user.id))
    }

    pub fn user(&self, account: AccountId, email: &str) -> Result<User> {
        let found = self.collab.identity.users_by_email(account, email)?;
        Ok(found
            .into_iter()
            .next()
            .ok_or_else(|| LookupError::UnknownUser(email.to_owned()))?)
    }

    /// Users for `emails`; unknown addresses are left out.
    pub fn known_users(&self, account: AccountId, emails: &[String]) -> Result<Vec<UserId>> {
        let mut ids = Vec::new();
        for email in emails {
            ids.extend(self.collab.identity.users_by_email(account, email)?.into_iter().map(|user| user.id));
        }
        Ok(ids)
    }

    pub fn board(&self, account: AccountId, name: &str) -> Result<Board> {
        let boards = self.store.boards(account)?;
        Ok(boards
            .into_iter()
            .find(|board| board.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| LookupError::UnknownBoard(name.to_owned()))?)
    }

    /// Card id for `#12` or `12`.
    pub fn card(&self, actor: &Actor, reference: &str) -> Result<CardId> {
        let number: CardNumber = reference
            .parse()
            .with_context(|| format!("invalid card reference: {reference}"))?;
        let record = self
            .store
            .card_by_number(actor.account, number)?
            .ok_or(LookupError::UnknownCard(number))?;
        Ok(record.card.id)
    }

    /// Create the account, its first user and a board.
    pub fn init(&self, name: &str, email: &str, board: &str, columns: &[String]) -> Result<User> {
        if account_of(&self.store.snapshot()?).is_some() {
            return Err(LookupError::AlreadyInitialized.into());
        }
        let account = AccountId::new();
        let user = new_user(account, name, email);
        let board = new_board(account, board, BTreeSet::from([user.id]));
        let columns = new_columns(board.id, columns);
        let seeded = user.clone();
        self.store.seed(move |tables| {
            tables.users.insert(seeded.id, seeded);
            tables.boards.insert(board.id, board);
            for column in columns {
                tables.columns.insert(column.id, column);
            }
        })?;
        Ok(user)
    }

    pub fn add_user(&self, name: &str, email: &str, boards: &[String]) -> Result<User> {
        let account = self.account()?;
        if !self.collab.identity.users_by_email(account, email)?.is_empty() {
            return Err(LookupError::DuplicateEmail(email.to_owned()).into());
        }
        let board_ids = boards
            .iter()
            .map(|name| self.board(account, name).map(|board| board.id))
            .collect::<Result<Vec<BoardId>>>()?;
        let user = new_user(account, name, email);
        let seeded = user.clone();
        self.store.seed(move |tables| {
            for id in board_ids {
                if let Some(board) = tables.boards.get_mut(&id) {
                    board.members.insert(seeded.id);
                }
            }
            tables.users.insert(seeded.id, seeded);
        })?;
        Ok(user)
    }

    pub fn add_board(&self, actor: &Actor, name: &str, columns: &[String], members: &[String]) -> Result<Board> {
        let mut member_ids = BTreeSet::from([actor.user]);
        for email in members {
            member_ids.insert(self.user(actor.account, email)?.id);
        }
        let board = new_board(actor.account, name, member_ids);
        let columns = new_columns(board.id, columns);
        let seeded = board.clone();
        self.store.seed(move |tables| {
            tables.boards.insert(seeded.id, seeded);
            for column in columns {
                tables.columns.insert(column.id, column);
            }
        })?;
        Ok(board)
    }
}

fn account_of(tables: &Tables) -> Option<AccountId> {
    tables.users.values().next().map(|user| user.account)
}

fn new_user(account: AccountId, name: &str, email: &str) -> User {
    User {
        id: UserId::new(),
        account,
        name: name.trim().to_owned(),
        email: Some(email.trim().to_owned()),
    }
}

fn new_board(account: AccountId, name: &str, members: BTreeSet<UserId>) -> Board {
    Board {
        id: BoardId::new(),
        account,
        name: name.trim().to_owned(),
        members,
    }
}

fn new_columns(board: BoardId, names: &[String]) -> Vec<Column> {
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .enumerate()
        .map(|(position, name)| Column {
            id: ColumnId::new(),
            board,
            name: name.to_owned(),
            color: None,
            position: u32::try_from(position).unwrap_or(u32::MAX),
        })
        .collect()
}
