//! Domain types for tack: ids, cards and boards, the card lifecycle, query
//! criteria and content scanning. Everything here is pure; storage and
//! orchestration live in `tack-store` and `tack-app`.

/// Atomic write units.
pub mod changeset;
/// Domain error type.
pub mod error;
/// Audit event definitions.
pub mod event;
/// Query criteria and saved filters.
pub mod filter;
/// Identifier types.
pub mod id;
/// Persisted entities.
pub mod model;
/// Mention and card reference scanning.
pub mod scan;
/// Card lifecycle state machine.
pub mod state;
/// Case-insensitive text search over cards.
pub mod text_matcher;
/// Relative date windows.
pub mod time_window;

pub use changeset::{Changeset, CommitOutcome, Mutation, Rejection};
pub use error::{Error, Result};
pub use event::{Action, Actor, Event};
pub use state::{CardRecord, Closable, Postponable, Position, Transition, VirtualColumn};
