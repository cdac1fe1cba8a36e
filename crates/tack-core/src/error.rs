use crate::id::CardId;

/// Domain errors raised by the state machine, the query composer and the extractor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced column/board/card/tag/user does not exist or is not accessible.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of entity that was looked up.
        entity: &'static str,
        /// Lookup key as supplied by the caller.
        key: String,
    },
    /// Malformed input such as an unknown sort key.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Offending parameter name.
        field: &'static str,
        /// Human-readable explanation.
        message: String,
    },
    /// Card markers are inconsistent or a concurrent transition won the race.
    #[error("conflict on card {card}: {reason}")]
    Conflict {
        /// Card whose state could not be reconciled.
        card: CardId,
        /// Description of the conflict.
        reason: String,
    },
    /// The transition is not allowed from the card's current state.
    #[error("cannot {action} card {card}: {reason}")]
    InvalidTransition {
        /// Card the transition targeted.
        card: CardId,
        /// Transition name.
        action: &'static str,
        /// Why the transition is refused.
        reason: &'static str,
    },
}

impl Error {
    /// Build a [`Error::NotFound`] for the given entity kind and key.
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Build a [`Error::Validation`] for the given field.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Returns true for [`Error::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for [`Error::Conflict`].
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result alias for domain operations.
pub type Result<T> = std::result::Result<T, Error>;
