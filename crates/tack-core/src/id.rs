use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            /// Generate a fresh identifier.
            pub fn new() -> Self {
                // UUID version 7 keeps identifiers roughly creation-ordered.
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s.trim())?))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                s.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(d: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a tenant account.
    AccountId
);
uuid_id!(
    /// Identifier of a user within an account.
    UserId
);
uuid_id!(
    /// Identifier of a board.
    BoardId
);
uuid_id!(
    /// Identifier of a board column.
    ColumnId
);
uuid_id!(
    /// Identifier of a workflow stage.
    StageId
);
uuid_id!(
    /// Identifier of a card.
    CardId
);
uuid_id!(
    /// Identifier of a tag.
    TagId
);
uuid_id!(
    /// Identifier of a comment.
    CommentId
);
uuid_id!(
    /// Identifier of a mention record.
    MentionId
);
uuid_id!(
    /// Identifier of a card link record.
    CardLinkId
);
uuid_id!(
    /// Identifier of a saved filter.
    FilterId
);
uuid_id!(
    /// Identifier of an audit event.
    EventId
);

/// Sequential, tenant-unique display number of a card (`#123`).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardNumber(pub u64);

impl CardNumber {
    /// The number following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CardNumber {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        Ok(Self(digits.parse()?))
    }
}
