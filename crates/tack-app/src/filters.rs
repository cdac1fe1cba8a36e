//! Saved filters, one row per owner and criteria fingerprint.

use std::sync::Arc;

use tack_core::changeset::{Changeset, CommitOutcome, Mutation, Rejection};
use tack_core::event::Actor;
use tack_core::filter::{Filter, FilterParams};
use tracing::{debug, info};

use crate::collaborators::{Clock, Collaborators};
use crate::error::{ServiceError, ServiceResult};
use crate::store::CardStore;

/// Looks up and persists [`Filter`] rows.
#[derive(Clone)]
pub struct FilterRepository<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S> FilterRepository<S> {
    /// Repository over `store`, timestamping with the collaborators' clock.
    pub fn new(store: S, collab: &Collaborators) -> Self {
        Self {
            store,
            clock: Arc::clone(&collab.clock),
        }
    }
}

impl<S> FilterRepository<S>
where
    S: CardStore,
{
    fn store_error(err: S::Error) -> ServiceError {
        ServiceError::store(err)
    }

    /// The owner's saved filter for `params`, or an unsaved one.
    ///
    /// # Errors
    /// Returns `Validation` for unknown sort/status tokens.
    pub fn from_params(&self, actor: &Actor, params: &FilterParams) -> ServiceResult<Filter> {
        params.validate()?;
        let filter = Filter::build(actor, params, self.clock.now());
        Ok(self.find(actor, &filter.params_digest)?.unwrap_or(filter))
    }

    /// Save `params` for the actor. Saving equivalent criteria again reuses the
    /// existing row and refreshes its `updated_at`.
    ///
    /// # Errors
    /// Returns `Validation` for unknown sort/status tokens.
    pub fn remember(&self, actor: &Actor, params: &FilterParams) -> ServiceResult<Filter> {
        params.validate()?;
        let now = self.clock.now();
        let filter = Filter::build(actor, params, now);

        if let Some(existing) = self.find(actor, &filter.params_digest)? {
            return self.touch(existing, now);
        }

        let mut changeset = Changeset::new();
        changeset.push(Mutation::InsertFilter(filter.clone()));
        match self.store.commit(&changeset).map_err(Self::store_error)? {
            CommitOutcome::Applied => {
                info!(filter = %filter.id, key = %filter.cache_key(), "Filter saved");
                Ok(filter)
            }
            CommitOutcome::Rejected(Rejection::Duplicate(reason)) => {
                debug!(%reason, "Filter saved concurrently, reusing it");
                let existing = self
                    .find(actor, &filter.params_digest)?
                    .ok_or_else(|| ServiceError::Store(anyhow::anyhow!("filter vanished after {reason}")))?;
                self.touch(existing, now)
            }
            CommitOutcome::Rejected(reason) => Err(ServiceError::Store(anyhow::anyhow!(
                "filter insert rejected: {reason}"
            ))),
        }
    }

    fn find(&self, actor: &Actor, digest: &str) -> ServiceResult<Option<Filter>> {
        self.store
            .filter_by_digest(actor.account, actor.user, digest)
            .map_err(Self::store_error)
    }

    fn touch(&self, mut filter: Filter, at: time::OffsetDateTime) -> ServiceResult<Filter> {
        let mut changeset = Changeset::new();
        changeset.push(Mutation::TouchFilter { id: filter.id, at });
        match self.store.commit(&changeset).map_err(Self::store_error)? {
            CommitOutcome::Applied => {
                filter.updated_at = at;
                Ok(filter)
            }
            CommitOutcome::Rejected(reason) => Err(ServiceError::Store(anyhow::anyhow!(
                "filter touch rejected: {reason}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tack_core::id::{AccountId, BoardId, UserId};
    use tack_store::MemoryStore;
    use time::macros::datetime;

    use crate::collaborators::FixedClock;

    fn repository() -> FilterRepository<Arc<MemoryStore>> {
        let store = Arc::new(MemoryStore::in_memory());
        let collab = Collaborators::from_store(store.clone())
            .with_clock(FixedClock(datetime!(2024-05-15 10:00 UTC)));
        FilterRepository::new(store, &collab)
    }

    #[test]
    fn equivalent_params_reuse_one_row() -> ServiceResult<()> {
        let repo = repository();
        let actor = Actor::new(AccountId::new(), UserId::new());
        let (a, b) = (BoardId::new(), BoardId::new());

        let first = repo.remember(
            &actor,
            &FilterParams {
                board_ids: vec![a, b],
                terms: vec![" urgent ".into()],
                ..FilterParams::default()
            },
        )?;
        let second = repo.remember(
            &actor,
            &FilterParams {
                board_ids: vec![b, a, a],
                terms: vec!["urgent".into(), String::new()],
                sort: Some("latest".into()),
                ..FilterParams::default()
            },
        )?;
        assert_eq!(first.id, second.id);
        assert_eq!(first.params_digest, second.params_digest);

        let looked_up = repo.from_params(&actor, &FilterParams {
            board_ids: vec![a, b],
            terms: vec!["urgent".into()],
            ..FilterParams::default()
        })?;
        assert_eq!(looked_up.id, first.id);
        Ok(())
    }

    #[test]
    fn unsaved_filters_are_not_persisted() -> ServiceResult<()> {
        let repo = repository();
        let actor = Actor::new(AccountId::new(), UserId::new());
        let filter = repo.from_params(&actor, &FilterParams::default())?;
        assert!(filter.is_empty());
        assert!(repo.find(&actor, &filter.params_digest)?.is_none());
        Ok(())
    }

    #[test]
    fn owners_get_separate_rows() -> ServiceResult<()> {
        let repo = repository();
        let account = AccountId::new();
        let params = FilterParams {
            status: Some("closed".into()),
            ..FilterParams::default()
        };
        let mine = repo.remember(&Actor::new(account, UserId::new()), &params)?;
        let theirs = repo.remember(&Actor::new(account, UserId::new()), &params)?;
        assert_ne!(mine.id, theirs.id);
        Ok(())
    }

    #[test]
    fn invalid_tokens_are_rejected() {
        let repo = repository();
        let actor = Actor::new(AccountId::new(), UserId::new());
        let params = FilterParams {
            status: Some("archived".into()),
            ..FilterParams::default()
        };
        assert!(repo.remember(&actor, &params).is_err());
    }
}
