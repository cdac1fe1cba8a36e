//! Mention and card-link extraction over card descriptions and comments.
//!
//! A pass scans the content of one source, resolves `@handles`, mention
//! attachments and card references, and records every new mention, watcher,
//! link, `card.linked` event and the new scan digest in one changeset.

use std::collections::BTreeSet;

use serde_json::json;
use tack_core::changeset::{Changeset, CommitOutcome, Mutation};
use tack_core::event::{Action, Actor, Event};
use tack_core::id::{AccountId, CardId, CardLinkId, MentionId, UserId};
use tack_core::model::{Card, CardLink, Comment, ContentRef, Mention, ScanMark, User};
use tack_core::scan::{self, Mentionable, ScanLimits};
use tack_core::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::collaborators::Collaborators;
use crate::error::{ServiceError, ServiceResult};
use crate::store::CardStore;

const MAX_ATTEMPTS: usize = 2;

/// What one extraction pass recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    /// The content was unchanged since the last pass and nothing was scanned.
    pub skipped: bool,
    /// Mentions created.
    pub mentions: Vec<Mention>,
    /// Card links created.
    pub links: Vec<CardLink>,
    /// Watchers registered as `(card, user)`.
    pub watchers: Vec<(CardId, UserId)>,
    /// Events emitted.
    pub events: Vec<Event>,
}

impl ExtractionReport {
    /// Returns true when the pass recorded nothing new.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty() && self.links.is_empty() && self.watchers.is_empty() && self.events.is_empty()
    }

    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

enum Content {
    Card(Card),
    Comment(Comment),
}

impl Content {
    fn as_mentionable(&self) -> &dyn Mentionable {
        match self {
            Self::Card(card) => card,
            Self::Comment(comment) => comment,
        }
    }
}

/// Derives mentions and card links from content.
#[derive(Debug, Clone)]
pub struct RelationshipExtractor<S> {
    store: S,
    collab: Collaborators,
    limits: ScanLimits,
}

impl<S> RelationshipExtractor<S> {
    /// Construct an extractor scanning within `limits`.
    pub const fn new(store: S, collab: Collaborators, limits: ScanLimits) -> Self {
        Self { store, collab, limits }
    }
}

impl<S> RelationshipExtractor<S>
where
    S: CardStore,
{
    fn store_error(err: S::Error) -> ServiceError {
        ServiceError::store(err)
    }

    /// Run a pass unless the content is unchanged since the last one.
    ///
    /// # Errors
    /// Returns `NotFound` when the source does not exist and `Conflict` when
    /// two consecutive commits are rejected.
    pub fn extract(&self, actor: &Actor, source: ContentRef) -> ServiceResult<ExtractionReport> {
        self.run(actor, source, false)
    }

    /// Run a pass regardless of the last scanned digest.
    ///
    /// # Errors
    /// See [`RelationshipExtractor::extract`].
    pub fn extract_forced(&self, actor: &Actor, source: ContentRef) -> ServiceResult<ExtractionReport> {
        self.run(actor, source, true)
    }

    fn run(&self, actor: &Actor, source: ContentRef, force: bool) -> ServiceResult<ExtractionReport> {
        let mut owning_card = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let content = self.load(actor.account, source)?;
            let content = content.as_mentionable();
            owning_card = Some(content.owning_card());

            let digest = content.content_digest();
            if !force
                && self.store.scan_digest(source).map_err(Self::store_error)?.as_deref() == Some(digest.as_str())
            {
                debug!(%source, "Content unchanged, skipping extraction");
                return Ok(ExtractionReport::skipped());
            }

            let at = self.collab.clock.now();
            let (changeset, report) = self.plan(actor, content, digest, at)?;
            match self.store.commit(&changeset).map_err(Self::store_error)? {
                CommitOutcome::Applied => {
                    info!(
                        %source,
                        mentions = report.mentions.len(),
                        links = report.links.len(),
                        watchers = report.watchers.len(),
                        "Extraction pass recorded"
                    );
                    self.notify(&report);
                    return Ok(report);
                }
                CommitOutcome::Rejected(reason) => {
                    warn!(%source, attempt, %reason, "Extraction pass rejected, recomputing");
                }
            }
        }
        Err(Error::Conflict {
            card: owning_card.unwrap_or_default(),
            reason: format!("extraction of {source} kept losing to concurrent passes"),
        }
        .into())
    }

    fn load(&self, account: AccountId, source: ContentRef) -> ServiceResult<Content> {
        match source {
            ContentRef::Card(id) => self
                .store
                .card(account, id)
                .map_err(Self::store_error)?
                .map(|record| Content::Card(record.card))
                .ok_or_else(|| Error::not_found("card", id).into()),
            ContentRef::Comment(id) => self
                .store
                .comment(account, id)
                .map_err(Self::store_error)?
                .map(Content::Comment)
                .ok_or_else(|| Error::not_found("comment", id).into()),
        }
    }

    fn plan(
        &self,
        actor: &Actor,
        content: &dyn Mentionable,
        digest: String,
        at: OffsetDateTime,
    ) -> ServiceResult<(Changeset, ExtractionReport)> {
        let source = content.content_ref();
        let owning = content.owning_card();
        let board = content.eligible_board();
        let found = scan::scan(content, self.limits);
        let mut changeset = Changeset::new();
        let mut report = ExtractionReport::default();

        let eligible = self.eligible_users(actor.account, content)?;
        let mut candidates: BTreeSet<UserId> = found.attachments.clone();
        for handle in &found.handles {
            candidates.extend(self.resolve_handle(actor.account, handle, &eligible)?);
        }
        candidates.retain(|user| eligible.iter().any(|candidate| candidate.id == *user));

        let already_mentioned: BTreeSet<UserId> = self
            .store
            .mentions(actor.account, source)
            .map_err(Self::store_error)?
            .into_iter()
            .map(|mention| mention.mentionee)
            .collect();
        let watching = self
            .store
            .card(actor.account, owning)
            .map_err(Self::store_error)?
            .map(|record| record.card.watchers)
            .unwrap_or_default();

        for mentionee in candidates.difference(&already_mentioned) {
            let mention = Mention {
                id: MentionId::new(),
                account: actor.account,
                source,
                mentioner: content.author(),
                mentionee: *mentionee,
                created_at: at,
            };
            changeset.push(Mutation::InsertMention(mention.clone()));
            report.mentions.push(mention);
            if !watching.contains(mentionee) {
                changeset.push(Mutation::AddWatcher {
                    card: owning,
                    user: *mentionee,
                });
                report.watchers.push((owning, *mentionee));
            }
        }

        let already_linked: BTreeSet<CardId> = self
            .store
            .card_links(actor.account, source)
            .map_err(Self::store_error)?
            .into_iter()
            .map(|link| link.card)
            .collect();
        let mut linked = BTreeSet::new();
        for number in found.card_numbers {
            let Some(target) = self
                .store
                .card_by_number(actor.account, number)
                .map_err(Self::store_error)?
            else {
                continue;
            };
            let target = target.card;
            if already_linked.contains(&target.id) || !linked.insert(target.id) {
                continue;
            }
            let link = CardLink {
                id: CardLinkId::new(),
                account: actor.account,
                source,
                card: target.id,
                creator: actor.user,
                created_at: at,
            };
            let event = Event::new(actor, source, board, Action::CardLinked, at).with_particulars(json!({
                "linked_card_id": target.number.0,
                "linked_card_title": target.title,
            }));
            changeset.push(Mutation::InsertCardLink(link.clone())).emit(event.clone());
            report.links.push(link);
            report.events.push(event);
        }

        changeset.push(Mutation::RecordScan(ScanMark { source, digest }));
        Ok((changeset, report))
    }

    fn eligible_users(&self, account: AccountId, content: &dyn Mentionable) -> ServiceResult<Vec<User>> {
        let board = content.eligible_board();
        let members = self
            .store
            .boards(account)
            .map_err(Self::store_error)?
            .into_iter()
            .find(|candidate| candidate.id == board)
            .map(|board| board.members)
            .unwrap_or_default();
        Ok(self
            .store
            .users(account)
            .map_err(Self::store_error)?
            .into_iter()
            .filter(|user| members.contains(&user.id))
            .collect())
    }

    /// Resolve one handle: an email goes through the identity directory,
    /// anything else is matched against the eligible users tier by tier.
    fn resolve_handle(&self, account: AccountId, handle: &str, eligible: &[User]) -> ServiceResult<Vec<UserId>> {
        if handle.contains('@') {
            let users = self.collab.identity.users_by_email(account, handle)?;
            return Ok(users.into_iter().map(|user| user.id).collect());
        }
        Ok(resolve_by_name(handle, eligible))
    }

    fn notify(&self, report: &ExtractionReport) {
        for (card, user) in &report.watchers {
            self.collab.notifier.watcher_registered(*card, *user);
        }
        for mention in report.mentions.iter().filter(|mention| !mention.is_self_mention()) {
            self.collab.notifier.mentioned(mention);
        }
        for event in &report.events {
            self.collab.events.publish(event);
        }
    }
}

/// Match a bare handle against users: local part, then dotted name, then name
/// substring, then local part substring. The first tier with any match wins.
fn resolve_by_name(handle: &str, users: &[User]) -> Vec<UserId> {
    let handle = handle.to_lowercase();
    let tiers: [&dyn Fn(&User) -> bool; 4] = [
        &|user: &User| user.email_local_part().is_some_and(|local| local == handle),
        &|user: &User| user.dotted_name() == handle,
        &|user: &User| user.name.to_lowercase().contains(&handle),
        &|user: &User| user.email_local_part().is_some_and(|local| local.contains(&handle)),
    ];
    tiers
        .iter()
        .map(|tier| users.iter().filter(|&user| tier(user)).map(|user| user.id).collect::<Vec<_>>())
        .find(|matches| !matches.is_empty())
        .unwrap_or_default()
}
