//! Item governance
//!
//! Files, metadata entries and links attached to a case share one
//! life-cycle:
//!
//! ```text
//! Draft ──request_review──▶ ReviewPending ──accept──▶ ReviewAccepted
//!   │                            │                         │
//!   │                          reject                      │
//!   │                            ▼                         │
//!   │                      ReviewRejected ──request_review─┘ (back to ReviewPending)
//!   │                                                      │
//!   └──(owner-submitted, no review)──┬─────────────────────┘
//!                                    ▼
//!                     pre-publish-or-acknowledge / pre-acknowledge
//!                                    ▼
//!                        Published | Acknowledged ──chain stamp──▶ confirmed
//! ```
//!
//! An item is draft until the synchronizer stamps its `added_on` timestamp.
//! Nothing clears that stamp, so a confirmed item stays confirmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::infra::{LocError, Result};

use super::{CaseId, CaseStatus, ChangeSet, ContentHash, Fees, Identity, ItemKind, ItemRef, Reindexed};

/// Payload carried by one kind of item
pub trait ItemPayload: Clone + fmt::Debug {
    const KIND: ItemKind;

    /// Key unique within a case
    type Key: Clone + Eq + fmt::Display + fmt::Debug;

    fn key(&self) -> &Self::Key;
}

/// Copy of a restricted file delivered to a recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredCopy {
    pub hash: ContentHash,
    pub recipient: Identity,
    pub delivered_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    pub hash: ContentHash,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    /// Reference into the binary file store
    pub storage_ref: String,
    pub nature: String,
    #[serde(default)]
    pub restricted_delivery: bool,
    #[serde(default)]
    pub delivered: Vec<DeliveredCopy>,
}

impl ItemPayload for FilePayload {
    const KIND: ItemKind = ItemKind::File;
    type Key = ContentHash;

    fn key(&self) -> &ContentHash {
        &self.hash
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPayload {
    pub name: String,
    pub value: String,
}

impl ItemPayload for MetadataPayload {
    const KIND: ItemKind = ItemKind::Metadata;
    type Key = String;

    fn key(&self) -> &String {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPayload {
    pub target: CaseId,
    pub nature: String,
}

impl ItemPayload for LinkPayload {
    const KIND: ItemKind = ItemKind::Link;
    type Key = CaseId;

    fn key(&self) -> &CaseId {
        &self.target
    }
}

/// Item life-cycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Draft,
    ReviewPending,
    ReviewAccepted,
    ReviewRejected,
    Published,
    Acknowledged,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Draft => "DRAFT",
            ItemStatus::ReviewPending => "REVIEW_PENDING",
            ItemStatus::ReviewAccepted => "REVIEW_ACCEPTED",
            ItemStatus::ReviewRejected => "REVIEW_REJECTED",
            ItemStatus::Published => "PUBLISHED",
            ItemStatus::Acknowledged => "ACKNOWLEDGED",
        };
        f.write_str(s)
    }
}

/// How the item entered the case, fixing its confirmation protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    /// Submitted by the owner or the requester; confirmed by pre-publish-or-acknowledge
    Direct,
    /// Submitted by a delegated third party; confirmed by pre-acknowledge
    Delegated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub decision: ReviewDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Case facts item governance decides on
#[derive(Debug, Clone, Copy)]
pub struct CaseContext<'a> {
    pub owner: &'a Identity,
    /// Requester address, absent for identity-case requesters
    pub requester: Option<&'a Identity>,
    pub status: CaseStatus,
}

/// A file, metadata entry or link attached to a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item<P> {
    /// Position within the case's collection of this kind
    pub index: usize,
    pub submitter: Identity,
    pub mode: SubmissionMode,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewOutcome>,
    /// Set when a rejected item was sent back to review
    #[serde(default)]
    pub redrafted_after_rejection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_confirmed_by: Option<Identity>,
    /// Chain-confirmation timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees: Option<Fees>,
    pub payload: P,
}

pub type File = Item<FilePayload>;
pub type MetadataItem = Item<MetadataPayload>;
pub type Link = Item<LinkPayload>;

impl<P: ItemPayload> Item<P> {
    pub fn new(index: usize, submitter: Identity, mode: SubmissionMode, payload: P) -> Self {
        Self {
            index,
            submitter,
            mode,
            status: ItemStatus::Draft,
            review: None,
            redrafted_after_rejection: false,
            pre_confirmed_by: None,
            added_on: None,
            acknowledged_on: None,
            fees: None,
            payload,
        }
    }

    pub fn key(&self) -> &P::Key {
        self.payload.key()
    }

    pub fn item_ref(&self) -> ItemRef {
        ItemRef::new(P::KIND, self.key().to_string())
    }

    /// Draft until the ledger confirms the item
    pub fn is_draft(&self) -> bool {
        self.added_on.is_none()
    }

    pub fn is_visible_to(&self, viewer: &Identity, ctx: &CaseContext<'_>) -> bool {
        !self.is_draft()
            || viewer == ctx.owner
            || viewer == &self.submitter
            || (ctx.requester == Some(viewer) && &self.submitter == ctx.owner)
    }

    /// Items not submitted by the owner need an accepted review before confirmation
    pub fn requires_review(&self, ctx: &CaseContext<'_>) -> bool {
        &self.submitter != ctx.owner
    }

    fn state_error(&self, operation: &'static str, reason: impl Into<String>) -> LocError {
        LocError::InvalidItemState {
            kind: P::KIND,
            key: self.key().to_string(),
            operation,
            reason: reason.into(),
        }
    }

    fn forbidden(&self, actor: &Identity, operation: &str) -> LocError {
        LocError::forbidden(actor, format!("{} {} {}", operation, P::KIND, self.key()))
    }

    fn ensure_not_confirmed(&self, operation: &'static str) -> Result<()> {
        if self.is_draft() {
            Ok(())
        } else {
            Err(self.state_error(operation, "already confirmed on chain"))
        }
    }

    pub fn request_review(&mut self, actor: &Identity, ctx: &CaseContext<'_>) -> Result<ChangeSet> {
        if ctx.status != CaseStatus::Open {
            return Err(LocError::InvalidStatus {
                operation: "request item review",
                status: ctx.status,
            });
        }
        if actor != &self.submitter && actor != ctx.owner {
            return Err(self.forbidden(actor, "request review of"));
        }
        self.ensure_not_confirmed("request review")?;

        let redrafted = match self.status {
            ItemStatus::Draft => false,
            ItemStatus::ReviewRejected => true,
            other => {
                return Err(self.state_error("request review", format!("status is {}", other)))
            }
        };

        self.status = ItemStatus::ReviewPending;
        self.review = None;
        self.redrafted_after_rejection |= redrafted;
        Ok(ChangeSet::updated(self.item_ref()))
    }

    /// Record the owner's decision on a pending review.
    ///
    /// A decision can only be taken once per review request: deciding again
    /// after an accept or a reject fails.
    fn decide(
        &mut self,
        actor: &Identity,
        ctx: &CaseContext<'_>,
        outcome: ReviewOutcome,
    ) -> Result<ChangeSet> {
        let operation = match outcome.decision {
            ReviewDecision::Accepted => "accept",
            ReviewDecision::Rejected => "reject",
        };
        if actor != ctx.owner {
            return Err(self.forbidden(actor, operation));
        }
        if self.status != ItemStatus::ReviewPending {
            return Err(self.state_error(operation, format!("status is {}", self.status)));
        }

        self.status = match outcome.decision {
            ReviewDecision::Accepted => ItemStatus::ReviewAccepted,
            ReviewDecision::Rejected => ItemStatus::ReviewRejected,
        };
        self.review = Some(outcome);
        Ok(ChangeSet::updated(self.item_ref()))
    }

    pub fn accept(&mut self, actor: &Identity, ctx: &CaseContext<'_>) -> Result<ChangeSet> {
        self.decide(
            actor,
            ctx,
            ReviewOutcome {
                decision: ReviewDecision::Accepted,
                reason: None,
            },
        )
    }

    pub fn reject(
        &mut self,
        actor: &Identity,
        ctx: &CaseContext<'_>,
        reason: impl Into<String>,
    ) -> Result<ChangeSet> {
        self.decide(
            actor,
            ctx,
            ReviewOutcome {
                decision: ReviewDecision::Rejected,
                reason: Some(reason.into()),
            },
        )
    }

    fn check_confirmable(&self, ctx: &CaseContext<'_>, operation: &'static str) -> Result<()> {
        if ctx.status != CaseStatus::Open {
            return Err(LocError::InvalidStatus {
                operation,
                status: ctx.status,
            });
        }
        self.ensure_not_confirmed(operation)?;
        match self.status {
            ItemStatus::ReviewAccepted => Ok(()),
            ItemStatus::Draft if !self.requires_review(ctx) => Ok(()),
            ItemStatus::Draft => Err(self.state_error(operation, "review required")),
            other => Err(self.state_error(operation, format!("status is {}", other))),
        }
    }

    fn check_pre_publish_or_acknowledge(
        &self,
        actor: &Identity,
        ctx: &CaseContext<'_>,
    ) -> Result<()> {
        if self.mode != SubmissionMode::Direct {
            return Err(self.state_error(
                "pre-publish or acknowledge",
                "submitted by a delegate",
            ));
        }
        if actor != ctx.owner && actor != &self.submitter {
            return Err(self.forbidden(actor, "publish"));
        }
        self.check_confirmable(ctx, "pre-publish or acknowledge")
    }

    fn check_pre_acknowledge(&self, actor: &Identity, ctx: &CaseContext<'_>) -> Result<()> {
        if self.mode != SubmissionMode::Delegated {
            return Err(self.state_error("pre-acknowledge", "not submitted by a delegate"));
        }
        if actor != ctx.owner && actor != &self.submitter {
            return Err(self.forbidden(actor, "acknowledge"));
        }
        self.check_confirmable(ctx, "pre-acknowledge")
    }

    pub fn can_pre_publish_or_acknowledge(&self, actor: &Identity, ctx: &CaseContext<'_>) -> bool {
        self.check_pre_publish_or_acknowledge(actor, ctx).is_ok()
    }

    pub fn can_pre_acknowledge(&self, actor: &Identity, ctx: &CaseContext<'_>) -> bool {
        self.check_pre_acknowledge(actor, ctx).is_ok()
    }

    /// Owner acknowledges, a requester-submitter publishes.
    pub fn pre_publish_or_acknowledge(
        &mut self,
        actor: &Identity,
        ctx: &CaseContext<'_>,
    ) -> Result<ChangeSet> {
        self.check_pre_publish_or_acknowledge(actor, ctx)?;
        self.status = if actor == ctx.owner {
            ItemStatus::Acknowledged
        } else {
            ItemStatus::Published
        };
        self.pre_confirmed_by = Some(actor.clone());
        Ok(ChangeSet::updated(self.item_ref()))
    }

    pub fn pre_acknowledge(&mut self, actor: &Identity, ctx: &CaseContext<'_>) -> Result<ChangeSet> {
        self.check_pre_acknowledge(actor, ctx)?;
        self.status = ItemStatus::Acknowledged;
        self.pre_confirmed_by = Some(actor.clone());
        Ok(ChangeSet::updated(self.item_ref()))
    }

    fn cancel_pre_confirmation(
        &mut self,
        actor: &Identity,
        ctx: &CaseContext<'_>,
        mode: SubmissionMode,
        operation: &'static str,
    ) -> Result<ChangeSet> {
        if self.mode != mode {
            return Err(self.state_error(operation, "confirmation protocol does not match"));
        }
        if actor != ctx.owner && actor != &self.submitter {
            return Err(self.forbidden(actor, operation));
        }
        self.ensure_not_confirmed(operation)?;
        if !matches!(self.status, ItemStatus::Published | ItemStatus::Acknowledged) {
            return Err(self.state_error(operation, format!("status is {}", self.status)));
        }

        let review_accepted = matches!(
            self.review,
            Some(ReviewOutcome {
                decision: ReviewDecision::Accepted,
                ..
            })
        );
        self.status = if review_accepted {
            ItemStatus::ReviewAccepted
        } else {
            ItemStatus::Draft
        };
        self.pre_confirmed_by = None;
        Ok(ChangeSet::updated(self.item_ref()))
    }

    pub fn cancel_pre_publish_or_acknowledge(
        &mut self,
        actor: &Identity,
        ctx: &CaseContext<'_>,
    ) -> Result<ChangeSet> {
        self.cancel_pre_confirmation(
            actor,
            ctx,
            SubmissionMode::Direct,
            "cancel pre-publish or acknowledge",
        )
    }

    pub fn cancel_pre_acknowledge(
        &mut self,
        actor: &Identity,
        ctx: &CaseContext<'_>,
    ) -> Result<ChangeSet> {
        self.cancel_pre_confirmation(
            actor,
            ctx,
            SubmissionMode::Delegated,
            "cancel pre-acknowledge",
        )
    }

    /// Chain stamp; at-least-once delivery makes repeats a logged no-op
    pub fn set_added_on(&mut self, timestamp: DateTime<Utc>) -> ChangeSet {
        if let Some(existing) = self.added_on {
            warn!(
                kind = %P::KIND,
                key = %self.key(),
                added_on = %existing,
                "item already confirmed on chain, ignoring"
            );
            return ChangeSet::empty();
        }
        if !matches!(self.status, ItemStatus::Published | ItemStatus::Acknowledged) {
            warn!(
                kind = %P::KIND,
                key = %self.key(),
                status = %self.status,
                "item confirmed on chain without pre-confirmation"
            );
            self.status = ItemStatus::Published;
        }
        self.added_on = Some(timestamp);
        ChangeSet::updated(self.item_ref())
    }

    pub fn set_fees(&mut self, fees: Fees) -> ChangeSet {
        if self.fees.is_some() {
            warn!(kind = %P::KIND, key = %self.key(), "item fees already set, ignoring");
            return ChangeSet::empty();
        }
        self.fees = Some(fees);
        ChangeSet::updated(self.item_ref())
    }

    pub fn set_acknowledged_on(&mut self, timestamp: DateTime<Utc>) -> ChangeSet {
        if self.acknowledged_on.is_some() {
            warn!(kind = %P::KIND, key = %self.key(), "item already acknowledged, ignoring");
            return ChangeSet::empty();
        }
        self.acknowledged_on = Some(timestamp);
        self.status = ItemStatus::Acknowledged;
        ChangeSet::updated(self.item_ref())
    }
}

/// Ordered items of one kind within a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemCollection<P> {
    items: Vec<Item<P>>,
}

impl<P> Default for ItemCollection<P> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<P: ItemPayload> ItemCollection<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item<P>> {
        self.items.iter()
    }

    pub fn get(&self, key: &P::Key) -> Option<&Item<P>> {
        self.items.iter().find(|item| item.key() == key)
    }

    pub fn contains(&self, key: &P::Key) -> bool {
        self.get(key).is_some()
    }

    pub fn require(&self, key: &P::Key) -> Result<&Item<P>> {
        self.get(key).ok_or_else(|| LocError::ItemNotFound {
            kind: P::KIND,
            key: key.to_string(),
        })
    }

    pub fn require_mut(&mut self, key: &P::Key) -> Result<&mut Item<P>> {
        self.items
            .iter_mut()
            .find(|item| item.key() == key)
            .ok_or_else(|| LocError::ItemNotFound {
                kind: P::KIND,
                key: key.to_string(),
            })
    }

    /// Append a draft item at the next index
    pub fn add(&mut self, submitter: Identity, mode: SubmissionMode, payload: P) -> Result<ChangeSet> {
        if self.contains(payload.key()) {
            return Err(LocError::DuplicateItem {
                kind: P::KIND,
                key: payload.key().to_string(),
            });
        }
        let item = Item::new(self.items.len(), submitter, mode, payload);
        let changes = ChangeSet::added(item.item_ref());
        self.items.push(item);
        Ok(changes)
    }

    /// Remove a draft item and close the index gap it leaves
    pub fn remove(
        &mut self,
        key: &P::Key,
        actor: &Identity,
        ctx: &CaseContext<'_>,
    ) -> Result<ChangeSet> {
        let position = self
            .items
            .iter()
            .position(|item| item.key() == key)
            .ok_or_else(|| LocError::ItemNotFound {
                kind: P::KIND,
                key: key.to_string(),
            })?;

        let item = &self.items[position];
        if actor != ctx.owner && actor != &item.submitter {
            return Err(item.forbidden(actor, "remove"));
        }
        item.ensure_not_confirmed("remove")?;

        let removed = self.items.remove(position);
        let mut changes = ChangeSet {
            removed: vec![removed.item_ref()],
            ..ChangeSet::default()
        };
        for (index, item) in self.items.iter_mut().enumerate().skip(position) {
            if item.index != index {
                changes.reindexed.push(Reindexed {
                    item: item.item_ref(),
                    from: item.index,
                    to: index,
                });
                item.index = index;
            }
        }
        Ok(changes)
    }

    pub fn visible_to(&self, viewer: &Identity, ctx: &CaseContext<'_>) -> Vec<&Item<P>> {
        self.items
            .iter()
            .filter(|item| item.is_visible_to(viewer, ctx))
            .collect()
    }

    /// Indexes form 0..n-1 in listing order
    pub fn is_contiguous(&self) -> bool {
        self.items
            .iter()
            .enumerate()
            .all(|(position, item)| item.index == position)
    }
}

impl ItemCollection<FilePayload> {
    pub fn set_restricted_delivery(&mut self, hash: &ContentHash, restricted: bool) -> Result<ChangeSet> {
        let file = self.require_mut(hash)?;
        if file.payload.restricted_delivery == restricted {
            return Ok(ChangeSet::empty());
        }
        file.payload.restricted_delivery = restricted;
        Ok(ChangeSet::updated(file.item_ref()))
    }

    pub fn add_delivered_copy(&mut self, hash: &ContentHash, copy: DeliveredCopy) -> Result<ChangeSet> {
        let file = self.require_mut(hash)?;
        if file.is_draft() {
            return Err(file.state_error("deliver", "not confirmed on chain"));
        }
        if !file.payload.restricted_delivery {
            return Err(file.state_error("deliver", "delivery is not restricted"));
        }
        if file.payload.delivered.iter().any(|d| d.hash == copy.hash) {
            return Err(LocError::DuplicateItem {
                kind: ItemKind::File,
                key: copy.hash.to_string(),
            });
        }
        file.payload.delivered.push(copy);
        Ok(ChangeSet::updated(file.item_ref()))
    }
}
