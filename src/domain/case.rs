//! Case aggregate
//!
//! A case moves through its status graph
//!
//! ```text
//! DRAFT ──submit──▶ REQUESTED ──accept──▶ OPEN ──pre_close/close──▶ CLOSED
//!   ▲                   │
//!   └──rework── REJECTED ◀──reject
//! ```
//!
//! while voiding is an overlay settable from OPEN or CLOSED. Every operation
//! validates before it mutates, so a failed call leaves the case untouched.
//! Item mutations are forwarded to [`ItemCollection`] once the case is known
//! to be editable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

use crate::infra::{LocError, Result};

use super::{
    hash256_hex, CaseContext, CaseId, ChangeSet, ContentHash, DeliveredCopy, Fees, FilePayload,
    Hash256, Identity, Item, ItemCollection, ItemPayload, LinkPayload, MetadataPayload,
    SubmissionMode,
};

/// Case status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Draft,
    Requested,
    Rejected,
    Open,
    Closed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Draft => "DRAFT",
            CaseStatus::Requested => "REQUESTED",
            CaseStatus::Rejected => "REJECTED",
            CaseStatus::Open => "OPEN",
            CaseStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseKind {
    Identity,
    Transaction,
    Collection,
}

/// Party on whose behalf the case is kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requester {
    /// Account address acting directly
    Address(Identity),
    /// Identity case standing for a party without an address
    IdentityCase(CaseId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidInfo {
    pub reason: String,
    /// Unset while the void is only requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voided_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacer: Option<CaseId>,
}

/// Seal over the personal data of an identity case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seal {
    #[serde(with = "hash256_hex")]
    pub hash: Hash256,
    pub salt: String,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Completed,
    Failed,
}

/// Collection entry recorded by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionItem {
    pub item_id: String,
    pub added_on: DateTime<Utc>,
    pub fees: Fees,
}

/// Result of an idempotent mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    AlreadyApplied,
}

/// Case definition supplied at creation
#[derive(Debug, Clone)]
pub struct NewCase {
    pub id: CaseId,
    pub owner: Identity,
    pub requester: Option<Requester>,
    pub description: String,
    pub kind: CaseKind,
    pub seal: Option<Seal>,
}

/// Items of a case, one ordered collection per kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseItems {
    pub files: ItemCollection<FilePayload>,
    pub metadata: ItemCollection<MetadataPayload>,
    pub links: ItemCollection<LinkPayload>,
}

/// Selects the collection holding one item kind
pub trait CaseItem: ItemPayload {
    fn collection(items: &CaseItems) -> &ItemCollection<Self>;
    fn collection_mut(items: &mut CaseItems) -> &mut ItemCollection<Self>;
}

impl CaseItem for FilePayload {
    fn collection(items: &CaseItems) -> &ItemCollection<Self> {
        &items.files
    }

    fn collection_mut(items: &mut CaseItems) -> &mut ItemCollection<Self> {
        &mut items.files
    }
}

impl CaseItem for MetadataPayload {
    fn collection(items: &CaseItems) -> &ItemCollection<Self> {
        &items.metadata
    }

    fn collection_mut(items: &mut CaseItems) -> &mut ItemCollection<Self> {
        &mut items.metadata
    }
}

impl CaseItem for LinkPayload {
    fn collection(items: &CaseItems) -> &ItemCollection<Self> {
        &items.links
    }

    fn collection_mut(items: &mut CaseItems) -> &mut ItemCollection<Self> {
        &mut items.links
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub status: CaseStatus,
    pub owner: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<Requester>,
    pub description: String,
    pub kind: CaseKind,
    /// Ledger-confirmed creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub void_info: Option<VoidInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seal: Option<Seal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_verification: Option<VerificationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_fees: Option<Fees>,
    #[serde(default)]
    pub delegates: BTreeSet<Identity>,
    #[serde(default)]
    pub items: CaseItems,
    #[serde(default)]
    pub collection_items: Vec<CollectionItem>,
}

impl Case {
    fn build(definition: NewCase, status: CaseStatus) -> Result<Self> {
        match (&definition.kind, &definition.requester) {
            (CaseKind::Identity, Some(Requester::IdentityCase(_))) => {
                return Err(LocError::InvalidCase(
                    "identity case cannot be requested by another identity case".to_string(),
                ));
            }
            (CaseKind::Identity, _) | (_, Some(_)) => {}
            (_, None) if status == CaseStatus::Draft => {}
            (_, None) => return Err(LocError::MissingRequester(definition.id)),
        }
        if definition.seal.is_some() && definition.kind != CaseKind::Identity {
            return Err(LocError::InvalidCase(
                "only identity cases carry a seal".to_string(),
            ));
        }

        Ok(Self {
            id: definition.id,
            status,
            owner: definition.owner,
            requester: definition.requester,
            description: definition.description,
            kind: definition.kind,
            created_on: None,
            decision_on: None,
            rejection_reason: None,
            closed_on: None,
            void_info: None,
            seal: definition.seal,
            identity_verification: None,
            creation_fees: None,
            delegates: BTreeSet::new(),
            items: CaseItems::default(),
            collection_items: Vec::new(),
        })
    }

    /// New case prepared by the requester before submission
    pub fn draft(definition: NewCase) -> Result<Self> {
        Self::build(definition, CaseStatus::Draft)
    }

    /// New case submitted for the owner's decision
    pub fn request(definition: NewCase) -> Result<Self> {
        Self::build(definition, CaseStatus::Requested)
    }

    /// New case opened directly by its owner
    pub fn open(definition: NewCase, when: DateTime<Utc>) -> Result<Self> {
        let mut case = Self::build(definition, CaseStatus::Open)?;
        case.decision_on = Some(when);
        Ok(case)
    }

    pub fn requester_address(&self) -> Option<&Identity> {
        match &self.requester {
            Some(Requester::Address(address)) => Some(address),
            _ => None,
        }
    }

    pub fn context(&self) -> CaseContext<'_> {
        CaseContext {
            owner: &self.owner,
            requester: self.requester_address(),
            status: self.status,
        }
    }

    fn split_items(&mut self) -> (CaseContext<'_>, &mut CaseItems) {
        let requester = match &self.requester {
            Some(Requester::Address(address)) => Some(address),
            _ => None,
        };
        let ctx = CaseContext {
            owner: &self.owner,
            requester,
            status: self.status,
        };
        (ctx, &mut self.items)
    }

    pub fn is_void(&self) -> bool {
        matches!(
            self.void_info,
            Some(VoidInfo {
                voided_on: Some(_),
                ..
            })
        )
    }

    pub fn is_pre_void(&self) -> bool {
        matches!(self.void_info, Some(VoidInfo { voided_on: None, .. }))
    }

    /// Owner, requester address or delegate
    pub fn is_contributor(&self, identity: &Identity) -> bool {
        identity == &self.owner
            || self.requester_address() == Some(identity)
            || self.delegates.contains(identity)
    }

    fn submission_mode_for(&self, submitter: &Identity) -> SubmissionMode {
        if submitter == &self.owner || self.requester_address() == Some(submitter) {
            SubmissionMode::Direct
        } else {
            SubmissionMode::Delegated
        }
    }

    fn ensure_status(&self, operation: &'static str, allowed: &[CaseStatus]) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(LocError::InvalidStatus {
                operation,
                status: self.status,
            })
        }
    }

    fn ensure_owner(&self, actor: &Identity, action: &str) -> Result<()> {
        if actor == &self.owner {
            Ok(())
        } else {
            Err(LocError::forbidden(actor, format!("{} on case {}", action, self.id)))
        }
    }

    /// Items can change only while DRAFT or OPEN and not voided
    pub fn ensure_editable(&self) -> Result<()> {
        self.ensure_status("edit", &[CaseStatus::Draft, CaseStatus::Open])?;
        if self.is_void() {
            return Err(LocError::CaseVoid(self.id));
        }
        Ok(())
    }

    pub fn submit(&mut self) -> Result<()> {
        self.ensure_status("submit", &[CaseStatus::Draft])?;
        if self.identity_verification == Some(VerificationStatus::Pending) {
            return Err(LocError::VerificationPending(self.id));
        }
        if self.requester.is_none() && self.kind != CaseKind::Identity {
            return Err(LocError::MissingRequester(self.id));
        }
        self.status = CaseStatus::Requested;
        Ok(())
    }

    pub fn accept(&mut self, when: DateTime<Utc>) -> Result<()> {
        self.ensure_status("accept", &[CaseStatus::Requested])?;
        self.status = CaseStatus::Open;
        self.decision_on = Some(when);
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>, when: DateTime<Utc>) -> Result<()> {
        self.ensure_status("reject", &[CaseStatus::Requested])?;
        self.status = CaseStatus::Rejected;
        self.rejection_reason = Some(reason.into());
        self.decision_on = Some(when);
        Ok(())
    }

    pub fn rework(&mut self) -> Result<()> {
        self.ensure_status("rework", &[CaseStatus::Rejected])?;
        self.status = CaseStatus::Draft;
        self.rejection_reason = None;
        self.decision_on = None;
        Ok(())
    }

    /// Stamp the ledger creation time, accepting a still pending request
    pub fn set_created_date(&mut self, timestamp: DateTime<Utc>) -> Result<Outcome> {
        if let Some(existing) = self.created_on {
            warn!(case_id = %self.id, created_on = %existing, "case creation already stamped");
            return Ok(Outcome::AlreadyApplied);
        }
        self.created_on = Some(timestamp);
        if self.status == CaseStatus::Requested {
            self.accept(timestamp)?;
        }
        Ok(Outcome::Applied)
    }

    pub fn set_creation_fees(&mut self, fees: Fees) -> Outcome {
        if self.creation_fees.is_some() {
            warn!(case_id = %self.id, "case creation fees already set");
            return Outcome::AlreadyApplied;
        }
        self.creation_fees = Some(fees);
        Outcome::Applied
    }

    pub fn pre_close(&mut self) -> Result<()> {
        self.ensure_status("pre-close", &[CaseStatus::Open])?;
        self.status = CaseStatus::Closed;
        Ok(())
    }

    /// Ledger close; forces CLOSED and ignores repeats
    pub fn close(&mut self, timestamp: DateTime<Utc>) -> Result<Outcome> {
        self.ensure_status("close", &[CaseStatus::Open, CaseStatus::Closed])?;
        if let Some(existing) = self.closed_on {
            warn!(case_id = %self.id, closed_on = %existing, "case already closed");
            return Ok(Outcome::AlreadyApplied);
        }
        self.status = CaseStatus::Closed;
        self.closed_on = Some(timestamp);
        Ok(Outcome::Applied)
    }

    pub fn pre_void(&mut self, reason: impl Into<String>) -> Result<()> {
        self.ensure_status("void", &[CaseStatus::Open, CaseStatus::Closed])?;
        if self.void_info.is_some() {
            return Err(LocError::AlreadyVoid { case_id: self.id });
        }
        self.void_info = Some(VoidInfo {
            reason: reason.into(),
            voided_on: None,
            replacer: None,
        });
        Ok(())
    }

    pub fn void_case(&mut self, timestamp: DateTime<Utc>) -> Result<Outcome> {
        self.void_with(timestamp, None)
    }

    pub fn void_case_and_replace(
        &mut self,
        timestamp: DateTime<Utc>,
        replacer: CaseId,
    ) -> Result<Outcome> {
        self.void_with(timestamp, Some(replacer))
    }

    fn void_with(&mut self, timestamp: DateTime<Utc>, replacer: Option<CaseId>) -> Result<Outcome> {
        self.ensure_status("void", &[CaseStatus::Open, CaseStatus::Closed])?;
        if self.is_void() {
            warn!(case_id = %self.id, "case already void");
            return Ok(Outcome::AlreadyApplied);
        }
        let info = self.void_info.get_or_insert_with(|| VoidInfo {
            reason: String::new(),
            voided_on: None,
            replacer: None,
        });
        info.voided_on = Some(timestamp);
        if info.replacer.is_none() {
            info.replacer = replacer;
        }
        Ok(Outcome::Applied)
    }

    pub fn start_identity_verification(&mut self) -> Result<()> {
        self.ensure_status("start identity verification", &[CaseStatus::Draft])?;
        self.identity_verification = Some(VerificationStatus::Pending);
        Ok(())
    }

    pub fn complete_identity_verification(&mut self, success: bool) -> Result<()> {
        if self.identity_verification != Some(VerificationStatus::Pending) {
            return Err(LocError::InvalidCase(format!(
                "case {} has no identity verification in progress",
                self.id
            )));
        }
        self.identity_verification = Some(if success {
            VerificationStatus::Completed
        } else {
            VerificationStatus::Failed
        });
        Ok(())
    }

    pub fn add_delegate(&mut self, actor: &Identity, delegate: Identity) -> Result<()> {
        self.ensure_owner(actor, "add delegate")?;
        self.ensure_editable()?;
        if delegate == self.owner || self.requester_address() == Some(&delegate) {
            return Err(LocError::InvalidCase(format!(
                "{} is already a party of case {}",
                delegate, self.id
            )));
        }
        self.delegates.insert(delegate);
        Ok(())
    }

    pub fn remove_delegate(&mut self, actor: &Identity, delegate: &Identity) -> Result<()> {
        self.ensure_owner(actor, "remove delegate")?;
        self.ensure_editable()?;
        self.delegates.remove(delegate);
        Ok(())
    }

    pub fn items_visible_to<P: CaseItem>(&self, viewer: &Identity) -> Vec<&Item<P>> {
        P::collection(&self.items).visible_to(viewer, &self.context())
    }

    pub fn add_item<P: CaseItem>(&mut self, submitter: &Identity, payload: P) -> Result<ChangeSet> {
        self.ensure_editable()?;
        if !self.is_contributor(submitter) {
            return Err(LocError::forbidden(
                submitter,
                format!("add {} to case {}", P::KIND, self.id),
            ));
        }
        let mode = self.submission_mode_for(submitter);
        let changes = P::collection_mut(&mut self.items).add(submitter.clone(), mode, payload)?;
        debug!(case_id = %self.id, kind = %P::KIND, submitter = %submitter, "item added");
        Ok(changes)
    }

    pub fn remove_item<P: CaseItem>(&mut self, actor: &Identity, key: &P::Key) -> Result<ChangeSet> {
        self.ensure_editable()?;
        let (ctx, items) = self.split_items();
        P::collection_mut(items).remove(key, actor, &ctx)
    }

    fn mutate_item<P, F>(&mut self, key: &P::Key, mutation: F) -> Result<ChangeSet>
    where
        P: CaseItem,
        F: FnOnce(&mut Item<P>, &CaseContext<'_>) -> Result<ChangeSet>,
    {
        self.ensure_editable()?;
        let (ctx, items) = self.split_items();
        let item = P::collection_mut(items).require_mut(key)?;
        mutation(item, &ctx)
    }

    pub fn request_item_review<P: CaseItem>(&mut self, actor: &Identity, key: &P::Key) -> Result<ChangeSet> {
        self.mutate_item::<P, _>(key, |item, ctx| item.request_review(actor, ctx))
    }

    pub fn accept_item<P: CaseItem>(&mut self, actor: &Identity, key: &P::Key) -> Result<ChangeSet> {
        self.mutate_item::<P, _>(key, |item, ctx| item.accept(actor, ctx))
    }

    pub fn reject_item<P: CaseItem>(
        &mut self,
        actor: &Identity,
        key: &P::Key,
        reason: &str,
    ) -> Result<ChangeSet> {
        self.mutate_item::<P, _>(key, |item, ctx| item.reject(actor, ctx, reason))
    }

    pub fn can_pre_publish_or_acknowledge_item<P: CaseItem>(&self, actor: &Identity, key: &P::Key) -> bool {
        self.ensure_editable().is_ok()
            && P::collection(&self.items)
                .get(key)
                .is_some_and(|item| item.can_pre_publish_or_acknowledge(actor, &self.context()))
    }

    pub fn can_pre_acknowledge_item<P: CaseItem>(&self, actor: &Identity, key: &P::Key) -> bool {
        self.ensure_editable().is_ok()
            && P::collection(&self.items)
                .get(key)
                .is_some_and(|item| item.can_pre_acknowledge(actor, &self.context()))
    }

    pub fn confirm_pre_publish_or_ack_item<P: CaseItem>(
        &mut self,
        actor: &Identity,
        key: &P::Key,
    ) -> Result<ChangeSet> {
        self.mutate_item::<P, _>(key, |item, ctx| item.pre_publish_or_acknowledge(actor, ctx))
    }

    pub fn confirm_pre_ack_item<P: CaseItem>(&mut self, actor: &Identity, key: &P::Key) -> Result<ChangeSet> {
        self.mutate_item::<P, _>(key, |item, ctx| item.pre_acknowledge(actor, ctx))
    }

    pub fn cancel_pre_publish_or_ack_item<P: CaseItem>(
        &mut self,
        actor: &Identity,
        key: &P::Key,
    ) -> Result<ChangeSet> {
        self.mutate_item::<P, _>(key, |item, ctx| {
            item.cancel_pre_publish_or_acknowledge(actor, ctx)
        })
    }

    pub fn cancel_pre_ack_item<P: CaseItem>(&mut self, actor: &Identity, key: &P::Key) -> Result<ChangeSet> {
        self.mutate_item::<P, _>(key, |item, ctx| item.cancel_pre_acknowledge(actor, ctx))
    }

    // Chain stamps are applied whatever the case status: the ledger is authoritative.

    pub fn set_item_added_on<P: CaseItem>(
        &mut self,
        key: &P::Key,
        timestamp: DateTime<Utc>,
    ) -> Result<ChangeSet> {
        Ok(P::collection_mut(&mut self.items)
            .require_mut(key)?
            .set_added_on(timestamp))
    }

    pub fn set_item_fees<P: CaseItem>(&mut self, key: &P::Key, fees: Fees) -> Result<ChangeSet> {
        Ok(P::collection_mut(&mut self.items).require_mut(key)?.set_fees(fees))
    }

    pub fn set_item_acknowledged_on<P: CaseItem>(
        &mut self,
        key: &P::Key,
        timestamp: DateTime<Utc>,
    ) -> Result<ChangeSet> {
        Ok(P::collection_mut(&mut self.items)
            .require_mut(key)?
            .set_acknowledged_on(timestamp))
    }

    pub fn set_file_restricted_delivery(
        &mut self,
        actor: &Identity,
        hash: &ContentHash,
        restricted: bool,
    ) -> Result<ChangeSet> {
        self.ensure_owner(actor, "change file delivery")?;
        if self.is_void() {
            return Err(LocError::CaseVoid(self.id));
        }
        self.items.files.set_restricted_delivery(hash, restricted)
    }

    pub fn add_delivered_copy(&mut self, hash: &ContentHash, copy: DeliveredCopy) -> Result<ChangeSet> {
        if self.is_void() {
            return Err(LocError::CaseVoid(self.id));
        }
        self.items.files.add_delivered_copy(hash, copy)
    }

    /// Record a ledger collection entry; repeats are ignored
    pub fn add_collection_item(
        &mut self,
        item_id: impl Into<String>,
        added_on: DateTime<Utc>,
        fees: Fees,
    ) -> Result<Outcome> {
        if self.kind != CaseKind::Collection {
            return Err(LocError::InvalidCase(format!(
                "case {} is not a collection",
                self.id
            )));
        }
        let item_id = item_id.into();
        if self.collection_items.iter().any(|i| i.item_id == item_id) {
            warn!(case_id = %self.id, item_id = %item_id, "collection item already recorded");
            return Ok(Outcome::AlreadyApplied);
        }
        self.collection_items.push(CollectionItem {
            item_id,
            added_on,
            fees,
        });
        Ok(Outcome::Applied)
    }
}

/// Per-kind names for the generic item operations
macro_rules! item_operations {
    (
        $payload:ty, $key:ty {
            add: $add:ident,
            remove: $remove:ident,
            request_review: $request_review:ident,
            accept: $accept:ident,
            reject: $reject:ident,
            can_pre_publish_or_ack: $can_ppa:ident,
            can_pre_ack: $can_pa:ident,
            confirm_pre_publish_or_ack: $confirm_ppa:ident,
            confirm_pre_ack: $confirm_pa:ident,
            cancel_pre_publish_or_ack: $cancel_ppa:ident,
            cancel_pre_ack: $cancel_pa:ident,
            set_added_on: $set_added_on:ident,
            set_fees: $set_fees:ident,
            set_acknowledged_on: $set_acknowledged_on:ident,
            visible_to: $visible_to:ident,
        }
    ) => {
        impl Case {
            pub fn $add(&mut self, submitter: &Identity, payload: $payload) -> Result<ChangeSet> {
                self.add_item(submitter, payload)
            }

            pub fn $remove(&mut self, actor: &Identity, key: &$key) -> Result<ChangeSet> {
                self.remove_item::<$payload>(actor, key)
            }

            pub fn $request_review(&mut self, actor: &Identity, key: &$key) -> Result<ChangeSet> {
                self.request_item_review::<$payload>(actor, key)
            }

            pub fn $accept(&mut self, actor: &Identity, key: &$key) -> Result<ChangeSet> {
                self.accept_item::<$payload>(actor, key)
            }

            pub fn $reject(&mut self, actor: &Identity, key: &$key, reason: &str) -> Result<ChangeSet> {
                self.reject_item::<$payload>(actor, key, reason)
            }

            pub fn $can_ppa(&self, actor: &Identity, key: &$key) -> bool {
                self.can_pre_publish_or_acknowledge_item::<$payload>(actor, key)
            }

            pub fn $can_pa(&self, actor: &Identity, key: &$key) -> bool {
                self.can_pre_acknowledge_item::<$payload>(actor, key)
            }

            pub fn $confirm_ppa(&mut self, actor: &Identity, key: &$key) -> Result<ChangeSet> {
                self.confirm_pre_publish_or_ack_item::<$payload>(actor, key)
            }

            pub fn $confirm_pa(&mut self, actor: &Identity, key: &$key) -> Result<ChangeSet> {
                self.confirm_pre_ack_item::<$payload>(actor, key)
            }

            pub fn $cancel_ppa(&mut self, actor: &Identity, key: &$key) -> Result<ChangeSet> {
                self.cancel_pre_publish_or_ack_item::<$payload>(actor, key)
            }

            pub fn $cancel_pa(&mut self, actor: &Identity, key: &$key) -> Result<ChangeSet> {
                self.cancel_pre_ack_item::<$payload>(actor, key)
            }

            pub fn $set_added_on(&mut self, key: &$key, timestamp: DateTime<Utc>) -> Result<ChangeSet> {
                self.set_item_added_on::<$payload>(key, timestamp)
            }

            pub fn $set_fees(&mut self, key: &$key, fees: Fees) -> Result<ChangeSet> {
                self.set_item_fees::<$payload>(key, fees)
            }

            pub fn $set_acknowledged_on(
                &mut self,
                key: &$key,
                timestamp: DateTime<Utc>,
            ) -> Result<ChangeSet> {
                self.set_item_acknowledged_on::<$payload>(key, timestamp)
            }

            pub fn $visible_to(&self, viewer: &Identity) -> Vec<&Item<$payload>> {
                self.items_visible_to::<$payload>(viewer)
            }
        }
    };
}

item_operations!(FilePayload, ContentHash {
    add: add_file,
    remove: remove_file,
    request_review: request_file_review,
    accept: accept_file,
    reject: reject_file,
    can_pre_publish_or_ack: can_pre_publish_or_acknowledge_file,
    can_pre_ack: can_pre_acknowledge_file,
    confirm_pre_publish_or_ack: confirm_pre_publish_or_ack_file,
    confirm_pre_ack: confirm_pre_ack_file,
    cancel_pre_publish_or_ack: cancel_pre_publish_or_ack_file,
    cancel_pre_ack: cancel_pre_ack_file,
    set_added_on: set_file_added_on,
    set_fees: set_file_fees,
    set_acknowledged_on: set_file_acknowledged_on,
    visible_to: files_visible_to,
});

item_operations!(MetadataPayload, String {
    add: add_metadata,
    remove: remove_metadata,
    request_review: request_metadata_review,
    accept: accept_metadata,
    reject: reject_metadata,
    can_pre_publish_or_ack: can_pre_publish_or_acknowledge_metadata,
    can_pre_ack: can_pre_acknowledge_metadata,
    confirm_pre_publish_or_ack: confirm_pre_publish_or_ack_metadata,
    confirm_pre_ack: confirm_pre_ack_metadata,
    cancel_pre_publish_or_ack: cancel_pre_publish_or_ack_metadata,
    cancel_pre_ack: cancel_pre_ack_metadata,
    set_added_on: set_metadata_added_on,
    set_fees: set_metadata_fees,
    set_acknowledged_on: set_metadata_acknowledged_on,
    visible_to: metadata_visible_to,
});

item_operations!(LinkPayload, CaseId {
    add: add_link,
    remove: remove_link,
    request_review: request_link_review,
    accept: accept_link,
    reject: reject_link,
    can_pre_publish_or_ack: can_pre_publish_or_acknowledge_link,
    can_pre_ack: can_pre_acknowledge_link,
    confirm_pre_publish_or_ack: confirm_pre_publish_or_ack_link,
    confirm_pre_ack: confirm_pre_ack_link,
    cancel_pre_publish_or_ack: cancel_pre_publish_or_ack_link,
    cancel_pre_ack: cancel_pre_ack_link,
    set_added_on: set_link_added_on,
    set_fees: set_link_fees,
    set_acknowledged_on: set_link_acknowledged_on,
    visible_to: links_visible_to,
});

/// Criteria for listing cases; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    pub owner: Option<Identity>,
    pub requester: Option<Identity>,
    pub kind: Option<CaseKind>,
    pub statuses: Vec<CaseStatus>,
}

impl CaseFilter {
    pub fn matches(&self, case: &Case) -> bool {
        self.owner.as_ref().map_or(true, |owner| owner == &case.owner)
            && self
                .requester
                .as_ref()
                .map_or(true, |requester| case.requester_address() == Some(requester))
            && self.kind.map_or(true, |kind| kind == case.kind)
            && (self.statuses.is_empty() || self.statuses.contains(&case.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Identity {
        Identity::from("owner")
    }

    fn requester() -> Identity {
        Identity::from("requester")
    }

    fn definition(kind: CaseKind) -> NewCase {
        NewCase {
            id: CaseId::new(),
            owner: owner(),
            requester: Some(Requester::Address(requester())),
            description: "Deed of sale".to_string(),
            kind,
            seal: None,
        }
    }

    fn open_case() -> Case {
        Case::open(definition(CaseKind::Transaction), Utc::now()).unwrap()
    }

    fn metadata(name: &str) -> MetadataPayload {
        MetadataPayload {
            name: name.to_string(),
            value: "42".to_string(),
        }
    }

    #[test]
    fn test_identity_case_cannot_reference_identity_case() {
        let mut def = definition(CaseKind::Identity);
        def.requester = Some(Requester::IdentityCase(CaseId::new()));
        assert!(matches!(Case::draft(def).unwrap_err(), LocError::InvalidCase(_)));
    }

    #[test]
    fn test_requester_required_outside_draft() {
        let mut def = definition(CaseKind::Transaction);
        def.requester = None;
        assert!(Case::draft(def.clone()).is_ok());
        assert!(matches!(
            Case::request(def).unwrap_err(),
            LocError::MissingRequester(_)
        ));
    }

    #[test]
    fn test_seal_only_on_identity_cases() {
        let mut def = definition(CaseKind::Collection);
        def.seal = Some(Seal {
            hash: [7u8; 32],
            salt: "salt".to_string(),
            version: 1,
        });
        assert!(Case::draft(def.clone()).is_err());
        def.kind = CaseKind::Identity;
        assert!(Case::draft(def).is_ok());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut case = Case::draft(definition(CaseKind::Transaction)).unwrap();
        case.submit().unwrap();
        assert_eq!(case.status, CaseStatus::Requested);
        case.reject("missing id", Utc::now()).unwrap();
        assert_eq!(case.status, CaseStatus::Rejected);
        assert_eq!(case.rejection_reason.as_deref(), Some("missing id"));
        case.rework().unwrap();
        assert_eq!(case.status, CaseStatus::Draft);
        assert!(case.rejection_reason.is_none());
        case.submit().unwrap();
        case.accept(Utc::now()).unwrap();
        assert_eq!(case.status, CaseStatus::Open);
        case.pre_close().unwrap();
        assert_eq!(case.status, CaseStatus::Closed);
        assert!(case.closed_on.is_none());
    }

    #[test]
    fn test_invalid_transition_leaves_status() {
        let mut case = Case::draft(definition(CaseKind::Transaction)).unwrap();
        assert!(case.accept(Utc::now()).is_err());
        assert!(case.reject("no", Utc::now()).is_err());
        assert!(case.rework().is_err());
        assert!(case.pre_close().is_err());
        assert!(case.close(Utc::now()).is_err());
        assert!(case.pre_void("no").is_err());
        assert_eq!(case.status, CaseStatus::Draft);
        assert!(case.decision_on.is_none());
    }

    fn case_in(status: CaseStatus) -> Case {
        let now = Utc::now();
        let mut case = Case::request(definition(CaseKind::Transaction)).unwrap();
        match status {
            CaseStatus::Draft => return Case::draft(definition(CaseKind::Transaction)).unwrap(),
            CaseStatus::Requested => {}
            CaseStatus::Rejected => case.reject("incomplete", now).unwrap(),
            CaseStatus::Open => case.accept(now).unwrap(),
            CaseStatus::Closed => {
                case.accept(now).unwrap();
                case.pre_close().unwrap();
            }
        }
        assert_eq!(case.status, status);
        case
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Transition {
        Submit,
        Accept,
        Reject,
        Rework,
        PreClose,
        Close,
    }

    impl Transition {
        fn apply(self, case: &mut Case) -> Result<()> {
            let when = Utc::now() + chrono::Duration::hours(1);
            match self {
                Transition::Submit => case.submit(),
                Transition::Accept => case.accept(when),
                Transition::Reject => case.reject("late", when),
                Transition::Rework => case.rework(),
                Transition::PreClose => case.pre_close(),
                Transition::Close => case.close(when).map(drop),
            }
        }
    }

    #[test]
    fn test_transition_matrix() {
        use CaseStatus::*;
        use Transition::*;

        let allowed = [
            (Draft, Submit),
            (Requested, Accept),
            (Requested, Reject),
            (Rejected, Rework),
            (Open, PreClose),
            (Open, Close),
            (Closed, Close),
        ];

        for status in [Draft, Requested, Rejected, Open, Closed] {
            for transition in [Submit, Accept, Reject, Rework, PreClose, Close] {
                let mut case = case_in(status);
                let before = case.clone();
                let result = transition.apply(&mut case);

                if allowed.contains(&(status, transition)) {
                    assert!(result.is_ok(), "{:?} from {} should succeed", transition, status);
                } else {
                    assert!(
                        matches!(result, Err(LocError::InvalidStatus { .. })),
                        "{:?} from {} should fail",
                        transition,
                        status
                    );
                    assert_eq!(case.status, before.status);
                    assert_eq!(case.decision_on, before.decision_on);
                    assert_eq!(case, before);
                }
            }
        }
    }

    #[test]
    fn test_submit_blocked_by_pending_verification() {
        let mut case = Case::draft(definition(CaseKind::Identity)).unwrap();
        case.start_identity_verification().unwrap();
        assert!(matches!(
            case.submit().unwrap_err(),
            LocError::VerificationPending(_)
        ));
        assert_eq!(case.status, CaseStatus::Draft);

        case.complete_identity_verification(true).unwrap();
        case.submit().unwrap();
        assert_eq!(case.status, CaseStatus::Requested);
    }

    #[test]
    fn test_set_created_date_accepts_request() {
        let mut case = Case::request(definition(CaseKind::Transaction)).unwrap();
        let ts = Utc::now();
        assert_eq!(case.set_created_date(ts).unwrap(), Outcome::Applied);
        assert_eq!(case.status, CaseStatus::Open);
        assert_eq!(case.decision_on, Some(ts));
        assert_eq!(
            case.set_created_date(ts + chrono::Duration::seconds(1)).unwrap(),
            Outcome::AlreadyApplied
        );
        assert_eq!(case.created_on, Some(ts));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut case = open_case();
        let ts = Utc::now();
        assert_eq!(case.close(ts).unwrap(), Outcome::Applied);
        let snapshot = case.clone();
        assert_eq!(
            case.close(ts + chrono::Duration::seconds(30)).unwrap(),
            Outcome::AlreadyApplied
        );
        assert_eq!(case, snapshot);
    }

    #[test]
    fn test_void_sequencing() {
        let mut case = open_case();
        case.pre_void("duplicate").unwrap();
        assert!(case.is_pre_void());
        assert!(matches!(
            case.pre_void("again").unwrap_err(),
            LocError::AlreadyVoid { .. }
        ));

        let ts = Utc::now();
        assert_eq!(case.void_case(ts).unwrap(), Outcome::Applied);
        assert!(case.is_void());
        assert_eq!(case.void_info.as_ref().unwrap().reason, "duplicate");
        assert_eq!(case.void_case(ts).unwrap(), Outcome::AlreadyApplied);
        assert_eq!(
            case.void_case(ts + chrono::Duration::minutes(5)).unwrap(),
            Outcome::AlreadyApplied
        );
        assert_eq!(case.void_info.as_ref().unwrap().voided_on, Some(ts));
        assert!(matches!(case.ensure_editable().unwrap_err(), LocError::CaseVoid(_)));
    }

    #[test]
    fn test_void_without_pre_void_defaults_reason() {
        let mut case = open_case();
        case.close(Utc::now()).unwrap();
        let replacer = CaseId::new();
        case.void_case_and_replace(Utc::now(), replacer).unwrap();
        let info = case.void_info.unwrap();
        assert_eq!(info.reason, "");
        assert_eq!(info.replacer, Some(replacer));
    }

    #[test]
    fn test_items_require_editable_case() {
        let mut case = Case::request(definition(CaseKind::Transaction)).unwrap();
        let err = case.add_metadata(&requester(), metadata("price")).unwrap_err();
        assert!(matches!(err, LocError::InvalidStatus { operation: "edit", .. }));
    }

    #[test]
    fn test_only_contributors_add_items() {
        let mut case = open_case();
        let stranger = Identity::from("stranger");
        assert!(case.add_metadata(&stranger, metadata("price")).unwrap_err().is_forbidden());

        case.add_delegate(&owner(), stranger.clone()).unwrap();
        case.add_metadata(&stranger, metadata("price")).unwrap();
        let item = case.items.metadata.get(&"price".to_string()).unwrap();
        assert_eq!(item.mode, SubmissionMode::Delegated);
    }

    #[test]
    fn test_delegates_managed_by_owner_only() {
        let mut case = open_case();
        let err = case
            .add_delegate(&requester(), Identity::from("issuer"))
            .unwrap_err();
        assert!(err.is_forbidden());
        assert!(case.add_delegate(&owner(), requester()).is_err());
        assert!(case.delegates.is_empty());
    }

    #[test]
    fn test_owner_publishes_own_metadata() {
        let mut case = open_case();
        let name = "price".to_string();
        case.add_metadata(&owner(), metadata(&name)).unwrap();
        assert!(case.can_pre_publish_or_acknowledge_metadata(&owner(), &name));
        assert!(!case.can_pre_acknowledge_metadata(&owner(), &name));
        case.confirm_pre_publish_or_ack_metadata(&owner(), &name).unwrap();

        let ts = Utc::now();
        let changes = case.set_metadata_added_on(&name, ts).unwrap();
        assert!(changes.is_update_only());
        assert!(!case.items.metadata.get(&name).unwrap().is_draft());
        assert!(case.remove_metadata(&owner(), &name).is_err());
    }

    #[test]
    fn test_chain_stamp_on_missing_item_fails() {
        let mut case = open_case();
        let err = case
            .set_file_added_on(&ContentHash::from("nope"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LocError::ItemNotFound { .. }));
    }

    #[test]
    fn test_collection_items() {
        let mut case = Case::open(definition(CaseKind::Collection), Utc::now()).unwrap();
        let ts = Utc::now();
        assert_eq!(
            case.add_collection_item("item-1", ts, Fees::new(5, None)).unwrap(),
            Outcome::Applied
        );
        assert_eq!(
            case.add_collection_item("item-1", ts, Fees::new(5, None)).unwrap(),
            Outcome::AlreadyApplied
        );
        assert_eq!(case.collection_items.len(), 1);

        let mut tx = open_case();
        assert!(tx.add_collection_item("item-1", ts, Fees::default()).is_err());
    }

    #[test]
    fn test_filter() {
        let case = open_case();
        assert!(CaseFilter::default().matches(&case));
        assert!(CaseFilter {
            owner: Some(owner()),
            statuses: vec![CaseStatus::Open],
            ..CaseFilter::default()
        }
        .matches(&case));
        assert!(!CaseFilter {
            requester: Some(owner()),
            ..CaseFilter::default()
        }
        .matches(&case));
        assert!(!CaseFilter {
            kind: Some(CaseKind::Identity),
            ..CaseFilter::default()
        }
        .matches(&case));
    }
}
