//! Ledger operation dispatch
//!
//! Maps each `loc.*` operation onto the chain stamps of its target case.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::{
    Case, CaseId, ChangeSet, ContentHash, Fees, Identity, LedgerOperation, OperationKind,
    TargetPolicy,
};
use crate::infra::{CaseService, LocError, Result};

/// Outcome of dispatching one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Target case stamped and saved
    Applied { case_id: CaseId },

    /// Operation ignored (failed, foreign, not ours, or nothing to do)
    Skipped { reason: String },
}

impl DispatchResult {
    fn skipped(reason: impl Into<String>) -> Self {
        DispatchResult::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, DispatchResult::Applied { .. })
    }
}

/// Chain facts an operation carries for its target case
#[derive(Debug, Clone, PartialEq)]
enum ChainStamp {
    Created { fees: Fees },
    FileAdded { hash: ContentHash, fees: Fees },
    MetadataAdded { name: String, fees: Fees },
    LinkAdded { target: CaseId, fees: Fees },
    FileAcknowledged { hash: ContentHash },
    MetadataAcknowledged { name: String },
    LinkAcknowledged { target: CaseId },
    Closed,
    Voided { replacer: Option<CaseId> },
    CollectionItemAdded { item_id: String, fees: Fees },
}

impl ChainStamp {
    /// `Ok(None)` for kinds with no case mutation
    fn from_operation(kind: OperationKind, op: &LedgerOperation) -> Result<Option<Self>> {
        let stamp = match kind {
            OperationKind::CreateIdentity
            | OperationKind::CreateTransaction
            | OperationKind::CreateCollection => ChainStamp::Created {
                fees: op.inclusion_fees()?,
            },
            OperationKind::AddFile => ChainStamp::FileAdded {
                hash: ContentHash::new(op.str_arg("hash")?),
                fees: op.storage_fees()?,
            },
            OperationKind::AddMetadata => ChainStamp::MetadataAdded {
                name: op.str_arg("name")?.to_string(),
                fees: op.inclusion_fees()?,
            },
            OperationKind::AddLink => ChainStamp::LinkAdded {
                target: op.case_id_arg("target")?,
                fees: op.inclusion_fees()?,
            },
            OperationKind::AcknowledgeFile => ChainStamp::FileAcknowledged {
                hash: ContentHash::new(op.str_arg("hash")?),
            },
            OperationKind::AcknowledgeMetadata => ChainStamp::MetadataAcknowledged {
                name: op.str_arg("name")?.to_string(),
            },
            OperationKind::AcknowledgeLink => ChainStamp::LinkAcknowledged {
                target: op.case_id_arg("target")?,
            },
            OperationKind::Close => ChainStamp::Closed,
            OperationKind::MakeVoid => ChainStamp::Voided { replacer: None },
            OperationKind::MakeVoidAndReplace => ChainStamp::Voided {
                replacer: Some(op.case_id_arg("replacer_id")?),
            },
            OperationKind::AddCollectionItem => ChainStamp::CollectionItemAdded {
                item_id: op.str_arg("item_id")?.to_string(),
                fees: op.inclusion_fees()?,
            },
            OperationKind::NominateIssuer
            | OperationKind::DismissIssuer
            | OperationKind::SetIssuerSelection
            | OperationKind::Sponsor => return Ok(None),
        };
        Ok(Some(stamp))
    }

    fn apply(self, case: &mut Case, timestamp: DateTime<Utc>) -> Result<ChangeSet> {
        match self {
            ChainStamp::Created { fees } => {
                case.set_created_date(timestamp)?;
                case.set_creation_fees(fees);
                Ok(ChangeSet::empty())
            }
            ChainStamp::FileAdded { hash, fees } => {
                let mut changes = case.set_file_added_on(&hash, timestamp)?;
                changes.merge(case.set_file_fees(&hash, fees)?);
                Ok(changes)
            }
            ChainStamp::MetadataAdded { name, fees } => {
                let mut changes = case.set_metadata_added_on(&name, timestamp)?;
                changes.merge(case.set_metadata_fees(&name, fees)?);
                Ok(changes)
            }
            ChainStamp::LinkAdded { target, fees } => {
                let mut changes = case.set_link_added_on(&target, timestamp)?;
                changes.merge(case.set_link_fees(&target, fees)?);
                Ok(changes)
            }
            ChainStamp::FileAcknowledged { hash } => case.set_file_acknowledged_on(&hash, timestamp),
            ChainStamp::MetadataAcknowledged { name } => {
                case.set_metadata_acknowledged_on(&name, timestamp)
            }
            ChainStamp::LinkAcknowledged { target } => {
                case.set_link_acknowledged_on(&target, timestamp)
            }
            ChainStamp::Closed => case.close(timestamp).map(|_| ChangeSet::empty()),
            ChainStamp::Voided { replacer: None } => {
                case.void_case(timestamp).map(|_| ChangeSet::empty())
            }
            ChainStamp::Voided {
                replacer: Some(replacer),
            } => case
                .void_case_and_replace(timestamp, replacer)
                .map(|_| ChangeSet::empty()),
            ChainStamp::CollectionItemAdded { item_id, fees } => case
                .add_collection_item(item_id, timestamp, fees)
                .map(|_| ChangeSet::empty()),
        }
    }
}

/// Applies ledger operations to the cases owned by this node
pub struct OperationDispatcher {
    cases: Arc<CaseService>,
    node_owner: Identity,
}

impl OperationDispatcher {
    pub fn new(cases: Arc<CaseService>, node_owner: Identity) -> Self {
        Self { cases, node_owner }
    }

    /// Dispatch one operation of a block stamped `timestamp`.
    ///
    /// Any error aborts the current synchronization cycle.
    #[instrument(skip(self, op, timestamp), fields(kind = %op.kind))]
    pub async fn dispatch(
        &self,
        op: &LedgerOperation,
        timestamp: DateTime<Utc>,
    ) -> Result<DispatchResult> {
        if op.failed {
            debug!("operation failed on chain, skipping");
            return Ok(DispatchResult::skipped("failed on chain"));
        }

        let kind = match OperationKind::classify(&op.kind)? {
            Some(kind) => kind,
            None => return Ok(DispatchResult::skipped("foreign operation")),
        };

        let policy = kind.target_policy();
        if policy == TargetPolicy::Untargeted {
            debug!("operation does not affect cases");
            return Ok(DispatchResult::skipped("no case mutation"));
        }

        let case_id = op.case_id_arg("loc_id")?;
        let case = match self.cases.find(&case_id).await? {
            Some(case) => case,
            None if policy == TargetPolicy::Tolerant => {
                debug!(case_id = %case_id, "target case unknown, skipping");
                return Ok(DispatchResult::skipped("unknown target case"));
            }
            None => {
                return Err(LocError::MissingTarget {
                    kind: op.kind.clone(),
                    case_id,
                })
            }
        };

        if case.owner != self.node_owner {
            debug!(case_id = %case_id, owner = %case.owner, "case owned by another node, skipping");
            return Ok(DispatchResult::skipped("case owned by another node"));
        }

        let stamp = match ChainStamp::from_operation(kind, op)? {
            Some(stamp) => stamp,
            None => return Ok(DispatchResult::skipped("no case mutation")),
        };

        self.cases
            .mutate(case_id, move |case| stamp.apply(case, timestamp))
            .await?;
        debug!(case_id = %case_id, "chain stamp applied");
        Ok(DispatchResult::Applied { case_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CaseKind, CaseStatus, MetadataPayload, NewCase, Requester};
    use crate::infra::{CaseRepository, InMemoryCaseRepository};
    use serde_json::json;

    fn node_owner() -> Identity {
        Identity::from("node-owner")
    }

    async fn setup(owner: Identity) -> (OperationDispatcher, Arc<InMemoryCaseRepository>, CaseId) {
        let repo = Arc::new(InMemoryCaseRepository::new());
        let case = Case::open(
            NewCase {
                id: CaseId::new(),
                owner,
                requester: Some(Requester::Address(Identity::from("requester"))),
                description: "test".to_string(),
                kind: CaseKind::Transaction,
                seal: None,
            },
            Utc::now(),
        )
        .unwrap();
        let id = case.id;
        repo.insert(case).await;
        let service = Arc::new(CaseService::new(repo.clone()));
        (OperationDispatcher::new(service, node_owner()), repo, id)
    }

    #[tokio::test]
    async fn test_close_stamps_case() {
        let (dispatcher, repo, id) = setup(node_owner()).await;
        let ts = Utc::now();
        let op = LedgerOperation::new("loc.close", json!({ "loc_id": id.to_string() }));

        let result = dispatcher.dispatch(&op, ts).await.unwrap();
        assert_eq!(result, DispatchResult::Applied { case_id: id });
        let case = repo.get(&id).await.unwrap();
        assert_eq!(case.status, CaseStatus::Closed);
        assert_eq!(case.closed_on, Some(ts));
    }

    #[tokio::test]
    async fn test_skips_cases_of_other_owners() {
        let (dispatcher, repo, id) = setup(Identity::from("someone-else")).await;
        let op = LedgerOperation::new("loc.close", json!({ "loc_id": id.to_string() }));

        let result = dispatcher.dispatch(&op, Utc::now()).await.unwrap();
        assert!(!result.is_applied());
        assert_eq!(repo.get(&id).await.unwrap().status, CaseStatus::Open);
        assert!(repo.saves().await.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_stamp_records_fees() {
        let (dispatcher, repo, id) = setup(node_owner()).await;
        let mut case = repo.get(&id).await.unwrap();
        case.add_metadata(
            &node_owner(),
            MetadataPayload {
                name: "price".to_string(),
                value: "10".to_string(),
            },
        )
        .unwrap();
        repo.save(&case, &ChangeSet::empty()).await.unwrap();

        let op = LedgerOperation::new(
            "loc.add_metadata",
            json!({ "loc_id": id.to_string(), "name": "price" }),
        )
        .with_partial_fee(12);
        dispatcher.dispatch(&op, Utc::now()).await.unwrap();

        let case = repo.get(&id).await.unwrap();
        let item = case.items.metadata.get(&"price".to_string()).unwrap();
        assert!(!item.is_draft());
        assert_eq!(item.fees, Some(Fees::new(12, None)));

        let (_, changes) = repo.saves().await.pop().unwrap();
        assert!(changes.is_update_only());
        assert_eq!(changes.updated.len(), 1);
    }

    #[tokio::test]
    async fn test_issuer_operations_are_recognized() {
        let (dispatcher, _repo, _id) = setup(node_owner()).await;
        let op = LedgerOperation::new("loc.nominate_issuer", json!({ "issuer": "bob" }));
        assert!(matches!(
            dispatcher.dispatch(&op, Utc::now()).await.unwrap(),
            DispatchResult::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_loc_id_is_malformed() {
        let (dispatcher, _repo, _id) = setup(node_owner()).await;
        let op = LedgerOperation::new("loc.close", json!({}));
        assert!(matches!(
            dispatcher.dispatch(&op, Utc::now()).await.unwrap_err(),
            LocError::MalformedOperation { .. }
        ));
    }

    #[test]
    fn test_void_and_replace_requires_replacer() {
        let op = LedgerOperation::new("loc.make_void_and_replace", json!({ "loc_id": "x" }));
        assert!(ChainStamp::from_operation(OperationKind::MakeVoidAndReplace, &op).is_err());

        let replacer = CaseId::new();
        let op = LedgerOperation::new(
            "loc.make_void_and_replace",
            json!({ "replacer_id": replacer.to_string() }),
        );
        assert_eq!(
            ChainStamp::from_operation(OperationKind::MakeVoidAndReplace, &op).unwrap(),
            Some(ChainStamp::Voided {
                replacer: Some(replacer)
            })
        );
    }
}
