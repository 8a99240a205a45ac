//! Ledger blocks and operations as handed over by the ledger client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::infra::{LocError, Result};

use super::{CaseId, Fees};

/// One operation extracted from a block, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerOperation {
    /// Namespaced kind, e.g. `loc.add_file`
    pub kind: String,
    #[serde(default)]
    pub args: serde_json::Value,
    /// Set when the ledger itself reports the operation as failed
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_fee: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_fee: Option<u128>,
}

impl LedgerOperation {
    pub fn new(kind: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            args,
            failed: false,
            partial_fee: None,
            storage_fee: None,
        }
    }

    pub fn with_partial_fee(mut self, fee: u128) -> Self {
        self.partial_fee = Some(fee);
        self
    }

    pub fn with_storage_fee(mut self, fee: u128) -> Self {
        self.storage_fee = Some(fee);
        self
    }

    pub fn failed(mut self) -> Self {
        self.failed = true;
        self
    }

    fn malformed(&self, reason: impl Into<String>) -> LocError {
        LocError::MalformedOperation {
            kind: self.kind.clone(),
            reason: reason.into(),
        }
    }

    pub fn str_arg(&self, name: &str) -> Result<&str> {
        self.args
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| self.malformed(format!("missing {}", name)))
    }

    pub fn case_id_arg(&self, name: &str) -> Result<CaseId> {
        self.str_arg(name)?
            .parse()
            .map_err(|e| self.malformed(format!("invalid {}: {}", name, e)))
    }

    /// Inclusion fee only
    pub fn inclusion_fees(&self) -> Result<Fees> {
        let inclusion_fee = self.partial_fee.ok_or_else(|| LocError::MissingFee {
            kind: self.kind.clone(),
            fee: "partial_fee",
        })?;
        Ok(Fees::new(inclusion_fee, self.storage_fee))
    }

    /// Inclusion and storage fees, both mandatory
    pub fn storage_fees(&self) -> Result<Fees> {
        let fees = self.inclusion_fees()?;
        if fees.storage_fee.is_none() {
            return Err(LocError::MissingFee {
                kind: self.kind.clone(),
                fee: "storage_fee",
            });
        }
        Ok(fees)
    }
}

/// Operations of one block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBlock {
    pub height: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub operations: Vec<LedgerOperation>,
}

/// How an operation relates to its target case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPolicy {
    /// The case must exist locally
    Mandatory,
    /// A missing case makes the operation a no-op
    Tolerant,
    /// The operation does not touch cases
    Untargeted,
}

/// The fixed set of `loc.*` operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateIdentity,
    CreateTransaction,
    CreateCollection,
    AddFile,
    AddMetadata,
    AddLink,
    AcknowledgeFile,
    AcknowledgeMetadata,
    AcknowledgeLink,
    Close,
    MakeVoid,
    MakeVoidAndReplace,
    AddCollectionItem,
    NominateIssuer,
    DismissIssuer,
    SetIssuerSelection,
    Sponsor,
}

impl OperationKind {
    pub const NAMESPACE: &'static str = "loc";

    pub const ALL: [OperationKind; 17] = [
        OperationKind::CreateIdentity,
        OperationKind::CreateTransaction,
        OperationKind::CreateCollection,
        OperationKind::AddFile,
        OperationKind::AddMetadata,
        OperationKind::AddLink,
        OperationKind::AcknowledgeFile,
        OperationKind::AcknowledgeMetadata,
        OperationKind::AcknowledgeLink,
        OperationKind::Close,
        OperationKind::MakeVoid,
        OperationKind::MakeVoidAndReplace,
        OperationKind::AddCollectionItem,
        OperationKind::NominateIssuer,
        OperationKind::DismissIssuer,
        OperationKind::SetIssuerSelection,
        OperationKind::Sponsor,
    ];

    pub fn method(&self) -> &'static str {
        match self {
            OperationKind::CreateIdentity => "create_identity",
            OperationKind::CreateTransaction => "create_transaction",
            OperationKind::CreateCollection => "create_collection",
            OperationKind::AddFile => "add_file",
            OperationKind::AddMetadata => "add_metadata",
            OperationKind::AddLink => "add_link",
            OperationKind::AcknowledgeFile => "acknowledge_file",
            OperationKind::AcknowledgeMetadata => "acknowledge_metadata",
            OperationKind::AcknowledgeLink => "acknowledge_link",
            OperationKind::Close => "close",
            OperationKind::MakeVoid => "make_void",
            OperationKind::MakeVoidAndReplace => "make_void_and_replace",
            OperationKind::AddCollectionItem => "add_collection_item",
            OperationKind::NominateIssuer => "nominate_issuer",
            OperationKind::DismissIssuer => "dismiss_issuer",
            OperationKind::SetIssuerSelection => "set_issuer_selection",
            OperationKind::Sponsor => "sponsor",
        }
    }

    /// `Ok(None)` for kinds outside the `loc` namespace; unknown `loc` kinds
    /// are an error.
    pub fn classify(kind: &str) -> Result<Option<Self>> {
        let method = match kind
            .split_once('.')
            .filter(|(namespace, _)| *namespace == Self::NAMESPACE)
        {
            Some((_, method)) => method,
            None => return Ok(None),
        };
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.method() == method)
            .map(Some)
            .ok_or_else(|| LocError::UnexpectedOperation(kind.to_string()))
    }

    pub fn target_policy(&self) -> TargetPolicy {
        match self {
            OperationKind::AddCollectionItem => TargetPolicy::Tolerant,
            OperationKind::NominateIssuer
            | OperationKind::DismissIssuer
            | OperationKind::SetIssuerSelection
            | OperationKind::Sponsor => TargetPolicy::Untargeted,
            _ => TargetPolicy::Mandatory,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", Self::NAMESPACE, self.method())
    }
}
