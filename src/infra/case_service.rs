//! Case service
//!
//! Loads an aggregate, runs one mutation on a working copy and persists the
//! result only when the mutation succeeded.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::{Case, CaseFilter, CaseId, ChangeSet};

use super::{CaseRepository, LocError, Result};

pub struct CaseService {
    repository: Arc<dyn CaseRepository>,
}

impl CaseService {
    pub fn new(repository: Arc<dyn CaseRepository>) -> Self {
        Self { repository }
    }

    /// Persist a freshly built case
    #[instrument(skip(self, case), fields(case_id = %case.id))]
    pub async fn create(&self, case: Case) -> Result<Case> {
        if self.repository.find_by_id(&case.id).await?.is_some() {
            return Err(LocError::InvalidCase(format!("case {} already exists", case.id)));
        }
        self.repository.save(&case, &ChangeSet::empty()).await?;
        debug!(status = %case.status, "case created");
        Ok(case)
    }

    pub async fn find(&self, id: &CaseId) -> Result<Option<Case>> {
        self.repository.find_by_id(id).await
    }

    pub async fn get(&self, id: &CaseId) -> Result<Case> {
        self.find(id).await?.ok_or(LocError::CaseNotFound(*id))
    }

    pub async fn list(&self, filter: &CaseFilter) -> Result<Vec<Case>> {
        self.repository.find_by(filter).await
    }

    pub async fn save(&self, case: &Case, changes: &ChangeSet) -> Result<()> {
        self.repository.save(case, changes).await
    }

    /// Apply `mutation` to the stored case; on error nothing is written
    #[instrument(skip(self, mutation))]
    pub async fn mutate<F>(&self, id: CaseId, mutation: F) -> Result<Case>
    where
        F: FnOnce(&mut Case) -> Result<ChangeSet> + Send,
    {
        let mut case = self.get(&id).await?;
        let changes = mutation(&mut case)?;
        self.repository.save(&case, &changes).await?;
        Ok(case)
    }
}
