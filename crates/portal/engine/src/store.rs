//! Job storage
//!
//! The engine persists jobs, their execution logs and their artifacts
//! through [`JobStore`]. Execution logs are append-only: entries from a
//! retried attempt are added after the earlier attempt's entries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_types::{
    BrowserAutomationJob, BrowserJobStatus, ExecutionLog, JobArtifact, JobId, JobType,
    PortalConfigId, PortalError, TenantId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// ── Errors ───────────────────────────────────────────────────────────

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for PortalError {
    fn from(err: StorageError) -> Self {
        PortalError::Storage(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

// ── Filter ───────────────────────────────────────────────────────────

/// Criteria for listing jobs; empty fields match everything
#[derive(Clone, Debug, Default)]
pub struct JobFilter {
    pub tenant_id: Option<TenantId>,
    pub portal_config_id: Option<PortalConfigId>,
    pub job_type: Option<JobType>,
    pub statuses: Vec<BrowserJobStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tenant(mut self, tenant: &TenantId) -> Self {
        self.tenant_id = Some(tenant.clone());
        self
    }

    pub fn portal(mut self, portal: &PortalConfigId) -> Self {
        self.portal_config_id = Some(portal.clone());
        self
    }

    pub fn job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = BrowserJobStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &BrowserAutomationJob) -> bool {
        self.tenant_id.as_ref().map_or(true, |t| job.tenant_id == *t)
            && self
                .portal_config_id
                .as_ref()
                .map_or(true, |p| job.portal_config_id == *p)
            && self.job_type.map_or(true, |t| job.job_type == t)
            && (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.created_after.map_or(true, |at| job.created_at >= at)
    }
}

// ── Trait ────────────────────────────────────────────────────────────

/// Storage for browser automation jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job; fails with `Conflict` if the id exists
    async fn insert_job(&self, job: BrowserAutomationJob) -> StorageResult<()>;

    /// Replace an existing job; fails with `NotFound` if it does not exist
    async fn update_job(&self, job: BrowserAutomationJob) -> StorageResult<()>;

    async fn get_job(&self, id: &JobId) -> StorageResult<Option<BrowserAutomationJob>>;

    /// Jobs matching `filter`, oldest first
    async fn list_jobs(&self, filter: &JobFilter) -> StorageResult<Vec<BrowserAutomationJob>>;

    /// Append an attempt's entries to the job's execution log
    async fn append_log(&self, job_id: &JobId, log: ExecutionLog) -> StorageResult<()>;

    async fn get_log(&self, job_id: &JobId) -> StorageResult<ExecutionLog>;

    async fn add_artifacts(&self, job_id: &JobId, artifacts: Vec<JobArtifact>) -> StorageResult<()>;

    async fn list_artifacts(&self, job_id: &JobId) -> StorageResult<Vec<JobArtifact>>;
}

// ── In-memory ────────────────────────────────────────────────────────

/// In-memory job storage for development and testing
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, BrowserAutomationJob>>>,
    logs: Arc<RwLock<HashMap<JobId, ExecutionLog>>>,
    artifacts: Arc<RwLock<HashMap<JobId, Vec<JobArtifact>>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_job(&self, job: BrowserAutomationJob) -> StorageResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StorageError::Conflict(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn update_job(&self, job: BrowserAutomationJob) -> StorageResult<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("job {}", job.id))),
        }
    }

    async fn get_job(&self, id: &JobId) -> StorageResult<Option<BrowserAutomationJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StorageResult<Vec<BrowserAutomationJob>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<BrowserAutomationJob> =
            jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn append_log(&self, job_id: &JobId, log: ExecutionLog) -> StorageResult<()> {
        let mut logs = self.logs.write().await;
        logs.entry(job_id.clone()).or_default().extend(log);
        Ok(())
    }

    async fn get_log(&self, job_id: &JobId) -> StorageResult<ExecutionLog> {
        let logs = self.logs.read().await;
        Ok(logs.get(job_id).cloned().unwrap_or_default())
    }

    async fn add_artifacts(&self, job_id: &JobId, artifacts: Vec<JobArtifact>) -> StorageResult<()> {
        let mut stored = self.artifacts.write().await;
        stored.entry(job_id.clone()).or_default().extend(artifacts);
        Ok(())
    }

    async fn list_artifacts(&self, job_id: &JobId) -> StorageResult<Vec<JobArtifact>> {
        let stored = self.artifacts.read().await;
        Ok(stored.get(job_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::{CreateJobRequest, WorkflowDefinition, WorkflowStep};

    fn job(tenant: &str, job_type: JobType) -> BrowserAutomationJob {
        let request = CreateJobRequest::new(PortalConfigId::new("portal-1"), job_type, "tester");
        let workflow = WorkflowDefinition::new(job_type.as_str(), 1000)
            .with_steps(vec![WorkflowStep::screenshot()]);
        BrowserAutomationJob::new(
            TenantId::new(tenant),
            &request,
            "https://portal.test".into(),
            workflow,
            false,
        )
    }

    #[tokio::test]
    async fn insert_update_and_conflict() {
        let store = InMemoryJobStore::new();
        let mut j = job("t1", JobType::AcceptOrder);
        store.insert_job(j.clone()).await.unwrap();
        assert!(matches!(
            store.insert_job(j.clone()).await,
            Err(StorageError::Conflict(_))
        ));

        j.retry_count = 2;
        store.update_job(j.clone()).await.unwrap();
        assert_eq!(store.get_job(&j.id).await.unwrap().unwrap().retry_count, 2);

        let missing = job("t1", JobType::AcceptOrder);
        assert!(matches!(
            store.update_job(missing).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn filters_by_tenant_type_and_status() {
        let store = InMemoryJobStore::new();
        store.insert_job(job("t1", JobType::AcceptOrder)).await.unwrap();
        store.insert_job(job("t1", JobType::CheckStatus)).await.unwrap();
        store.insert_job(job("t2", JobType::AcceptOrder)).await.unwrap();

        let filter = JobFilter::new()
            .tenant(&TenantId::new("t1"))
            .job_type(JobType::AcceptOrder)
            .statuses([BrowserJobStatus::Pending]);
        assert_eq!(store.list_jobs(&filter).await.unwrap().len(), 1);

        let filter = JobFilter::new().statuses([BrowserJobStatus::Running]);
        assert!(store.list_jobs(&filter).await.unwrap().is_empty());

        let filter = JobFilter::new().limit(2);
        assert_eq!(store.list_jobs(&filter).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn logs_append_across_attempts() {
        use portal_types::{StepAction, StepOutcome, StepRecord};

        let store = InMemoryJobStore::new();
        let id = JobId::new("job-1");
        for _ in 0..2 {
            let mut log = ExecutionLog::new();
            log.append(StepRecord {
                step_index: 0,
                action: StepAction::Navigate,
                selector: None,
                url: Some("https://portal.test".into()),
                outcome: StepOutcome::Succeeded,
                duration_ms: 5,
                artifacts: vec![],
                recorded_at: Utc::now(),
            });
            store.append_log(&id, log).await.unwrap();
        }
        assert_eq!(store.get_log(&id).await.unwrap().len(), 2);
        assert!(store.get_log(&JobId::new("other")).await.unwrap().is_empty());
    }
}
