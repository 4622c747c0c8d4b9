//! Workflow recorder
//!
//! Captures a user's actions on a portal as an ordered list of recorded
//! steps, validates the recording and converts it into a workflow
//! definition that runs as a `custom_workflow` job. Generated definitions
//! always require approval.

use chrono::{DateTime, Utc};
use portal_types::{
    PortalConfigId, PortalError, PortalResult, RecordingId, TenantId, WorkflowDefinition,
    WorkflowStep,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Timeout given to converted click, fill and select steps.
pub const RECORDED_ELEMENT_TIMEOUT_MS: u64 = 5_000;
/// Timeout given to converted navigate steps.
pub const RECORDED_NAVIGATE_TIMEOUT_MS: u64 = 30_000;
/// Added on top of the summed step timeouts.
pub const WORKFLOW_TIMEOUT_MARGIN_MS: u64 = 30_000;
/// Upper bound on a generated workflow's time budget.
pub const MAX_WORKFLOW_TIMEOUT_MS: u64 = 300_000;

// ── Recorded data ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedAction {
    Click,
    Fill,
    Select,
    Navigate,
    Scroll,
}

impl std::fmt::Display for RecordedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Click => "click",
            Self::Fill => "fill",
            Self::Select => "select",
            Self::Navigate => "navigate",
            Self::Scroll => "scroll",
        };
        f.write_str(text)
    }
}

/// An action captured in the browser, as submitted by the recording client
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordedInput {
    pub action: RecordedAction,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RecordedInput {
    pub fn new(action: RecordedAction) -> Self {
        Self {
            action,
            selector: None,
            value: None,
            url: None,
            timestamp: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedStep {
    /// Position in the recording, starting at 1
    pub sequence: u32,
    pub action: RecordedAction,
    pub selector: Option<String>,
    pub value: Option<String>,
    pub url: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl RecordedStep {
    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let n = self.sequence;
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        if matches!(
            self.action,
            RecordedAction::Click | RecordedAction::Fill | RecordedAction::Select
        ) && blank(&self.selector)
        {
            errors.push(format!(
                "Step {}: Selector is required for {} action",
                n, self.action
            ));
        }
        if self.action == RecordedAction::Fill && blank(&self.value) {
            errors.push(format!("Step {}: Value is required for fill action", n));
        }
        if self.action == RecordedAction::Navigate && blank(&self.url) {
            errors.push(format!("Step {}: URL is required for navigate action", n));
        }
        errors
    }

    /// The executable step, or `None` for actions that have no replay (scroll).
    fn to_workflow_step(&self) -> Option<WorkflowStep> {
        let selector = self.selector.clone().unwrap_or_default();
        let value = self.value.clone().unwrap_or_default();
        let step = match self.action {
            RecordedAction::Click => {
                WorkflowStep::click(selector).with_timeout(RECORDED_ELEMENT_TIMEOUT_MS)
            }
            RecordedAction::Fill => {
                WorkflowStep::fill(selector, value).with_timeout(RECORDED_ELEMENT_TIMEOUT_MS)
            }
            RecordedAction::Select => {
                WorkflowStep::select(selector, value).with_timeout(RECORDED_ELEMENT_TIMEOUT_MS)
            }
            RecordedAction::Navigate => {
                WorkflowStep::navigate(self.url.clone().unwrap_or_default())
                    .with_timeout(RECORDED_NAVIGATE_TIMEOUT_MS)
            }
            RecordedAction::Scroll => return None,
        };
        Some(step)
    }
}

/// A recording session and, once stopped, a replayable workflow
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordedWorkflow {
    pub id: RecordingId,
    pub tenant_id: TenantId,
    pub portal_config_id: PortalConfigId,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<RecordedStep>,
    pub start_url: Option<String>,
    /// Steps may only be added while the recording is active
    pub is_active: bool,
    pub is_validated: bool,
    pub validated_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordedWorkflow {
    /// Executable steps: a leading navigation to the start URL, then each replayable step.
    pub fn to_workflow_steps(&self) -> Vec<WorkflowStep> {
        let start = self
            .start_url
            .as_ref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| WorkflowStep::navigate(url.clone()));
        start
            .into_iter()
            .chain(self.steps.iter().filter_map(RecordedStep::to_workflow_step))
            .collect()
    }

    /// A custom workflow definition; always requires approval.
    pub fn to_workflow_definition(&self) -> WorkflowDefinition {
        let steps = self.to_workflow_steps();
        let total: u64 = steps
            .iter()
            .map(|s| s.timeout_ms.unwrap_or(RECORDED_ELEMENT_TIMEOUT_MS))
            .sum();
        let description = self
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Custom workflow: {}", self.name));

        WorkflowDefinition::new(
            self.name.clone(),
            (total + WORKFLOW_TIMEOUT_MARGIN_MS).min(MAX_WORKFLOW_TIMEOUT_MS),
        )
        .with_description(description)
        .with_steps(steps)
        .with_approval(true)
    }
}

/// Outcome of `validate_recording`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordingValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordingUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

// ── Recorder ─────────────────────────────────────────────────────────

/// In-memory store of tenant recordings
#[derive(Debug, Default)]
pub struct WorkflowRecorder {
    recordings: HashMap<RecordingId, RecordedWorkflow>,
}

impl WorkflowRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_recording(
        &mut self,
        tenant: &TenantId,
        portal_config_id: &PortalConfigId,
        name: &str,
        created_by: &str,
    ) -> PortalResult<RecordedWorkflow> {
        if name.trim().is_empty() {
            return Err(PortalError::InvalidRequest("recording name is required".into()));
        }
        let now = Utc::now();
        let recording = RecordedWorkflow {
            id: RecordingId::generate(),
            tenant_id: tenant.clone(),
            portal_config_id: portal_config_id.clone(),
            name: name.trim().to_string(),
            description: None,
            steps: Vec::new(),
            start_url: None,
            is_active: true,
            is_validated: false,
            validated_at: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };
        tracing::info!(
            recording_id = %recording.id,
            portal_config_id = %portal_config_id,
            "Recording started"
        );
        self.recordings.insert(recording.id.clone(), recording.clone());
        Ok(recording)
    }

    /// Append a captured action; returns the stored step.
    pub fn add_recorded_step(
        &mut self,
        tenant: &TenantId,
        id: &RecordingId,
        input: RecordedInput,
    ) -> PortalResult<RecordedStep> {
        let recording = self.find_mut(tenant, id)?;
        if !recording.is_active {
            return Err(PortalError::RecordingInactive(id.clone()));
        }
        let step = RecordedStep {
            sequence: recording.steps.len() as u32 + 1,
            action: input.action,
            selector: input.selector,
            value: input.value,
            url: input.url,
            recorded_at: input.timestamp.unwrap_or_else(Utc::now),
        };
        recording.steps.push(step.clone());
        recording.is_validated = false;
        recording.updated_at = Utc::now();
        Ok(step)
    }

    /// Finish capturing and set the URL the workflow starts from.
    pub fn stop_recording(
        &mut self,
        tenant: &TenantId,
        id: &RecordingId,
        start_url: &str,
    ) -> PortalResult<RecordedWorkflow> {
        let recording = self.find_mut(tenant, id)?;
        recording.is_active = false;
        recording.start_url = Some(start_url.trim().to_string()).filter(|u| !u.is_empty());
        recording.updated_at = Utc::now();
        tracing::info!(
            recording_id = %id,
            steps = recording.steps.len(),
            "Recording stopped"
        );
        Ok(recording.clone())
    }

    pub fn get_recording(&self, tenant: &TenantId, id: &RecordingId) -> PortalResult<RecordedWorkflow> {
        self.recordings
            .get(id)
            .filter(|r| r.tenant_id == *tenant)
            .cloned()
            .ok_or_else(|| PortalError::RecordingNotFound(id.clone()))
    }

    /// Recordings for `tenant`, optionally for one portal, newest first.
    pub fn list_recordings(
        &self,
        tenant: &TenantId,
        portal_config_id: Option<&PortalConfigId>,
    ) -> Vec<RecordedWorkflow> {
        let mut recordings: Vec<RecordedWorkflow> = self
            .recordings
            .values()
            .filter(|r| r.tenant_id == *tenant)
            .filter(|r| portal_config_id.map_or(true, |p| r.portal_config_id == *p))
            .cloned()
            .collect();
        recordings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recordings
    }

    pub fn update_recording(
        &mut self,
        tenant: &TenantId,
        id: &RecordingId,
        update: RecordingUpdate,
    ) -> PortalResult<RecordedWorkflow> {
        let recording = self.find_mut(tenant, id)?;
        if let Some(name) = update.name.filter(|n| !n.trim().is_empty()) {
            recording.name = name;
        }
        if let Some(description) = update.description {
            recording.description = Some(description);
        }
        recording.updated_at = Utc::now();
        Ok(recording.clone())
    }

    pub fn delete_recording(&mut self, tenant: &TenantId, id: &RecordingId) -> PortalResult<()> {
        self.find_mut(tenant, id)?;
        self.recordings.remove(id);
        tracing::info!(recording_id = %id, "Recording deleted");
        Ok(())
    }

    /// Check a recording is replayable; a valid recording is marked validated.
    pub fn validate_recording(
        &mut self,
        tenant: &TenantId,
        id: &RecordingId,
    ) -> PortalResult<RecordingValidation> {
        let recording = self.find_mut(tenant, id)?;
        let mut errors = Vec::new();
        if recording.start_url.is_none() {
            errors.push("Start URL is required".to_string());
        }
        if recording.steps.is_empty() {
            errors.push("Workflow must have at least one step".to_string());
        }
        errors.extend(recording.steps.iter().flat_map(RecordedStep::problems));

        let valid = errors.is_empty();
        if valid {
            let now = Utc::now();
            recording.is_validated = true;
            recording.validated_at = Some(now);
            recording.updated_at = now;
        }
        Ok(RecordingValidation { valid, errors })
    }

    pub fn generate_workflow_definition(
        &self,
        tenant: &TenantId,
        id: &RecordingId,
    ) -> PortalResult<WorkflowDefinition> {
        self.get_recording(tenant, id)
            .map(|r| r.to_workflow_definition())
    }

    fn find_mut(&mut self, tenant: &TenantId, id: &RecordingId) -> PortalResult<&mut RecordedWorkflow> {
        self.recordings
            .get_mut(id)
            .filter(|r| r.tenant_id == *tenant)
            .ok_or_else(|| PortalError::RecordingNotFound(id.clone()))
    }
}
