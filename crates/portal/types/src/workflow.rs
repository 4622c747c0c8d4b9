//! Workflow step vocabulary and workflow definitions
//!
//! A workflow is a named, ordered list of steps drawn from a small closed
//! vocabulary (navigate, fill, click, wait, assert, extract, screenshot,
//! select). Vendor differences live entirely in the data: selectors,
//! step order and `{{placeholder}}` tokens.

use crate::{PortalError, PortalResult};
use serde::{Deserialize, Serialize};

// ── Step vocabulary ──────────────────────────────────────────────────

/// The action performed by a single workflow step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Navigate,
    Fill,
    Click,
    Wait,
    Assert,
    Extract,
    Screenshot,
    Select,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Fill => "fill",
            Self::Click => "click",
            Self::Wait => "wait",
            Self::Assert => "assert",
            Self::Extract => "extract",
            Self::Screenshot => "screenshot",
            Self::Select => "select",
        }
    }

    /// Whether this action can open a connection to a new host.
    pub fn is_navigation(&self) -> bool {
        matches!(self, Self::Navigate)
    }
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition checked by an `assert` step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertCondition {
    /// Element is present and visible
    Visible,
    /// Element is absent or not visible
    Hidden,
    /// Element exists in the DOM
    Present,
    /// Element text contains the given value
    TextContains(String),
}

impl std::fmt::Display for AssertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Visible => f.write_str("visible"),
            Self::Hidden => f.write_str("hidden"),
            Self::Present => f.write_str("present"),
            Self::TextContains(text) => write!(f, "text contains '{}'", text),
        }
    }
}

// ── Workflow step ────────────────────────────────────────────────────

/// One interpreter instruction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub action: StepAction,

    /// CSS selector the action targets (may contain placeholders)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Value to fill/select, or the URL to navigate to (may contain placeholders)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Explicit timeout in milliseconds; for a bare `wait` this is the pause length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Name under which an `extract` step stores its text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_as: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert_condition: Option<AssertCondition>,

    /// Failure of an optional step is logged as skipped and execution continues
    #[serde(default)]
    pub optional: bool,

    /// Marks a step with a side effect visible to the vendor (accept, submit, download)
    #[serde(default)]
    pub vendor_mutation: bool,
}

impl WorkflowStep {
    fn bare(action: StepAction) -> Self {
        Self {
            action,
            selector: None,
            value: None,
            timeout_ms: None,
            extract_as: None,
            assert_condition: None,
            optional: false,
            vendor_mutation: false,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            value: Some(url.into()),
            ..Self::bare(StepAction::Navigate)
        }
    }

    pub fn fill(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            value: Some(value.into()),
            ..Self::bare(StepAction::Fill)
        }
    }

    pub fn click(selector: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            ..Self::bare(StepAction::Click)
        }
    }

    pub fn select(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            value: Some(value.into()),
            ..Self::bare(StepAction::Select)
        }
    }

    /// Pause for a fixed number of milliseconds.
    pub fn wait(ms: u64) -> Self {
        Self {
            timeout_ms: Some(ms),
            ..Self::bare(StepAction::Wait)
        }
    }

    /// Wait until an element appears.
    pub fn wait_for(selector: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            ..Self::bare(StepAction::Wait)
        }
    }

    pub fn assert(selector: impl Into<String>, condition: AssertCondition) -> Self {
        Self {
            selector: Some(selector.into()),
            assert_condition: Some(condition),
            ..Self::bare(StepAction::Assert)
        }
    }

    pub fn extract(selector: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            extract_as: Some(name.into()),
            ..Self::bare(StepAction::Extract)
        }
    }

    pub fn screenshot() -> Self {
        Self::bare(StepAction::Screenshot)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn mutating(mut self) -> Self {
        self.vendor_mutation = true;
        self
    }

    pub fn with_timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// All placeholder tokens referenced by this step's selector and value.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut tokens = Vec::new();
        if let Some(selector) = &self.selector {
            tokens.extend(placeholder_tokens(selector));
        }
        if let Some(value) = &self.value {
            tokens.extend(placeholder_tokens(value));
        }
        tokens
    }

    /// Check the fields this step's action needs.
    pub fn validate(&self, index: usize) -> PortalResult<()> {
        let missing = |what: &str| {
            Err(PortalError::InvalidWorkflow(format!(
                "step {} ({}) requires {}",
                index, self.action, what
            )))
        };
        match self.action {
            StepAction::Navigate if self.value.is_none() => missing("a URL value"),
            StepAction::Fill | StepAction::Select if self.value.is_none() => missing("a value"),
            StepAction::Fill | StepAction::Click | StepAction::Select | StepAction::Assert
                if self.selector.is_none() =>
            {
                missing("a selector")
            }
            StepAction::Extract if self.selector.is_none() || self.extract_as.is_none() => {
                missing("a selector and an extract name")
            }
            StepAction::Assert if self.assert_condition.is_none() => missing("an assert condition"),
            StepAction::Wait if self.selector.is_none() && self.timeout_ms.is_none() => {
                missing("a selector or a timeout")
            }
            _ if self.placeholders().iter().any(|t| t.is_empty()) => {
                Err(PortalError::InvalidWorkflow(format!(
                    "step {} ({}) has an empty placeholder",
                    index, self.action
                )))
            }
            _ => Ok(()),
        }
    }
}

// ── Workflow definition ──────────────────────────────────────────────

fn default_version() -> u32 {
    1
}

/// A named, ordered list of steps plus its approval requirement and time budget.
///
/// Jobs snapshot the definition at creation, so edits never affect a job
/// that already references it; an edit produces a new version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub requires_approval: bool,
    /// Overall time budget in milliseconds
    pub timeout_ms: u64,
    #[serde(default = "default_version")]
    pub version: u32,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            requires_approval: false,
            timeout_ms,
            version: 1,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_steps(mut self, steps: Vec<WorkflowStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    /// Structural validation: a name, at least one step, and well-formed steps.
    pub fn validate(&self) -> PortalResult<()> {
        if self.name.trim().is_empty() {
            return Err(PortalError::InvalidWorkflow("workflow name is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(PortalError::InvalidWorkflow(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate(index)?;
        }
        Ok(())
    }

    /// Whether the step at `index` has a vendor-visible side effect.
    ///
    /// When no step is explicitly marked, every click and select counts.
    pub fn is_vendor_mutation(&self, index: usize) -> bool {
        let Some(step) = self.steps.get(index) else {
            return false;
        };
        if self.steps.iter().any(|s| s.vendor_mutation) {
            step.vendor_mutation
        } else {
            matches!(step.action, StepAction::Click | StepAction::Select)
        }
    }
}

// ── Placeholders ─────────────────────────────────────────────────────

/// Extract every `{{name}}` token from `text`, in order of appearance.
///
/// An empty `{{}}` is reported as `""` so it fails validation instead of rendering.
pub fn placeholder_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                tokens.push(after[..end].trim());
                rest = &after[end + 2..];
            }
            None => break,
        }
    }
    tokens
}

/// Replace every `{{name}}` token using `lookup`.
///
/// Returns the first token `lookup` cannot resolve as the error.
pub fn render_placeholders<'a, F>(text: &str, lookup: F) -> Result<String, String>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let token = after[..end].trim();
        match lookup(token).filter(|_| !token.is_empty()) {
            Some(value) => out.push_str(value),
            None => return Err(token.to_string()),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
