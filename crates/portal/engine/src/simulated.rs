//! In-process stand-ins for the browser and the credential vault
//!
//! `SimulatedBrowser` succeeds at everything unless told otherwise. It can
//! be scripted with missing selectors, failing assertions, extracted text,
//! hanging elements, unreachable URLs and expiring sessions, and it records
//! every call so tests can inspect what a workflow actually did.

use crate::credentials::{CredentialRequest, CredentialVault, PortalCredential, VaultError};
use crate::driver::{
    BrowserDriver, BrowserSession, DriverError, DriverResult, SessionRequest, WaitTarget,
};
use async_trait::async_trait;
use portal_types::AssertCondition;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ── Call log ─────────────────────────────────────────────────────────

/// One call received by a simulated session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverCall {
    pub session: usize,
    pub action: &'static str,
    /// Selector or URL
    pub target: String,
    pub value: Option<String>,
}

// ── Script ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Script {
    missing: HashSet<String>,
    failing_checks: HashSet<String>,
    texts: HashMap<String, String>,
    hanging: HashSet<String>,
    unreachable: HashSet<String>,
    /// Selector that expires the session, and how many more sessions it expires
    expiry: Option<(String, u32)>,
    latency_ms: u64,
    calls: Vec<DriverCall>,
    sessions_opened: usize,
    sessions_closed: usize,
    screenshots: usize,
}

// ── Driver ───────────────────────────────────────────────────────────

/// Scriptable browser driver; clones share the same script and call log
#[derive(Clone, Debug, Default)]
pub struct SimulatedBrowser {
    script: Arc<Mutex<Script>>,
}

impl SimulatedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every operation on `selector` fails with `ElementNotFound`.
    pub fn with_missing_selector(self, selector: impl Into<String>) -> Self {
        self.script().missing.insert(selector.into());
        self
    }

    /// Assertions against `selector` evaluate to false.
    pub fn with_failing_check(self, selector: impl Into<String>) -> Self {
        self.script().failing_checks.insert(selector.into());
        self
    }

    /// Text returned when `selector` is extracted.
    pub fn with_text(self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.set_text(selector, text);
        self
    }

    /// Operations on `selector` never complete.
    pub fn with_hanging_selector(self, selector: impl Into<String>) -> Self {
        self.script().hanging.insert(selector.into());
        self
    }

    /// Navigating to `url` fails with a network error.
    pub fn with_unreachable_url(self, url: impl Into<String>) -> Self {
        self.script().unreachable.insert(url.into());
        self
    }

    /// The next `sessions` sessions expire when they touch `selector`.
    pub fn with_session_expiry(self, selector: impl Into<String>, sessions: u32) -> Self {
        self.script().expiry = Some((selector.into(), sessions));
        self
    }

    /// Every call takes `ms` before answering.
    pub fn with_latency(self, ms: u64) -> Self {
        self.script().latency_ms = ms;
        self
    }

    pub fn set_text(&self, selector: impl Into<String>, text: impl Into<String>) {
        self.script().texts.insert(selector.into(), text.into());
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.script().calls.clone()
    }

    /// Calls of one kind, e.g. `"navigate"`.
    pub fn calls_of(&self, action: &str) -> Vec<DriverCall> {
        self.script()
            .calls
            .iter()
            .filter(|c| c.action == action)
            .cloned()
            .collect()
    }

    pub fn sessions_opened(&self) -> usize {
        self.script().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.script().sessions_closed
    }
}

#[async_trait]
impl BrowserDriver for SimulatedBrowser {
    async fn open_session(&self, request: &SessionRequest) -> DriverResult<Box<dyn BrowserSession>> {
        let (index, expires_on) = {
            let mut script = self.script();
            script.sessions_opened += 1;
            let expires_on = match &mut script.expiry {
                Some((selector, remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(selector.clone())
                }
                _ => None,
            };
            (script.sessions_opened, expires_on)
        };
        tracing::debug!(job_id = %request.job_id, session = index, "Simulated session opened");
        Ok(Box::new(SimulatedSession {
            browser: self.clone(),
            index,
            expires_on,
            expired: false,
        }))
    }
}

// ── Session ──────────────────────────────────────────────────────────

struct SimulatedSession {
    browser: SimulatedBrowser,
    index: usize,
    expires_on: Option<String>,
    expired: bool,
}

enum Reaction {
    Proceed,
    Hang,
    Fail(DriverError),
}

impl SimulatedSession {
    /// Record the call and decide how the page reacts to it.
    async fn touch(&mut self, action: &'static str, target: &str, value: Option<&str>) -> DriverResult<()> {
        let (reaction, latency) = {
            let mut script = self.browser.script();
            script.calls.push(DriverCall {
                session: self.index,
                action,
                target: target.to_string(),
                value: value.map(str::to_string),
            });

            if self.expires_on.as_deref() == Some(target) {
                self.expired = true;
            }
            let reaction = if self.expired {
                Reaction::Fail(DriverError::SessionExpired)
            } else if action == "navigate" && script.unreachable.contains(target) {
                Reaction::Fail(DriverError::Navigation(format!("{} is unreachable", target)))
            } else if script.hanging.contains(target) {
                Reaction::Hang
            } else if action != "navigate" && script.missing.contains(target) {
                Reaction::Fail(DriverError::ElementNotFound(target.to_string()))
            } else {
                Reaction::Proceed
            };
            (reaction, script.latency_ms)
        };

        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        tracing::debug!(session = self.index, action, "Simulated browser step");
        match reaction {
            Reaction::Proceed => Ok(()),
            Reaction::Hang => std::future::pending().await,
            Reaction::Fail(err) => Err(err),
        }
    }
}

#[async_trait]
impl BrowserSession for SimulatedSession {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> DriverResult<()> {
        self.touch("navigate", url, None).await
    }

    async fn fill(&mut self, selector: &str, value: &str, _timeout_ms: u64) -> DriverResult<()> {
        self.touch("fill", selector, Some(value)).await
    }

    async fn click(&mut self, selector: &str, _timeout_ms: u64) -> DriverResult<()> {
        self.touch("click", selector, None).await
    }

    async fn select(&mut self, selector: &str, value: &str, _timeout_ms: u64) -> DriverResult<()> {
        self.touch("select", selector, Some(value)).await
    }

    async fn wait_for(&mut self, target: &WaitTarget, _timeout_ms: u64) -> DriverResult<()> {
        match target {
            WaitTarget::Duration(ms) => {
                self.touch("wait", &format!("{}ms", ms), None).await?;
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
            WaitTarget::Selector(selector) => self.touch("wait", selector, None).await,
        }
    }

    async fn check(
        &mut self,
        selector: &str,
        condition: &AssertCondition,
        _timeout_ms: u64,
    ) -> DriverResult<bool> {
        self.touch("assert", selector, None).await?;
        let script = self.browser.script();
        let holds = !script.failing_checks.contains(selector);
        Ok(match condition {
            AssertCondition::TextContains(expected) => {
                holds
                    && script
                        .texts
                        .get(selector)
                        .is_some_and(|text| text.contains(expected.as_str()))
            }
            _ => holds,
        })
    }

    async fn extract_text(&mut self, selector: &str, _timeout_ms: u64) -> DriverResult<String> {
        self.touch("extract", selector, None).await?;
        Ok(self
            .browser
            .script()
            .texts
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn screenshot(&mut self, _timeout_ms: u64) -> DriverResult<String> {
        self.touch("screenshot", "page", None).await?;
        let mut script = self.browser.script();
        script.screenshots += 1;
        Ok(format!("sim://session-{}/screenshot-{}.png", self.index, script.screenshots))
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.browser.script().sessions_closed += 1;
        Ok(())
    }
}

// ── Credentials ──────────────────────────────────────────────────────

/// Vault backed by a fixed map of credential name to credential
#[derive(Clone, Debug, Default)]
pub struct StaticCredentialVault {
    credentials: HashMap<String, PortalCredential>,
}

impl StaticCredentialVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(
        mut self,
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials
            .insert(name.into(), PortalCredential::new(username, password));
        self
    }
}

#[async_trait]
impl CredentialVault for StaticCredentialVault {
    async fn get_credential(
        &self,
        request: &CredentialRequest,
    ) -> Result<PortalCredential, VaultError> {
        self.credentials
            .get(&request.credential_name)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(request.credential_name.clone()))
    }
}
