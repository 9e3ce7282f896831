//! Worker lifecycle: installing → waiting → active.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ServiceWorkerError};

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Created, nothing run yet.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl std::fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// A worker version, tied to one cache bucket.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,

    /// Bucket this version populates and keeps.
    pub cache_name: String,

    pub state: ServiceWorkerState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            cache_name: cache_name.into(),
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state and report the change.
    pub fn set_state(&mut self, state: ServiceWorkerState) -> StateChange {
        self.state = state;
        self.state_changed_at = Instant::now();
        StateChange {
            worker_id: self.id,
            cache_name: self.cache_name.clone(),
            new_state: state,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// One state transition of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub worker_id: ServiceWorkerId,
    pub cache_name: String,
    pub new_state: ServiceWorkerState,
}

/// The installing, waiting and active slots for one scope.
#[derive(Debug)]
pub struct Registration {
    pub scope: Url,
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
}

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    pub fn installing(&self) -> Option<&ServiceWorker> {
        self.installing.as_ref()
    }

    pub fn waiting(&self) -> Option<&ServiceWorker> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// The active worker, once it has finished activating.
    pub fn controller(&self) -> Option<&ServiceWorker> {
        self.active.as_ref().filter(|w| w.is_active())
    }

    /// The most recent worker version, whatever its state.
    pub fn newest(&self) -> Option<&ServiceWorker> {
        self.installing
            .as_ref()
            .or(self.waiting.as_ref())
            .or(self.active.as_ref())
    }

    /// Start installing a new version. An install already in flight is
    /// made redundant.
    pub fn begin_install(&mut self, cache_name: &str) -> (ServiceWorkerId, Vec<StateChange>) {
        let mut changes = Vec::new();
        if let Some(mut previous) = self.installing.take() {
            changes.push(previous.set_state(ServiceWorkerState::Redundant));
        }

        let mut worker = ServiceWorker::new(cache_name);
        changes.push(worker.set_state(ServiceWorkerState::Installing));
        let id = worker.id;
        self.installing = Some(worker);
        (id, changes)
    }

    /// Take worker `id` out of the installing slot. A newer install in the
    /// slot is left untouched.
    fn take_installing(&mut self, id: ServiceWorkerId) -> Result<ServiceWorker> {
        match self.installing.take() {
            Some(worker) if worker.id == id => Ok(worker),
            other => {
                self.installing = other;
                Err(ServiceWorkerError::Superseded(id))
            }
        }
    }

    /// Transition installing worker `id` to waiting, replacing any older
    /// waiting worker.
    pub fn install_complete(&mut self, id: ServiceWorkerId) -> Result<Vec<StateChange>> {
        let mut worker = self.take_installing(id)?;

        let mut changes = Vec::new();
        if let Some(mut old) = self.waiting.take() {
            changes.push(old.set_state(ServiceWorkerState::Redundant));
        }
        changes.push(worker.set_state(ServiceWorkerState::Installed));
        self.waiting = Some(worker);
        Ok(changes)
    }

    /// Discard installing worker `id`.
    pub fn install_failed(
        &mut self,
        id: ServiceWorkerId,
        reason: impl Into<String>,
    ) -> Result<StateChange> {
        let mut worker = self.take_installing(id)?;
        worker.error = Some(reason.into());
        Ok(worker.set_state(ServiceWorkerState::Redundant))
    }

    /// Move the waiting worker into the active slot in the activating state.
    /// The previous active worker becomes redundant.
    pub fn begin_activation(&mut self) -> Result<(String, Vec<StateChange>)> {
        let mut worker = self.waiting.take().ok_or_else(|| {
            ServiceWorkerError::StateError("No installed worker is waiting".to_string())
        })?;

        let mut changes = Vec::new();
        if let Some(mut old) = self.active.take() {
            changes.push(old.set_state(ServiceWorkerState::Redundant));
        }
        changes.push(worker.set_state(ServiceWorkerState::Activating));
        let cache_name = worker.cache_name.clone();
        self.active = Some(worker);
        Ok((cache_name, changes))
    }

    /// Finish activation.
    pub fn activation_complete(&mut self) -> Result<StateChange> {
        match self.active.as_mut() {
            Some(worker) if worker.state == ServiceWorkerState::Activating => {
                Ok(worker.set_state(ServiceWorkerState::Activated))
            }
            _ => Err(ServiceWorkerError::StateError(
                "No worker is activating".to_string(),
            )),
        }
    }

    /// Mark every worker redundant and clear all slots.
    pub fn unregister(&mut self) -> Vec<StateChange> {
        [self.active.take(), self.waiting.take(), self.installing.take()]
            .into_iter()
            .flatten()
            .map(|mut worker| worker.set_state(ServiceWorkerState::Redundant))
            .collect()
    }
}
