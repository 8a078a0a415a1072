//! Poll lifecycle manager.
//!
//! Owns one polling task per configured scope. Tasks are spawned on
//! [`PollerManager::start`] and cancelled together on
//! [`PollerManager::stop`]; a task that ends on its own is reported through
//! [`PollerManager::is_healthy`] and not restarted.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cycle::{run_poll_cycle, PollCycleReport};
use crate::emitter::EventEmitter;
use crate::error::{SyncError, SyncResult};
use crate::poller::ChangePoller;
use crate::watermark::WatermarkStore;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ManagerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerState::Stopped => "stopped",
            ManagerState::Starting => "starting",
            ManagerState::Running => "running",
            ManagerState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a scope task does when a cycle fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollErrorPolicy {
    /// End the task; the manager turns unhealthy.
    #[default]
    Terminate,
    /// Log, sleep the normal interval, and poll again.
    Retry,
}

impl FromStr for PollErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminate" => Ok(PollErrorPolicy::Terminate),
            "retry" => Ok(PollErrorPolicy::Retry),
            _ => Err(format!("Unknown poll error policy: {s}")),
        }
    }
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Search bases to poll, one task each.
    pub scopes: Vec<String>,
    /// Sleep between cycles.
    pub poll_interval: Duration,
    pub error_policy: PollErrorPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            scopes: Vec::new(),
            poll_interval: Duration::from_secs(5),
            error_policy: PollErrorPolicy::Terminate,
        }
    }
}

struct ScopeTask {
    scope: String,
    handle: JoinHandle<()>,
}

/// Shared collaborators of every scope task.
#[derive(Clone)]
struct CycleDeps {
    store: Arc<dyn WatermarkStore>,
    poller: Arc<ChangePoller>,
    emitter: Arc<EventEmitter>,
}

/// Runs and supervises the per-scope poll loops.
pub struct PollerManager {
    deps: CycleDeps,
    settings: ManagerSettings,
    state: RwLock<ManagerState>,
    tasks: Mutex<Vec<ScopeTask>>,
}

impl PollerManager {
    pub fn new(
        store: Arc<dyn WatermarkStore>,
        poller: Arc<ChangePoller>,
        emitter: Arc<EventEmitter>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            deps: CycleDeps {
                store,
                poller,
                emitter,
            },
            settings,
            state: RwLock::new(ManagerState::Stopped),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn scopes(&self) -> &[String] {
        &self.settings.scopes
    }

    pub async fn state(&self) -> ManagerState {
        *self.state.read().await
    }

    /// Spawn one polling task per scope.
    ///
    /// Starting a manager that is not stopped does nothing. The state lock
    /// is held until the tasks are registered, so a concurrent `stop` waits
    /// for them.
    pub async fn start(&self) -> SyncResult<()> {
        let mut state = self.state.write().await;
        if *state != ManagerState::Stopped {
            debug!(state = %state.as_str(), "Start requested while not stopped, ignoring");
            return Ok(());
        }

        if self.settings.scopes.is_empty() {
            return Err(SyncError::configuration("no scopes configured"));
        }
        *state = ManagerState::Starting;

        let mut tasks = self.tasks.lock().await;
        for scope in &self.settings.scopes {
            let handle = tokio::spawn(poll_loop(
                scope.clone(),
                self.deps.clone(),
                self.settings.poll_interval,
                self.settings.error_policy,
            ));
            tasks.push(ScopeTask {
                scope: scope.clone(),
                handle,
            });
        }
        drop(tasks);

        *state = ManagerState::Running;
        info!(
            scopes = self.settings.scopes.len(),
            interval_secs = self.settings.poll_interval.as_secs(),
            "Poller manager started"
        );
        Ok(())
    }

    /// Cancel every task and wait for all of them to finish.
    ///
    /// Stopping a stopped manager does nothing.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == ManagerState::Stopped {
            debug!("Stop requested while stopped, ignoring");
            return;
        }
        *state = ManagerState::Stopping;

        let tasks: Vec<ScopeTask> = std::mem::take(&mut *self.tasks.lock().await);
        for task in &tasks {
            task.handle.abort();
        }
        for task in tasks {
            match task.handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(scope = %task.scope, error = %e, "Scope task panicked"),
            }
        }

        *state = ManagerState::Stopped;
        info!("Poller manager stopped");
    }

    /// True while running with every scope task alive.
    pub async fn is_healthy(&self) -> bool {
        if self.state().await != ManagerState::Running {
            return false;
        }
        let tasks = self.tasks.lock().await;
        !tasks.is_empty() && tasks.iter().all(|task| !task.handle.is_finished())
    }

    /// Scopes whose task has ended.
    pub async fn dead_scopes(&self) -> Vec<String> {
        self.tasks
            .lock()
            .await
            .iter()
            .filter(|task| task.handle.is_finished())
            .map(|task| task.scope.clone())
            .collect()
    }

    /// Run one cycle for a configured scope right away.
    ///
    /// Shares the locked protocol with the background tasks, so it is
    /// serialised against them per scope.
    pub async fn poll_now(&self, scope: &str) -> SyncResult<PollCycleReport> {
        if !self.settings.scopes.iter().any(|s| s == scope) {
            return Err(SyncError::unknown_scope(scope));
        }
        run_poll_cycle(
            self.deps.store.as_ref(),
            &self.deps.poller,
            &self.deps.emitter,
            scope,
        )
        .await
    }
}

impl fmt::Debug for PollerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollerManager")
            .field("settings", &self.settings)
            .finish()
    }
}

async fn poll_loop(
    scope: String,
    deps: CycleDeps,
    interval: Duration,
    policy: PollErrorPolicy,
) {
    info!(scope = %scope, "Scope poller started");
    loop {
        let result = run_poll_cycle(
            deps.store.as_ref(),
            &deps.poller,
            &deps.emitter,
            &scope,
        )
        .await;

        if let Err(e) = result {
            match policy {
                PollErrorPolicy::Terminate => {
                    error!(scope = %scope, error = %e, "Poll cycle failed, stopping scope poller");
                    return;
                }
                PollErrorPolicy::Retry => {
                    warn!(
                        scope = %scope,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Poll cycle failed, retrying after interval"
                    );
                }
            }
        }

        tokio::time::sleep(interval).await;
    }
}
