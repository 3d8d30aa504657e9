//! Admission control for groups of adapters
//!
//! TigerStyle: One state machine per manager gating whether invocations
//! may enter any of its adapters, independent of per-object lifecycles.
//!
//! States: Holding (initial) → Active ⇄ Discarding, any → Inactive
//! (terminal, one-way). All waiting shares one notify handle, broadcast on
//! every state change and whenever the in-flight count drains to zero;
//! each waiter re-checks its own predicate after waking.

use crate::adapter::Adapter;
use selkie_core::constants::MANAGER_ADAPTERS_COUNT_MAX;
use selkie_core::error::{Error, Result};
use selkie_core::metrics;
use selkie_core::object_id::ObjectId;
use selkie_core::runtime::{current_runtime, CurrentRuntime, Runtime};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::Notify;
use tracing::{debug, info, instrument};

/// Admission state of a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagerState {
    /// Invocations park until the manager activates (initial state)
    #[default]
    Holding,
    /// Invocations are admitted
    Active,
    /// Invocations are rejected as transient failures
    Discarding,
    /// Terminal: the manager and its adapters are gone
    Inactive,
}

impl ManagerState {
    /// Stable name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            ManagerState::Holding => "holding",
            ManagerState::Active => "active",
            ManagerState::Discarding => "discarding",
            ManagerState::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct ManagerInner {
    state: ManagerState,
    /// Invocations admitted but not yet completed
    in_flight: u64,
    /// Callers currently parked on the notify handle
    waiters: u64,
    /// True once any explicit state change was made; implicit activation
    /// applies only before that
    explicit_state_set: bool,
    /// Adapters this manager governs
    adapters: Vec<Arc<Adapter>>,
}

/// Gate for invocations entering a group of adapters
pub struct AdapterManager {
    inner: Mutex<ManagerInner>,
    wake: Notify,
    factory: Weak<ManagerFactory>,
    runtime: CurrentRuntime,
}

impl AdapterManager {
    /// Create a manager not owned by any factory
    pub fn standalone() -> Arc<Self> {
        Arc::new(Self::with_factory(Weak::new()))
    }

    fn with_factory(factory: Weak<ManagerFactory>) -> Self {
        Self {
            inner: Mutex::new(ManagerInner {
                state: ManagerState::Holding,
                in_flight: 0,
                waiters: 0,
                explicit_state_set: false,
                adapters: Vec::new(),
            }),
            wake: Notify::new(),
            factory,
            runtime: current_runtime(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerInner> {
        self.inner.lock().unwrap()
    }

    /// Current admission state
    pub fn state(&self) -> ManagerState {
        self.lock().state
    }

    /// Invocations admitted but not yet completed
    pub fn in_flight(&self) -> u64 {
        self.lock().in_flight
    }

    /// Callers currently parked waiting for a state or drain condition
    pub fn waiters(&self) -> u64 {
        self.lock().waiters
    }

    /// Number of governed adapters
    pub fn adapter_count(&self) -> usize {
        self.lock().adapters.len()
    }

    // -------------------------------------------------------------------------
    // Governed adapter set
    // -------------------------------------------------------------------------

    /// Put an adapter under this manager's admission control
    pub fn attach(&self, adapter: Arc<Adapter>) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == ManagerState::Inactive {
            return Err(Error::AdapterInactive);
        }
        if inner.adapters.len() >= MANAGER_ADAPTERS_COUNT_MAX {
            return Err(Error::AdapterAtCapacity {
                count: inner.adapters.len(),
                limit: MANAGER_ADAPTERS_COUNT_MAX,
            });
        }
        debug!(adapter = adapter.name(), "adapter attached");
        inner.adapters.push(adapter);
        Ok(())
    }

    /// Remove an adapter from this manager
    ///
    /// Removing the last adapter from an inactive manager releases the
    /// manager from its owning factory.
    pub fn detach(&self, adapter: &Adapter) {
        let release = {
            let mut inner = self.lock();
            inner
                .adapters
                .retain(|a| !std::ptr::eq(Arc::as_ptr(a), adapter as *const Adapter));
            inner.state == ManagerState::Inactive && inner.adapters.is_empty()
        };
        if release {
            if let Some(factory) = self.factory.upgrade() {
                factory.release(self);
            }
        }
    }

    // -------------------------------------------------------------------------
    // State transitions
    // -------------------------------------------------------------------------

    /// Admit invocations
    #[instrument(skip(self), level = "debug")]
    pub fn activate(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state == ManagerState::Inactive {
            return Err(Error::AdapterInactive);
        }
        inner.state = ManagerState::Active;
        inner.explicit_state_set = true;
        self.wake.notify_waiters();
        info!("manager active");
        Ok(())
    }

    /// Park new invocations; optionally wait for in-flight ones to drain
    #[instrument(skip(self), level = "debug")]
    pub async fn hold(&self, wait_for_completion: bool) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state == ManagerState::Inactive {
                return Err(Error::AdapterInactive);
            }
            inner.state = ManagerState::Holding;
            inner.explicit_state_set = true;
            self.wake.notify_waiters();
        }
        info!("manager holding");
        if wait_for_completion {
            self.wait_for_drain(Some(ManagerState::Holding)).await;
        }
        Ok(())
    }

    /// Reject new invocations as transient; optionally wait for drain
    #[instrument(skip(self), level = "debug")]
    pub async fn discard(&self, wait_for_completion: bool) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state == ManagerState::Inactive {
                return Err(Error::AdapterInactive);
            }
            inner.state = ManagerState::Discarding;
            inner.explicit_state_set = true;
            self.wake.notify_waiters();
        }
        info!("manager discarding");
        if wait_for_completion {
            self.wait_for_drain(Some(ManagerState::Discarding)).await;
        }
        Ok(())
    }

    /// Shut the manager down, one-way
    ///
    /// The state becomes `Inactive` immediately and every waiter is woken.
    /// Completion - draining in-flight invocations, optionally tearing down
    /// every retained object in every governed adapter, then detaching from
    /// the factory - runs inline when `wait_for_completion` is set and on a
    /// spawned task otherwise.
    pub async fn deactivate(
        self: &Arc<Self>,
        etherealize: bool,
        wait_for_completion: bool,
    ) -> Result<()> {
        let adapters = {
            let mut inner = self.lock();
            if inner.state == ManagerState::Inactive {
                return Err(Error::AdapterInactive);
            }
            inner.state = ManagerState::Inactive;
            inner.explicit_state_set = true;
            self.wake.notify_waiters();
            // Snapshot: the teardown walk must not run under the lock.
            inner.adapters.clone()
        };
        info!(etherealize, wait_for_completion, "manager deactivating");

        if wait_for_completion {
            self.clone().complete_deactivation(etherealize, adapters).await;
        } else {
            let this = self.clone();
            let _handle = self.runtime.spawn(async move {
                this.complete_deactivation(etherealize, adapters).await;
            });
        }
        Ok(())
    }

    async fn complete_deactivation(
        self: Arc<Self>,
        etherealize: bool,
        adapters: Vec<Arc<Adapter>>,
    ) {
        self.wait_for_drain(None).await;

        if etherealize {
            for adapter in &adapters {
                adapter.etherealize_all().await;
            }
        }

        self.lock().adapters.clear();
        if let Some(factory) = self.factory.upgrade() {
            factory.release(&self);
        }
        info!("manager deactivation complete");
    }

    /// Activate unless an explicit state change was ever made
    pub fn implicit_activate(&self) {
        let mut inner = self.lock();
        if inner.explicit_state_set || inner.state == ManagerState::Inactive {
            return;
        }
        inner.state = ManagerState::Active;
        self.wake.notify_waiters();
        debug!("manager implicitly activated");
    }

    // -------------------------------------------------------------------------
    // Invocation admission
    // -------------------------------------------------------------------------

    /// Admit one invocation
    ///
    /// Parks while Holding; rejects while Discarding (transient) or
    /// Inactive (permanent); increments the in-flight count on admission.
    pub async fn enter(&self) -> Result<()> {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            {
                let mut inner = self.lock();
                match inner.state {
                    ManagerState::Active => {
                        inner.in_flight += 1;
                        metrics::record_admission("admitted");
                        return Ok(());
                    }
                    ManagerState::Discarding => {
                        metrics::record_admission("discarded");
                        return Err(Error::RequestDiscarded);
                    }
                    ManagerState::Inactive => {
                        metrics::record_admission("inactive");
                        return Err(Error::AdapterInactive);
                    }
                    ManagerState::Holding => {
                        inner.waiters += 1;
                        notified.as_mut().enable();
                    }
                }
            }
            notified.await;
            self.lock().waiters -= 1;
        }
    }

    /// Complete one invocation
    ///
    /// The last completion wakes every caller blocked in a drain wait.
    pub fn exit(&self) {
        let mut inner = self.lock();
        assert!(inner.in_flight > 0, "exit without a matching enter");
        inner.in_flight -= 1;
        if inner.in_flight == 0 {
            self.wake.notify_waiters();
        }
    }

    /// Wait until no invocation is in flight
    ///
    /// With `while_state` set, the wait also ends as soon as the manager
    /// leaves that state (another caller moved it on; their drain, their
    /// problem).
    async fn wait_for_drain(&self, while_state: Option<ManagerState>) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            {
                let mut inner = self.lock();
                if let Some(expected) = while_state {
                    if inner.state != expected {
                        return;
                    }
                }
                if inner.in_flight == 0 {
                    return;
                }
                inner.waiters += 1;
                notified.as_mut().enable();
            }
            notified.await;
            self.lock().waiters -= 1;
        }
    }

    /// Convenience: resolve `id` through `adapter` with admission bracketing
    ///
    /// The enter/exit pair never touches the adapter lock, so the two lock
    /// orders cannot deadlock.
    pub async fn admit_and_resolve(
        &self,
        adapter: &Adapter,
        id: &ObjectId,
        operation: &str,
    ) -> Result<selkie_core::servant::Resolution> {
        self.enter().await?;
        let outcome = adapter.resolve_servant(id, operation).await;
        self.exit();
        outcome
    }
}

impl fmt::Debug for AdapterManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("AdapterManager")
            .field("state", &inner.state)
            .field("in_flight", &inner.in_flight)
            .field("adapters", &inner.adapters.len())
            .finish()
    }
}

// =============================================================================
// ManagerFactory
// =============================================================================

/// Owner of a set of managers
///
/// Managers release themselves from the factory when deactivation
/// completes, or when the last adapter detaches from an inactive manager.
pub struct ManagerFactory {
    managers: Mutex<Vec<Arc<AdapterManager>>>,
}

impl ManagerFactory {
    /// Create an empty factory
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            managers: Mutex::new(Vec::new()),
        })
    }

    /// Create a manager owned by this factory
    pub fn create(self: &Arc<Self>) -> Arc<AdapterManager> {
        let manager = Arc::new(AdapterManager::with_factory(Arc::downgrade(self)));
        self.managers.lock().unwrap().push(manager.clone());
        manager
    }

    /// Number of managers currently registered
    pub fn len(&self) -> usize {
        self.managers.lock().unwrap().len()
    }

    /// Whether no managers are registered
    pub fn is_empty(&self) -> bool {
        self.managers.lock().unwrap().is_empty()
    }

    /// Drop a manager from the registry
    fn release(&self, manager: &AdapterManager) {
        self.managers
            .lock()
            .unwrap()
            .retain(|m| !std::ptr::eq(Arc::as_ptr(m), manager as *const AdapterManager));
        debug!("manager released from factory");
    }
}
