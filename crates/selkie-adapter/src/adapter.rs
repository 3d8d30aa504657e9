//! Adapter engine: the lock, the protocols, and the public surface
//!
//! TigerStyle: One mutex per adapter serializes every entry, map and
//! mediator operation. The lock is a `std::sync::Mutex` and is never held
//! across an `.await`; blocking guards park on a `tokio::sync::Notify`
//! registered *before* the lock is released, then retry the whole
//! transition from scratch.
//!
//! Fire-and-forget work (etherealization, drains) is spawned through the
//! runtime seam and never blocks the caller that triggered it.

use crate::aom::{ActiveObjectMap, EntryId};
use crate::entry::{Applied, EntryEvent, EntryState, EtherealizeTask};
use crate::manager::AdapterManager;
use crate::mediator::{mediator_for, Mediator};
use selkie_core::config::AdapterConfig;
use selkie_core::constants::ADAPTER_OBJECTS_COUNT_MAX;
use selkie_core::error::{Error, Result};
use selkie_core::metrics;
use selkie_core::object_id::ObjectId;
use selkie_core::policy::{IdAssignment, IdUniqueness, Policies, ServantRetention};
use selkie_core::runtime::{current_runtime, CurrentRuntime, Runtime};
use selkie_core::servant::{
    Resolution, ServantActivator, ServantHandle, ServantLocator,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

// =============================================================================
// AdapterCore
// =============================================================================

/// State guarded by the adapter lock
pub(crate) struct CoreState {
    pub(crate) aom: ActiveObjectMap,
    next_sequence: u32,
}

/// The shared lifecycle engine behind one adapter
///
/// Mediator strategies compose these primitives; nothing here is
/// policy-aware beyond the uniqueness split baked into the map.
pub(crate) struct AdapterCore {
    ordinal: u32,
    policies: Policies,
    state: Mutex<CoreState>,
    runtime: CurrentRuntime,
}

impl AdapterCore {
    pub(crate) fn new(ordinal: u32, policies: Policies) -> Self {
        Self {
            ordinal,
            policies,
            state: Mutex::new(CoreState {
                aom: ActiveObjectMap::new(policies.uniqueness),
                next_sequence: 0,
            }),
            runtime: current_runtime(),
        }
    }

    pub(crate) fn policies(&self) -> &Policies {
        &self.policies
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap()
    }

    /// Spawn a fire-and-forget task; the handle is dropped, the task runs on
    pub(crate) fn spawn_task(&self, task: EtherealizeTask) {
        let _handle = self.runtime.spawn(task);
    }

    /// Number of identities with a bound servant
    pub(crate) fn active_count(&self) -> usize {
        self.lock().aom.bound_len()
    }

    // -------------------------------------------------------------------------
    // Identity allocation
    // -------------------------------------------------------------------------

    /// Allocate the next system-assigned identity
    pub(crate) fn new_system_id(&self) -> Result<ObjectId> {
        if self.policies.assignment != IdAssignment::System {
            return Err(Error::wrong_policy("new_system_id"));
        }
        let mut st = self.lock();
        let sequence = st.next_sequence;
        st.next_sequence = st.next_sequence.wrapping_add(1);
        Ok(ObjectId::from_parts(self.ordinal, sequence))
    }

    // -------------------------------------------------------------------------
    // Invocation residency bracket
    // -------------------------------------------------------------------------

    /// Bring an invocation inside the identity's entry
    ///
    /// Parks while the entry is incarnating or etherealizing; the entry
    /// handle returned must be paired with [`AdapterCore::exit`].
    pub(crate) async fn enter(&self, id: &ObjectId) -> Result<EntryId> {
        loop {
            let wake;
            let mut notified;
            {
                let mut st = self.lock();
                let Some(eid) = st.aom.lookup(id) else {
                    return Err(Error::object_not_active(id.to_string()));
                };
                let entry = st.aom.expect_entry_mut(eid)?;
                match entry.apply(EntryEvent::Enter)? {
                    Applied::Complete => return Ok(eid),
                    Applied::Launch(_) => {
                        return Err(Error::internal("enter cannot launch a teardown"))
                    }
                    Applied::Blocked => {
                        wake = entry.waker();
                        notified = Box::pin(wake.notified());
                        notified.as_mut().enable();
                    }
                }
            }
            notified.await;
        }
    }

    /// Signal an invocation leaving the entry
    ///
    /// The last exit of a draining entry launches its teardown task.
    pub(crate) fn exit(self: &Arc<Self>, eid: EntryId) -> Result<()> {
        let mut st = self.lock();
        match st.aom.expect_entry_mut(eid)?.apply(EntryEvent::Exit)? {
            Applied::Complete => Ok(()),
            Applied::Launch(task) => {
                drop(st);
                self.spawn_task(task);
                Ok(())
            }
            Applied::Blocked => Err(Error::internal("exit cannot block")),
        }
    }

    // -------------------------------------------------------------------------
    // Activation
    // -------------------------------------------------------------------------

    /// Bind `servant` to `id`, driving the entry machine's activate input
    pub(crate) fn activate(&self, id: &ObjectId, servant: ServantHandle) -> Result<()> {
        let mut st = self.lock();

        if st.aom.lookup(id).is_none() && st.aom.len() >= ADAPTER_OBJECTS_COUNT_MAX {
            return Err(Error::AdapterAtCapacity {
                count: st.aom.len(),
                limit: ADAPTER_OBJECTS_COUNT_MAX,
            });
        }

        let servant_entry = st.aom.entry_for_servant(&servant);
        let id_entry = st.aom.lookup(id);

        match self.policies.uniqueness {
            IdUniqueness::Unique => {
                // A servant may serve at most one identity: bound elsewhere
                // is a conflict, bound to this identity's own entry falls
                // through to the already-active check below.
                if let Some(se) = servant_entry {
                    if id_entry != Some(se) {
                        return Err(Error::servant_already_active(id.to_string()));
                    }
                }
                let eid = st.aom.lookup_or_create(id);
                st.aom.expect_entry_mut(eid)?.apply(EntryEvent::Activate)?;
                st.aom.bind_servant(eid, id, servant);
            }
            IdUniqueness::Multiple => match servant_entry {
                // The servant already serves this identity.
                Some(se) if id_entry == Some(se) => {
                    return Err(Error::object_already_active(id.to_string()));
                }
                // The servant is resident elsewhere: this identity becomes
                // an additional name for the same entry.
                Some(se) => {
                    if let Some(stale) = id_entry {
                        let reusable = st
                            .aom
                            .entry(stale)
                            .map(|e| e.state() == EntryState::Invalid && e.refcount() == 0)
                            .unwrap_or(false);
                        if !reusable {
                            return Err(Error::object_already_active(id.to_string()));
                        }
                        // Leftover slot from a failed incarnation; supersede it.
                        st.aom.unbind(id);
                        st.aom.remove_entry(stale);
                    }
                    st.aom.attach_identity(se, id)?;
                }
                None => {
                    let eid = st.aom.lookup_or_create(id);
                    st.aom.expect_entry_mut(eid)?.apply(EntryEvent::Activate)?;
                    st.aom.bind_servant(eid, id, servant);
                }
            },
        }

        metrics::record_object_activated();
        debug!(id = %id, "object activated");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Deactivation / etherealization
    // -------------------------------------------------------------------------

    /// Unbind `id` and drive its entry toward teardown
    ///
    /// Returns the previously bound servant. The teardown task launches on
    /// the transition into `Etherealizing` - immediately when no invocation
    /// is inside the entry, on the last exit otherwise - and this call never
    /// waits for it.
    pub(crate) async fn deactivate(
        self: &Arc<Self>,
        id: &ObjectId,
        activator: Option<Arc<dyn ServantActivator>>,
        cleanup_in_progress: bool,
    ) -> Result<ServantHandle> {
        loop {
            let wake;
            let mut notified;
            {
                let mut st = self.lock();
                let Some(eid) = st.aom.lookup(id) else {
                    return Err(Error::object_not_active(id.to_string()));
                };

                match st.aom.entry(eid).map(|e| e.state()) {
                    // Wait guard: an in-progress incarnation defers
                    // etherealization; retry once the incarnator broadcasts.
                    Some(EntryState::Incarnating) => {
                        wake = st.aom.expect_entry_mut(eid)?.waker();
                        notified = Box::pin(wake.notified());
                        notified.as_mut().enable();
                        // Fall out of the lock scope, then park and retry.
                    }
                    Some(EntryState::Valid) => {
                        let Some(servant) = st.aom.get_servant(eid) else {
                            return Err(Error::object_not_active(id.to_string()));
                        };

                        let detached = st.aom.detach_identity(id).ok_or_else(|| {
                            Error::internal(format!("{} unmapped during deactivate", id))
                        })?;
                        debug_assert_eq!(detached.entry, eid);

                        if !detached.last_identity {
                            // The servant stays resident under its other identities:
                            // no entry transition, only the per-identity hook.
                            if let Some(activator) = activator {
                                let id = id.clone();
                                let servant_for_hook = servant.clone();
                                self.spawn_task(Box::pin(async move {
                                    activator
                                        .etherealize(&id, servant_for_hook, cleanup_in_progress, true)
                                        .await;
                                }));
                            }
                            metrics::record_object_deactivated();
                            debug!(id = %id, "identity detached, servant remains active");
                            return Ok(servant);
                        }

                        // Last identity: the key stays parked on the draining entry
                        // (activations keep failing, arrivals keep parking) until the
                        // teardown task destroys it.
                        let entry = st.aom.expect_entry_mut(eid)?;
                        entry.set_teardown(match activator {
                            Some(activator) => Self::etherealize_teardown(
                                self.clone(),
                                eid,
                                activator,
                                id.clone(),
                                servant.clone(),
                                cleanup_in_progress,
                            ),
                            None => Self::finish_teardown(self.clone(), eid, id.clone()),
                        });

                        match entry.apply(EntryEvent::StartEtherealize)? {
                            // Invocations still inside: the last exit launches.
                            Applied::Complete => {}
                            Applied::Launch(task) => {
                                drop(st);
                                self.spawn_task(task);
                            }
                            Applied::Blocked => {
                                return Err(Error::internal(
                                    "start-etherealize blocked outside incarnation",
                                ))
                            }
                        }

                        metrics::record_object_deactivated();
                        debug!(id = %id, "object deactivated");
                        return Ok(servant);
                    }
                    // Never bound, or already on its way out.
                    _ => return Err(Error::object_not_active(id.to_string())),
                }
            }

            notified.await;
        }
    }

    /// Teardown task that runs the activator's etherealize hook first
    fn etherealize_teardown(
        core: Arc<AdapterCore>,
        eid: EntryId,
        activator: Arc<dyn ServantActivator>,
        id: ObjectId,
        servant: ServantHandle,
        cleanup_in_progress: bool,
    ) -> EtherealizeTask {
        Box::pin(async move {
            // Failures here never reach the deactivation caller; the hook
            // owns its own reporting.
            activator
                .etherealize(&id, servant, cleanup_in_progress, false)
                .await;
            core.complete_etherealize(eid, &id);
        })
    }

    /// Teardown task for map-only entries: nothing external to run
    fn finish_teardown(core: Arc<AdapterCore>, eid: EntryId, id: ObjectId) -> EtherealizeTask {
        Box::pin(async move {
            core.complete_etherealize(eid, &id);
        })
    }

    /// Final transition: Etherealizing → Destroyed, then drop the slot and
    /// the key that was parked on it
    fn complete_etherealize(&self, eid: EntryId, id: &ObjectId) {
        let mut st = self.lock();
        match st.aom.entry_mut(eid) {
            Some(entry) => {
                if let Err(e) = entry.apply(EntryEvent::EtherealizeDone) {
                    warn!(entry = %eid, error = %e, "etherealize-done rejected");
                }
                st.aom.remove_identity_mapping(id, eid);
                st.aom.remove_entry(eid);
            }
            // The adapter was purged while the teardown task was in flight.
            None => {
                st.aom.remove_identity_mapping(id, eid);
                debug!(entry = %eid, "entry already gone at etherealize-done");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    /// Plain map lookup: the servant bound to `id`, if any
    pub(crate) fn find_servant(&self, id: &ObjectId) -> Option<ServantHandle> {
        let st = self.lock();
        st.aom.lookup(id).and_then(|eid| st.aom.get_servant(eid))
    }

    /// Resolve `id`, incarnating through `activator` on demand
    ///
    /// Refcount-neutral: the incarnator's residency is balanced before this
    /// returns, and waiting callers balance theirs the same way. Concurrent
    /// calls for one identity run `incarnate` exactly once; the rest park on
    /// the entry and retry after the broadcast.
    pub(crate) async fn resolve_or_incarnate(
        self: &Arc<Self>,
        id: &ObjectId,
        activator: &Arc<dyn ServantActivator>,
    ) -> Result<Resolution> {
        loop {
            // Resolved under the lock, then acted on after it is released:
            // `Some(eid)` means we claimed the slot and must incarnate;
            // otherwise `notified` (if set) is an enabled parking future.
            let wake;
            let mut notified = None;
            let to_incarnate;
            {
                let mut st = self.lock();

                if st.aom.lookup(id).is_none() && st.aom.len() >= ADAPTER_OBJECTS_COUNT_MAX {
                    return Err(Error::AdapterAtCapacity {
                        count: st.aom.len(),
                        limit: ADAPTER_OBJECTS_COUNT_MAX,
                    });
                }

                let eid = st.aom.lookup_or_create(id);
                let state = st
                    .aom
                    .entry(eid)
                    .map(|e| e.state())
                    .unwrap_or(EntryState::Destroyed);

                match state {
                    EntryState::Valid => {
                        let servant = st.aom.get_servant(eid).ok_or_else(|| {
                            Error::internal(format!("valid entry without a servant for {}", id))
                        })?;
                        return Ok(Resolution::Servant(servant));
                    }

                    EntryState::Invalid => {
                        // Become the incarnator. Enter claims the slot and
                        // blocks every other caller until the broadcast.
                        st.aom.expect_entry_mut(eid)?.apply(EntryEvent::Enter)?;
                        to_incarnate = Some(eid);
                    }

                    // Incarnation or etherealization in flight: the enter guard
                    // parks us; retry the whole resolution after the broadcast.
                    _ => {
                        let entry = st.aom.expect_entry_mut(eid)?;
                        match entry.apply(EntryEvent::Enter)? {
                            Applied::Blocked => {
                                wake = entry.waker();
                                let mut park = Box::pin(wake.notified());
                                park.as_mut().enable();
                                notified = Some(park);
                                to_incarnate = None;
                            }
                            Applied::Complete => {
                                // Woke into a valid entry and came inside;
                                // balance the residency and serve.
                                let servant = st.aom.get_servant(eid).ok_or_else(|| {
                                    Error::internal(format!(
                                        "valid entry without a servant for {}",
                                        id
                                    ))
                                })?;
                                st.aom.expect_entry_mut(eid)?.apply(EntryEvent::Exit)?;
                                return Ok(Resolution::Servant(servant));
                            }
                            Applied::Launch(_) => {
                                return Err(Error::internal("enter cannot launch a teardown"))
                            }
                        }
                    }
                }
            }

            if let Some(eid) = to_incarnate {
                debug!(id = %id, "incarnating");
                let outcome = activator.incarnate(id).await;

                let mut st = self.lock();
                match outcome {
                    Ok(Resolution::Servant(servant)) => {
                        if self.policies.uniqueness == IdUniqueness::Unique
                            && st.aom.entry_for_servant(&servant).is_some()
                        {
                            st.aom
                                .expect_entry_mut(eid)?
                                .apply(EntryEvent::IncarnateFailed)?;
                            return Err(Error::servant_already_active(id.to_string()));
                        }
                        st.aom.bind_servant(eid, id, servant.clone());
                        let entry = st.aom.expect_entry_mut(eid)?;
                        entry.apply(EntryEvent::IncarnateDone)?;
                        entry.apply(EntryEvent::Exit)?;
                        metrics::record_object_activated();
                        debug!(id = %id, "incarnation complete");
                        return Ok(Resolution::Servant(servant));
                    }
                    Ok(Resolution::Forward(target)) => {
                        st.aom
                            .expect_entry_mut(eid)?
                            .apply(EntryEvent::IncarnateFailed)?;
                        debug!(id = %id, "incarnation forwarded");
                        return Ok(Resolution::Forward(target));
                    }
                    Err(e) => {
                        st.aom
                            .expect_entry_mut(eid)?
                            .apply(EntryEvent::IncarnateFailed)?;
                        debug!(id = %id, error = %e, "incarnation failed");
                        return Err(e);
                    }
                }
            } else if let Some(notified) = notified {
                notified.await;
            }
        }
    }

    /// The identity bound to `servant`, activating implicitly when allowed
    pub(crate) fn servant_to_id(&self, servant: &ServantHandle) -> Result<ObjectId> {
        if self.policies.uniqueness == IdUniqueness::Unique {
            let st = self.lock();
            if let Some(eid) = st.aom.entry_for_servant(servant) {
                return st.aom.key_for_entry(eid);
            }
        }

        if self.policies.implicit_activation && self.policies.assignment == IdAssignment::System
        {
            let id = self.new_system_id()?;
            self.activate(&id, servant.clone())?;
            return Ok(id);
        }

        if self.policies.uniqueness == IdUniqueness::Unique {
            Err(Error::object_not_active("servant has no active identity"))
        } else {
            Err(Error::wrong_policy("servant_to_id"))
        }
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Deactivate every mapped identity (adapter teardown)
    pub(crate) async fn etherealize_all(
        self: &Arc<Self>,
        activator: Option<Arc<dyn ServantActivator>>,
    ) {
        let ids = self.lock().aom.active_ids();
        info!(count = ids.len(), "etherealizing all retained objects");
        for id in ids {
            match self.deactivate(&id, activator.clone(), true).await {
                Ok(_) => {}
                // Raced with an explicit deactivation; already gone.
                Err(Error::ObjectNotActive { .. }) => {}
                Err(e) => warn!(id = %id, error = %e, "etherealize-all deactivation failed"),
            }
        }
    }

    /// Drop all mappings without driving lifecycles (hard teardown)
    pub(crate) fn purge(&self) {
        self.lock().aom.clear();
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// External hooks handed to an adapter at construction
///
/// Which hooks are required is decided by the policy set: a default
/// servant for the default-servant strategies, an activator for the
/// retaining servant-manager strategy, a locator for the non-retaining one.
#[derive(Default)]
pub struct AdapterHooks {
    pub default_servant: Option<ServantHandle>,
    pub activator: Option<Arc<dyn ServantActivator>>,
    pub locator: Option<Arc<dyn ServantLocator>>,
}

impl AdapterHooks {
    /// No hooks (map-only adapters)
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the default servant
    pub fn with_default_servant(mut self, servant: ServantHandle) -> Self {
        self.default_servant = Some(servant);
        self
    }

    /// Set the servant activator
    pub fn with_activator(mut self, activator: Arc<dyn ServantActivator>) -> Self {
        self.activator = Some(activator);
        self
    }

    /// Set the servant locator
    pub fn with_locator(mut self, locator: Arc<dyn ServantLocator>) -> Self {
        self.locator = Some(locator);
        self
    }
}

/// One object adapter: a policy-selected mediator over the lifecycle engine
pub struct Adapter {
    name: String,
    core: Arc<AdapterCore>,
    mediator: Arc<dyn Mediator>,
    manager: Arc<AdapterManager>,
}

impl Adapter {
    /// Create an adapter governed by `manager`
    ///
    /// Validates the configuration, selects the mediator strategy for the
    /// policy combination and attaches the adapter to the manager.
    pub fn new(
        config: AdapterConfig,
        manager: Arc<AdapterManager>,
        hooks: AdapterHooks,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let core = Arc::new(AdapterCore::new(config.ordinal, config.policies));
        let mediator = mediator_for(&config.policies, core.clone(), hooks)?;

        let adapter = Arc::new(Self {
            name: config.name,
            core,
            mediator,
            manager: manager.clone(),
        });
        manager.attach(adapter.clone())?;

        info!(name = %adapter.name, policies = ?config.policies, "adapter created");
        Ok(adapter)
    }

    /// Adapter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The policy combination this adapter was built with
    pub fn policies(&self) -> &Policies {
        self.core.policies()
    }

    /// The manager governing this adapter's admission
    pub fn manager(&self) -> &Arc<AdapterManager> {
        &self.manager
    }

    /// Number of identities with a bound servant
    pub fn active_count(&self) -> usize {
        self.core.active_count()
    }

    // -------------------------------------------------------------------------
    // Dispatch surface
    // -------------------------------------------------------------------------

    /// Resolve the servant for one inbound invocation
    ///
    /// Callers bracket this with the manager's `enter`/`exit`. A `Forward`
    /// outcome is not an error: reissue the request against the new target.
    #[instrument(skip(self), fields(adapter = %self.name, id = %id, operation), level = "debug")]
    pub async fn resolve_servant(&self, id: &ObjectId, operation: &str) -> Result<Resolution> {
        let outcome = self.mediator.resolve_servant(id, operation).await;
        match &outcome {
            Ok(Resolution::Servant(_)) => metrics::record_resolution("servant"),
            Ok(Resolution::Forward(_)) => metrics::record_resolution("forward"),
            Err(_) => metrics::record_resolution("error"),
        }
        outcome
    }

    /// Signal request completion to strategies that pair it (locator)
    pub async fn finish_request(&self, id: &ObjectId, operation: &str, servant: ServantHandle) {
        self.mediator.finish_request(id, operation, servant).await;
    }

    /// Bring an invocation inside the identity's entry (retaining adapters)
    ///
    /// Call after resolution; pair with [`Adapter::exit`]. Parks while the
    /// entry is incarnating or etherealizing.
    pub async fn enter(&self, id: &ObjectId) -> Result<EntryId> {
        if self.policies().retention != ServantRetention::Retain {
            return Err(Error::wrong_policy("enter"));
        }
        self.core.enter(id).await
    }

    /// Signal an invocation leaving the entry it entered
    pub fn exit(&self, entry: EntryId) -> Result<()> {
        if self.policies().retention != ServantRetention::Retain {
            return Err(Error::wrong_policy("exit"));
        }
        self.core.exit(entry)
    }

    // -------------------------------------------------------------------------
    // Administrative surface
    // -------------------------------------------------------------------------

    /// Activate `servant` under a fresh system-assigned identity
    #[instrument(skip(self, servant), fields(adapter = %self.name), level = "debug")]
    pub async fn activate_object(&self, servant: ServantHandle) -> Result<ObjectId> {
        let id = self.mediator.new_system_id()?;
        self.mediator.activate(&id, servant).await?;
        Ok(id)
    }

    /// Activate `servant` under a caller-supplied identity
    #[instrument(skip(self, servant), fields(adapter = %self.name, id = %id), level = "debug")]
    pub async fn activate_object_with_id(
        &self,
        id: &ObjectId,
        servant: ServantHandle,
    ) -> Result<()> {
        self.mediator.activate(id, servant).await
    }

    /// Deactivate the object named `id`, returning the servant it had
    ///
    /// Etherealization runs on a background task; this never waits for it.
    #[instrument(skip(self), fields(adapter = %self.name, id = %id), level = "debug")]
    pub async fn deactivate_object(&self, id: &ObjectId) -> Result<ServantHandle> {
        self.mediator.deactivate(id).await
    }

    /// The identity bound to `servant`
    pub async fn servant_to_id(&self, servant: &ServantHandle) -> Result<ObjectId> {
        self.mediator.servant_to_id(servant).await
    }

    /// The servant bound to `id`
    pub async fn id_to_servant(&self, id: &ObjectId) -> Result<ServantHandle> {
        self.mediator.id_to_servant(id).await
    }

    /// Allocate a fresh system-assigned identity without activating anything
    pub fn new_system_id(&self) -> Result<ObjectId> {
        self.mediator.new_system_id()
    }

    // -------------------------------------------------------------------------
    // Teardown surface
    // -------------------------------------------------------------------------

    /// Tear down every retained object (driven by the manager's deactivation)
    pub async fn etherealize_all(&self) {
        self.mediator.etherealize_all().await;
    }

    /// Drop all lifecycle bookkeeping without running teardown hooks
    pub fn purge(&self) {
        self.core.purge();
    }

    /// Detach this adapter from its manager
    pub fn destroy(self: &Arc<Self>) {
        self.purge();
        self.manager.detach(self);
        info!(name = %self.name, "adapter destroyed");
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("name", &self.name)
            .field("policies", self.policies())
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use selkie_core::servant::{ForwardTarget, Servant};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    struct TaggedServant {
        tag: &'static str,
    }

    #[async_trait]
    impl Servant for TaggedServant {
        async fn dispatch(
            &self,
            _id: &ObjectId,
            _operation: &str,
            _payload: Bytes,
        ) -> Result<Bytes> {
            Ok(Bytes::from_static(self.tag.as_bytes()))
        }
    }

    fn servant(tag: &'static str) -> ServantHandle {
        Arc::new(TaggedServant { tag })
    }

    fn oid(s: &str) -> ObjectId {
        ObjectId::try_from(s).unwrap()
    }

    /// Activator that counts incarnations/etherealizations and can be made
    /// to park its etherealize hook on a gate.
    struct CountingActivator {
        incarnations: AtomicUsize,
        etherealizations: AtomicUsize,
        etherealize_gate: Option<Arc<Notify>>,
        forward_id: Option<&'static str>,
    }

    impl CountingActivator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                incarnations: AtomicUsize::new(0),
                etherealizations: AtomicUsize::new(0),
                etherealize_gate: None,
                forward_id: None,
            })
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                incarnations: AtomicUsize::new(0),
                etherealizations: AtomicUsize::new(0),
                etherealize_gate: Some(gate),
                forward_id: None,
            })
        }

        fn forwarding(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                incarnations: AtomicUsize::new(0),
                etherealizations: AtomicUsize::new(0),
                etherealize_gate: None,
                forward_id: Some(id),
            })
        }
    }

    #[async_trait]
    impl ServantActivator for CountingActivator {
        async fn incarnate(&self, id: &ObjectId) -> Result<Resolution> {
            self.incarnations.fetch_add(1, Ordering::SeqCst);
            if let Some(fwd) = self.forward_id {
                if id == &oid(fwd) {
                    return Ok(Resolution::Forward(ForwardTarget::new(
                        Bytes::from_static(b"over-there"),
                    )));
                }
            }
            Ok(Resolution::Servant(servant("incarnated")))
        }

        async fn etherealize(
            &self,
            _id: &ObjectId,
            _servant: ServantHandle,
            _cleanup_in_progress: bool,
            _remaining_activations: bool,
        ) {
            if let Some(gate) = &self.etherealize_gate {
                gate.notified().await;
            }
            self.etherealizations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn retain_only() -> Arc<Adapter> {
        let manager = AdapterManager::standalone();
        manager.activate().unwrap();
        Adapter::new(
            AdapterConfig::new("test", 1),
            manager,
            AdapterHooks::none(),
        )
        .unwrap()
    }

    fn retain_only_with(policies: Policies) -> Arc<Adapter> {
        let manager = AdapterManager::standalone();
        manager.activate().unwrap();
        Adapter::new(
            AdapterConfig::new("test", 1).with_policies(policies),
            manager,
            AdapterHooks::none(),
        )
        .unwrap()
    }

    fn with_activator(activator: Arc<CountingActivator>) -> Arc<Adapter> {
        let manager = AdapterManager::standalone();
        manager.activate().unwrap();
        let policies = Policies {
            request_processing: selkie_core::policy::RequestProcessing::ServantManager,
            assignment: IdAssignment::User,
            ..Default::default()
        };
        Adapter::new(
            AdapterConfig::new("test", 1).with_policies(policies),
            manager,
            AdapterHooks::none().with_activator(activator),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_activate_resolve_deactivate_round_trip() {
        let adapter = retain_only();
        let id = oid("greeter");
        let s = servant("greeter");

        adapter.activate_object_with_id(&id, s.clone()).await.unwrap();
        assert_eq!(adapter.active_count(), 1);

        let resolved = adapter
            .resolve_servant(&id, "greet")
            .await
            .unwrap()
            .expect_servant();
        assert!(Arc::ptr_eq(&resolved, &s));

        let removed = adapter.deactivate_object(&id).await.unwrap();
        assert!(Arc::ptr_eq(&removed, &s));
        assert_eq!(adapter.active_count(), 0);

        let err = adapter.resolve_servant(&id, "greet").await.unwrap_err();
        assert!(matches!(err, Error::ObjectNotActive { .. }));

        let err = adapter.deactivate_object(&id).await.err().unwrap();
        assert!(matches!(err, Error::ObjectNotActive { .. }));
    }

    #[tokio::test]
    async fn test_double_activation_is_rejected_unchanged() {
        let adapter = retain_only();
        let id = oid("twice");

        adapter
            .activate_object_with_id(&id, servant("first"))
            .await
            .unwrap();
        let err = adapter
            .activate_object_with_id(&id, servant("second"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ObjectAlreadyActive { .. }));

        // The first binding is untouched.
        let resolved = adapter
            .resolve_servant(&id, "op")
            .await
            .unwrap()
            .expect_servant();
        let reply = resolved.dispatch(&id, "op", Bytes::new()).await.unwrap();
        assert_eq!(reply, Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn test_unique_policy_rejects_second_identity_for_servant() {
        let adapter = retain_only();
        let s = servant("shared");

        adapter
            .activate_object_with_id(&oid("first-name"), s.clone())
            .await
            .unwrap();
        let err = adapter
            .activate_object_with_id(&oid("second-name"), s)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServantAlreadyActive { .. }));
    }

    #[tokio::test]
    async fn test_multiple_policy_shares_one_servant() {
        let adapter = retain_only_with(Policies {
            uniqueness: IdUniqueness::Multiple,
            ..Default::default()
        });
        let s = servant("shared");
        let first = oid("alias-1");
        let second = oid("alias-2");

        adapter.activate_object_with_id(&first, s.clone()).await.unwrap();
        adapter.activate_object_with_id(&second, s.clone()).await.unwrap();
        assert_eq!(adapter.active_count(), 2);

        // Dropping one alias keeps the other resolvable.
        adapter.deactivate_object(&first).await.unwrap();
        let resolved = adapter
            .resolve_servant(&second, "op")
            .await
            .unwrap()
            .expect_servant();
        assert!(Arc::ptr_eq(&resolved, &s));

        // No canonical identity exists for a multi-identity servant.
        let err = adapter.servant_to_id(&s).await.unwrap_err();
        assert!(matches!(err, Error::WrongPolicy { .. }));

        adapter.deactivate_object(&second).await.unwrap();
        assert_eq!(adapter.active_count(), 0);
    }

    #[tokio::test]
    async fn test_system_ids_are_fixed_width_and_monotonic() {
        let adapter = retain_only();

        let a = adapter.activate_object(servant("a")).await.unwrap();
        let b = adapter.activate_object(servant("b")).await.unwrap();

        assert_eq!(a.len(), selkie_core::constants::SYSTEM_OBJECT_ID_LENGTH_BYTES);
        assert_eq!(b.len(), selkie_core::constants::SYSTEM_OBJECT_ID_LENGTH_BYTES);
        assert!(a < b);
        // Adapter ordinal is the big-endian prefix.
        assert_eq!(&a.as_bytes()[..4], &1u32.to_be_bytes());
    }

    #[tokio::test]
    async fn test_user_assignment_rejects_system_ids() {
        let adapter = retain_only_with(Policies {
            assignment: IdAssignment::User,
            ..Default::default()
        });

        let err = adapter.new_system_id().unwrap_err();
        assert!(matches!(err, Error::WrongPolicy { .. }));

        let err = adapter.activate_object(servant("x")).await.unwrap_err();
        assert!(matches!(err, Error::WrongPolicy { .. }));
    }

    #[tokio::test]
    async fn test_servant_to_id_round_trip_and_implicit_activation() {
        let adapter = retain_only();
        let id = oid("known");
        let s = servant("known");
        adapter.activate_object_with_id(&id, s.clone()).await.unwrap();

        assert_eq!(adapter.servant_to_id(&s).await.unwrap(), id);

        // Without implicit activation, an unbound servant has no identity.
        let err = adapter.servant_to_id(&servant("stranger")).await.unwrap_err();
        assert!(matches!(err, Error::ObjectNotActive { .. }));

        // With it, asking mints and binds a fresh system id.
        let implicit = retain_only_with(Policies {
            implicit_activation: true,
            ..Default::default()
        });
        let s2 = servant("implicit");
        let minted = implicit.servant_to_id(&s2).await.unwrap();
        let resolved = implicit
            .resolve_servant(&minted, "op")
            .await
            .unwrap()
            .expect_servant();
        assert!(Arc::ptr_eq(&resolved, &s2));
    }

    #[tokio::test]
    async fn test_enter_exit_bracket_tracks_residency() {
        let adapter = retain_only();
        let id = oid("busy");
        adapter
            .activate_object_with_id(&id, servant("busy"))
            .await
            .unwrap();

        let entry = adapter.enter(&id).await.unwrap();
        adapter.exit(entry).unwrap();

        // An unmatched exit is an invariant violation, not a silent clamp.
        let err = adapter.exit(entry).unwrap_err();
        assert!(matches!(err, Error::RefcountUnderflow { .. }));

        // Entering an unknown identity fails outright.
        let err = adapter.enter(&oid("unknown")).await.unwrap_err();
        assert!(matches!(err, Error::ObjectNotActive { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deactivate_waits_for_residents_then_etherealizes_once() {
        let activator = CountingActivator::new();
        let adapter = with_activator(activator.clone());
        let id = oid("draining");

        adapter
            .resolve_servant(&id, "op")
            .await
            .unwrap()
            .expect_servant();

        // Two invocations inside the entry.
        let e1 = adapter.enter(&id).await.unwrap();
        let e2 = adapter.enter(&id).await.unwrap();

        // Deactivation returns immediately; teardown is deferred to the
        // last exit.
        adapter.deactivate_object(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(activator.etherealizations.load(Ordering::SeqCst), 0);

        adapter.exit(e1).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(activator.etherealizations.load(Ordering::SeqCst), 0);

        adapter.exit(e2).unwrap();
        timeout(Duration::from_secs(1), async {
            while activator.etherealizations.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("teardown should launch on the last exit");
        assert_eq!(activator.etherealizations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_resolves_incarnate_once() {
        let activator = CountingActivator::new();
        let adapter = with_activator(activator.clone());
        let id = oid("popular");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let adapter = adapter.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                adapter.resolve_servant(&id, "op").await
            }));
        }

        for task in tasks {
            let resolution = task.await.unwrap().unwrap();
            resolution.expect_servant();
        }
        assert_eq!(activator.incarnations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_incarnation_forward_propagates_and_rolls_back() {
        let activator = CountingActivator::forwarding("migrated");
        let adapter = with_activator(activator.clone());
        let id = oid("migrated");

        match adapter.resolve_servant(&id, "op").await.unwrap() {
            Resolution::Forward(target) => {
                assert_eq!(target.reference, Bytes::from_static(b"over-there"));
            }
            Resolution::Servant(_) => panic!("expected forward"),
        }

        // The slot rolled back to Invalid: the next resolve incarnates again.
        adapter.resolve_servant(&id, "op").await.unwrap();
        assert_eq!(activator.incarnations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deactivation_never_waits_for_etherealize() {
        let gate = Arc::new(Notify::new());
        let activator = CountingActivator::gated(gate.clone());
        let adapter = with_activator(activator.clone());
        let id = oid("slow-teardown");

        adapter
            .resolve_servant(&id, "op")
            .await
            .unwrap()
            .expect_servant();

        // The etherealize hook parks on the gate, yet deactivation returns.
        timeout(Duration::from_secs(1), adapter.deactivate_object(&id))
            .await
            .expect("deactivation must not wait for teardown")
            .unwrap();
        assert_eq!(activator.etherealizations.load(Ordering::SeqCst), 0);

        // A resolve for the same identity parks while the old slot is
        // etherealizing - starvation risk if the teardown never completes.
        let blocked = {
            let adapter = adapter.clone();
            let id = id.clone();
            tokio::spawn(async move { adapter.resolve_servant(&id, "op").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        // Opening the gate lets the teardown finish; the parked resolve
        // re-incarnates a fresh slot.
        gate.notify_waiters();
        let resolution = timeout(Duration::from_secs(1), blocked)
            .await
            .expect("resolve should unpark once etherealization completes")
            .unwrap()
            .unwrap();
        resolution.expect_servant();
        assert_eq!(activator.etherealizations.load(Ordering::SeqCst), 1);
        assert_eq!(activator.incarnations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_manager_etherealize_walk_tears_down_adapters() {
        let activator = CountingActivator::new();
        let manager = AdapterManager::standalone();
        manager.activate().unwrap();
        let policies = Policies {
            request_processing: selkie_core::policy::RequestProcessing::ServantManager,
            assignment: IdAssignment::User,
            ..Default::default()
        };
        let adapter = Adapter::new(
            AdapterConfig::new("governed", 1).with_policies(policies),
            manager.clone(),
            AdapterHooks::none().with_activator(activator.clone()),
        )
        .unwrap();

        adapter.resolve_servant(&oid("one"), "op").await.unwrap();
        adapter.resolve_servant(&oid("two"), "op").await.unwrap();
        assert_eq!(adapter.active_count(), 2);

        manager.deactivate(true, true).await.unwrap();

        timeout(Duration::from_secs(1), async {
            while activator.etherealizations.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("manager teardown should etherealize every retained object");
        assert_eq!(adapter.active_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_admission_brackets_resolution() {
        let manager = AdapterManager::standalone();
        let adapter = Adapter::new(
            AdapterConfig::new("gated", 1),
            manager.clone(),
            AdapterHooks::none(),
        )
        .unwrap();
        let id = oid("gated-object");

        // Activation is administrative; it does not pass admission.
        adapter
            .activate_object_with_id(&id, servant("gated"))
            .await
            .unwrap();

        // The manager still holds: a dispatched request parks.
        let parked = {
            let manager = manager.clone();
            let adapter = adapter.clone();
            let id = id.clone();
            tokio::spawn(async move { manager.admit_and_resolve(&adapter, &id, "op").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!parked.is_finished());

        manager.activate().unwrap();
        let resolution = timeout(Duration::from_secs(1), parked)
            .await
            .expect("admission should unblock on activate")
            .unwrap()
            .unwrap();
        resolution.expect_servant();
        assert_eq!(manager.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_non_retain_adapter_rejects_residency_bracket() {
        let manager = AdapterManager::standalone();
        manager.activate().unwrap();
        let policies = Policies {
            retention: ServantRetention::NonRetain,
            request_processing: selkie_core::policy::RequestProcessing::DefaultServant,
            uniqueness: IdUniqueness::Multiple,
            ..Default::default()
        };
        let adapter = Adapter::new(
            AdapterConfig::new("stateless", 1).with_policies(policies),
            manager,
            AdapterHooks::none().with_default_servant(servant("default")),
        )
        .unwrap();

        let err = adapter.enter(&oid("anything")).await.unwrap_err();
        assert!(matches!(err, Error::WrongPolicy { .. }));
    }

    #[tokio::test]
    async fn test_destroy_detaches_from_manager() {
        let manager = AdapterManager::standalone();
        manager.activate().unwrap();
        let adapter = Adapter::new(
            AdapterConfig::new("short-lived", 1),
            manager.clone(),
            AdapterHooks::none(),
        )
        .unwrap();
        assert_eq!(manager.adapter_count(), 1);

        adapter.destroy();
        assert_eq!(manager.adapter_count(), 0);
    }
}
