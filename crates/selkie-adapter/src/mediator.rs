//! Request mediation strategies
//!
//! TigerStyle: A closed strategy set behind one trait, selected once by a
//! pure factory. There is exactly one strategy per valid combination of
//! {servant retention × request processing}; identity uniqueness folds
//! into the map's index and needs no strategy of its own.
//!
//! Retaining strategies compose the active object map and the entry state
//! machine through the adapter core; non-retaining strategies bypass both
//! and go straight to their configured hook.

use crate::adapter::{AdapterCore, AdapterHooks};
use async_trait::async_trait;
use selkie_core::error::{Error, Result};
use selkie_core::object_id::ObjectId;
use selkie_core::policy::{Policies, RequestProcessing, ServantRetention};
use selkie_core::servant::{
    Resolution, ServantActivator, ServantHandle, ServantLocator,
};
use std::sync::Arc;

/// One request-mediation strategy
///
/// Every operation is serialized by the owning adapter's lock (inside the
/// core); strategies themselves hold no mutable state.
#[async_trait]
pub trait Mediator: Send + Sync {
    /// Resolve the servant for one inbound invocation
    async fn resolve_servant(&self, id: &ObjectId, operation: &str) -> Result<Resolution>;

    /// Pair a completed invocation with its resolution (locator strategy)
    async fn finish_request(&self, _id: &ObjectId, _operation: &str, _servant: ServantHandle) {}

    /// Explicitly activate `servant` under `id`
    async fn activate(&self, id: &ObjectId, servant: ServantHandle) -> Result<()>;

    /// Deactivate `id`, returning the servant it had
    async fn deactivate(&self, id: &ObjectId) -> Result<ServantHandle>;

    /// The identity bound to `servant`
    async fn servant_to_id(&self, servant: &ServantHandle) -> Result<ObjectId>;

    /// The servant bound to `id`
    async fn id_to_servant(&self, id: &ObjectId) -> Result<ServantHandle>;

    /// Allocate a fresh system-assigned identity
    fn new_system_id(&self) -> Result<ObjectId>;

    /// Tear down every retained object (no-op for non-retaining strategies)
    async fn etherealize_all(&self);
}

/// Select the strategy for a validated policy combination
///
/// Pure decision function: policies in, strategy out. Fails when the
/// combination is invalid or a required hook is missing.
pub(crate) fn mediator_for(
    policies: &Policies,
    core: Arc<AdapterCore>,
    hooks: AdapterHooks,
) -> Result<Arc<dyn Mediator>> {
    policies.validate()?;

    match (policies.retention, policies.request_processing) {
        (ServantRetention::Retain, RequestProcessing::ActiveObjectMapOnly) => {
            Ok(Arc::new(RetainOnlyMediator { core }))
        }
        (ServantRetention::Retain, RequestProcessing::DefaultServant) => {
            let default_servant = hooks.default_servant.ok_or_else(missing_default)?;
            Ok(Arc::new(RetainDefaultMediator {
                core,
                default_servant,
            }))
        }
        (ServantRetention::Retain, RequestProcessing::ServantManager) => {
            let activator = hooks.activator.ok_or_else(missing_activator)?;
            Ok(Arc::new(RetainActivatorMediator { core, activator }))
        }
        (ServantRetention::NonRetain, RequestProcessing::DefaultServant) => {
            let default_servant = hooks.default_servant.ok_or_else(missing_default)?;
            Ok(Arc::new(NonRetainDefaultMediator {
                core,
                default_servant,
            }))
        }
        (ServantRetention::NonRetain, RequestProcessing::ServantManager) => {
            let locator = hooks.locator.ok_or_else(missing_locator)?;
            Ok(Arc::new(NonRetainLocatorMediator { core, locator }))
        }
        // Rejected by validate() above.
        (ServantRetention::NonRetain, RequestProcessing::ActiveObjectMapOnly) => {
            Err(Error::InvalidConfiguration {
                field: "policies.request_processing".into(),
                reason: "non-retaining adapters require a default servant or servant manager"
                    .into(),
            })
        }
    }
}

fn missing_default() -> Error {
    Error::InvalidConfiguration {
        field: "hooks.default_servant".into(),
        reason: "required by the default-servant policy".into(),
    }
}

fn missing_activator() -> Error {
    Error::InvalidConfiguration {
        field: "hooks.activator".into(),
        reason: "required by the retaining servant-manager policy".into(),
    }
}

fn missing_locator() -> Error {
    Error::InvalidConfiguration {
        field: "hooks.locator".into(),
        reason: "required by the non-retaining servant-manager policy".into(),
    }
}

// =============================================================================
// Retaining strategies
// =============================================================================

/// Map-only: only explicitly activated objects are reachable
pub(crate) struct RetainOnlyMediator {
    core: Arc<AdapterCore>,
}

#[async_trait]
impl Mediator for RetainOnlyMediator {
    async fn resolve_servant(&self, id: &ObjectId, _operation: &str) -> Result<Resolution> {
        match self.core.find_servant(id) {
            Some(servant) => Ok(Resolution::Servant(servant)),
            None => Err(Error::object_not_active(id.to_string())),
        }
    }

    async fn activate(&self, id: &ObjectId, servant: ServantHandle) -> Result<()> {
        self.core.activate(id, servant)
    }

    async fn deactivate(&self, id: &ObjectId) -> Result<ServantHandle> {
        self.core.deactivate(id, None, false).await
    }

    async fn servant_to_id(&self, servant: &ServantHandle) -> Result<ObjectId> {
        self.core.servant_to_id(servant)
    }

    async fn id_to_servant(&self, id: &ObjectId) -> Result<ServantHandle> {
        self.core
            .find_servant(id)
            .ok_or_else(|| Error::object_not_active(id.to_string()))
    }

    fn new_system_id(&self) -> Result<ObjectId> {
        self.core.new_system_id()
    }

    async fn etherealize_all(&self) {
        self.core.etherealize_all(None).await;
    }
}

/// Map with a default-servant fallback for unknown identities
pub(crate) struct RetainDefaultMediator {
    core: Arc<AdapterCore>,
    default_servant: ServantHandle,
}

#[async_trait]
impl Mediator for RetainDefaultMediator {
    async fn resolve_servant(&self, id: &ObjectId, _operation: &str) -> Result<Resolution> {
        match self.core.find_servant(id) {
            Some(servant) => Ok(Resolution::Servant(servant)),
            None => Ok(Resolution::Servant(self.default_servant.clone())),
        }
    }

    async fn activate(&self, id: &ObjectId, servant: ServantHandle) -> Result<()> {
        self.core.activate(id, servant)
    }

    async fn deactivate(&self, id: &ObjectId) -> Result<ServantHandle> {
        self.core.deactivate(id, None, false).await
    }

    async fn servant_to_id(&self, servant: &ServantHandle) -> Result<ObjectId> {
        self.core.servant_to_id(servant)
    }

    async fn id_to_servant(&self, id: &ObjectId) -> Result<ServantHandle> {
        match self.core.find_servant(id) {
            Some(servant) => Ok(servant),
            None => Ok(self.default_servant.clone()),
        }
    }

    fn new_system_id(&self) -> Result<ObjectId> {
        self.core.new_system_id()
    }

    async fn etherealize_all(&self) {
        self.core.etherealize_all(None).await;
    }
}

/// Map with on-demand incarnation/etherealization through an activator
pub(crate) struct RetainActivatorMediator {
    core: Arc<AdapterCore>,
    activator: Arc<dyn ServantActivator>,
}

#[async_trait]
impl Mediator for RetainActivatorMediator {
    async fn resolve_servant(&self, id: &ObjectId, _operation: &str) -> Result<Resolution> {
        self.core.resolve_or_incarnate(id, &self.activator).await
    }

    async fn activate(&self, id: &ObjectId, servant: ServantHandle) -> Result<()> {
        self.core.activate(id, servant)
    }

    async fn deactivate(&self, id: &ObjectId) -> Result<ServantHandle> {
        self.core
            .deactivate(id, Some(self.activator.clone()), false)
            .await
    }

    async fn servant_to_id(&self, servant: &ServantHandle) -> Result<ObjectId> {
        self.core.servant_to_id(servant)
    }

    async fn id_to_servant(&self, id: &ObjectId) -> Result<ServantHandle> {
        self.core
            .find_servant(id)
            .ok_or_else(|| Error::object_not_active(id.to_string()))
    }

    fn new_system_id(&self) -> Result<ObjectId> {
        self.core.new_system_id()
    }

    async fn etherealize_all(&self) {
        self.core.etherealize_all(Some(self.activator.clone())).await;
    }
}

// =============================================================================
// Non-retaining strategies
// =============================================================================

/// Every resolution goes straight to the configured default servant
///
/// Object lifecycle APIs are ill-posed without a map: wrong policy.
pub(crate) struct NonRetainDefaultMediator {
    core: Arc<AdapterCore>,
    default_servant: ServantHandle,
}

#[async_trait]
impl Mediator for NonRetainDefaultMediator {
    async fn resolve_servant(&self, _id: &ObjectId, _operation: &str) -> Result<Resolution> {
        Ok(Resolution::Servant(self.default_servant.clone()))
    }

    async fn activate(&self, _id: &ObjectId, _servant: ServantHandle) -> Result<()> {
        Err(Error::wrong_policy("activate_object"))
    }

    async fn deactivate(&self, _id: &ObjectId) -> Result<ServantHandle> {
        Err(Error::wrong_policy("deactivate_object"))
    }

    async fn servant_to_id(&self, _servant: &ServantHandle) -> Result<ObjectId> {
        Err(Error::wrong_policy("servant_to_id"))
    }

    async fn id_to_servant(&self, _id: &ObjectId) -> Result<ServantHandle> {
        Ok(self.default_servant.clone())
    }

    fn new_system_id(&self) -> Result<ObjectId> {
        self.core.new_system_id()
    }

    async fn etherealize_all(&self) {
        // Nothing retained, nothing to tear down.
    }
}

/// Every resolution goes through the locator's preinvoke/postinvoke pair
pub(crate) struct NonRetainLocatorMediator {
    core: Arc<AdapterCore>,
    locator: Arc<dyn ServantLocator>,
}

#[async_trait]
impl Mediator for NonRetainLocatorMediator {
    async fn resolve_servant(&self, id: &ObjectId, operation: &str) -> Result<Resolution> {
        self.locator.preinvoke(id, operation).await
    }

    async fn finish_request(&self, id: &ObjectId, operation: &str, servant: ServantHandle) {
        self.locator.postinvoke(id, operation, servant).await;
    }

    async fn activate(&self, _id: &ObjectId, _servant: ServantHandle) -> Result<()> {
        Err(Error::wrong_policy("activate_object"))
    }

    async fn deactivate(&self, _id: &ObjectId) -> Result<ServantHandle> {
        Err(Error::wrong_policy("deactivate_object"))
    }

    async fn servant_to_id(&self, _servant: &ServantHandle) -> Result<ObjectId> {
        Err(Error::wrong_policy("servant_to_id"))
    }

    async fn id_to_servant(&self, _id: &ObjectId) -> Result<ServantHandle> {
        Err(Error::wrong_policy("id_to_servant"))
    }

    fn new_system_id(&self) -> Result<ObjectId> {
        self.core.new_system_id()
    }

    async fn etherealize_all(&self) {
        // Nothing retained, nothing to tear down.
    }
}
