//! Servant abstractions for selkie
//!
//! TigerStyle: Explicit trait seams for everything the lifecycle engine
//! calls out to. Servants, activators and locators are the surrounding
//! dispatch layer's code; the engine only ever holds them behind these
//! traits.

use crate::error::Result;
use crate::object_id::ObjectId;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Servant
// =============================================================================

/// The in-process object implementing the behavior for one or more identities
#[async_trait]
pub trait Servant: Send + Sync + 'static {
    /// Handle an invocation addressed to `id`
    async fn dispatch(&self, id: &ObjectId, operation: &str, payload: Bytes) -> Result<Bytes>;
}

/// Shared handle to a servant
pub type ServantHandle = Arc<dyn Servant>;

/// Pointer-identity key for a servant
///
/// The servant→entry reverse map is keyed by *which* servant object is
/// bound, not by any value the servant carries. Two handles to the same
/// allocation produce the same key; removal is manual, on unbind.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct ServantKey(usize);

impl ServantKey {
    /// Derive the identity key for a servant handle
    pub fn of(servant: &ServantHandle) -> Self {
        Self(Arc::as_ptr(servant) as *const () as usize)
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// An opaque reference to the target a request should be reissued against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    /// Serialized reference to the new target; the engine never inspects it
    pub reference: Bytes,
}

impl ForwardTarget {
    /// Create a forward target from an opaque reference
    pub fn new(reference: impl Into<Bytes>) -> Self {
        Self {
            reference: reference.into(),
        }
    }
}

/// Outcome of resolving an identity to a servant
///
/// Forwarding is a valid non-local outcome, not an error: the caller
/// should reissue the request against the indicated target.
pub enum Resolution {
    /// A local servant will handle the request
    Servant(ServantHandle),
    /// The request should be redirected elsewhere
    Forward(ForwardTarget),
}

impl Resolution {
    /// Unwrap the servant, panicking on a forward (test helper)
    pub fn expect_servant(self) -> ServantHandle {
        match self {
            Resolution::Servant(s) => s,
            Resolution::Forward(f) => panic!("expected servant, got forward to {:?}", f),
        }
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Servant(_) => f.write_str("Resolution::Servant(..)"),
            Resolution::Forward(t) => write!(f, "Resolution::Forward({:?})", t),
        }
    }
}

// =============================================================================
// Servant Manager Hooks
// =============================================================================

/// External hook that produces and tears down servants on demand
///
/// Used by retaining adapters: `incarnate` runs once per identity when a
/// request arrives for an identity with no resident servant, and
/// `etherealize` runs once per identity after deactivation, on a
/// background task.
#[async_trait]
pub trait ServantActivator: Send + Sync + 'static {
    /// Produce a servant for `id`, or signal a forward
    async fn incarnate(&self, id: &ObjectId) -> Result<Resolution>;

    /// Release the association between `id` and `servant`
    ///
    /// `cleanup_in_progress` is true when the whole adapter is being torn
    /// down; `remaining_activations` is true when the servant is still
    /// bound to other identities. Failures are the activator's own to
    /// report - the engine logs and moves on.
    async fn etherealize(
        &self,
        id: &ObjectId,
        servant: ServantHandle,
        cleanup_in_progress: bool,
        remaining_activations: bool,
    );
}

/// External hook that resolves a servant fresh for every invocation
///
/// Used by non-retaining adapters: `preinvoke` runs before each request,
/// `postinvoke` after. No association is recorded anywhere.
#[async_trait]
pub trait ServantLocator: Send + Sync + 'static {
    /// Produce a servant for this single invocation, or signal a forward
    async fn preinvoke(&self, id: &ObjectId, operation: &str) -> Result<Resolution>;

    /// Invoked after the request completes, with the servant `preinvoke` returned
    async fn postinvoke(&self, id: &ObjectId, operation: &str, servant: ServantHandle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct EchoServant;

    #[async_trait]
    impl Servant for EchoServant {
        async fn dispatch(
            &self,
            _id: &ObjectId,
            operation: &str,
            payload: Bytes,
        ) -> Result<Bytes> {
            match operation {
                "echo" => Ok(payload),
                _ => Err(Error::internal(format!("unknown operation: {}", operation))),
            }
        }
    }

    #[test]
    fn test_servant_key_pointer_identity() {
        let a: ServantHandle = Arc::new(EchoServant);
        let also_a = a.clone();
        let b: ServantHandle = Arc::new(EchoServant);

        assert_eq!(ServantKey::of(&a), ServantKey::of(&also_a));
        assert_ne!(ServantKey::of(&a), ServantKey::of(&b));
    }

    #[tokio::test]
    async fn test_servant_dispatch() {
        let servant: ServantHandle = Arc::new(EchoServant);
        let id = ObjectId::try_from("echo-1").unwrap();

        let reply = servant
            .dispatch(&id, "echo", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(reply, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_forward_target_opaque() {
        let target = ForwardTarget::new(Bytes::from_static(b"ior:0042"));
        assert_eq!(target.reference, Bytes::from_static(b"ior:0042"));
    }
}
