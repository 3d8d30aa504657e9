//! Adapter policy value types
//!
//! TigerStyle: Closed enums, one validated combination selected at adapter
//! construction time. The policies are plain immutable values; all
//! behavior they select lives in the lifecycle engine's mediator family.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Whether the adapter keeps a persistent identity→servant association
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServantRetention {
    /// Resident servants are tracked in the active object map
    #[default]
    Retain,
    /// Servants are resolved fresh per invocation, nothing is tracked
    NonRetain,
}

/// Whether a servant may serve more than one identity at a time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdUniqueness {
    /// A servant is bound to at most one identity
    #[default]
    Unique,
    /// A servant may be bound to any number of identities
    Multiple,
}

/// Who assigns object identities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdAssignment {
    /// The adapter allocates identities (adapter ordinal + sequence)
    #[default]
    System,
    /// Callers supply identities
    User,
}

/// How requests for unknown identities are satisfied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestProcessing {
    /// Only explicitly activated objects are reachable
    #[default]
    ActiveObjectMapOnly,
    /// A single configured servant handles every unknown identity
    DefaultServant,
    /// An external activator/locator hook produces servants on demand
    ServantManager,
}

/// The complete policy set for one adapter
///
/// Validated once at adapter construction; the mediator factory selects
/// the strategy for exactly this combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policies {
    #[serde(default)]
    pub retention: ServantRetention,

    #[serde(default)]
    pub uniqueness: IdUniqueness,

    #[serde(default)]
    pub assignment: IdAssignment,

    #[serde(default)]
    pub request_processing: RequestProcessing,

    /// Activate servants implicitly when asked for the identity of an
    /// unregistered servant
    #[serde(default)]
    pub implicit_activation: bool,
}

impl Policies {
    /// Validate the combination
    ///
    /// The rules form a small closed decision table:
    /// - non-retaining adapters have no map to fall back on, so they need
    ///   a default servant or a servant manager;
    /// - a default servant serves many identities at once, which requires
    ///   the multiple-identity policy;
    /// - implicit activation mints identities, which requires
    ///   system-assigned ids and a retained map to record them in.
    pub fn validate(&self) -> Result<()> {
        if self.retention == ServantRetention::NonRetain
            && self.request_processing == RequestProcessing::ActiveObjectMapOnly
        {
            return Err(Error::InvalidConfiguration {
                field: "policies.request_processing".into(),
                reason: "non-retaining adapters require a default servant or servant manager"
                    .into(),
            });
        }

        if self.request_processing == RequestProcessing::DefaultServant
            && self.uniqueness != IdUniqueness::Multiple
        {
            return Err(Error::InvalidConfiguration {
                field: "policies.uniqueness".into(),
                reason: "a default servant requires the multiple-identity policy".into(),
            });
        }

        if self.implicit_activation
            && (self.assignment != IdAssignment::System
                || self.retention != ServantRetention::Retain)
        {
            return Err(Error::InvalidConfiguration {
                field: "policies.implicit_activation".into(),
                reason: "implicit activation requires system-assigned ids and retained servants"
                    .into(),
            });
        }

        Ok(())
    }
}
