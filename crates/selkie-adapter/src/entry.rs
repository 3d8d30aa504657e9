//! Per-identity lifecycle entry state machine
//!
//! TigerStyle: Closed state and event enums resolved through one explicit
//! transition table - every legal transition is visible in a single match.
//!
//! An entry tracks one identity's activation slot: its lifecycle state, the
//! count of invocations currently inside it, and the deferred teardown task
//! that runs when the slot etherealizes. All transitions happen while the
//! caller holds the owning adapter's lock; blocking guards hand back
//! [`Applied::Blocked`] and the caller parks on the entry's notify handle
//! (registered before the lock is released) and retries the whole
//! transition from scratch after the next broadcast.
//!
//! # Invariants
//! - `refcount >= 0` always; an unmatched exit raises `RefcountUnderflow`,
//!   it never clamps.
//! - `Destroyed` is terminal; every event raises `EntryDestroyed`.
//! - The teardown task is handed out exactly once, on the transition into
//!   `Etherealizing`, no matter how many times etherealization is requested.

use selkie_core::error::{Error, Result};
use selkie_core::object_id::ObjectId;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Notify;

/// Deferred teardown action, launched on the transition into `Etherealizing`
pub type EtherealizeTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Lifecycle state of one identity's entry
///
/// State transitions:
/// ```text
///   Invalid --enter--> Incarnating --incarnate-done--> Valid
///      |                    |                            |
///      |                    +--incarnate-failed--+       |
///      +--activate--> Valid <--------------------+       |
///                       |                                |
///                       +--start-etherealize (refs)--> EtherealizePending
///                       |                                |  last exit
///                       +--start-etherealize (idle)--> Etherealizing
///                                                        |
///                                   etherealize-done --> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryState {
    /// No servant has ever been bound for this identity
    #[default]
    Invalid,
    /// An incarnation is in progress; other callers wait
    Incarnating,
    /// A servant is bound and invocations may proceed
    Valid,
    /// Etherealization requested while invocations are still inside
    EtherealizePending,
    /// The teardown task has been launched
    Etherealizing,
    /// Terminal; the slot is gone
    Destroyed,
}

impl EntryState {
    /// Stable name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            EntryState::Invalid => "invalid",
            EntryState::Incarnating => "incarnating",
            EntryState::Valid => "valid",
            EntryState::EtherealizePending => "etherealize_pending",
            EntryState::Etherealizing => "etherealizing",
            EntryState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs to the entry state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryEvent {
    /// An invocation wants to come inside the entry
    Enter,
    /// An invocation left the entry
    Exit,
    /// Explicit activation of a caller-supplied servant
    Activate,
    /// Incarnation produced a servant
    IncarnateDone,
    /// Incarnation failed or forwarded
    IncarnateFailed,
    /// Etherealization requested
    StartEtherealize,
    /// The teardown task finished
    EtherealizeDone,
}

impl EntryEvent {
    /// Stable name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            EntryEvent::Enter => "enter",
            EntryEvent::Exit => "exit",
            EntryEvent::Activate => "activate",
            EntryEvent::IncarnateDone => "incarnate_done",
            EntryEvent::IncarnateFailed => "incarnate_failed",
            EntryEvent::StartEtherealize => "start_etherealize",
            EntryEvent::EtherealizeDone => "etherealize_done",
        }
    }
}

impl fmt::Display for EntryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of applying one event
pub enum Applied {
    /// Transition performed
    Complete,
    /// A wait guard fired: park on the entry's notify handle and retry
    Blocked,
    /// Transition performed into `Etherealizing`: the caller must spawn
    /// this task (fire-and-forget)
    Launch(EtherealizeTask),
}

impl fmt::Debug for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applied::Complete => f.write_str("Applied::Complete"),
            Applied::Blocked => f.write_str("Applied::Blocked"),
            Applied::Launch(_) => f.write_str("Applied::Launch(..)"),
        }
    }
}

/// One identity's activation lifecycle slot
pub struct ObjectEntry {
    /// The identity this entry was created for (diagnostics)
    id: ObjectId,
    /// Current lifecycle state
    state: EntryState,
    /// Invocations currently inside the entry (between enter and exit)
    refcount: u64,
    /// Broadcast handle for blocked callers
    wake: Arc<Notify>,
    /// Deferred teardown, installed once before etherealization starts
    teardown: Option<EtherealizeTask>,
}

impl ObjectEntry {
    /// Create a fresh entry in the `Invalid` state
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            state: EntryState::Invalid,
            refcount: 0,
            wake: Arc::new(Notify::new()),
            teardown: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Invocations currently inside the entry
    pub fn refcount(&self) -> u64 {
        self.refcount
    }

    /// The identity this entry tracks
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Broadcast handle for blocked callers
    ///
    /// A caller that received [`Applied::Blocked`] must register a waiter
    /// on this handle *before* releasing the adapter lock, then await it
    /// and retry; a broadcast between release and registration would
    /// otherwise be missed.
    pub fn waker(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Install the deferred teardown task
    ///
    /// Must be called exactly once, before `StartEtherealize` is driven.
    pub fn set_teardown(&mut self, task: EtherealizeTask) {
        assert!(
            self.teardown.is_none(),
            "teardown already installed for {}",
            self.id
        );
        self.teardown = Some(task);
    }

    /// Set the state and wake every blocked caller
    ///
    /// Every completed state change broadcasts; waiters re-check their own
    /// predicate, so spurious wakes are harmless.
    fn set_state(&mut self, next: EntryState) {
        tracing::trace!(id = %self.id, from = %self.state, to = %next, "entry transition");
        self.state = next;
        self.wake.notify_waiters();
    }

    /// Take the installed teardown task for launch
    fn take_teardown(&mut self) -> Result<EtherealizeTask> {
        self.teardown.take().ok_or_else(|| {
            Error::internal(format!("no teardown task installed for {}", self.id))
        })
    }

    /// Apply one event to the state machine
    ///
    /// The caller must hold the owning adapter's lock. On `Blocked`, wait
    /// on [`ObjectEntry::waker`] and re-apply from scratch. On `Launch`,
    /// spawn the returned task after releasing the lock (or hand it to the
    /// runtime while still holding it - spawning does not run the task
    /// inline).
    pub fn apply(&mut self, event: EntryEvent) -> Result<Applied> {
        use EntryEvent as E;
        use EntryState as S;

        match (self.state, event) {
            // ----------------------------------------------------------------
            // Destroyed is terminal: no transitions, ever.
            // ----------------------------------------------------------------
            (S::Destroyed, _) => Err(Error::EntryDestroyed {
                event: event.name(),
            }),

            // ----------------------------------------------------------------
            // Invalid
            // ----------------------------------------------------------------
            (S::Invalid, E::Enter) => {
                self.refcount += 1;
                self.set_state(S::Incarnating);
                Ok(Applied::Complete)
            }
            (S::Invalid, E::Activate) => {
                self.set_state(S::Valid);
                Ok(Applied::Complete)
            }
            (S::Invalid, E::Exit) => Err(Error::RefcountUnderflow {
                id: self.id.to_string(),
            }),

            // ----------------------------------------------------------------
            // Incarnating
            // ----------------------------------------------------------------
            (S::Incarnating, E::Enter) => Ok(Applied::Blocked),
            (S::Incarnating, E::StartEtherealize) => Ok(Applied::Blocked),
            // The incarnating caller's own exit is absorbed; its residency
            // drains through incarnate-failed or a later Valid-state exit.
            (S::Incarnating, E::Exit) => Ok(Applied::Complete),
            (S::Incarnating, E::IncarnateDone) => {
                self.set_state(S::Valid);
                Ok(Applied::Complete)
            }
            (S::Incarnating, E::IncarnateFailed) => {
                if self.refcount == 0 {
                    return Err(Error::RefcountUnderflow {
                        id: self.id.to_string(),
                    });
                }
                self.refcount -= 1;
                self.set_state(S::Invalid);
                Ok(Applied::Complete)
            }
            (S::Incarnating, E::Activate) => Err(Error::object_already_active(self.id.to_string())),

            // ----------------------------------------------------------------
            // Valid
            // ----------------------------------------------------------------
            (S::Valid, E::Enter) => {
                self.refcount += 1;
                Ok(Applied::Complete)
            }
            (S::Valid, E::Exit) => {
                if self.refcount == 0 {
                    return Err(Error::RefcountUnderflow {
                        id: self.id.to_string(),
                    });
                }
                self.refcount -= 1;
                Ok(Applied::Complete)
            }
            (S::Valid, E::StartEtherealize) => {
                if self.refcount > 0 {
                    self.set_state(S::EtherealizePending);
                    Ok(Applied::Complete)
                } else {
                    let task = self.take_teardown()?;
                    self.set_state(S::Etherealizing);
                    Ok(Applied::Launch(task))
                }
            }
            (S::Valid, E::Activate) => Err(Error::object_already_active(self.id.to_string())),

            // ----------------------------------------------------------------
            // EtherealizePending
            // ----------------------------------------------------------------
            // Always parks: an identity being etherealized never admits new
            // invocations, even though the servant is still resident. The
            // caller unparks only once the entry moves on.
            (S::EtherealizePending, E::Enter) => Ok(Applied::Blocked),
            (S::EtherealizePending, E::StartEtherealize) => Ok(Applied::Complete),
            (S::EtherealizePending, E::Exit) => {
                if self.refcount == 0 {
                    return Err(Error::RefcountUnderflow {
                        id: self.id.to_string(),
                    });
                }
                self.refcount -= 1;
                if self.refcount == 0 {
                    let task = self.take_teardown()?;
                    self.set_state(S::Etherealizing);
                    Ok(Applied::Launch(task))
                } else {
                    Ok(Applied::Complete)
                }
            }
            (S::EtherealizePending, E::Activate) => {
                Err(Error::object_already_active(self.id.to_string()))
            }

            // ----------------------------------------------------------------
            // Etherealizing
            // ----------------------------------------------------------------
            (S::Etherealizing, E::Enter) => Ok(Applied::Blocked),
            (S::Etherealizing, E::StartEtherealize) => Ok(Applied::Complete),
            (S::Etherealizing, E::EtherealizeDone) => {
                self.set_state(S::Destroyed);
                Ok(Applied::Complete)
            }
            (S::Etherealizing, E::Activate) => {
                Err(Error::object_already_active(self.id.to_string()))
            }

            // ----------------------------------------------------------------
            // Everything else is an orchestration bug.
            // ----------------------------------------------------------------
            (state, event) => Err(Error::IllegalTransition {
                state: state.name(),
                event: event.name(),
            }),
        }
    }
}

impl fmt::Debug for ObjectEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectEntry")
            .field("id", &self.id.to_string())
            .field("state", &self.state)
            .field("refcount", &self.refcount)
            .field("teardown_installed", &self.teardown.is_some())
            .finish()
    }
}
