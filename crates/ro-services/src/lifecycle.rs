//! Lifecycle coordinator
//!
//! Maps dialog events reported by the call layer onto the controller:
//! confirmation starts billing, and any kind of teardown finalizes the
//! session. Teardown is idempotent; only the first one sends STOP.

use ro_core::models::TerminationCause;
use ro_core::traits::CallControl;
use ro_diameter::CreditControlPeer;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::controller::{BillingStart, ReauthorizationController, StopOutcome};
use crate::registry::SessionHandle;

/// Dialog events the call layer reports for a charged session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogEvent {
    /// The call was answered
    Confirmed,
    /// The call ended normally
    Terminated { code: u32, reason: String },
    /// The call failed after the reservation
    Failed { code: u32, reason: String },
    /// The dialog timed out
    Expired,
}

/// Result of dispatching a dialog event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Confirmed(BillingStart),
    TornDown(StopOutcome),
}

pub struct LifecycleCoordinator<P: CreditControlPeer, C: CallControl> {
    controller: Arc<ReauthorizationController<P, C>>,
}

impl<P: CreditControlPeer, C: CallControl> LifecycleCoordinator<P, C> {
    pub fn new(controller: Arc<ReauthorizationController<P, C>>) -> Self {
        Self { controller }
    }

    /// The call was answered: start the billing clock
    #[instrument(skip(self))]
    pub fn on_confirmed(&self, handle: SessionHandle) -> BillingStart {
        self.controller.start_billing(handle)
    }

    /// The call is gone: send STOP once and release the registration
    #[instrument(skip(self))]
    pub fn on_terminated(&self, handle: SessionHandle, code: u32, reason: &str) -> StopOutcome {
        let outcome = self.controller.finalize(
            handle,
            TerminationCause::CallEnded {
                code,
                reason: reason.to_string(),
            },
        );
        if outcome != StopOutcome::Unknown {
            debug!(handle = ?handle, outcome = ?outcome, "Teardown handled");
        }
        outcome
    }

    pub fn handle_event(&self, handle: SessionHandle, event: DialogEvent) -> EventOutcome {
        match event {
            DialogEvent::Confirmed => EventOutcome::Confirmed(self.on_confirmed(handle)),
            DialogEvent::Terminated { code, reason } | DialogEvent::Failed { code, reason } => {
                EventOutcome::TornDown(self.on_terminated(handle, code, &reason))
            }
            DialogEvent::Expired => {
                EventOutcome::TornDown(self.on_terminated(handle, 408, "Dialog expired"))
            }
        }
    }
}
