//! Collaborator interfaces of the engine
//!
//! The engine owns none of these services. They are injected into the
//! [`RequestManager`](crate::request::RequestManager) and may be called from
//! the event loop as well as from caller threads, so each one is responsible
//! for its own locking.

use super::{
    error::EngineResult,
    types::{CapabilityRecord, DeviceState, ErrorCode, LookupMechanism, Target},
};
use crate::request::LookupListener;

/// Performs lookups against the remote network.
///
/// `begin_lookup` must not block. The outcome is reported later through the
/// listener: zero or more `on_capabilities_updated` / `on_resource_terminated`
/// calls followed by exactly one terminal call (`on_command_error`, a failed
/// `on_network_response`, or `on_terminated`). For the options mechanism the
/// network response itself is terminal.
pub trait LookupBackend: Send + Sync {
    fn begin_lookup(
        &self,
        mechanism: LookupMechanism,
        targets: Vec<Target>,
        listener: LookupListener,
    ) -> EngineResult<()>;
}

/// Cache of previously observed capability records.
pub trait ResultCache: Send + Sync {
    /// Records for the given targets that are still fresh.
    fn get_fresh(&self, targets: &[Target]) -> Vec<CapabilityRecord>;

    /// Records for the given targets, expired ones included.
    fn get_including_expired(&self, targets: &[Target]) -> Vec<CapabilityRecord>;

    /// Fresh record for an availability request. Availability usually has a
    /// much shorter freshness window than capabilities.
    fn get_availability_fresh(&self, target: &Target) -> Option<CapabilityRecord> {
        self.get_fresh(std::slice::from_ref(target)).into_iter().next()
    }

    fn save(&self, records: &[CapabilityRecord]);
}

/// Temporary "do not re-query" list for targets with inconclusive results.
pub trait CooldownTracker: Send + Sync {
    /// The subset of `targets` currently in cooldown.
    fn in_cooldown(&self, targets: &[Target]) -> Vec<Target>;

    fn add_cooldown(&self, targets: &[Target], sip_code: u16);

    fn reset(&self);
}

/// Device/service availability as seen by the network.
pub trait DeviceStateProvider: Send + Sync {
    fn current(&self) -> DeviceState;

    /// Feed a network response into the device state.
    fn refresh(&self, sip_code: u16, reason: &str);
}

/// Caller-visible callback of one batch.
///
/// `on_partial` may fire any number of times. Exactly one of `on_complete`
/// and `on_error` fires afterwards, unless the manager is destroyed first.
pub trait CapabilityCallback: Send + Sync {
    fn on_partial(&self, records: Vec<CapabilityRecord>);

    fn on_complete(&self);

    fn on_error(&self, code: ErrorCode, retry_after_ms: u64);
}

/// Device state provider that never forbids requests and ignores refreshes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAllowed;

impl DeviceStateProvider for AlwaysAllowed {
    fn current(&self) -> DeviceState {
        DeviceState::allowed()
    }

    fn refresh(&self, _sip_code: u16, _reason: &str) {}
}
