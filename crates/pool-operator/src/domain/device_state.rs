//! Device state transitions driven by pool assignment.

use api_types::DeviceState;

/// Assignment events the pool operator applies to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum AssignmentEvent {
    /// The device was bound to a pool.
    #[display("bind")]
    Bind,
    /// A stale binding was cleared.
    #[display("release")]
    Release,
}

/// State of a device after `event`.
///
/// Binding only moves `Ready` devices to `PendingAssignment`; the device plugin
/// confirms `Assigned` later. Releasing returns held devices to `Ready`. Any
/// state not named here is owned by other components and is returned as is.
pub fn transition(state: DeviceState, event: AssignmentEvent) -> DeviceState {
    match (event, state) {
        (AssignmentEvent::Bind, DeviceState::Ready) => DeviceState::PendingAssignment,
        (
            AssignmentEvent::Release,
            DeviceState::Assigned | DeviceState::Reserved | DeviceState::PendingAssignment,
        ) => DeviceState::Ready,
        (_, state) => state,
    }
}
