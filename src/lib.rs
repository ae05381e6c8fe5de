#[macro_use]
extern crate tracing;

pub mod coordinator;
pub mod events;
pub mod logging;
pub mod media;
pub mod roster;
pub mod volume;

pub use coordinator::{
    CoordinatorMessage,
    CoordinatorOptions,
    CoordinatorState,
    GuestCoordinator,
};
pub use events::{
    ParticipantIdentity,
    RemoteParticipant,
    RoomEvent,
};
pub use media::{
    MediaSink,
    SharedSink,
    TrackHandle,
    TrackKind,
    TrackSid,
};
pub use roster::{
    GuestRequestStatus,
    GuestSlot,
    RequestId,
    RosterChanged,
    RosterRow,
    RosterStore,
};
pub use volume::VolumeOverrides;
