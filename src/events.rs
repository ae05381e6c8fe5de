use crate::media::TrackHandle;
use derive_more::Display;

/// Identity prefix guests publish under in the media room.
pub const GUEST_IDENTITY_PREFIX: &str = "guest_";

/// Identity string a participant carries in the media room.
///
/// Guests publish as `guest_<user_id>`; multi-device clients may append
/// a `:device` suffix, which is not part of the user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub struct ParticipantIdentity(String);

impl ParticipantIdentity {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn for_guest(user_id: &str) -> Self {
        Self(format!("{GUEST_IDENTITY_PREFIX}{user_id}"))
    }

    /// User id of the guest this identity belongs to, or `None` for
    /// hosts, plain viewers and anything else without the guest prefix.
    pub fn guest_user_id(&self) -> Option<&str> {
        let base = self.0.split(':').next().unwrap_or(&self.0);
        base.strip_prefix(GUEST_IDENTITY_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Participant as reported by the media room, possibly already carrying
/// subscribed tracks when this process joined late.
#[derive(Debug, Clone)]
pub struct RemoteParticipant {
    pub identity: ParticipantIdentity,
    pub tracks: Vec<TrackHandle>,
}

/// Media room events, funneled into the coordinator loop as one tagged
/// stream instead of per-event handler registrations.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    ParticipantConnected(RemoteParticipant),
    ParticipantDisconnected(ParticipantIdentity),
    TrackSubscribed {
        participant: ParticipantIdentity,
        track: TrackHandle,
    },
    TrackUnsubscribed {
        track: TrackHandle,
    },
    LocalTrackPublished {
        track: TrackHandle,
    },
}
