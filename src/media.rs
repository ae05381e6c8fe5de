use crate::events::{
    ParticipantIdentity,
    RoomEvent,
};
use derive_more::Display;
use std::{
    collections::HashMap,
    sync::Arc,
};

/// Opaque id of a published track, stable across attach/detach.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub struct TrackSid(String);

impl TrackSid {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHandle {
    pub sid: TrackSid,
    pub kind: TrackKind,
}

impl TrackHandle {
    pub fn video(sid: impl Into<String>) -> Self {
        Self {
            sid: TrackSid::new(sid),
            kind: TrackKind::Video,
        }
    }

    pub fn audio(sid: impl Into<String>) -> Self {
        Self {
            sid: TrackSid::new(sid),
            kind: TrackKind::Audio,
        }
    }
}

/// Render sink the embedding UI hands to the coordinator.
///
/// The coordinator checks its own bookkeeping before calling in, so an
/// implementation never sees the same track attached twice in a row.
pub trait MediaSink: Send + Sync {
    fn attach(&self, track: &TrackHandle);
    fn detach(&self);
    fn set_volume(&self, gain: f64);
}

pub type SharedSink = Arc<dyn MediaSink>;

/// Process-local mirror of media room membership, rebuilt purely from
/// room events on the coordinator loop. Never authoritative; the room
/// is free to contradict it with the next event.
#[derive(Debug, Default)]
pub struct RoomView {
    participants: HashMap<ParticipantIdentity, Vec<TrackHandle>>,
    local_video: Option<TrackHandle>,
}

impl RoomView {
    pub fn apply(&mut self, event: &RoomEvent) {
        match event {
            RoomEvent::ParticipantConnected(participant) => {
                self.participants
                    .insert(participant.identity.clone(), participant.tracks.clone());
            }
            RoomEvent::ParticipantDisconnected(identity) => {
                self.participants.remove(identity);
            }
            RoomEvent::TrackSubscribed { participant, track } => {
                let tracks = self.participants.entry(participant.clone()).or_default();
                if !tracks.iter().any(|t| t.sid == track.sid) {
                    tracks.push(track.clone());
                }
            }
            RoomEvent::TrackUnsubscribed { track } => {
                for tracks in self.participants.values_mut() {
                    tracks.retain(|t| t.sid != track.sid);
                }
            }
            RoomEvent::LocalTrackPublished { track } => {
                if track.kind == TrackKind::Video {
                    self.local_video = Some(track.clone());
                }
            }
        }
    }

    pub fn tracks_of(&self, identity: &ParticipantIdentity) -> &[TrackHandle] {
        self.participants.get(identity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn local_video(&self) -> Option<&TrackHandle> {
        self.local_video.as_ref()
    }
}
