use crate::{
    media::{
        SharedSink,
        TrackHandle,
        TrackKind,
        TrackSid,
    },
    roster::GuestSlot,
};
use std::collections::HashMap;

#[derive(Default)]
struct GuestBinding {
    video_sink: Option<SharedSink>,
    audio_sink: Option<SharedSink>,
    video_attached: Option<TrackSid>,
    audio_attached: Option<TrackSid>,
}

/// Bookkeeping for which track is attached to which sink.
///
/// Every native attach/detach call goes through here, and the attached
/// sid is checked first, so reconcile passes can run on every room or
/// roster event without producing duplicate attach calls.
#[derive(Default)]
pub(super) struct AttachmentBindings {
    guests: HashMap<String, GuestBinding>,
    preview_sink: Option<SharedSink>,
    preview_attached: Option<TrackSid>,
}

impl AttachmentBindings {
    pub fn register_video_sink(&mut self, guest_user_id: &str, sink: SharedSink) {
        let binding = self.guests.entry(guest_user_id.to_string()).or_default();
        binding.video_sink = Some(sink);
        // A freshly registered sink has no source yet.
        binding.video_attached = None;
    }

    pub fn register_audio_sink(&mut self, guest_user_id: &str, sink: SharedSink) {
        let binding = self.guests.entry(guest_user_id.to_string()).or_default();
        binding.audio_sink = Some(sink);
        binding.audio_attached = None;
    }

    pub fn register_preview_sink(&mut self, sink: SharedSink) {
        self.preview_sink = Some(sink);
        self.preview_attached = None;
    }

    /// Converges one slot towards "every subscribed track attached to
    /// its registered sink". A slot with no tracks yet stays pending.
    /// The volume override rides along with every audio (re)attach.
    pub fn reconcile_guest(&mut self, slot: &GuestSlot, tracks: &[TrackHandle], gain: f64) {
        let binding = self.guests.entry(slot.user_id.clone()).or_default();
        for track in tracks {
            match track.kind {
                TrackKind::Video => {
                    if let Some(sink) = &binding.video_sink {
                        if binding.video_attached.as_ref() != Some(&track.sid) {
                            sink.attach(track);
                            binding.video_attached = Some(track.sid.clone());
                        }
                    }
                }
                TrackKind::Audio => {
                    if let Some(sink) = &binding.audio_sink {
                        if binding.audio_attached.as_ref() != Some(&track.sid) {
                            sink.attach(track);
                            sink.set_volume(gain);
                            binding.audio_attached = Some(track.sid.clone());
                        }
                    }
                }
            }
        }
    }

    /// Purely local: drops the track wherever it is currently rendered.
    /// Detaching a track nothing holds is a no-op.
    pub fn detach_track(&mut self, track: &TrackHandle) {
        for binding in self.guests.values_mut() {
            if binding.video_attached.as_ref() == Some(&track.sid) {
                if let Some(sink) = &binding.video_sink {
                    sink.detach();
                }
                binding.video_attached = None;
            }
            if binding.audio_attached.as_ref() == Some(&track.sid) {
                if let Some(sink) = &binding.audio_sink {
                    sink.detach();
                }
                binding.audio_attached = None;
            }
        }
        if self.preview_attached.as_ref() == Some(&track.sid) {
            if let Some(sink) = &self.preview_sink {
                sink.detach();
            }
            self.preview_attached = None;
        }
    }

    /// Applies a gain change to a currently attached audio sink. Level
    /// changes must land synchronously; unattached guests pick theirs
    /// up at the next attach.
    pub fn apply_volume(&self, guest_user_id: &str, gain: f64) {
        if let Some(binding) = self.guests.get(guest_user_id) {
            if binding.audio_attached.is_some() {
                if let Some(sink) = &binding.audio_sink {
                    sink.set_volume(gain);
                }
            }
        }
    }

    /// Tears down a slot's attachments. Registered sinks stay around so
    /// a re-accepted guest reattaches without re-registration.
    pub fn release_guest(&mut self, guest_user_id: &str) {
        if let Some(binding) = self.guests.get_mut(guest_user_id) {
            if binding.video_attached.take().is_some() {
                if let Some(sink) = &binding.video_sink {
                    sink.detach();
                }
            }
            if binding.audio_attached.take().is_some() {
                if let Some(sink) = &binding.audio_sink {
                    sink.detach();
                }
            }
        }
    }

    /// Guests that currently hold at least one attachment.
    pub fn bound_guests(&self) -> Vec<String> {
        self.guests
            .iter()
            .filter(|(_, b)| b.video_attached.is_some() || b.audio_attached.is_some())
            .map(|(user_id, _)| user_id.clone())
            .collect()
    }

    pub fn attach_preview(&mut self, track: &TrackHandle) {
        let Some(sink) = &self.preview_sink else {
            return;
        };
        if self.preview_attached.as_ref() == Some(&track.sid) {
            return;
        }
        sink.attach(track);
        self.preview_attached = Some(track.sid.clone());
    }

    pub fn release_preview(&mut self) {
        if self.preview_attached.take().is_some() {
            if let Some(sink) = &self.preview_sink {
                sink.detach();
            }
        }
    }
}
