use super::{
    attach::AttachmentBindings,
    cleanup::remove_from_roster,
    messages::CoordinatorMessage,
    CoordinatorOptions,
    CoordinatorState,
};
use crate::{
    events::{
        ParticipantIdentity,
        RoomEvent,
    },
    media::{
        RoomView,
        TrackKind,
    },
    roster::{
        GuestSlot,
        RequestId,
        RosterCache,
        RosterChanged,
        RosterStore,
    },
    volume::VolumeOverrides,
};
use std::{
    collections::HashSet,
    sync::Arc,
    time::Duration,
};
use tokio::sync::{
    mpsc::{
        UnboundedReceiver,
        UnboundedSender,
    },
    watch,
};
use tokio_util::sync::CancellationToken;

/// Poll points for attaching the freshly published local track to the
/// self preview, racing the LocalTrackPublished event. Publishing
/// usually lands within the first second after acceptance.
const PREVIEW_RETRY_SCHEDULE: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_millis(500),
    Duration::from_millis(1500),
];

/// Async coordinator "worker" owning every piece of mutable session
/// state: the roster mirror, the room view, the attachment bookkeeping
/// and the volume overrides. All of it is touched from the single
/// `run` loop only, so no locking is needed anywhere.
pub(super) struct CoordinatorInner {
    opts: CoordinatorOptions,
    store: Arc<dyn RosterStore>,
    cache: RosterCache,
    room: RoomView,
    bindings: AttachmentBindings,
    volumes: VolumeOverrides,
    state: watch::Sender<CoordinatorState>,
    /// Loop feeding itself: write-task results and preview timer ticks.
    messages: UnboundedSender<CoordinatorMessage>,
    guest_leave_tx: UnboundedSender<RequestId>,
    /// Requests whose store write-back has been dispatched; guards
    /// against duplicate disconnect delivery.
    cleaned: HashSet<RequestId>,
    preview_timer: Option<CancellationToken>,
    cancel: CancellationToken,
}

impl CoordinatorInner {
    pub(super) async fn run(
        opts: CoordinatorOptions,
        store: Arc<dyn RosterStore>,
        mut room_events: UnboundedReceiver<RoomEvent>,
        mut roster_changes: UnboundedReceiver<RosterChanged>,
        mut receiver: UnboundedReceiver<CoordinatorMessage>,
        messages: UnboundedSender<CoordinatorMessage>,
        state: watch::Sender<CoordinatorState>,
        guest_leave_tx: UnboundedSender<RequestId>,
        cancel: CancellationToken,
    ) {
        let volumes = VolumeOverrides::load(&opts.data_dir);
        let mut inner = Self {
            cache: RosterCache::new(opts.broadcast_id),
            room: RoomView::default(),
            bindings: AttachmentBindings::default(),
            volumes,
            opts,
            store,
            state,
            messages,
            guest_leave_tx,
            cleaned: HashSet::new(),
            preview_timer: None,
            cancel,
        };

        inner.refresh_roster().await;

        loop {
            tokio::select! {
                biased;

                _ = inner.cancel.cancelled() => break,

                Some(event) = room_events.recv() => inner.handle_room_event(event),

                Some(RosterChanged) = roster_changes.recv() => {
                    // Level-triggered feed: coalesce whatever queued up
                    // into a single re-read.
                    while roster_changes.try_recv().is_ok() {}
                    inner.refresh_roster().await;
                }

                Some(message) = receiver.recv() => {
                    if inner.handle_message(message) {
                        break;
                    }
                }

                else => break,
            }
        }

        inner.teardown();
    }

    fn handle_room_event(&mut self, event: RoomEvent) {
        self.room.apply(&event);
        match event {
            RoomEvent::ParticipantConnected(participant) => {
                if participant.identity.guest_user_id().is_some() {
                    self.reconcile();
                }
            }
            RoomEvent::TrackSubscribed { participant, .. } => {
                if participant.guest_user_id().is_some() {
                    self.reconcile();
                }
            }
            RoomEvent::TrackUnsubscribed { track } => self.bindings.detach_track(&track),
            RoomEvent::ParticipantDisconnected(identity) => self.handle_disconnect(identity),
            RoomEvent::LocalTrackPublished { track } => {
                if track.kind == TrackKind::Video {
                    self.try_attach_preview();
                }
            }
        }
    }

    /// One pass of "every slot with a connected participant and a
    /// registered sink gets its tracks attached". A slot without a
    /// participant stays pending: expected right after acceptance while
    /// the guest's client is still connecting, so this runs again on
    /// every subsequent room event rather than treating it as an error.
    fn reconcile(&mut self) {
        let slots: Vec<GuestSlot> = self.cache.slots().to_vec();
        for slot in slots {
            if slot.user_id == self.opts.local_user_id {
                // The local user's own tiles render via the preview path.
                continue;
            }
            let tracks = self.room.tracks_of(&slot.identity()).to_vec();
            if tracks.is_empty() {
                continue;
            }
            let gain = self.volumes.get(self.opts.broadcast_id, &slot.user_id);
            self.bindings.reconcile_guest(&slot, &tracks, gain);
        }
        self.try_attach_preview();
    }

    fn try_attach_preview(&mut self) {
        if self.cache.slot_for_user(&self.opts.local_user_id).is_none() {
            return;
        }
        if let Some(track) = self.room.local_video().cloned() {
            self.bindings.attach_preview(&track);
        }
    }

    fn handle_disconnect(&mut self, identity: ParticipantIdentity) {
        let Some(user_id) = identity.guest_user_id().map(str::to_string) else {
            trace!(%identity, "Ignoring non-guest departure");
            return;
        };
        if user_id == self.opts.local_user_id {
            // Leaving as a guest is always explicit; a stray disconnect
            // for our own identity must not tear the slot down.
            debug!(%identity, "Ignoring disconnect for the local identity");
            return;
        }
        let Some(slot) = self.cache.slot_for_user(&user_id).cloned() else {
            debug!(%identity, "Disconnect for an identity without a slot, already cleaned");
            return;
        };

        info!(%identity, "Guest participant disconnected, cleaning up");
        self.remove_slot_locally(&slot);
        if self.opts.is_host() {
            self.dispatch_cleanup(slot.request_id);
        }
        self.publish_state();
    }

    /// Display cleanup every role performs; never touches the store.
    fn remove_slot_locally(&mut self, slot: &GuestSlot) {
        self.bindings.release_guest(&slot.user_id);
        self.cache.remove_local(slot.request_id);
    }

    /// Roster write-back, dispatched off the loop so room events keep
    /// flowing while the store round-trips. Dispatched at most once per
    /// request id.
    fn dispatch_cleanup(&mut self, request_id: RequestId) {
        if !self.cleaned.insert(request_id) {
            debug!(%request_id, "Cleanup already dispatched");
            return;
        }
        let store = self.store.clone();
        let messages = self.messages.clone();
        let token = self.cancel.child_token();
        tokio::task::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                outcome = remove_from_roster(store.as_ref(), request_id) => {
                    let _ = messages.send(CoordinatorMessage::CleanupFinished { request_id, outcome });
                }
            }
        });
    }

    /// Returns `true` when the loop should stop.
    fn handle_message(&mut self, message: CoordinatorMessage) -> bool {
        match message {
            CoordinatorMessage::SetVolume { guest_user_id, gain } => {
                let gain = self.volumes.set(self.opts.broadcast_id, &guest_user_id, gain);
                self.bindings.apply_volume(&guest_user_id, gain);
            }
            CoordinatorMessage::RemoveGuest {
                request_id,
                guest_user_id,
            } => self.remove_guest(request_id, &guest_user_id),
            CoordinatorMessage::RegisterVideoSink { guest_user_id, sink } => {
                self.bindings.register_video_sink(&guest_user_id, sink);
                self.reconcile();
            }
            CoordinatorMessage::RegisterAudioSink { guest_user_id, sink } => {
                self.bindings.register_audio_sink(&guest_user_id, sink);
                self.reconcile();
            }
            CoordinatorMessage::RegisterPreviewSink { sink } => {
                self.bindings.register_preview_sink(sink);
                self.try_attach_preview();
            }
            CoordinatorMessage::PreviewPoll => self.try_attach_preview(),
            CoordinatorMessage::CleanupFinished { request_id, outcome } => {
                info!(%request_id, %outcome, "Roster cleanup finished");
            }
            CoordinatorMessage::Shutdown => return true,
        }
        false
    }

    /// Explicit removal: the host kicking a guest, or a guest leaving
    /// of their own accord. Same write protocol as a disconnect, plus
    /// the leave signal so the departing client stops publishing.
    fn remove_guest(&mut self, request_id: RequestId, guest_user_id: &str) {
        let leaving_as_guest = guest_user_id == self.opts.local_user_id;
        if !self.opts.is_host() && !leaving_as_guest {
            warn!(%request_id, "Refusing removal, only the host or the guest themself may remove");
            return;
        }
        let Some(slot) = self.cache.slot_for_user(guest_user_id).cloned() else {
            debug!(%request_id, "Removal for an unknown slot, nothing to do");
            return;
        };

        self.remove_slot_locally(&slot);
        self.dispatch_cleanup(slot.request_id);
        if leaving_as_guest {
            self.stop_preview();
            if self.guest_leave_tx.send(slot.request_id).is_err() {
                debug!("No listener for the guest leave signal");
            }
        }
        self.publish_state();
    }

    async fn refresh_roster(&mut self) {
        self.cache.refresh(self.store.as_ref()).await;

        // Rows that went away (cancelled, deleted, superseded) must not
        // keep rendering.
        let live: HashSet<String> = self.cache.slots().iter().map(|slot| slot.user_id.clone()).collect();
        for user_id in self.bindings.bound_guests() {
            if !live.contains(&user_id) {
                self.bindings.release_guest(&user_id);
            }
        }

        self.reconcile();
        self.sync_preview_task();
        self.publish_state();
    }

    fn sync_preview_task(&mut self) {
        let has_self_slot = self.cache.slot_for_user(&self.opts.local_user_id).is_some();
        match (has_self_slot, self.preview_timer.is_some()) {
            (true, false) => self.start_preview_timer(),
            (false, true) => self.stop_preview(),
            _ => {}
        }
    }

    fn start_preview_timer(&mut self) {
        let token = self.cancel.child_token();
        let messages = self.messages.clone();
        self.preview_timer = Some(token.clone());
        tokio::task::spawn(async move {
            for delay in PREVIEW_RETRY_SCHEDULE {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if messages.send(CoordinatorMessage::PreviewPoll).is_err() {
                    return;
                }
            }
        });
    }

    fn stop_preview(&mut self) {
        if let Some(token) = self.preview_timer.take() {
            token.cancel();
        }
        self.bindings.release_preview();
    }

    fn publish_state(&self) {
        let (guests, self_slot) = self.cache.visible(&self.opts.local_user_id);
        self.state.send_modify(|state| {
            state.guests = guests;
            state.self_slot = self_slot;
        });
    }

    fn teardown(mut self) {
        self.stop_preview();
        // Aborts in-flight write tasks and any remaining timers.
        self.cancel.cancel();
        self.state.send_modify(|state| {
            state.running = false;
        });
        debug!(self.opts.broadcast_id, "Guest coordinator stopped");
    }
}
