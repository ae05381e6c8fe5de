use crate::{
    events::RoomEvent,
    media::SharedSink,
    roster::{
        GuestSlot,
        RequestId,
        RosterChanged,
        RosterStore,
    },
};
use std::{
    path::PathBuf,
    sync::Arc,
};
use tokio::sync::{
    mpsc::{
        unbounded_channel,
        UnboundedReceiver,
        UnboundedSender,
    },
    watch,
};
use tokio_util::sync::{
    CancellationToken,
    DropGuard,
};

mod attach;
mod cleanup;
mod inner;
pub mod messages;
mod state;

use inner::CoordinatorInner;
pub use cleanup::CleanupOutcome;
pub use messages::CoordinatorMessage;
pub use state::CoordinatorState;

/// Session parameters fixed for the lifetime of one coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub broadcast_id: i64,
    pub local_user_id: String,
    pub host_user_id: String,
    /// Where the volume override file lives.
    pub data_dir: PathBuf,
}

impl CoordinatorOptions {
    pub fn is_host(&self) -> bool {
        !self.local_user_id.is_empty() && self.local_user_id == self.host_user_id
    }
}

/// Handle to a running guest session coordinator.
///
/// Spawns a worker task that owns all session state and consumes the
/// room event and roster change feeds. Cheap to clone; dropping the
/// last handle cancels the worker.
#[derive(Debug, Clone)]
pub struct GuestCoordinator {
    pub state: watch::Receiver<CoordinatorState>,
    sender: UnboundedSender<CoordinatorMessage>,
    _coordinator_task_guard: Arc<DropGuard>,
}

impl GuestCoordinator {
    /// Starts the coordinator for one broadcast. The returned receiver
    /// fires once when the local user leaves their own guest slot, so
    /// the embedding client can stop publishing.
    pub fn spawn(
        opts: CoordinatorOptions,
        store: Arc<dyn RosterStore>,
        room_events: UnboundedReceiver<RoomEvent>,
        roster_changes: UnboundedReceiver<RosterChanged>,
    ) -> (Self, UnboundedReceiver<RequestId>) {
        let (sender, receiver) = unbounded_channel::<CoordinatorMessage>();
        let (guest_leave_tx, guest_leave_rx) = unbounded_channel::<RequestId>();
        let task_cancellation_token = CancellationToken::new();
        let task_cancellation_guard = task_cancellation_token.clone().drop_guard();
        let (state_sender, state_receiver) = watch::channel(CoordinatorState {
            running: true,
            ..Default::default()
        });

        tokio::task::spawn({
            let messages = sender.clone();
            async move {
                CoordinatorInner::run(
                    opts,
                    store,
                    room_events,
                    roster_changes,
                    receiver,
                    messages,
                    state_sender,
                    guest_leave_tx,
                    task_cancellation_token,
                )
                .await;
                debug!("Coordinator task finished");
            }
        });

        (
            Self {
                state: state_receiver,
                sender,
                _coordinator_task_guard: Arc::new(task_cancellation_guard),
            },
            guest_leave_rx,
        )
    }

    /// Remote guests currently authorized to render, acceptance order.
    pub fn visible_guests(&self) -> Vec<GuestSlot> {
        self.state.borrow().guests.clone()
    }

    /// The local user's own slot, when they are a guest themself.
    pub fn self_slot(&self) -> Option<GuestSlot> {
        self.state.borrow().self_slot.clone()
    }

    pub fn set_volume(&self, guest_user_id: impl Into<String>, gain: f64) {
        self.send(CoordinatorMessage::SetVolume {
            guest_user_id: guest_user_id.into(),
            gain,
        });
    }

    /// Requests removal of a guest. The worker enforces authority: only
    /// the host or the named guest themself may remove.
    pub fn remove_guest(&self, request_id: RequestId, guest_user_id: impl Into<String>) {
        self.send(CoordinatorMessage::RemoveGuest {
            request_id,
            guest_user_id: guest_user_id.into(),
        });
    }

    pub fn register_video_sink(&self, guest_user_id: impl Into<String>, sink: SharedSink) {
        self.send(CoordinatorMessage::RegisterVideoSink {
            guest_user_id: guest_user_id.into(),
            sink,
        });
    }

    pub fn register_audio_sink(&self, guest_user_id: impl Into<String>, sink: SharedSink) {
        self.send(CoordinatorMessage::RegisterAudioSink {
            guest_user_id: guest_user_id.into(),
            sink,
        });
    }

    pub fn register_preview_sink(&self, sink: SharedSink) {
        self.send(CoordinatorMessage::RegisterPreviewSink { sink });
    }

    fn send(&self, message: CoordinatorMessage) {
        if !self.state.borrow().running {
            debug!("Coordinator already stopped, dropping message {message}");
            return;
        }
        if self.sender.send(message).is_err() {
            error!("Was not able to send message to the coordinator");
        }
    }

    pub async fn shutdown(mut self) {
        if !self.state.borrow().running {
            debug!("Coordinator already stopped");
            return;
        }
        if self.sender.send(CoordinatorMessage::Shutdown).is_ok() {
            if let Err(err) = self.state.wait_for(|state| !state.running).await {
                error!("Failed to wait for the coordinator to stop: {err}");
            }
        } else {
            error!("Was not able to send the shutdown message");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        events::{
            ParticipantIdentity,
            RemoteParticipant,
        },
        media::{
            MediaSink,
            TrackHandle,
        },
        roster::{
            GuestRequestStatus,
            RosterRow,
        },
        volume::VolumeOverrides,
    };
    use async_trait::async_trait;
    use chrono::{
        TimeDelta,
        Utc,
    };
    use eyre::Result;
    use pretty_assertions::assert_eq;
    use std::{
        sync::{
            atomic::{
                AtomicBool,
                AtomicUsize,
                Ordering::Relaxed,
            },
            Mutex,
        },
        time::Duration,
    };
    use temp_dir::TempDir;
    use tokio::time::timeout;

    struct FakeStore {
        rows: Mutex<Vec<RosterRow>>,
        deletes: AtomicUsize,
        updates: AtomicUsize,
        fail_delete: AtomicBool,
    }

    impl FakeStore {
        fn with_rows(rows: Vec<RosterRow>) -> Arc<Self> {
            Arc::new(Self {
                rows: Mutex::new(rows),
                deletes: AtomicUsize::new(0),
                updates: AtomicUsize::new(0),
                fail_delete: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl RosterStore for FakeStore {
        async fn list_accepted(&self, _broadcast_id: i64) -> Result<Vec<RosterRow>> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn delete(&self, request_id: RequestId) -> Result<()> {
            self.deletes.fetch_add(1, Relaxed);
            if self.fail_delete.load(Relaxed) {
                eyre::bail!("row level security");
            }
            self.rows.lock().unwrap().retain(|row| row.request_id != request_id);
            Ok(())
        }

        async fn update_status(&self, request_id: RequestId, status: GuestRequestStatus) -> Result<()> {
            self.updates.fetch_add(1, Relaxed);
            for row in self.rows.lock().unwrap().iter_mut() {
                if row.request_id == request_id {
                    row.status = status;
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        attaches: AtomicUsize,
        detaches: AtomicUsize,
        volumes: Mutex<Vec<f64>>,
    }

    impl MediaSink for CountingSink {
        fn attach(&self, _track: &TrackHandle) {
            self.attaches.fetch_add(1, Relaxed);
        }

        fn detach(&self) {
            self.detaches.fetch_add(1, Relaxed);
        }

        fn set_volume(&self, gain: f64) {
            self.volumes.lock().unwrap().push(gain);
        }
    }

    fn row(id: i64, user: &str, minutes_ago: i64) -> RosterRow {
        RosterRow {
            request_id: RequestId(id),
            requester_id: user.to_string(),
            status: GuestRequestStatus::Accepted,
            display_name: None,
            avatar_ref: None,
            has_camera: true,
            has_mic: true,
            accepted_at: Utc::now() - TimeDelta::minutes(minutes_ago),
        }
    }

    fn options(local: &str, host: &str, data_dir: &TempDir) -> CoordinatorOptions {
        CoordinatorOptions {
            broadcast_id: 7,
            local_user_id: local.to_string(),
            host_user_id: host.to_string(),
            data_dir: data_dir.path().to_path_buf(),
        }
    }

    fn connect(events: &UnboundedSender<RoomEvent>, user: &str, tracks: Vec<TrackHandle>) {
        events
            .send(RoomEvent::ParticipantConnected(RemoteParticipant {
                identity: ParticipantIdentity::for_guest(user),
                tracks,
            }))
            .unwrap();
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn pending_slot_attaches_once_the_guest_connects() {
        let dir = TempDir::new().unwrap();
        VolumeOverrides::load(dir.path()).set(7, "g1", 0.3);
        let store = FakeStore::with_rows(vec![row(1, "g1", 5)]);
        let (events_tx, events_rx) = unbounded_channel();
        let (_roster_tx, roster_rx) = unbounded_channel();
        let (coordinator, _leave) =
            GuestCoordinator::spawn(options("host", "host", &dir), store, events_rx, roster_rx);

        let video = Arc::new(CountingSink::default());
        let audio = Arc::new(CountingSink::default());
        coordinator.register_video_sink("g1", video.clone());
        coordinator.register_audio_sink("g1", audio.clone());
        settle().await;
        assert_eq!(video.attaches.load(Relaxed), 0, "no participant yet, slot stays pending");

        connect(&events_tx, "g1", vec![TrackHandle::video("v1"), TrackHandle::audio("a1")]);
        settle().await;

        assert_eq!(video.attaches.load(Relaxed), 1);
        assert_eq!(audio.attaches.load(Relaxed), 1);
        assert_eq!(*audio.volumes.lock().unwrap(), vec![0.3], "stored override rides along");
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn viewers_never_write_to_the_store_on_disconnect() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::with_rows(vec![row(1, "g1", 5)]);
        let (events_tx, events_rx) = unbounded_channel();
        let (_roster_tx, roster_rx) = unbounded_channel();
        let (mut coordinator, _leave) =
            GuestCoordinator::spawn(options("viewer", "host", &dir), store.clone(), events_rx, roster_rx);

        coordinator
            .state
            .wait_for(|state| !state.guests.is_empty())
            .await
            .unwrap();

        let identity = ParticipantIdentity::for_guest("g1");
        events_tx.send(RoomEvent::ParticipantDisconnected(identity.clone())).unwrap();
        events_tx.send(RoomEvent::ParticipantDisconnected(identity)).unwrap();

        coordinator
            .state
            .wait_for(|state| state.guests.is_empty())
            .await
            .unwrap();
        settle().await;

        assert_eq!(store.deletes.load(Relaxed), 0);
        assert_eq!(store.updates.load(Relaxed), 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_disconnects_produce_exactly_one_host_delete() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::with_rows(vec![row(1, "g1", 5)]);
        let (events_tx, events_rx) = unbounded_channel();
        let (_roster_tx, roster_rx) = unbounded_channel();
        let (mut coordinator, _leave) =
            GuestCoordinator::spawn(options("host", "host", &dir), store.clone(), events_rx, roster_rx);

        coordinator
            .state
            .wait_for(|state| !state.guests.is_empty())
            .await
            .unwrap();

        let identity = ParticipantIdentity::for_guest("g1");
        events_tx.send(RoomEvent::ParticipantDisconnected(identity.clone())).unwrap();
        events_tx.send(RoomEvent::ParticipantDisconnected(identity.clone())).unwrap();
        events_tx.send(RoomEvent::ParticipantDisconnected(identity)).unwrap();
        settle().await;

        assert_eq!(store.deletes.load(Relaxed), 1);
        assert!(coordinator.visible_guests().is_empty());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn refused_delete_falls_back_to_marking_cancelled() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::with_rows(vec![row(1, "g1", 5)]);
        store.fail_delete.store(true, Relaxed);
        let (events_tx, events_rx) = unbounded_channel();
        let (_roster_tx, roster_rx) = unbounded_channel();
        let (mut coordinator, _leave) =
            GuestCoordinator::spawn(options("host", "host", &dir), store.clone(), events_rx, roster_rx);

        coordinator
            .state
            .wait_for(|state| !state.guests.is_empty())
            .await
            .unwrap();
        events_tx
            .send(RoomEvent::ParticipantDisconnected(ParticipantIdentity::for_guest("g1")))
            .unwrap();
        settle().await;

        assert_eq!(store.deletes.load(Relaxed), 1);
        assert_eq!(store.updates.load(Relaxed), 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn only_the_two_oldest_accepted_rows_become_visible() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::with_rows(vec![
            row(1, "g1", 50),
            row(2, "g2", 40),
            row(3, "g3", 30),
            row(4, "g4", 20),
            row(5, "g5", 10),
        ]);
        let (_events_tx, events_rx) = unbounded_channel();
        let (_roster_tx, roster_rx) = unbounded_channel();
        let (mut coordinator, _leave) =
            GuestCoordinator::spawn(options("viewer", "host", &dir), store, events_rx, roster_rx);

        coordinator
            .state
            .wait_for(|state| !state.guests.is_empty())
            .await
            .unwrap();

        let users: Vec<String> = coordinator.visible_guests().into_iter().map(|s| s.user_id).collect();
        assert_eq!(users, vec!["g1", "g2"]);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn stray_disconnect_for_the_local_identity_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::with_rows(vec![row(1, "me", 5)]);
        let (events_tx, events_rx) = unbounded_channel();
        let (_roster_tx, roster_rx) = unbounded_channel();
        let (mut coordinator, _leave) =
            GuestCoordinator::spawn(options("me", "host", &dir), store.clone(), events_rx, roster_rx);

        coordinator
            .state
            .wait_for(|state| state.self_slot.is_some())
            .await
            .unwrap();
        events_tx
            .send(RoomEvent::ParticipantDisconnected(ParticipantIdentity::for_guest("me")))
            .unwrap();
        settle().await;

        assert!(coordinator.self_slot().is_some(), "own slot survives a stray disconnect");
        assert_eq!(store.deletes.load(Relaxed), 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn leaving_as_a_guest_signals_exactly_once_and_cleans_the_row() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::with_rows(vec![row(1, "me", 5)]);
        let (_events_tx, events_rx) = unbounded_channel();
        let (_roster_tx, roster_rx) = unbounded_channel();
        let (mut coordinator, mut leave) =
            GuestCoordinator::spawn(options("me", "host", &dir), store.clone(), events_rx, roster_rx);

        coordinator
            .state
            .wait_for(|state| state.self_slot.is_some())
            .await
            .unwrap();
        coordinator.remove_guest(RequestId(1), "me");
        coordinator.remove_guest(RequestId(1), "me");

        let left = timeout(Duration::from_secs(1), leave.recv()).await.unwrap();
        assert_eq!(left, Some(RequestId(1)));
        settle().await;

        assert!(coordinator.self_slot().is_none());
        assert_eq!(store.deletes.load(Relaxed), 1, "second removal is a no-op");
        assert!(
            timeout(Duration::from_millis(100), leave.recv()).await.is_err(),
            "leave signal fires once"
        );
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn viewers_cannot_remove_other_guests() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::with_rows(vec![row(1, "g1", 5)]);
        let (_events_tx, events_rx) = unbounded_channel();
        let (_roster_tx, roster_rx) = unbounded_channel();
        let (mut coordinator, _leave) =
            GuestCoordinator::spawn(options("viewer", "host", &dir), store.clone(), events_rx, roster_rx);

        coordinator
            .state
            .wait_for(|state| !state.guests.is_empty())
            .await
            .unwrap();
        coordinator.remove_guest(RequestId(1), "g1");
        settle().await;

        assert_eq!(coordinator.visible_guests().len(), 1, "removal refused");
        assert_eq!(store.deletes.load(Relaxed), 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn volume_changes_land_on_the_attached_audio_sink() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::with_rows(vec![row(1, "g1", 5)]);
        let (events_tx, events_rx) = unbounded_channel();
        let (_roster_tx, roster_rx) = unbounded_channel();
        let (coordinator, _leave) =
            GuestCoordinator::spawn(options("viewer", "host", &dir), store, events_rx, roster_rx);

        let audio = Arc::new(CountingSink::default());
        coordinator.register_audio_sink("g1", audio.clone());
        connect(&events_tx, "g1", vec![TrackHandle::audio("a1")]);
        settle().await;

        coordinator.set_volume("g1", 0.4);
        coordinator.set_volume("g1", 2.0);
        settle().await;

        assert_eq!(*audio.volumes.lock().unwrap(), vec![1.0, 0.4, 1.0], "clamped into range");

        let reloaded = VolumeOverrides::load(dir.path());
        assert_eq!(reloaded.get(7, "g1"), 1.0, "last write persisted");
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn roster_change_feed_drives_attachment_and_release() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::with_rows(vec![]);
        let (events_tx, events_rx) = unbounded_channel();
        let (roster_tx, roster_rx) = unbounded_channel();
        let (mut coordinator, _leave) =
            GuestCoordinator::spawn(options("viewer", "host", &dir), store.clone(), events_rx, roster_rx);

        let video = Arc::new(CountingSink::default());
        coordinator.register_video_sink("g1", video.clone());
        connect(&events_tx, "g1", vec![TrackHandle::video("v1")]);
        settle().await;
        assert_eq!(video.attaches.load(Relaxed), 0, "no accepted row, no attachment");

        store.rows.lock().unwrap().push(row(1, "g1", 0));
        roster_tx.send(RosterChanged).unwrap();
        coordinator
            .state
            .wait_for(|state| !state.guests.is_empty())
            .await
            .unwrap();
        assert_eq!(video.attaches.load(Relaxed), 1);

        store.rows.lock().unwrap().clear();
        roster_tx.send(RosterChanged).unwrap();
        coordinator
            .state
            .wait_for(|state| state.guests.is_empty())
            .await
            .unwrap();
        assert_eq!(video.detaches.load(Relaxed), 1, "vanished row releases the tile");
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn self_preview_attaches_after_a_late_publish() {
        let dir = TempDir::new().unwrap();
        let store = FakeStore::with_rows(vec![row(1, "me", 5)]);
        let (events_tx, events_rx) = unbounded_channel();
        let (_roster_tx, roster_rx) = unbounded_channel();
        let (mut coordinator, _leave) =
            GuestCoordinator::spawn(options("me", "host", &dir), store, events_rx, roster_rx);

        let preview = Arc::new(CountingSink::default());
        coordinator.register_preview_sink(preview.clone());
        coordinator
            .state
            .wait_for(|state| state.self_slot.is_some())
            .await
            .unwrap();
        assert_eq!(preview.attaches.load(Relaxed), 0, "nothing published yet");

        events_tx
            .send(RoomEvent::LocalTrackPublished {
                track: TrackHandle::video("cam"),
            })
            .unwrap();
        settle().await;

        assert_eq!(preview.attaches.load(Relaxed), 1);
        coordinator.shutdown().await;
    }
}
