#[macro_use]
extern crate tracing;

use async_trait::async_trait;
use chrono::{
    TimeDelta,
    Utc,
};
use clap::Parser;
use color_eyre::Result;
use costream_config::{
    Args,
    Config,
};
use costream_coordinator::{
    logging::init_logging,
    CoordinatorOptions,
    GuestCoordinator,
    GuestRequestStatus,
    MediaSink,
    ParticipantIdentity,
    RemoteParticipant,
    RequestId,
    RoomEvent,
    RosterChanged,
    RosterRow,
    RosterStore,
    TrackHandle,
};
use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};
use tokio::sync::mpsc::unbounded_channel;

/// In-memory roster backing the scripted session below. Delete maps a
/// missing row to success, like the hosted store does.
struct MemoryStore {
    rows: Mutex<Vec<RosterRow>>,
}

#[async_trait]
impl RosterStore for MemoryStore {
    async fn list_accepted(&self, _broadcast_id: i64) -> eyre::Result<Vec<RosterRow>> {
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn delete(&self, request_id: RequestId) -> eyre::Result<()> {
        self.rows.lock().unwrap().retain(|row| row.request_id != request_id);
        Ok(())
    }

    async fn update_status(&self, request_id: RequestId, status: GuestRequestStatus) -> eyre::Result<()> {
        for row in self.rows.lock().unwrap().iter_mut() {
            if row.request_id == request_id {
                row.status = status;
            }
        }
        Ok(())
    }
}

/// Stand-in for a real render surface; logs every call it receives.
struct LoggingSink {
    label: String,
}

impl LoggingSink {
    fn shared(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { label: label.into() })
    }
}

impl MediaSink for LoggingSink {
    fn attach(&self, track: &TrackHandle) {
        info!(self.label, %track.sid, kind = %track.kind, "Sink attached");
    }

    fn detach(&self) {
        info!(self.label, "Sink detached");
    }

    fn set_volume(&self, gain: f64) {
        info!(self.label, gain, "Sink volume changed");
    }
}

fn accepted_row(id: i64, user: &str, minutes_ago: i64) -> RosterRow {
    RosterRow {
        request_id: RequestId(id),
        requester_id: user.to_string(),
        status: GuestRequestStatus::Accepted,
        display_name: Some(user.to_string()),
        avatar_ref: None,
        has_camera: true,
        has_mic: true,
        accepted_at: Utc::now() - TimeDelta::minutes(minutes_ago),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let config = Config::new(Args::parse())?;
    info!(config.broadcast_id, role = %config.role(), "Starting scripted guest session");

    let store = Arc::new(MemoryStore {
        rows: Mutex::new(vec![accepted_row(1, "ada", 2), accepted_row(2, "grace", 1)]),
    });
    let (events_tx, events_rx) = unbounded_channel();
    let (roster_tx, roster_rx) = unbounded_channel();

    let opts = CoordinatorOptions {
        broadcast_id: config.broadcast_id,
        local_user_id: config.local_user_id.clone(),
        host_user_id: config.host_user_id.clone(),
        data_dir: config.data_dir().to_path_buf(),
    };
    let (coordinator, _guest_leave) = GuestCoordinator::spawn(opts, store.clone(), events_rx, roster_rx);

    for guest in ["ada", "grace"] {
        coordinator.register_video_sink(guest, LoggingSink::shared(format!("{guest}/video")));
        coordinator.register_audio_sink(guest, LoggingSink::shared(format!("{guest}/audio")));
    }
    coordinator.register_preview_sink(LoggingSink::shared("self/preview"));

    // Both guests join the media room and publish.
    for (guest, n) in [("ada", 1), ("grace", 2)] {
        events_tx.send(RoomEvent::ParticipantConnected(RemoteParticipant {
            identity: ParticipantIdentity::for_guest(guest),
            tracks: vec![TrackHandle::video(format!("v{n}")), TrackHandle::audio(format!("a{n}"))],
        }))?;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    info!(guests = coordinator.visible_guests().len(), "Overlay populated");
    coordinator.set_volume("ada", 0.5);

    // One guest drops off the call.
    events_tx.send(RoomEvent::ParticipantDisconnected(ParticipantIdentity::for_guest(
        "grace",
    )))?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(guests = coordinator.visible_guests().len(), "After disconnect");

    // A third request gets accepted out of band; the change feed picks it up.
    store.rows.lock().unwrap().push(accepted_row(3, "edsger", 0));
    roster_tx.send(RosterChanged)?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(guests = coordinator.visible_guests().len(), "After roster change");

    coordinator.shutdown().await;
    Ok(())
}
