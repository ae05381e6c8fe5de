use super::cleanup::CleanupOutcome;
use crate::{
    media::SharedSink,
    roster::RequestId,
};
use derive_more::Display;

/// Commands and internal notifications funneled into the coordinator
/// loop. UI calls, timer ticks and write-task results all arrive here
/// so that every state mutation happens on the one loop.
#[derive(Clone, Display)]
pub enum CoordinatorMessage {
    #[display("SetVolume({guest_user_id}, {gain})")]
    SetVolume { guest_user_id: String, gain: f64 },
    #[display("RemoveGuest({request_id})")]
    RemoveGuest {
        request_id: RequestId,
        guest_user_id: String,
    },
    #[display("RegisterVideoSink({guest_user_id})")]
    RegisterVideoSink {
        guest_user_id: String,
        sink: SharedSink,
    },
    #[display("RegisterAudioSink({guest_user_id})")]
    RegisterAudioSink {
        guest_user_id: String,
        sink: SharedSink,
    },
    #[display("RegisterPreviewSink")]
    RegisterPreviewSink { sink: SharedSink },
    /// Fired by the self-preview retry timer.
    #[display("PreviewPoll")]
    PreviewPoll,
    /// Result of a dispatched roster write coming back to the loop.
    #[display("CleanupFinished({request_id}, {outcome})")]
    CleanupFinished {
        request_id: RequestId,
        outcome: CleanupOutcome,
    },
    #[display("Shutdown")]
    Shutdown,
}
