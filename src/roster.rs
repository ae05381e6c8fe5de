use crate::events::ParticipantIdentity;
use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use eyre::Result;
use serde::{
    Deserialize,
    Serialize,
};
use strum::{
    Display,
    EnumString,
};

/// Lifecycle of a guest request row in the roster store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GuestRequestStatus {
    Pending,
    Accepted,
    Cancelled,
}

/// Id of the underlying roster row; stable for the lifetime of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, Serialize, Deserialize)]
pub struct RequestId(pub i64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRow {
    pub request_id: RequestId,
    pub requester_id: String,
    pub status: GuestRequestStatus,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
    pub has_camera: bool,
    pub has_mic: bool,
    pub accepted_at: DateTime<Utc>,
}

/// Persisted guest roster for a broadcast. The store is the system of
/// record; this process only ever holds a mirrored copy.
///
/// `delete` is idempotent: implementations map "row already gone" to
/// success so duplicate cleanups of the same request converge instead
/// of falling through to the cancelled-update fallback.
#[async_trait]
pub trait RosterStore: Send + Sync {
    async fn list_accepted(&self, broadcast_id: i64) -> Result<Vec<RosterRow>>;
    async fn delete(&self, request_id: RequestId) -> Result<()>;
    async fn update_status(&self, request_id: RequestId, status: GuestRequestStatus) -> Result<()>;
}

/// Level-triggered change feed notification: something about the
/// broadcast's roster changed, re-read it. Coalesced or out-of-order
/// delivery is safe by construction.
#[derive(Debug, Clone, Copy)]
pub struct RosterChanged;

/// A guest's authorized occupancy of one of the two overlay positions.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestSlot {
    pub request_id: RequestId,
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
    pub has_camera: bool,
    pub has_mic: bool,
    pub accepted_at: DateTime<Utc>,
}

impl GuestSlot {
    pub fn identity(&self) -> ParticipantIdentity {
        ParticipantIdentity::for_guest(&self.user_id)
    }

    fn from_row(row: RosterRow) -> Self {
        Self {
            request_id: row.request_id,
            user_id: row.requester_id,
            display_name: row.display_name,
            avatar_ref: row.avatar_ref,
            has_camera: row.has_camera,
            has_mic: row.has_mic,
            accepted_at: row.accepted_at,
        }
    }
}

/// The overlay renders at most this many remote guests. The approval
/// flow enforces the limit upstream; extra accepted rows are tolerated
/// here but never shown.
pub const MAX_GUEST_SLOTS: usize = 2;

/// In-memory mirror of the accepted rows for one broadcast.
#[derive(Debug)]
pub struct RosterCache {
    broadcast_id: i64,
    slots: Vec<GuestSlot>,
}

impl RosterCache {
    pub fn new(broadcast_id: i64) -> Self {
        Self {
            broadcast_id,
            slots: Vec::new(),
        }
    }

    /// Re-reads the accepted rows, oldest acceptance first. A failed
    /// read keeps the previous mirror so a transient store error does
    /// not blank out guest video.
    pub async fn refresh(&mut self, store: &dyn RosterStore) {
        match store.list_accepted(self.broadcast_id).await {
            Ok(rows) => {
                let mut slots: Vec<GuestSlot> = rows
                    .into_iter()
                    .filter(|row| row.status == GuestRequestStatus::Accepted)
                    .map(GuestSlot::from_row)
                    .collect();
                slots.sort_by_key(|slot| slot.accepted_at);
                slots.truncate(MAX_GUEST_SLOTS);
                self.slots = slots;
            }
            Err(err) => {
                warn!(self.broadcast_id, "Roster refresh failed, keeping previous mirror: {err}");
            }
        }
    }

    pub fn slots(&self) -> &[GuestSlot] {
        &self.slots
    }

    pub fn slot_for_user(&self, user_id: &str) -> Option<&GuestSlot> {
        self.slots.iter().find(|slot| slot.user_id == user_id)
    }

    /// Local-only removal; the store is not touched.
    pub fn remove_local(&mut self, request_id: RequestId) -> Option<GuestSlot> {
        let index = self.slots.iter().position(|slot| slot.request_id == request_id)?;
        Some(self.slots.remove(index))
    }

    /// Remote guests to render plus the local user's own slot, if any.
    pub fn visible(&self, local_user_id: &str) -> (Vec<GuestSlot>, Option<GuestSlot>) {
        let self_slot = self.slots.iter().find(|slot| slot.user_id == local_user_id).cloned();
        let guests = self
            .slots
            .iter()
            .filter(|slot| slot.user_id != local_user_id)
            .cloned()
            .collect();
        (guests, self_slot)
    }
}
