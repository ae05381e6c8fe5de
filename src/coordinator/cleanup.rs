use crate::roster::{
    GuestRequestStatus,
    RequestId,
    RosterStore,
};
use derive_more::Display;

/// How the roster write-back for a departed guest ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CleanupOutcome {
    /// Row deleted, so the guest can request again cleanly.
    Deleted,
    /// Delete refused by the store; row parked as cancelled instead.
    MarkedCancelled,
    /// Both writes failed. Local state was cleaned anyway and the
    /// change feed reconciles the store's truth later.
    StoreUnreachable,
}

/// Host-side write protocol: delete the row, fall back to marking it
/// cancelled when the store refuses the delete. Never returns an error;
/// local cleanup proceeds no matter what the store did.
pub(super) async fn remove_from_roster(store: &dyn RosterStore, request_id: RequestId) -> CleanupOutcome {
    match store.delete(request_id).await {
        Ok(()) => CleanupOutcome::Deleted,
        Err(delete_err) => {
            warn!(%request_id, "Roster delete failed, marking cancelled instead: {delete_err}");
            match store.update_status(request_id, GuestRequestStatus::Cancelled).await {
                Ok(()) => CleanupOutcome::MarkedCancelled,
                Err(update_err) => {
                    error!(%request_id, "Roster cleanup failed entirely, deferring to the change feed: {update_err}");
                    CleanupOutcome::StoreUnreachable
                }
            }
        }
    }
}
