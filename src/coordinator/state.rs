use crate::roster::GuestSlot;

/// Snapshot the embedding UI renders from; republished on every
/// roster or cleanup mutation.
#[derive(Debug, Default, Clone)]
pub struct CoordinatorState {
    pub running: bool,
    /// Remote guests to render, acceptance order, never more than two.
    pub guests: Vec<GuestSlot>,
    /// Present when the local user occupies a slot themself.
    pub self_slot: Option<GuestSlot>,
}
