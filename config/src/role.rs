use serde::{
    Deserialize,
    Serialize,
};
use strum::{
    Display,
    EnumString,
};

/// Authority of the local process over the persisted guest roster.
///
/// Exactly one process per broadcast is the host; everybody else only
/// ever mutates their own display state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BroadcastRole {
    Host,
    #[default]
    Viewer,
}
