use serde::{Deserialize, Serialize};

/// A channel profile: a named membership set over channels.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChannelProfile {
    pub id: i64,
    pub name: String,
}

/// Membership row, unique per (profile, channel) pair.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProfileMembership {
    pub profile_id: i64,
    pub channel_id: i64,
    pub enabled: bool,
}
