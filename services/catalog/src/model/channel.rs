use serde::{Deserialize, Serialize};

use super::ChannelNumber;

/// A catalog channel. `number` is unique across all channels; the store's
/// unique index is the final arbiter under concurrent writers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Channel {
    pub id: i64,
    pub number: ChannelNumber,
    pub name: String,
    pub tvg_id: Option<String>,
    pub tvc_guide_station_id: Option<String>,
    pub group_id: Option<i64>,
    pub logo_id: Option<i64>,
}
