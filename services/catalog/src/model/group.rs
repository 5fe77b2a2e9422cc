use serde::{Deserialize, Serialize};

/// A channel group, unique by name.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChannelGroup {
    pub id: i64,
    pub name: String,
}
