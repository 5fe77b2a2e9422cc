use serde::{Deserialize, Serialize};

/// A logo asset, unique by URL. Bulk provisioning deduplicates on the URL so
/// one asset row serves every channel referencing the same image.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Logo {
    pub id: i64,
    pub name: String,
    pub url: String,
}
