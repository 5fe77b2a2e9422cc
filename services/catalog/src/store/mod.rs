use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::model::{
    Channel, ChannelGroup, ChannelNumber, ChannelProfile, Logo, NewStream, ProfileMembership,
    Stream,
};

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

/// A validated channel ready for the atomic persistence phase: the resolved
/// number plus everything needed to materialize its dependent rows.
#[derive(Debug, Clone)]
pub struct ChannelDraft {
    pub number: ChannelNumber,
    pub name: String,
    pub tvg_id: Option<String>,
    pub tvc_guide_station_id: Option<String>,
    pub group_id: Option<i64>,
    /// Logo to deduplicate by URL and link, if the source carries one.
    pub logo_url: Option<String>,
    /// Fully resolved membership set (explicit subset, or every profile that
    /// existed at batch start).
    pub profile_ids: Vec<i64>,
    /// Source streams to link, in order.
    pub stream_ids: Vec<i64>,
}

/// Per-draft result of the atomic persistence phase. `NumberTaken` is the
/// lost-race outcome: a concurrent writer committed the number between the
/// batch snapshot and this commit.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Created(Channel),
    NumberTaken(ChannelNumber),
}

/// Persisted catalog store.
///
/// Mutating operations are atomic per call: a batch committed through
/// `commit_channels` either lands as a unit (minus per-draft number races)
/// or not at all.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    // Channels
    async fn list_channels(&self) -> StoreResult<Vec<Channel>>;
    async fn get_channel(&self, id: i64) -> StoreResult<Channel>;
    async fn delete_channel(&self, id: i64) -> StoreResult<()>;
    /// Snapshot of every committed channel number, taken at batch start.
    async fn used_channel_numbers(&self) -> StoreResult<BTreeSet<ChannelNumber>>;
    /// Atomic persistence phase for a provisioning batch: logo dedup, channel
    /// rows, membership fan-out, and stream links in one unit.
    async fn commit_channels(&self, drafts: Vec<ChannelDraft>) -> StoreResult<Vec<CommitOutcome>>;
    /// Atomically renumbers existing channels. Fails with `Conflict` if a
    /// target number is held by a channel outside the assignment set.
    async fn assign_channel_numbers(
        &self,
        assignments: &[(i64, ChannelNumber)],
    ) -> StoreResult<()>;
    /// Streams linked to a channel, in link order.
    async fn channel_streams(&self, channel_id: i64) -> StoreResult<Vec<Stream>>;
    async fn channel_memberships(&self, channel_id: i64) -> StoreResult<Vec<ProfileMembership>>;

    // Streams
    async fn create_stream(&self, stream: NewStream) -> StoreResult<Stream>;
    async fn get_stream(&self, id: i64) -> StoreResult<Stream>;
    async fn list_streams(&self) -> StoreResult<Vec<Stream>>;

    // Groups
    async fn create_group(&self, name: &str) -> StoreResult<ChannelGroup>;
    async fn list_groups(&self) -> StoreResult<Vec<ChannelGroup>>;

    // Logos
    async fn list_logos(&self) -> StoreResult<Vec<Logo>>;

    // Profiles
    async fn create_profile(&self, name: &str) -> StoreResult<ChannelProfile>;
    async fn list_profiles(&self) -> StoreResult<Vec<ChannelProfile>>;
    /// Upserts one membership row; the row is created if the pair is new.
    async fn set_membership(
        &self,
        profile_id: i64,
        channel_id: i64,
        enabled: bool,
    ) -> StoreResult<()>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
