//! In-memory implementation of the catalog store.
//!
//! # Purpose
//! Backs tests and storage-less deployments. All state lives in one
//! `RwLock`ed struct; mutations validate and stage first, then apply while
//! holding the write lock, which gives `commit_channels` the same
//! all-or-nothing behavior the Postgres backend gets from transactions.
//!
//! # Durability
//! None — state is lost on restart, and multiple processes each see their
//! own store. Deployments that need the cross-process guarantees use the
//! Postgres backend.
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

use super::{CatalogStore, ChannelDraft, CommitOutcome, StoreError, StoreResult};
use crate::model::{
    Channel, ChannelGroup, ChannelNumber, ChannelProfile, Logo, NewStream, ProfileMembership,
    Stream,
};
use anyhow::anyhow;

#[derive(Debug, Clone)]
struct StreamLink {
    channel_id: i64,
    stream_id: i64,
    position: i64,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    channels: BTreeMap<i64, Channel>,
    streams: BTreeMap<i64, Stream>,
    groups: BTreeMap<i64, ChannelGroup>,
    logos: BTreeMap<i64, Logo>,
    profiles: BTreeMap<i64, ChannelProfile>,
    memberships: BTreeMap<(i64, i64), ProfileMembership>,
    links: Vec<StreamLink>,
}

impl Inner {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn number_in_use(&self, number: ChannelNumber) -> bool {
        self.channels.values().any(|c| c.number == number)
    }
}

/// In-memory catalog store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        Ok(self.inner.read().await.channels.values().cloned().collect())
    }

    async fn get_channel(&self, id: i64) -> StoreResult<Channel> {
        self.inner
            .read()
            .await
            .channels
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("channel {id}")))
    }

    async fn delete_channel(&self, id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.channels.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("channel {id}")));
        }
        // Dependent rows go with the channel, matching the cascades the
        // durable backend declares in its schema.
        inner.memberships.retain(|(_, channel_id), _| *channel_id != id);
        inner.links.retain(|link| link.channel_id != id);
        metrics::gauge!("headend_channels_total").set(inner.channels.len() as f64);
        Ok(())
    }

    async fn used_channel_numbers(&self) -> StoreResult<BTreeSet<ChannelNumber>> {
        Ok(self
            .inner
            .read()
            .await
            .channels
            .values()
            .map(|channel| channel.number)
            .collect())
    }

    async fn commit_channels(&self, drafts: Vec<ChannelDraft>) -> StoreResult<Vec<CommitOutcome>> {
        let mut inner = self.inner.write().await;

        // Validate references up front: nothing is applied if any draft
        // points at a missing profile or stream.
        for draft in &drafts {
            for profile_id in &draft.profile_ids {
                if !inner.profiles.contains_key(profile_id) {
                    return Err(StoreError::Unexpected(anyhow!(
                        "profile {profile_id} does not exist"
                    )));
                }
            }
            for stream_id in &draft.stream_ids {
                if !inner.streams.contains_key(stream_id) {
                    return Err(StoreError::Unexpected(anyhow!(
                        "stream {stream_id} does not exist"
                    )));
                }
            }
        }

        let mut next_id = inner.next_id;
        let mut staged_logos: Vec<Logo> = Vec::new();
        let mut logo_ids_by_url: HashMap<String, i64> = inner
            .logos
            .values()
            .map(|logo| (logo.url.clone(), logo.id))
            .collect();
        let mut staged_numbers: BTreeSet<ChannelNumber> = BTreeSet::new();
        let mut staged_channels: Vec<Channel> = Vec::new();
        let mut staged_memberships: Vec<ProfileMembership> = Vec::new();
        let mut staged_links: Vec<StreamLink> = Vec::new();
        let mut outcomes = Vec::with_capacity(drafts.len());

        for draft in &drafts {
            if inner.number_in_use(draft.number) || staged_numbers.contains(&draft.number) {
                outcomes.push(CommitOutcome::NumberTaken(draft.number));
                continue;
            }

            let logo_id = draft.logo_url.as_ref().map(|url| {
                *logo_ids_by_url.entry(url.clone()).or_insert_with(|| {
                    next_id += 1;
                    staged_logos.push(Logo {
                        id: next_id,
                        name: draft.name.clone(),
                        url: url.clone(),
                    });
                    next_id
                })
            });

            next_id += 1;
            let channel = Channel {
                id: next_id,
                number: draft.number,
                name: draft.name.clone(),
                tvg_id: draft.tvg_id.clone(),
                tvc_guide_station_id: draft.tvc_guide_station_id.clone(),
                group_id: draft.group_id,
                logo_id,
            };
            staged_numbers.insert(draft.number);
            for profile_id in &draft.profile_ids {
                staged_memberships.push(ProfileMembership {
                    profile_id: *profile_id,
                    channel_id: channel.id,
                    enabled: true,
                });
            }
            for (position, stream_id) in draft.stream_ids.iter().enumerate() {
                staged_links.push(StreamLink {
                    channel_id: channel.id,
                    stream_id: *stream_id,
                    position: position as i64,
                });
            }
            outcomes.push(CommitOutcome::Created(channel.clone()));
            staged_channels.push(channel);
        }

        // Apply the staged batch as a unit.
        inner.next_id = next_id;
        for logo in staged_logos {
            inner.logos.insert(logo.id, logo);
        }
        let created = staged_channels.len();
        for channel in staged_channels {
            inner.channels.insert(channel.id, channel);
        }
        for membership in staged_memberships {
            inner
                .memberships
                .insert((membership.profile_id, membership.channel_id), membership);
        }
        inner.links.extend(staged_links);

        metrics::counter!("headend_channel_changes_total", "op" => "created")
            .increment(created as u64);
        metrics::gauge!("headend_channels_total").set(inner.channels.len() as f64);
        Ok(outcomes)
    }

    async fn assign_channel_numbers(
        &self,
        assignments: &[(i64, ChannelNumber)],
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let targets: BTreeSet<i64> = assignments.iter().map(|(id, _)| *id).collect();
        let mut seen = BTreeSet::new();
        for (id, number) in assignments {
            if !inner.channels.contains_key(id) {
                return Err(StoreError::NotFound(format!("channel {id}")));
            }
            if !seen.insert(*number) {
                return Err(StoreError::Conflict(format!(
                    "channel number {number} assigned twice"
                )));
            }
            // A number held by a channel outside the renumbered set is a
            // conflict; within the set it is about to be overwritten.
            let holder = inner
                .channels
                .values()
                .find(|channel| channel.number == *number && !targets.contains(&channel.id));
            if let Some(holder) = holder {
                return Err(StoreError::Conflict(format!(
                    "channel number {number} is already in use by channel {}",
                    holder.id
                )));
            }
        }
        for (id, number) in assignments {
            if let Some(channel) = inner.channels.get_mut(id) {
                channel.number = *number;
            }
        }
        metrics::counter!("headend_channel_changes_total", "op" => "renumbered")
            .increment(assignments.len() as u64);
        Ok(())
    }

    async fn channel_streams(&self, channel_id: i64) -> StoreResult<Vec<Stream>> {
        let inner = self.inner.read().await;
        let mut links: Vec<&StreamLink> = inner
            .links
            .iter()
            .filter(|link| link.channel_id == channel_id)
            .collect();
        links.sort_by_key(|link| link.position);
        Ok(links
            .into_iter()
            .filter_map(|link| inner.streams.get(&link.stream_id).cloned())
            .collect())
    }

    async fn channel_memberships(&self, channel_id: i64) -> StoreResult<Vec<ProfileMembership>> {
        Ok(self
            .inner
            .read()
            .await
            .memberships
            .values()
            .filter(|membership| membership.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn create_stream(&self, stream: NewStream) -> StoreResult<Stream> {
        let mut inner = self.inner.write().await;
        if let Some(group_id) = stream.group_id
            && !inner.groups.contains_key(&group_id)
        {
            return Err(StoreError::NotFound(format!("group {group_id}")));
        }
        let id = inner.allocate_id();
        let stream = Stream {
            id,
            name: stream.name,
            url: stream.url,
            tvg_id: stream.tvg_id,
            logo_url: stream.logo_url,
            group_id: stream.group_id,
            custom_properties: stream.custom_properties,
        };
        inner.streams.insert(id, stream.clone());
        Ok(stream)
    }

    async fn get_stream(&self, id: i64) -> StoreResult<Stream> {
        self.inner
            .read()
            .await
            .streams
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("stream {id}")))
    }

    async fn list_streams(&self) -> StoreResult<Vec<Stream>> {
        Ok(self.inner.read().await.streams.values().cloned().collect())
    }

    async fn create_group(&self, name: &str) -> StoreResult<ChannelGroup> {
        let mut inner = self.inner.write().await;
        if inner.groups.values().any(|group| group.name == name) {
            return Err(StoreError::Conflict(format!("group {name} exists")));
        }
        let id = inner.allocate_id();
        let group = ChannelGroup {
            id,
            name: name.to_string(),
        };
        inner.groups.insert(id, group.clone());
        Ok(group)
    }

    async fn list_groups(&self) -> StoreResult<Vec<ChannelGroup>> {
        Ok(self.inner.read().await.groups.values().cloned().collect())
    }

    async fn list_logos(&self) -> StoreResult<Vec<Logo>> {
        Ok(self.inner.read().await.logos.values().cloned().collect())
    }

    async fn create_profile(&self, name: &str) -> StoreResult<ChannelProfile> {
        let mut inner = self.inner.write().await;
        if inner.profiles.values().any(|profile| profile.name == name) {
            return Err(StoreError::Conflict(format!("profile {name} exists")));
        }
        let id = inner.allocate_id();
        let profile = ChannelProfile {
            id,
            name: name.to_string(),
        };
        inner.profiles.insert(id, profile.clone());
        Ok(profile)
    }

    async fn list_profiles(&self) -> StoreResult<Vec<ChannelProfile>> {
        Ok(self.inner.read().await.profiles.values().cloned().collect())
    }

    async fn set_membership(
        &self,
        profile_id: i64,
        channel_id: i64,
        enabled: bool,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.profiles.contains_key(&profile_id) {
            return Err(StoreError::NotFound(format!("profile {profile_id}")));
        }
        if !inner.channels.contains_key(&channel_id) {
            return Err(StoreError::NotFound(format!("channel {channel_id}")));
        }
        inner
            .memberships
            .entry((profile_id, channel_id))
            .and_modify(|membership| membership.enabled = enabled)
            .or_insert(ProfileMembership {
                profile_id,
                channel_id,
                enabled,
            });
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
