//! Bulk channel provisioning.
//!
//! # Purpose
//! Turns an ordered batch of item specs into channels: validates each item,
//! resolves its number against one shared snapshot, then hands every
//! surviving draft to the store's atomic persistence phase. Items fail
//! individually — a bad spec never aborts its siblings — and the batch call
//! always returns one outcome per input item, in input order.
//!
//! # Notes
//! The number snapshot is read once per batch. Two batches in different
//! processes can therefore race for the same number; the store's unique
//! index resolves the race and the loser shows up here as a per-item
//! failure, never as a torn write.
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use headend_coord::{NotifyHandle, Update};

use crate::allocator::NumberPool;
use crate::model::{Channel, ChannelNumber};
use crate::store::{CatalogStore, ChannelDraft, CommitOutcome, StoreError, StoreResult};

/// One bulk-creation request item: make a channel from an existing stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub stream_id: i64,
    /// Channel name; defaults to the stream's name.
    pub name: Option<String>,
    /// Explicit channel number. Provider metadata on the stream wins over
    /// this, and absence means auto-assignment.
    pub channel_number: Option<f64>,
    /// Profiles to join. Absent means every profile at batch start.
    pub profile_ids: Option<Vec<i64>>,
}

/// Per-item result, in input order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    Success { channel: Channel },
    Failure { input: ChannelSpec, reason: String },
}

impl ProvisionOutcome {
    pub fn channel(&self) -> Option<&Channel> {
        match self {
            Self::Success { channel } => Some(channel),
            Self::Failure { .. } => None,
        }
    }
}

// Validation result per item: an index into the draft list, or the reason
// the item was excluded from persistence.
enum Slot {
    Draft(usize),
    Failed(String),
}

pub struct BulkProvisioner {
    store: Arc<dyn CatalogStore>,
    notify: NotifyHandle,
}

impl BulkProvisioner {
    pub fn new(store: Arc<dyn CatalogStore>, notify: NotifyHandle) -> Self {
        Self { store, notify }
    }

    /// Provisions a batch. Per-item conditions (missing stream, number
    /// conflict, unknown profile) become `Failure` outcomes, and so does a
    /// failed persistence phase — every validated item is then reported
    /// failed, since the aborted transaction committed none of them. Only a
    /// store failure while taking the batch snapshot errors the call.
    pub async fn provision(&self, items: Vec<ChannelSpec>) -> StoreResult<Vec<ProvisionOutcome>> {
        let mut pool = NumberPool::new(self.store.used_channel_numbers().await?);
        let profiles = self.store.list_profiles().await?;
        let all_profile_ids: Vec<i64> = profiles.iter().map(|profile| profile.id).collect();
        let known_profiles: HashSet<i64> = all_profile_ids.iter().copied().collect();

        let mut slots = Vec::with_capacity(items.len());
        let mut drafts = Vec::new();
        for item in &items {
            match self
                .validate_item(item, &mut pool, &all_profile_ids, &known_profiles)
                .await?
            {
                Ok(draft) => {
                    slots.push(Slot::Draft(drafts.len()));
                    drafts.push(draft);
                }
                Err(reason) => {
                    tracing::debug!(stream_id = item.stream_id, %reason, "provision item rejected");
                    slots.push(Slot::Failed(reason));
                }
            }
        }

        // A failed persistence phase commits nothing; the drafts it covered
        // are reported item by item instead of failing the whole call.
        let committed = if drafts.is_empty() {
            Ok(Vec::new())
        } else {
            self.store.commit_channels(drafts).await
        };
        let committed = match committed {
            Ok(committed) => Ok(committed),
            Err(err) => {
                tracing::error!(error = %err, "provisioning batch failed to persist");
                Err(format!("persistence failed: {err}"))
            }
        };

        let mut outcomes = Vec::with_capacity(items.len());
        let mut created_ids = Vec::new();
        for (item, slot) in items.into_iter().zip(slots) {
            let outcome = match (&committed, slot) {
                (_, Slot::Failed(reason)) => ProvisionOutcome::Failure {
                    input: item,
                    reason,
                },
                (Err(reason), Slot::Draft(_)) => ProvisionOutcome::Failure {
                    input: item,
                    reason: reason.clone(),
                },
                (Ok(committed), Slot::Draft(index)) => match &committed[index] {
                    CommitOutcome::Created(channel) => {
                        created_ids.push(channel.id);
                        ProvisionOutcome::Success {
                            channel: channel.clone(),
                        }
                    }
                    CommitOutcome::NumberTaken(number) => ProvisionOutcome::Failure {
                        input: item,
                        reason: format!("channel number {number} is already in use"),
                    },
                },
            };
            let label = if outcome.channel().is_some() {
                "created"
            } else {
                "failed"
            };
            metrics::counter!("headend_provision_items_total", "outcome" => label).increment(1);
            outcomes.push(outcome);
        }

        if !created_ids.is_empty() {
            self.notify.send(Update::ok(
                "channels_created",
                json!({"count": created_ids.len(), "channel_ids": created_ids}),
            ));
        }
        Ok(outcomes)
    }

    /// Single-item convenience over the batch path.
    pub async fn provision_one(&self, item: ChannelSpec) -> StoreResult<ProvisionOutcome> {
        let mut outcomes = self.provision(vec![item]).await?;
        Ok(outcomes.remove(0))
    }

    /// Renumbers `channel_ids` sequentially from `starting`, skipping
    /// numbers held by channels outside the set. Each target value goes
    /// through the same snapshot membership check as an explicit request;
    /// the store then applies the batch atomically.
    pub async fn assign_numbers(
        &self,
        channel_ids: &[i64],
        starting: ChannelNumber,
    ) -> StoreResult<Vec<(i64, ChannelNumber)>> {
        let mut pool = NumberPool::new(self.store.used_channel_numbers().await?);
        for id in channel_ids {
            let channel = self.store.get_channel(*id).await?;
            // The channel's current number is being replaced, so it must not
            // block the new sequence.
            pool.unreserve(channel.number);
        }
        let assigned = pool.assign_sequence(starting, channel_ids.len());
        let assignments: Vec<(i64, ChannelNumber)> = channel_ids
            .iter()
            .copied()
            .zip(assigned)
            .collect();
        self.store.assign_channel_numbers(&assignments).await?;
        self.notify.send(Update::ok(
            "channels_renumbered",
            json!({"count": assignments.len()}),
        ));
        Ok(assignments)
    }

    // Validates one item against the shared snapshot. The outer Result is
    // infrastructure failure; the inner Err is the per-item rejection.
    async fn validate_item(
        &self,
        item: &ChannelSpec,
        pool: &mut NumberPool,
        all_profile_ids: &[i64],
        known_profiles: &HashSet<i64>,
    ) -> StoreResult<Result<ChannelDraft, String>> {
        let stream = match self.store.get_stream(item.stream_id).await {
            Ok(stream) => stream,
            Err(StoreError::NotFound(what)) => return Ok(Err(format!("{what} does not exist"))),
            Err(err) => return Err(err),
        };

        let name = match &item.name {
            Some(name) if name.trim().is_empty() => {
                return Ok(Err("name must not be empty".into()));
            }
            Some(name) => name.clone(),
            None => stream.name.clone(),
        };

        // Provider metadata outranks the caller's explicit number; both go
        // through the same conflict check.
        let requested = match stream.provider_number().or(item.channel_number) {
            Some(raw) => match ChannelNumber::new(raw) {
                Ok(number) => Some(number),
                Err(err) => return Ok(Err(err.to_string())),
            },
            None => None,
        };
        let number = match pool.resolve(requested) {
            Ok(number) => number,
            Err(conflict) => return Ok(Err(conflict.to_string())),
        };

        let profile_ids = match &item.profile_ids {
            Some(ids) => {
                if let Some(missing) = ids.iter().find(|id| !known_profiles.contains(*id)) {
                    // The number reserved above stays reserved for the rest
                    // of the batch. A hole in the sequence is acceptable; a
                    // collision is not.
                    return Ok(Err(format!("channel profile {missing} does not exist")));
                }
                ids.clone()
            }
            None => all_profile_ids.to_vec(),
        };

        Ok(Ok(ChannelDraft {
            number,
            name,
            tvg_id: stream.tvg_id.clone(),
            tvc_guide_station_id: stream.provider_station_id(),
            group_id: stream.group_id,
            logo_url: stream.logo_url.clone(),
            profile_ids,
            stream_ids: vec![stream.id],
        }))
    }
}
