use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{Channel, ChannelError, ChannelId};

/// Immutable view of every configured channel
///
/// Carries a precomputed (group, model) index so selection never scans
/// channels that cannot serve the request.
#[derive(Debug, Default)]
pub struct Snapshot {
    channels: BTreeMap<ChannelId, Arc<Channel>>,
    index: HashMap<(String, String), Vec<Arc<Channel>>>,
}

impl Snapshot {
    fn build(channels: BTreeMap<ChannelId, Arc<Channel>>) -> Self {
        let mut index: HashMap<(String, String), Vec<Arc<Channel>>> = HashMap::new();

        for channel in channels.values() {
            for group in &channel.groups {
                for model in &channel.models {
                    index
                        .entry((group.clone(), model.clone()))
                        .or_default()
                        .push(Arc::clone(channel));
                }
            }
        }

        Self { channels, index }
    }

    /// Channels serving a (group, model) pair, regardless of enabled state
    pub fn candidates(&self, group: &str, model: &str) -> &[Arc<Channel>] {
        self.index
            .get(&(group.to_owned(), model.to_owned()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get(&self, id: ChannelId) -> Option<&Arc<Channel>> {
        self.channels.get(&id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Bulk update applied to every channel sharing a tag
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagUpdate {
    pub enabled: Option<bool>,
    pub priority: Option<i64>,
    pub weight: Option<u64>,
}

/// One (group, model) pair and the channels able to serve it
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Ability {
    pub group: String,
    pub model: String,
    pub channel_ids: Vec<ChannelId>,
}

/// Read-mostly registry of upstream channels
///
/// Readers load an `Arc<Snapshot>` and keep it for the duration of a
/// selection. Writers build a fresh snapshot and publish it immediately,
/// so new selections observe every write while in-flight ones are untouched.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    current: RwLock<Arc<Snapshot>>,
}

impl ChannelRegistry {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        let channels = channels.into_iter().map(|c| (c.id, Arc::new(c))).collect();

        Self {
            current: RwLock::new(Arc::new(Snapshot::build(channels))),
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.snapshot().get(id).cloned()
    }

    /// All channels ordered by id
    pub fn list(&self) -> Vec<Arc<Channel>> {
        self.snapshot().channels.values().cloned().collect()
    }

    /// Insert or replace a channel, returning the previous version
    pub fn upsert(&self, channel: Channel) -> Option<Arc<Channel>> {
        let id = channel.id;
        let previous = self.modify(|channels| channels.insert(id, Arc::new(channel)));

        tracing::info!(channel_id = id, replaced = previous.is_some(), "channel upserted");
        previous
    }

    /// Remove a channel
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::UnknownChannel`] if no such channel exists
    pub fn remove(&self, id: ChannelId) -> Result<Arc<Channel>, ChannelError> {
        let removed = self
            .modify(|channels| channels.remove(&id))
            .ok_or(ChannelError::UnknownChannel(id))?;

        tracing::info!(channel_id = id, "channel removed");
        Ok(removed)
    }

    /// Enable or disable a single channel
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::UnknownChannel`] if no such channel exists
    pub fn set_enabled(&self, id: ChannelId, enabled: bool) -> Result<(), ChannelError> {
        let found = self.modify(|channels| {
            let Some(existing) = channels.get(&id) else {
                return false;
            };

            if existing.enabled != enabled {
                let mut updated = Channel::clone(existing);
                updated.enabled = enabled;
                channels.insert(id, Arc::new(updated));
            }

            true
        });

        if !found {
            return Err(ChannelError::UnknownChannel(id));
        }

        tracing::info!(channel_id = id, enabled, "channel enabled flag changed");
        Ok(())
    }

    /// Apply one update to every channel carrying `tag` in a single publish
    ///
    /// Returns the number of channels updated.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::UnknownTag`] if no channel carries the tag
    pub fn update_tag(&self, tag: &str, update: &TagUpdate) -> Result<usize, ChannelError> {
        let updated = self.modify(|channels| {
            let mut count = 0;

            for channel in channels.values_mut() {
                if channel.tag.as_deref() != Some(tag) {
                    continue;
                }

                let mut next = Channel::clone(channel);
                if let Some(enabled) = update.enabled {
                    next.enabled = enabled;
                }
                if let Some(priority) = update.priority {
                    next.priority = priority;
                }
                if let Some(weight) = update.weight {
                    next.weight = weight;
                }

                *channel = Arc::new(next);
                count += 1;
            }

            count
        });

        if updated == 0 {
            return Err(ChannelError::UnknownTag(tag.to_owned()));
        }

        tracing::info!(tag, channels = updated, ?update, "tag update applied");
        Ok(updated)
    }

    /// Every (group, model) pair with the ids of channels serving it
    pub fn abilities(&self) -> Vec<Ability> {
        let snapshot = self.snapshot();

        let mut abilities: Vec<Ability> = snapshot
            .index
            .iter()
            .map(|((group, model), channels)| Ability {
                group: group.clone(),
                model: model.clone(),
                channel_ids: channels.iter().map(|c| c.id).collect(),
            })
            .collect();

        abilities.sort_by(|a, b| (&a.group, &a.model).cmp(&(&b.group, &b.model)));
        abilities
    }

    /// Copy the current channel map, let `f` edit it, then publish
    fn modify<T>(&self, f: impl FnOnce(&mut BTreeMap<ChannelId, Arc<Channel>>) -> T) -> T {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);

        let mut channels = guard.channels.clone();
        let result = f(&mut channels);
        *guard = Arc::new(Snapshot::build(channels));

        result
    }
}
