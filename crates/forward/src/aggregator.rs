//! Media-group aggregation.
//!
//! Telegram delivers an album as separate posts sharing a `media_group_id`.
//! Each post's task waits out a debounce window, then checks whether it
//! carries the lowest message id recorded for the group. That post is the
//! leader and receives the whole batch; every other call gets `None`.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use {
    postrelay_common::types::Post,
    postrelay_config::ForwardConfig,
    tokio::time::Instant,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use postrelay_metrics::{forward as fwd_metrics, gauge};

use crate::error::Result;

struct PendingGroup {
    posts: Vec<Post>,
    created_at: Instant,
}

/// Debounced grouping of posts that share a group id.
pub struct PostAggregator {
    delay: Duration,
    ttl: Duration,
    capacity: usize,
    groups: Mutex<HashMap<String, PendingGroup>>,
}

impl PostAggregator {
    /// Fails when the group TTL does not exceed the debounce delay.
    pub fn new(config: &ForwardConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            delay: config.aggregation_delay(),
            ttl: config.group_ttl(),
            capacity: config.group_capacity,
            groups: Mutex::new(HashMap::new()),
        })
    }

    /// Submit a post. Returns the batch only from the leader's call.
    ///
    /// Posts without a group id are returned immediately as a singleton.
    pub async fn submit(&self, post: Post) -> Option<Vec<Post>> {
        let Some(group_id) = post.group_id.clone() else {
            return Some(vec![post]);
        };
        let message_id = post.message_id;

        self.record(&group_id, post.clone());
        tokio::time::sleep(self.delay).await;
        self.elect(&group_id, post).inspect(|batch| {
            debug!(group_id = %group_id, message_id, size = batch.len(), "group leader");
        })
    }

    /// Number of groups currently buffered, expired entries excluded.
    #[must_use]
    pub fn pending(&self) -> usize {
        let mut groups = self.lock();
        self.purge_expired(&mut groups);
        groups.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingGroup>> {
        self.groups.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn purge_expired(&self, groups: &mut HashMap<String, PendingGroup>) {
        let now = Instant::now();
        groups.retain(|_, group| now.duration_since(group.created_at) < self.ttl);
    }

    fn record(&self, group_id: &str, post: Post) {
        let mut groups = self.lock();
        self.purge_expired(&mut groups);

        groups
            .entry(group_id.to_string())
            .or_insert_with(|| PendingGroup {
                posts: Vec::new(),
                created_at: Instant::now(),
            })
            .posts
            .push(post);

        while groups.len() > self.capacity {
            let oldest = groups
                .iter()
                .filter(|(id, _)| id.as_str() != group_id)
                .min_by_key(|(_, group)| group.created_at)
                .map(|(id, _)| id.clone());
            let Some(oldest) = oldest else {
                break;
            };
            warn!(group_id = %oldest, capacity = self.capacity, "evicting pending media group");
            groups.remove(&oldest);
        }

        #[cfg(feature = "metrics")]
        gauge!(fwd_metrics::PENDING_GROUPS).set(groups.len() as f64);
    }

    fn elect(&self, group_id: &str, post: Post) -> Option<Vec<Post>> {
        let mut groups = self.lock();
        self.purge_expired(&mut groups);

        let Some(group) = groups.get(group_id) else {
            warn!(
                group_id,
                message_id = post.message_id,
                "media group gone before election, forwarding post alone"
            );
            return Some(vec![post]);
        };

        let leader_id = group.posts.iter().map(|p| p.message_id).min()?;
        (leader_id == post.message_id).then(|| group.posts.clone())
    }
}
