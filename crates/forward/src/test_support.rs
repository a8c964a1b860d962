//! In-memory collaborators for unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Result, anyhow, bail},
    async_trait::async_trait,
    postrelay_common::types::{ChannelId, PhotoVariant, Post, Target, UserId},
};

use crate::{
    links::LinkProber,
    traits::{AttachmentFetcher, OwnerNotifier, PostEditor, TargetStore},
};

pub const CHANNEL: ChannelId = -100;

pub fn target(id: i64, webhook: &str, key: Option<&str>) -> Target {
    Target {
        id,
        channel_id: CHANNEL,
        webhook: webhook.into(),
        name: format!("target-{id}"),
        key: key.map(String::from),
        prefix: None,
    }
}

/// A photo post whose largest variant has file id `big-{tag}`.
pub fn photo_post(message_id: i32, tag: &str) -> Post {
    Post::text(CHANNEL, message_id, "").with_photo(vec![
        PhotoVariant {
            file_id: format!("small-{tag}"),
            width: 90,
            height: 90,
            file_size: Some(1_000),
        },
        PhotoVariant {
            file_id: format!("big-{tag}"),
            width: 1280,
            height: 1280,
            file_size: Some(100_000),
        },
    ])
}

/// Base URL of a local server that accepts connections and never replies.
pub async fn silent_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}

#[derive(Default)]
pub struct MemoryStore {
    targets: HashMap<ChannelId, Vec<Target>>,
    owners: HashMap<ChannelId, UserId>,
    failing: bool,
}

impl MemoryStore {
    pub fn new(channel_id: ChannelId, owner_id: UserId, targets: Vec<Target>) -> Self {
        Self {
            targets: HashMap::from([(channel_id, targets)]),
            owners: HashMap::from([(channel_id, owner_id)]),
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn targets_for(&self, channel_id: ChannelId) -> Result<Vec<Target>> {
        if self.failing {
            bail!("database is locked");
        }
        Ok(self.targets.get(&channel_id).cloned().unwrap_or_default())
    }

    async fn owner_for(&self, channel_id: ChannelId) -> Result<Option<UserId>> {
        if self.failing {
            bail!("database is locked");
        }
        Ok(self.owners.get(&channel_id).copied())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(UserId, String)>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(UserId, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl OwnerNotifier for RecordingNotifier {
    async fn notify(&self, owner_id: UserId, text: &str) -> Result<()> {
        if self.failing {
            bail!("bot was blocked by the user");
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((owner_id, text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEditor {
    edits: Mutex<Vec<(i32, String)>>,
    failing: bool,
}

impl RecordingEditor {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn edits(&self) -> Vec<(i32, String)> {
        self.edits.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl PostEditor for RecordingEditor {
    async fn edit(&self, post: &Post, text: &str) -> Result<()> {
        self.edits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((post.message_id, text.to_string()));
        if self.failing {
            bail!("message is not modified");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct StaticFetcher {
    files: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(id, body)| ((*id).to_string(), body.as_bytes().to_vec()))
                .collect(),
        }
    }
}

#[async_trait]
impl AttachmentFetcher for StaticFetcher {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>> {
        self.files
            .get(file_id)
            .cloned()
            .ok_or_else(|| anyhow!("file {file_id} not found"))
    }
}

/// Answers `true` only for the listed URLs.
pub struct StaticProber {
    reachable: HashSet<String>,
}

impl StaticProber {
    pub fn new(reachable: &[&str]) -> Self {
        Self {
            reachable: reachable.iter().map(|u| (*u).to_string()).collect(),
        }
    }
}

#[async_trait]
impl LinkProber for StaticProber {
    async fn reachable(&self, url: &str) -> bool {
        self.reachable.contains(url)
    }
}

/// Counts probes and answers `true` for https after an optional delay.
#[derive(Default)]
pub struct CountingProber {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingProber {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkProber for CountingProber {
    async fn reachable(&self, url: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        url.starts_with("https://")
    }
}
