//! Collaborators the pipeline consumes but does not implement.

use {
    anyhow::Result,
    async_trait::async_trait,
    postrelay_common::types::{ChannelId, Post, Target, UserId},
};

/// Read side of the target registry.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Delivery targets of a channel, in delivery order.
    async fn targets_for(&self, channel_id: ChannelId) -> Result<Vec<Target>>;

    /// The user owning the channel, if registered.
    async fn owner_for(&self, channel_id: ChannelId) -> Result<Option<UserId>>;
}

/// Sends a plain text message to a channel owner.
#[async_trait]
pub trait OwnerNotifier: Send + Sync {
    async fn notify(&self, owner_id: UserId, text: &str) -> Result<()>;
}

/// Replaces the text (or caption) of a published post.
#[async_trait]
pub trait PostEditor: Send + Sync {
    async fn edit(&self, post: &Post, text: &str) -> Result<()>;
}

/// Downloads the bytes of an attached file.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>>;
}
