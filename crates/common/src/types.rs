//! Domain types shared by the forwarding core, the store and the transport
//! adapters.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Chat identifier of a monitored channel (Telegram channel ids are negative).
pub type ChannelId = i64;

/// Message identifier, unique within a channel.
pub type MessageId = i32;

/// User identifier of a channel owner.
pub type UserId = i64;

/// Kind of a text entity attached to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A bare link typed into the text (`example.com`, `https://x.y`).
    Url,
    /// A link hidden behind display text.
    TextLink,
    Mention,
    Hashtag,
    #[serde(other)]
    Other,
}

/// A text entity. `offset` and `length` are measured in UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

impl LinkEntity {
    #[must_use]
    pub fn url(offset: usize, length: usize) -> Self {
        Self {
            kind: EntityKind::Url,
            offset,
            length,
        }
    }
}

/// One resolution of an attached image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoVariant {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub file_size: Option<u32>,
}

impl PhotoVariant {
    fn rank(&self) -> (u64, u32) {
        (
            u64::from(self.width) * u64::from(self.height),
            self.file_size.unwrap_or(0),
        )
    }
}

/// Where the text of a post lives, which decides how it is edited in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    #[default]
    Text,
    Caption,
}

/// A channel post, reduced to the fields the forwarding pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    /// Media group identifier shared by posts sent together.
    pub group_id: Option<String>,
    pub text: String,
    pub text_source: TextSource,
    pub entities: Vec<LinkEntity>,
    /// Image variants of the attached photo, if any.
    pub photo: Vec<PhotoVariant>,
}

impl Post {
    /// A text-only post with no entities.
    #[must_use]
    pub fn text(channel_id: ChannelId, message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            channel_id,
            message_id,
            group_id: None,
            text: text.into(),
            text_source: TextSource::Text,
            entities: Vec::new(),
            photo: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    #[must_use]
    pub fn with_entities(mut self, entities: Vec<LinkEntity>) -> Self {
        self.entities = entities;
        self
    }

    /// Attach photo variants; the text becomes a caption.
    #[must_use]
    pub fn with_photo(mut self, photo: Vec<PhotoVariant>) -> Self {
        self.photo = photo;
        self.text_source = TextSource::Caption;
        self
    }

    #[must_use]
    pub fn has_attachments(&self) -> bool {
        !self.photo.is_empty()
    }

    /// The highest-resolution image variant, ties broken by file size.
    #[must_use]
    pub fn largest_photo(&self) -> Option<&PhotoVariant> {
        self.photo.iter().max_by_key(|p| p.rank())
    }
}

/// A monitored channel and the user who owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub owner_id: UserId,
}

/// A webhook destination configured for a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub channel_id: ChannelId,
    pub webhook: String,
    pub name: String,
    /// Routing key that must appear in the original post text.
    pub key: Option<String>,
    /// Text prepended to every forwarded message.
    pub prefix: Option<String>,
}

impl Target {
    /// The routing key, ignoring empty values.
    #[must_use]
    pub fn routing_key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }

    /// Whether this target wants a post whose unmodified text is `original`.
    #[must_use]
    pub fn accepts(&self, original: &str) -> bool {
        self.routing_key().is_none_or(|key| original.contains(key))
    }

    /// Outgoing message content for this target.
    #[must_use]
    pub fn render(&self, text: &str) -> String {
        match self.prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{prefix} {text}"),
            None => text.to_string(),
        }
    }
}

/// Fields supplied when registering a new target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewTarget {
    pub channel_id: ChannelId,
    pub webhook: String,
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

impl NewTarget {
    /// Normalize optional fields and reject unusable values.
    pub fn validate(mut self) -> Result<Self> {
        self.webhook = self.webhook.trim().to_string();
        self.name = self.name.trim().to_string();
        if !(self.webhook.starts_with("https://") || self.webhook.starts_with("http://")) {
            return Err(Error::invalid(
                "webhook",
                format!("'{}' is not an http(s) URL", self.webhook),
            ));
        }
        if self.name.is_empty() {
            return Err(Error::invalid("name", "must not be empty"));
        }
        self.key = self.key.filter(|k| !k.trim().is_empty());
        self.prefix = self.prefix.filter(|p| !p.trim().is_empty());
        Ok(self)
    }
}
