//! Conversion of channel posts into pipeline [`Post`]s.

use {
    postrelay_common::types::{EntityKind, LinkEntity, PhotoVariant, Post, TextSource},
    teloxide::types::{Message, MessageEntity, MessageEntityKind, PhotoSize},
};

fn entity_kind(kind: &MessageEntityKind) -> EntityKind {
    match kind {
        MessageEntityKind::Url => EntityKind::Url,
        MessageEntityKind::TextLink { .. } => EntityKind::TextLink,
        MessageEntityKind::Mention => EntityKind::Mention,
        MessageEntityKind::Hashtag => EntityKind::Hashtag,
        _ => EntityKind::Other,
    }
}

fn link_entity(entity: &MessageEntity) -> LinkEntity {
    LinkEntity {
        kind: entity_kind(&entity.kind),
        offset: entity.offset,
        length: entity.length,
    }
}

fn photo_variant(size: &PhotoSize) -> PhotoVariant {
    PhotoVariant {
        file_id: size.file.id.clone(),
        width: size.width,
        height: size.height,
        file_size: Some(size.file.size).filter(|s| *s != u32::MAX),
    }
}

/// Build a [`Post`] from a channel message.
///
/// Text messages use their text and entities; anything else uses its
/// caption, which may be empty.
pub fn post_from_message(msg: &Message) -> Post {
    let (text, entities, text_source) = match msg.text() {
        Some(text) => (text, msg.entities(), TextSource::Text),
        None => (
            msg.caption().unwrap_or_default(),
            msg.caption_entities(),
            TextSource::Caption,
        ),
    };

    Post {
        channel_id: msg.chat.id.0,
        message_id: msg.id.0,
        group_id: msg.media_group_id().map(String::from),
        text: text.to_string(),
        text_source,
        entities: entities
            .unwrap_or_default()
            .iter()
            .map(link_entity)
            .collect(),
        photo: msg
            .photo()
            .unwrap_or_default()
            .iter()
            .map(photo_variant)
            .collect(),
    }
}
