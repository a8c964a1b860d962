//! Channel registration driven by the bot's own membership changes.
//!
//! Promoting the bot to administrator registers the channel for its creator,
//! provided the creator already registered as an owner. Removing the bot
//! deletes the channel together with its targets.

use {
    postrelay_common::types::{Channel, ChannelId, UserId},
    teloxide::{
        prelude::*,
        types::{ChatMemberKind, ChatMemberUpdated, UserId as TgUserId},
    },
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    handlers::HandlerContext,
};

/// What a membership update did to the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Not a member before, administrator now.
    Promoted,
    /// Administrator before, not a member now.
    Removed,
    Other,
}

/// Outcome of handling a membership update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Added { channel_id: ChannelId, owner_id: UserId },
    AlreadyKnown,
    /// The promoting user does not own the channel; the bot left it.
    Rejected { user_id: UserId },
    /// The promoting user never registered as an owner.
    UnknownOwner { user_id: UserId },
    Removed { channel_id: ChannelId, owner_id: UserId },
    Ignored,
}

impl Transition {
    /// Classify a change of the bot's own status.
    #[must_use]
    pub fn between(old: &ChatMemberKind, new: &ChatMemberKind) -> Self {
        if !old.is_present() && new.is_privileged() {
            Self::Promoted
        } else if old.is_privileged() && !new.is_present() {
            Self::Removed
        } else {
            Self::Other
        }
    }
}

/// A `my_chat_member` update reduced to what registration needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub chat_id: ChannelId,
    pub title: String,
    pub is_channel: bool,
    pub from_id: UserId,
    pub transition: Transition,
}

impl MembershipChange {
    pub fn from_update(update: &ChatMemberUpdated) -> Result<Self> {
        let from_id = i64::try_from(update.from.id.0)
            .map_err(|_| Error::message(format!("invalid user id {}", update.from.id.0)))?;
        Ok(Self {
            chat_id: update.chat.id.0,
            title: update.chat.title().unwrap_or_default().to_string(),
            is_channel: update.chat.is_channel(),
            from_id,
            transition: Transition::between(
                &update.old_chat_member.kind,
                &update.new_chat_member.kind,
            ),
        })
    }
}

/// Apply a membership change of the bot.
pub async fn handle_membership(
    ctx: &HandlerContext,
    change: &MembershipChange,
) -> Result<Registration> {
    if !change.is_channel {
        debug!(chat_id = change.chat_id, "membership change outside a channel ignored");
        return Ok(Registration::Ignored);
    }
    match change.transition {
        Transition::Promoted => register(ctx, change).await,
        Transition::Removed => unregister(ctx, change).await,
        Transition::Other => Ok(Registration::Ignored),
    }
}

async fn register(ctx: &HandlerContext, change: &MembershipChange) -> Result<Registration> {
    let user_id = change.from_id;
    let chat = ChatId(change.chat_id);

    let tg_user = u64::try_from(user_id)
        .map(TgUserId)
        .map_err(|_| Error::message(format!("invalid user id {user_id}")))?;
    let member = ctx.bot.get_chat_member(chat, tg_user).await?;
    if !member.kind.is_owner() {
        warn!(
            chat_id = change.chat_id,
            user_id, "promoted by a non-creator, leaving channel"
        );
        ctx.bot.leave_chat(chat).await?;
        notify(
            ctx,
            user_id,
            &format!(
                "Notification\nCan't add channel '{}' - you are not owner",
                change.title
            ),
        )
        .await;
        return Ok(Registration::Rejected { user_id });
    }

    if !ctx.store.owner_exists(user_id).await? {
        debug!(chat_id = change.chat_id, user_id, "creator is not a registered owner");
        return Ok(Registration::UnknownOwner { user_id });
    }

    let added = ctx
        .store
        .add_channel(Channel {
            id: change.chat_id,
            owner_id: user_id,
        })
        .await?;
    if !added {
        return Ok(Registration::AlreadyKnown);
    }

    info!(chat_id = change.chat_id, owner_id = user_id, title = %change.title, "channel added");
    notify(
        ctx,
        user_id,
        &format!("Notification\nChannel '{}' added", change.title),
    )
    .await;
    Ok(Registration::Added {
        channel_id: change.chat_id,
        owner_id: user_id,
    })
}

async fn unregister(ctx: &HandlerContext, change: &MembershipChange) -> Result<Registration> {
    let mut owner_id = change.from_id;
    if owner_id == ctx.bot_id {
        match ctx.store.owner_for(change.chat_id).await? {
            Some(id) => owner_id = id,
            None => return Ok(Registration::Ignored),
        }
    }

    if !ctx.store.check_ownership(change.chat_id, owner_id).await? {
        debug!(chat_id = change.chat_id, owner_id, "removal by a non-owner ignored");
        return Ok(Registration::Ignored);
    }

    ctx.store.remove_channels(&[change.chat_id]).await?;
    info!(chat_id = change.chat_id, owner_id, title = %change.title, "channel removed");
    notify(
        ctx,
        owner_id,
        &format!("Notification\nBot left channel '{}'", change.title),
    )
    .await;
    Ok(Registration::Removed {
        channel_id: change.chat_id,
        owner_id,
    })
}

async fn notify(ctx: &HandlerContext, user_id: UserId, text: &str) {
    if let Err(e) = ctx.bot.send_message(ChatId(user_id), text).await {
        warn!(user_id, error = %e, "failed to notify user");
    }
}
