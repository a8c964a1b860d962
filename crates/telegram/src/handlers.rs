use std::sync::Arc;

use {
    postrelay_common::types::UserId,
    postrelay_forward::{Forwarder, Outcome},
    postrelay_store::SqliteTargetStore,
    teloxide::{prelude::*, types::Message},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use postrelay_metrics::{counter, telegram as tg_metrics};

use crate::{convert::post_from_message, error::Result};

/// Everything an update handler needs.
#[derive(Clone)]
pub struct HandlerContext {
    pub bot: Bot,
    /// Id of the bot account itself.
    pub bot_id: UserId,
    pub store: SqliteTargetStore,
    pub forwarder: Arc<Forwarder>,
}

/// Handle a post published in a channel.
///
/// Posts from channels that were never registered are dropped. Returns the
/// pipeline outcome for registered channels.
pub async fn handle_channel_post(ctx: &HandlerContext, msg: &Message) -> Result<Option<Outcome>> {
    let channel_id = msg.chat.id.0;
    if !ctx.store.channel_exists(channel_id).await? {
        debug!(channel_id, "post from unregistered channel ignored");
        #[cfg(feature = "metrics")]
        counter!(tg_metrics::UNREGISTERED_POSTS_TOTAL).increment(1);
        return Ok(None);
    }

    let post = post_from_message(msg);
    let outcome = ctx.forwarder.handle(post).await?;
    match &outcome {
        Outcome::Dispatched(report) => {
            let failed = report.failed();
            if failed > 0 {
                warn!(
                    channel_id,
                    message_id = msg.id.0,
                    delivered = report.delivered(),
                    failed,
                    "post forwarded with failures"
                );
            } else {
                info!(
                    channel_id,
                    message_id = msg.id.0,
                    delivered = report.delivered(),
                    attachments = report.attachments,
                    "post forwarded"
                );
            }
        },
        Outcome::NoPayload => debug!(channel_id, "post had nothing to forward"),
        Outcome::Follower => debug!(channel_id, "post forwarded by its group leader"),
    }
    Ok(Some(outcome))
}
