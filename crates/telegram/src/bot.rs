use std::{sync::Arc, time::Duration};

use {
    postrelay_config::{ForwardConfig, TelegramConfig},
    postrelay_forward::{Collaborators, Forwarder},
    postrelay_store::SqliteTargetStore,
    secrecy::ExposeSecret,
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::{AllowedUpdate, UpdateKind},
    },
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use postrelay_metrics::{counter, telegram as tg_metrics};

use crate::{
    handlers::{self, HandlerContext},
    membership::{self, MembershipChange},
    outbound::TelegramOutbound,
};

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A running polling loop.
pub struct PollingHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollingHandle {
    /// Token that stops the loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "telegram polling task panicked");
        }
    }
}

/// Build a bot whose HTTP client outlives the long-polling timeout.
pub fn build_bot(config: &TelegramConfig) -> anyhow::Result<Bot> {
    let timeout = Duration::from_secs(u64::from(config.poll_timeout_secs) + 15);
    let client = teloxide::net::default_reqwest_settings()
        .timeout(timeout)
        .build()?;
    Ok(Bot::with_client(config.token.expose_secret(), client))
}

/// Connect the bot, wire up the forwarding pipeline and start polling.
pub async fn start(
    telegram: &TelegramConfig,
    forward: &ForwardConfig,
    store: SqliteTargetStore,
) -> anyhow::Result<PollingHandle> {
    let bot = build_bot(telegram)?;

    let me = bot.get_me().await?;
    bot.delete_webhook().send().await?;
    let bot_id = i64::try_from(me.id.0)?;
    info!(bot_id, username = ?me.username, "telegram bot connected (webhook cleared)");

    let outbound = Arc::new(TelegramOutbound::new(
        bot.clone(),
        forward.delivery_timeout(),
    )?);
    let deps = Collaborators {
        store: Arc::new(store.clone()),
        notifier: outbound.clone(),
        editor: outbound.clone(),
        fetcher: outbound,
    };
    let ctx = HandlerContext {
        bot: bot.clone(),
        bot_id,
        store,
        forwarder: Arc::new(Forwarder::new(forward, deps)?),
    };

    if let Some(admin) = telegram.admin_user_id
        && let Err(e) = bot.send_message(ChatId(admin), "postrelay started").await
    {
        warn!(admin, error = %e, "failed to send startup notice");
    }

    Ok(start_polling(ctx, telegram.poll_timeout_secs))
}

/// Spawn the `getUpdates` loop.
///
/// Each channel post is handled on its own task so that media group members
/// can wait for each other. The loop ends when cancelled or when another
/// instance starts polling with the same token.
pub fn start_polling(ctx: HandlerContext, poll_timeout_secs: u32) -> PollingHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        info!("starting telegram polling loop");
        let mut offset: i32 = 0;

        loop {
            let result = tokio::select! {
                () = token.cancelled() => break,
                result = ctx
                    .bot
                    .get_updates()
                    .offset(offset)
                    .timeout(poll_timeout_secs)
                    .allowed_updates(vec![AllowedUpdate::ChannelPost, AllowedUpdate::MyChatMember])
                    .send() => result,
            };

            match result {
                Ok(updates) => {
                    debug!(count = updates.len(), "got telegram updates");
                    for update in updates {
                        offset = update.id.as_offset();
                        dispatch_update(&ctx, update.kind);
                    }
                },
                Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                    warn!("telegram polling disabled: another instance is running with this token");
                    token.cancel();
                    break;
                },
                Err(e) => {
                    #[cfg(feature = "metrics")]
                    counter!(tg_metrics::POLLING_ERRORS_TOTAL).increment(1);
                    warn!(error = %e, "telegram getUpdates failed");
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(RETRY_DELAY) => {},
                    }
                },
            }
        }
        info!("telegram polling stopped");
    });

    PollingHandle { cancel, task }
}

fn dispatch_update(ctx: &HandlerContext, kind: UpdateKind) {
    #[cfg(feature = "metrics")]
    counter!(tg_metrics::UPDATES_RECEIVED_TOTAL).increment(1);

    match kind {
        UpdateKind::ChannelPost(msg) => {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = handlers::handle_channel_post(&ctx, &msg).await {
                    error!(
                        channel_id = msg.chat.id.0,
                        message_id = msg.id.0,
                        error = %e,
                        "error handling channel post"
                    );
                }
            });
        },
        UpdateKind::MyChatMember(update) => {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let result = match MembershipChange::from_update(&update) {
                    Ok(change) => membership::handle_membership(&ctx, &change).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(registration) => debug!(?registration, "membership change handled"),
                    Err(e) => error!(
                        chat_id = update.chat.id.0,
                        error = %e,
                        "error handling membership change"
                    ),
                }
            });
        },
        other => debug!("ignoring update: {other:?}"),
    }
}
