//! Telegram front end for postrelay.
//!
//! Long-polls the Bot API for channel posts and the bot's own membership
//! changes, feeds posts from registered channels into the forwarding
//! pipeline and implements the pipeline's Telegram-side collaborators.

pub mod bot;
pub mod convert;
pub mod error;
pub mod handlers;
pub mod membership;
pub mod outbound;

pub use {
    bot::{PollingHandle, build_bot, start, start_polling},
    error::{Error, Result},
    handlers::HandlerContext,
    outbound::TelegramOutbound,
};
