//! CLI subcommands for owners and monitored channels.

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    postrelay_common::types::{Channel, ChannelId, UserId},
    postrelay_store::SqliteTargetStore,
};

#[derive(Subcommand)]
pub enum OwnerAction {
    /// Allow a Telegram user to register channels by promoting the bot.
    Add {
        /// Telegram user id of the owner.
        user_id: UserId,
    },
    /// Remove an owner along with every channel and target they own.
    Remove { user_id: UserId },
}

#[derive(Subcommand)]
pub enum ChannelAction {
    /// Register a channel for an existing owner.
    Add {
        /// Channel chat id (usually negative, e.g. -1001234567890).
        #[arg(long, allow_negative_numbers = true)]
        id: ChannelId,
        #[arg(long)]
        owner: UserId,
    },
    /// Remove a channel and its targets.
    Remove {
        #[arg(allow_negative_numbers = true)]
        id: ChannelId,
    },
    /// List monitored channels.
    List {
        /// Only channels of this owner.
        #[arg(long)]
        owner: Option<UserId>,
    },
}

pub async fn handle_owners(action: &OwnerAction, store: &SqliteTargetStore) -> Result<()> {
    match action {
        OwnerAction::Add { user_id } => {
            let owner = Channel {
                id: *user_id,
                owner_id: *user_id,
            };
            if store.add_channel(owner).await? {
                println!("Owner {user_id} added.");
            } else {
                println!("Owner {user_id} already registered.");
            }
        },
        OwnerAction::Remove { user_id } => {
            let owned: Vec<ChannelId> = store
                .owned_channels(*user_id)
                .await?
                .into_iter()
                .map(|c| c.id)
                .collect();
            if owned.is_empty() {
                println!("Owner {user_id} has nothing registered.");
                return Ok(());
            }
            let removed = store.remove_channels(&owned).await?;
            println!("Owner {user_id} removed ({removed} row(s), targets included).");
        },
    }
    Ok(())
}

pub async fn handle_channels(action: &ChannelAction, store: &SqliteTargetStore) -> Result<()> {
    match action {
        ChannelAction::Add { id, owner } => {
            if !store.owner_exists(*owner).await? {
                bail!("unknown owner {owner}; run `postrelay owners add {owner}` first");
            }
            let channel = Channel {
                id: *id,
                owner_id: *owner,
            };
            if store.add_channel(channel).await? {
                println!("Channel {id} added.");
            } else {
                println!("Channel {id} already registered.");
            }
        },
        ChannelAction::Remove { id } => {
            if store.remove_channels(&[*id]).await? == 0 {
                bail!("channel {id} is not registered");
            }
            println!("Channel {id} removed.");
        },
        ChannelAction::List { owner } => {
            let channels = match owner {
                Some(owner) => store.owned_channels(*owner).await?,
                None => store.list_channels().await?,
            };
            let channels: Vec<_> = channels.into_iter().filter(|c| c.id != c.owner_id).collect();
            if channels.is_empty() {
                println!("No channels registered.");
            }
            for channel in &channels {
                println!("  {:>16}  owner {}", channel.id, channel.owner_id);
            }
        },
    }
    Ok(())
}
