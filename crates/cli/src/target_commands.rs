//! CLI subcommands for webhook targets.

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    postrelay_common::types::{ChannelId, NewTarget},
    postrelay_store::SqliteTargetStore,
};

#[derive(Subcommand)]
pub enum TargetAction {
    /// Add a webhook target to a channel.
    Add {
        #[arg(long, allow_negative_numbers = true)]
        channel: ChannelId,
        /// Webhook URL; each URL may be used by one target only.
        #[arg(long)]
        webhook: String,
        #[arg(long)]
        name: String,
        /// Forward only posts containing this key; the key is removed from the text.
        #[arg(long)]
        key: Option<String>,
        /// Text prepended to forwarded messages.
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Change fields of an existing target.
    Update {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        webhook: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// New routing key; pass an empty string to clear it.
        #[arg(long)]
        key: Option<String>,
        /// New prefix; pass an empty string to clear it.
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Remove a target from a channel.
    Remove {
        #[arg(long)]
        id: i64,
        #[arg(long, allow_negative_numbers = true)]
        channel: ChannelId,
    },
    /// List targets of a channel.
    List {
        #[arg(long, allow_negative_numbers = true)]
        channel: ChannelId,
    },
}

pub async fn handle_targets(action: &TargetAction, store: &SqliteTargetStore) -> Result<()> {
    match action {
        TargetAction::Add {
            channel,
            webhook,
            name,
            key,
            prefix,
        } => {
            if !store.channel_exists(*channel).await? {
                bail!("channel {channel} is not registered");
            }
            let new = NewTarget {
                channel_id: *channel,
                webhook: webhook.clone(),
                name: name.clone(),
                key: key.clone(),
                prefix: prefix.clone(),
            };
            match store.add_target(new).await? {
                Some(target) => println!("Target {} '{}' added.", target.id, target.name),
                None => bail!("webhook is already used by another target"),
            }
        },
        TargetAction::Update {
            id,
            webhook,
            name,
            key,
            prefix,
        } => {
            let Some(mut target) = store.get_target(*id).await? else {
                bail!("target {id} not found");
            };
            if let Some(webhook) = webhook {
                if *webhook != target.webhook && store.webhook_exists(webhook).await? {
                    bail!("webhook is already used by another target");
                }
                target.webhook = webhook.clone();
            }
            if let Some(name) = name {
                target.name = name.clone();
            }
            if let Some(key) = key {
                target.key = Some(key.clone()).filter(|k| !k.is_empty());
            }
            if let Some(prefix) = prefix {
                target.prefix = Some(prefix.clone()).filter(|p| !p.is_empty());
            }
            if !store.update_target(&target).await? {
                bail!("target {id} not found");
            }
            println!("Target {id} updated.");
        },
        TargetAction::Remove { id, channel } => {
            if !store.remove_target(*id, *channel).await? {
                bail!("target {id} not found in channel {channel}");
            }
            println!("Target {id} removed.");
        },
        TargetAction::List { channel } => {
            let targets = store.targets_for(*channel).await?;
            if targets.is_empty() {
                println!("No targets for channel {channel}.");
            }
            for t in &targets {
                println!(
                    "  {:>4}  {}  {}  key={}  prefix={}",
                    t.id,
                    t.name,
                    t.webhook,
                    t.key.as_deref().unwrap_or("-"),
                    t.prefix.as_deref().unwrap_or("-"),
                );
            }
        },
    }
    Ok(())
}
