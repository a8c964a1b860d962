//! End-to-end handling of one channel post.

use std::sync::Arc;

use {
    postrelay_common::types::{ChannelId, Post},
    postrelay_config::ForwardConfig,
    tracing::{debug, instrument, warn},
};

#[cfg(feature = "metrics")]
use postrelay_metrics::{counter, forward as fwd_metrics, labels};

use crate::{
    aggregator::PostAggregator,
    dispatch::{DispatchReport, Dispatcher, WebhookClient},
    error::{Error, Result},
    links::{HttpProber, LinkProber, LinkRewriter, Rewrite},
    traits::{AttachmentFetcher, OwnerNotifier, PostEditor, TargetStore},
};

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn TargetStore>,
    pub notifier: Arc<dyn OwnerNotifier>,
    pub editor: Arc<dyn PostEditor>,
    pub fetcher: Arc<dyn AttachmentFetcher>,
}

/// Result of handling a single post.
#[derive(Debug)]
pub enum Outcome {
    /// This post released a batch and it was fanned out.
    Dispatched(DispatchReport),
    /// The text consisted of routing keys only and there was no image.
    NoPayload,
    /// Another post of the same media group leads the batch.
    Follower,
}

pub struct Forwarder {
    store: Arc<dyn TargetStore>,
    editor: Arc<dyn PostEditor>,
    rewriter: LinkRewriter,
    aggregator: PostAggregator,
    dispatcher: Dispatcher,
}

impl Forwarder {
    /// Build the pipeline with an HTTP link prober.
    pub fn new(config: &ForwardConfig, deps: Collaborators) -> Result<Self> {
        let prober = HttpProber::new(config.probe_timeout(), &config.user_agent)?;
        Self::with_prober(config, deps, Arc::new(prober))
    }

    pub fn with_prober(
        config: &ForwardConfig,
        deps: Collaborators,
        prober: Arc<dyn LinkProber>,
    ) -> Result<Self> {
        let client = WebhookClient::new(config.delivery_timeout(), &config.user_agent)?;
        Ok(Self {
            aggregator: PostAggregator::new(config)?,
            rewriter: LinkRewriter::new(prober),
            dispatcher: Dispatcher::new(
                Arc::clone(&deps.store),
                deps.fetcher,
                deps.notifier,
                client,
            ),
            store: deps.store,
            editor: deps.editor,
        })
    }

    /// Rewrite, edit in place, aggregate and dispatch one post.
    ///
    /// Runs concurrently with other posts; the call made by a media group's
    /// follower returns once the group's leader has been decided.
    #[instrument(skip_all, fields(channel_id = post.channel_id, message_id = post.message_id))]
    pub async fn handle(&self, post: Post) -> Result<Outcome> {
        #[cfg(feature = "metrics")]
        counter!(fwd_metrics::POSTS_RECEIVED_TOTAL).increment(1);

        let channel_id = post.channel_id;
        let message_id = post.message_id;

        let keys = self.routing_keys(channel_id).await?;
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let rewrite = self
            .rewriter
            .rewrite(&post.text, &post.entities, &keys)
            .await;

        if rewrite.is_empty_payload() {
            if !post.has_attachments() {
                debug!("post carries routing keys only, not forwarding");
                #[cfg(feature = "metrics")]
                counter!(fwd_metrics::SUPPRESSED_TOTAL, labels::REASON => "no_payload")
                    .increment(1);
                return Ok(Outcome::NoPayload);
            }
        } else if rewrite.changed() {
            self.edit_live(&post, &rewrite.edited).await;
        }

        let Some(mut batch) = self.aggregator.submit(post).await else {
            debug!("not the group leader");
            #[cfg(feature = "metrics")]
            counter!(fwd_metrics::SUPPRESSED_TOTAL, labels::REASON => "follower").increment(1);
            return Ok(Outcome::Follower);
        };

        #[cfg(feature = "metrics")]
        counter!(fwd_metrics::BATCHES_TOTAL).increment(1);

        batch.sort_by_key(|p| p.message_id);
        let rewrite = self.batch_text(&batch, message_id, rewrite, &keys).await;
        let report = self
            .dispatcher
            .dispatch(channel_id, &rewrite.edited, &rewrite.original, &batch)
            .await?;
        Ok(Outcome::Dispatched(report))
    }

    async fn routing_keys(&self, channel_id: ChannelId) -> Result<Vec<String>> {
        let targets = self
            .store
            .targets_for(channel_id)
            .await
            .map_err(|e| Error::external("failed to load targets", e))?;
        let mut keys: Vec<String> = targets
            .iter()
            .filter_map(|t| t.routing_key().map(String::from))
            .collect();
        // Longest first, so a key that contains another is removed whole.
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        keys.dedup();
        Ok(keys)
    }

    async fn edit_live(&self, post: &Post, text: &str) {
        if let Err(e) = self.editor.edit(post, text).await {
            warn!(error = %e, "failed to edit post in place");
        }
    }

    /// Text for the whole batch. Albums usually carry the caption on their
    /// first item, but when the leader has none the first captioned member
    /// provides it.
    async fn batch_text(
        &self,
        batch: &[Post],
        leader_id: i32,
        leader: Rewrite,
        keys: &[&str],
    ) -> Rewrite {
        if !leader.original.is_empty() {
            return leader;
        }
        let captioned = batch
            .iter()
            .find(|p| p.message_id != leader_id && !p.text.trim().is_empty());
        match captioned {
            Some(post) => {
                self.rewriter
                    .rewrite(&post.text, &post.entities, keys)
                    .await
            },
            None => leader,
        }
    }
}
