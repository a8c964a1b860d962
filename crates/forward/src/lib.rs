//! The forwarding pipeline.
//!
//! A channel post flows through three stages:
//!
//! 1. [`LinkRewriter`] turns the raw text into display text: bare links get a
//!    probed scheme and angle brackets, routing keys are stripped.
//! 2. [`PostAggregator`] folds posts of one media group into a single batch,
//!    released only by the group's leader (the lowest message id).
//! 3. [`Dispatcher`] filters the channel's targets by routing key and POSTs
//!    the batch to each webhook, telling the owner about failures.
//!
//! [`Forwarder`] wires the stages to the external collaborators declared in
//! [`traits`].

pub mod aggregator;
pub mod dispatch;
pub mod error;
pub mod links;
pub mod pipeline;
pub mod traits;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_support;

pub use {
    aggregator::PostAggregator,
    dispatch::{Attachment, DispatchReport, Dispatcher, TargetOutcome, TargetReport, WebhookClient},
    error::{Error, Result},
    links::{HttpProber, LinkProber, LinkRewriter, Rewrite},
    pipeline::{Collaborators, Forwarder, Outcome},
    traits::{AttachmentFetcher, OwnerNotifier, PostEditor, TargetStore},
};
