//! Metric name and label definitions.
//!
//! Every metric emitted by postrelay is named here so dashboards have a single
//! place to look.

/// Forwarding pipeline metrics
pub mod forward {
    /// Channel posts entering the pipeline
    pub const POSTS_RECEIVED_TOTAL: &str = "postrelay_forward_posts_received_total";
    /// Batches released by the aggregator (singletons included)
    pub const BATCHES_TOTAL: &str = "postrelay_forward_batches_total";
    /// Posts dropped on purpose (labelled by reason: follower, no_payload)
    pub const SUPPRESSED_TOTAL: &str = "postrelay_forward_suppressed_total";
    /// Pending media groups currently buffered
    pub const PENDING_GROUPS: &str = "postrelay_forward_pending_groups";
    /// Link reachability probes (labelled by result: ok, failed)
    pub const PROBES_TOTAL: &str = "postrelay_forward_probes_total";
    /// Webhook deliveries (labelled by result: ok, rejected, failed, skipped)
    pub const DELIVERIES_TOTAL: &str = "postrelay_forward_deliveries_total";
    /// Webhook delivery duration in seconds
    pub const DELIVERY_DURATION_SECONDS: &str = "postrelay_forward_delivery_duration_seconds";
    /// Owner notifications sent after a failed delivery
    pub const OWNER_NOTIFICATIONS_TOTAL: &str = "postrelay_forward_owner_notifications_total";
}

/// Telegram transport metrics
pub mod telegram {
    /// Updates received from getUpdates
    pub const UPDATES_RECEIVED_TOTAL: &str = "postrelay_telegram_updates_received_total";
    /// Channel posts ignored because the channel is not registered
    pub const UNREGISTERED_POSTS_TOTAL: &str = "postrelay_telegram_unregistered_posts_total";
    /// Live post edits attempted (labelled by result: ok, failed)
    pub const POST_EDITS_TOTAL: &str = "postrelay_telegram_post_edits_total";
    /// Polling errors
    pub const POLLING_ERRORS_TOTAL: &str = "postrelay_telegram_polling_errors_total";
}

/// Common label keys
pub mod labels {
    pub const RESULT: &str = "result";
    pub const REASON: &str = "reason";
}

/// Histogram bucket boundaries
pub mod buckets {
    /// Webhook delivery duration buckets (in seconds), 10ms to 30s
    pub const DELIVERY_DURATION: &[f64] = &[
        0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0,
    ];
}
