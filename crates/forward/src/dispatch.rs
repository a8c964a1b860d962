//! Webhook fan-out for a released batch.

use std::{sync::Arc, time::Duration};

use {
    postrelay_common::types::{ChannelId, Post, Target, UserId},
    reqwest::multipart::{Form, Part},
    serde::Serialize,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use {
    postrelay_metrics::{counter, forward as fwd_metrics, histogram, labels},
    std::time::Instant,
};

use crate::{
    error::{Error, Result},
    traits::{AttachmentFetcher, OwnerNotifier, TargetStore},
};

/// A downloaded image ready to be attached as a multipart field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Form field name, `file1` .. `fileN`.
    pub field: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.jpg", self.field)
    }
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetOutcome {
    Delivered { status: u16 },
    /// The routing key was not in the original text.
    Skipped,
    /// The webhook answered with a non-2xx status.
    Rejected { status: u16 },
    /// No response: connection error or timeout.
    Failed { reason: String },
}

impl TargetOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Failed { .. })
    }

    #[cfg(feature = "metrics")]
    fn label(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "ok",
            Self::Skipped => "skipped",
            Self::Rejected { .. } => "rejected",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub target_id: i64,
    pub name: String,
    pub outcome: TargetOutcome,
}

/// Per-target results of one dispatch, in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub attachments: usize,
    pub targets: Vec<TargetReport>,
}

impl DispatchReport {
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| matches!(t.outcome, TargetOutcome::Delivered { .. }))
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.targets.iter().filter(|t| t.outcome.is_failure()).count()
    }
}

/// HTTP side of a delivery.
pub struct WebhookClient {
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// POST `content` to `url`: multipart when there are attachments, JSON
    /// `{"content": ...}` otherwise.
    pub async fn deliver(
        &self,
        url: &str,
        content: &str,
        attachments: &[Attachment],
    ) -> TargetOutcome {
        let request = if attachments.is_empty() {
            self.client
                .post(url)
                .json(&serde_json::json!({ "content": content }))
        } else {
            match multipart_form(content, attachments) {
                Ok(form) => self.client.post(url).multipart(form),
                Err(e) => {
                    return TargetOutcome::Failed {
                        reason: e.to_string(),
                    };
                },
            }
        };

        match request.send().await {
            Ok(resp) if resp.status().is_success() => TargetOutcome::Delivered {
                status: resp.status().as_u16(),
            },
            Ok(resp) => TargetOutcome::Rejected {
                status: resp.status().as_u16(),
            },
            Err(e) if e.is_timeout() => TargetOutcome::Failed {
                reason: "request timed out".into(),
            },
            Err(e) => TargetOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }
}

fn multipart_form(content: &str, attachments: &[Attachment]) -> reqwest::Result<Form> {
    let mut form = Form::new().text("content", content.to_string());
    for attachment in attachments {
        let part = Part::bytes(attachment.bytes.clone())
            .file_name(attachment.file_name())
            .mime_str("image/jpeg")?;
        form = form.part(attachment.field.clone(), part);
    }
    Ok(form)
}

/// Filters a channel's targets and delivers a batch to each in turn.
pub struct Dispatcher {
    store: Arc<dyn TargetStore>,
    fetcher: Arc<dyn AttachmentFetcher>,
    notifier: Arc<dyn OwnerNotifier>,
    client: WebhookClient,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TargetStore>,
        fetcher: Arc<dyn AttachmentFetcher>,
        notifier: Arc<dyn OwnerNotifier>,
        client: WebhookClient,
    ) -> Self {
        Self {
            store,
            fetcher,
            notifier,
            client,
        }
    }

    /// Deliver `edited` and the batch's images to every matching target.
    ///
    /// Delivery failures never abort the loop; each one is reported to the
    /// channel owner. Only a failing target lookup is returned as an error.
    pub async fn dispatch(
        &self,
        channel_id: ChannelId,
        edited: &str,
        original: &str,
        batch: &[Post],
    ) -> Result<DispatchReport> {
        if edited.is_empty() && !batch.iter().any(Post::has_attachments) {
            debug!(channel_id, "nothing to dispatch");
            return Ok(DispatchReport::default());
        }

        let attachments = self.collect_attachments(channel_id, batch).await;
        if edited.is_empty() && attachments.is_empty() {
            warn!(channel_id, "no attachment could be downloaded, nothing to dispatch");
            return Ok(DispatchReport::default());
        }

        let targets = self
            .store
            .targets_for(channel_id)
            .await
            .map_err(|e| Error::external("failed to load targets", e))?;

        let mut report = DispatchReport {
            attachments: attachments.len(),
            targets: Vec::with_capacity(targets.len()),
        };
        let mut owner: Option<Option<UserId>> = None;

        for target in targets {
            let outcome = self.deliver_one(&target, edited, original, &attachments).await;

            #[cfg(feature = "metrics")]
            counter!(fwd_metrics::DELIVERIES_TOTAL, labels::RESULT => outcome.label()).increment(1);

            if outcome.is_failure() {
                if owner.is_none() {
                    owner = Some(self.lookup_owner(channel_id).await);
                }
                if let Some(Some(owner_id)) = owner {
                    self.notify_failure(owner_id, &target, &outcome).await;
                }
            }

            report.targets.push(TargetReport {
                target_id: target.id,
                name: target.name,
                outcome,
            });
        }

        info!(
            channel_id,
            delivered = report.delivered(),
            failed = report.failed(),
            attachments = report.attachments,
            "batch dispatched"
        );
        Ok(report)
    }

    async fn deliver_one(
        &self,
        target: &Target,
        edited: &str,
        original: &str,
        attachments: &[Attachment],
    ) -> TargetOutcome {
        if !target.accepts(original) {
            debug!(target = %target.name, "routing key absent, skipping target");
            return TargetOutcome::Skipped;
        }

        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let outcome = self
            .client
            .deliver(&target.webhook, &target.render(edited), attachments)
            .await;

        #[cfg(feature = "metrics")]
        histogram!(fwd_metrics::DELIVERY_DURATION_SECONDS).record(start.elapsed().as_secs_f64());

        match &outcome {
            TargetOutcome::Rejected { status } => {
                warn!(target = %target.name, status, "webhook rejected message");
            },
            TargetOutcome::Failed { reason } => {
                warn!(target = %target.name, reason = %reason, "webhook delivery failed");
            },
            _ => debug!(target = %target.name, "webhook delivered"),
        }
        outcome
    }

    /// Download the largest variant of every attached photo. Failed
    /// downloads are skipped; field numbering stays contiguous.
    async fn collect_attachments(&self, channel_id: ChannelId, batch: &[Post]) -> Vec<Attachment> {
        let mut attachments = Vec::new();
        for post in batch {
            let Some(photo) = post.largest_photo() else {
                continue;
            };
            match self.fetcher.fetch(&photo.file_id).await {
                Ok(bytes) => attachments.push(Attachment {
                    field: format!("file{}", attachments.len() + 1),
                    bytes,
                }),
                Err(e) => warn!(
                    channel_id,
                    message_id = post.message_id,
                    error = %e,
                    "failed to download attachment, skipping"
                ),
            }
        }
        attachments
    }

    async fn lookup_owner(&self, channel_id: ChannelId) -> Option<UserId> {
        match self.store.owner_for(channel_id).await {
            Ok(Some(owner)) => Some(owner),
            Ok(None) => {
                warn!(channel_id, "channel has no owner to notify");
                None
            },
            Err(e) => {
                warn!(channel_id, error = %e, "failed to look up channel owner");
                None
            },
        }
    }

    async fn notify_failure(&self, owner_id: UserId, target: &Target, outcome: &TargetOutcome) {
        let text = failure_notice(&target.name, outcome);
        match self.notifier.notify(owner_id, &text).await {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                counter!(fwd_metrics::OWNER_NOTIFICATIONS_TOTAL).increment(1);
            },
            Err(e) => warn!(owner_id, error = %e, "failed to notify owner"),
        }
    }
}

fn failure_notice(target: &str, outcome: &TargetOutcome) -> String {
    match outcome {
        TargetOutcome::Rejected { status } => {
            format!("Channel message wasn't forwarded to '{target}' - {status}")
        },
        _ => format!("Channel message wasn't forwarded to '{target}'"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::test_support::{
            MemoryStore, RecordingNotifier, StaticFetcher, photo_post, silent_server, target,
        },
        mockito::Matcher,
        serde_json::json,
    };

    const OWNER: UserId = 42;
    const CHANNEL: ChannelId = -100;

    fn dispatcher(
        store: MemoryStore,
        fetcher: StaticFetcher,
        notifier: &Arc<RecordingNotifier>,
    ) -> Dispatcher {
        Dispatcher::new(
            Arc::new(store),
            Arc::new(fetcher),
            notifier.clone(),
            WebhookClient::new(Duration::from_secs(5), "postrelay-test").unwrap(),
        )
    }

    #[tokio::test]
    async fn json_body_without_attachments() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/plain")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({ "content": "[news] hello" })))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let mut t = target(1, &format!("{}/plain", server.url()), None);
        t.prefix = Some("[news]".into());
        let store = MemoryStore::new(CHANNEL, OWNER, vec![t]);
        let notifier = Arc::new(RecordingNotifier::default());

        let batch = [Post::text(CHANNEL, 1, "hello")];
        let report = dispatcher(store, StaticFetcher::default(), &notifier)
            .dispatch(CHANNEL, "hello", "hello", &batch)
            .await
            .unwrap();

        hook.assert_async().await;
        assert_eq!(report.targets[0].outcome, TargetOutcome::Delivered { status: 204 });
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn multipart_with_numbered_jpeg_fields() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/album")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=".into()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="content""#.into()),
                Matcher::Regex("caption".into()),
                Matcher::Regex(r#"name="file1"; filename="file1.jpg""#.into()),
                Matcher::Regex(r#"name="file2"; filename="file2.jpg""#.into()),
                Matcher::Regex("(?i)content-type: image/jpeg".into()),
                Matcher::Regex("BIG-A".into()),
                Matcher::Regex("BIG-B".into()),
            ]))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let store = MemoryStore::new(CHANNEL, OWNER, vec![target(
            1,
            &format!("{}/album", server.url()),
            None,
        )]);
        let fetcher = StaticFetcher::new(&[("big-a", "BIG-A"), ("big-b", "BIG-B")]);
        let notifier = Arc::new(RecordingNotifier::default());

        let batch = [photo_post(1, "a"), photo_post(2, "b")];
        let report = dispatcher(store, fetcher, &notifier)
            .dispatch(CHANNEL, "caption", "caption", &batch)
            .await
            .unwrap();

        hook.assert_async().await;
        assert_eq!(report.attachments, 2);
        assert_eq!(report.delivered(), 1);
    }

    #[tokio::test]
    async fn failed_download_keeps_numbering_contiguous() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/album")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"filename="file1.jpg""#.into()),
                Matcher::Regex("BIG-B".into()),
            ]))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let store = MemoryStore::new(CHANNEL, OWNER, vec![target(
            1,
            &format!("{}/album", server.url()),
            None,
        )]);
        // Only "b" can be downloaded.
        let fetcher = StaticFetcher::new(&[("big-b", "BIG-B")]);
        let notifier = Arc::new(RecordingNotifier::default());

        let batch = [photo_post(1, "a"), photo_post(2, "b")];
        let report = dispatcher(store, fetcher, &notifier)
            .dispatch(CHANNEL, "", "", &batch)
            .await
            .unwrap();

        hook.assert_async().await;
        assert_eq!(report.attachments, 1);
    }

    #[tokio::test]
    async fn routing_key_selects_targets() {
        let mut server = mockito::Server::new_async().await;
        let keyed = server
            .mock("POST", "/xk9")
            .match_body(Matcher::Json(json!({ "content": "weekly report" })))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let other = server
            .mock("POST", "/other")
            .expect(0)
            .create_async()
            .await;
        let open = server
            .mock("POST", "/open")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let store = MemoryStore::new(CHANNEL, OWNER, vec![
            target(1, &format!("{}/xk9", server.url()), Some("XK9")),
            target(2, &format!("{}/other", server.url()), Some("ZZ7")),
            target(3, &format!("{}/open", server.url()), None),
        ]);
        let notifier = Arc::new(RecordingNotifier::default());

        let batch = [Post::text(CHANNEL, 1, "XK9 weekly report")];
        let report = dispatcher(store, StaticFetcher::default(), &notifier)
            .dispatch(CHANNEL, "weekly report", "XK9 weekly report", &batch)
            .await
            .unwrap();

        keyed.assert_async().await;
        other.assert_async().await;
        open.assert_async().await;
        let outcomes: Vec<_> = report.targets.iter().map(|t| &t.outcome).collect();
        assert_eq!(outcomes[1], &TargetOutcome::Skipped);
        assert_eq!(report.delivered(), 2);
    }

    #[tokio::test]
    async fn one_failing_target_does_not_block_others() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/a")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let broken = server
            .mock("POST", "/b")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let last = server
            .mock("POST", "/c")
            .with_status(201)
            .expect(1)
            .create_async()
            .await;

        let store = MemoryStore::new(CHANNEL, OWNER, vec![
            target(1, &format!("{}/a", server.url()), None),
            target(2, &format!("{}/b", server.url()), None),
            target(3, &format!("{}/c", server.url()), None),
            // Nothing listens here.
            target(4, "http://127.0.0.1:1/d", None),
        ]);
        let notifier = Arc::new(RecordingNotifier::default());

        let batch = [Post::text(CHANNEL, 1, "hi")];
        let report = dispatcher(store, StaticFetcher::default(), &notifier)
            .dispatch(CHANNEL, "hi", "hi", &batch)
            .await
            .unwrap();

        first.assert_async().await;
        broken.assert_async().await;
        last.assert_async().await;
        assert_eq!(report.delivered(), 2);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.targets[1].outcome, TargetOutcome::Rejected { status: 500 });

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, OWNER);
        assert_eq!(
            sent[0].1,
            "Channel message wasn't forwarded to 'target-2' - 500"
        );
        assert_eq!(sent[1].1, "Channel message wasn't forwarded to 'target-4'");
    }

    #[tokio::test]
    async fn notifier_failure_is_swallowed() {
        let store = MemoryStore::new(CHANNEL, OWNER, vec![target(
            1,
            "http://127.0.0.1:1/x",
            None,
        )]);
        let notifier = Arc::new(RecordingNotifier::failing());

        let batch = [Post::text(CHANNEL, 1, "hi")];
        let report = dispatcher(store, StaticFetcher::default(), &notifier)
            .dispatch(CHANNEL, "hi", "hi", &batch)
            .await
            .unwrap();
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn empty_text_without_attachments_is_noop() {
        let store = MemoryStore::failing();
        let notifier = Arc::new(RecordingNotifier::default());
        let batch = [Post::text(CHANNEL, 1, "XK9")];
        let report = dispatcher(store, StaticFetcher::default(), &notifier)
            .dispatch(CHANNEL, "", "XK9", &batch)
            .await
            .unwrap();
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn store_error_propagates() {
        let notifier = Arc::new(RecordingNotifier::default());
        let batch = [Post::text(CHANNEL, 1, "hi")];
        let err = dispatcher(MemoryStore::failing(), StaticFetcher::default(), &notifier)
            .dispatch(CHANNEL, "hi", "hi", &batch)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to load targets"));
    }

    #[tokio::test]
    async fn silent_webhook_times_out() {
        let url = silent_server().await;
        let client = WebhookClient::new(Duration::from_millis(200), "postrelay-test").unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(3), client.deliver(&url, "x", &[]))
            .await
            .expect("delivery should be bounded by the client timeout");
        assert_eq!(outcome, TargetOutcome::Failed {
            reason: "request timed out".into(),
        });
    }
}
