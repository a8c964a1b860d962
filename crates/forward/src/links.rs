//! Link rewriting.
//!
//! Telegram marks bare links like `example.com` as `url` entities. Webhook
//! consumers (Discord in particular) only linkify text with a scheme, so every
//! bare link is probed over https then http and the winning scheme is added.
//! Schemed links are wrapped in `<...>` to suppress embeds.

use std::{ops::Range, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    futures::future::join_all,
    postrelay_common::types::{EntityKind, LinkEntity},
    tracing::debug,
};

#[cfg(feature = "metrics")]
use postrelay_metrics::{counter, forward as fwd_metrics, labels};

use crate::error::Result;

/// Checks whether a URL answers at all.
#[async_trait]
pub trait LinkProber: Send + Sync {
    async fn reachable(&self, url: &str) -> bool;
}

/// Probes with a `HEAD` request. Any HTTP response counts as reachable;
/// only transport errors and timeouts do not.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LinkProber for HttpProber {
    async fn reachable(&self, url: &str) -> bool {
        let ok = match self.client.head(url).send().await {
            Ok(resp) => {
                debug!(url, status = resp.status().as_u16(), "link probe answered");
                true
            },
            Err(e) => {
                debug!(url, error = %e, "link probe failed");
                false
            },
        };

        #[cfg(feature = "metrics")]
        counter!(
            fwd_metrics::PROBES_TOTAL,
            labels::RESULT => if ok { "ok" } else { "failed" }
        )
        .increment(1);

        ok
    }
}

/// Display text and the untouched source text of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// Text to publish: links schemed and wrapped, routing keys removed.
    pub edited: String,
    /// Source text with trailing whitespace trimmed, used for key matching.
    pub original: String,
}

impl Rewrite {
    /// The source had text but nothing is left after stripping keys.
    #[must_use]
    pub fn is_empty_payload(&self) -> bool {
        !self.original.is_empty() && self.edited.is_empty()
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        self.edited != self.original
    }
}

pub struct LinkRewriter {
    prober: Arc<dyn LinkProber>,
}

impl LinkRewriter {
    pub fn new(prober: Arc<dyn LinkProber>) -> Self {
        Self { prober }
    }

    /// Rewrite `text` using its entities and strip every routing key.
    ///
    /// All probes run concurrently and are awaited together. Entities that
    /// fall outside the text are clamped or dropped, never rejected.
    pub async fn rewrite(&self, text: &str, entities: &[LinkEntity], keys: &[&str]) -> Rewrite {
        let original = text.trim_end().to_string();

        let spans = url_spans(text, entities);
        let links: Vec<&str> = spans.iter().map(|span| &text[span.clone()]).collect();

        let probe_urls: Vec<String> = links
            .iter()
            .filter(|link| !has_scheme(link))
            .flat_map(|link| [format!("https://{link}"), format!("http://{link}")])
            .collect();
        let mut answers = join_all(probe_urls.iter().map(|url| self.prober.reachable(url)))
            .await
            .into_iter();

        let mut edited = String::with_capacity(text.len() + links.len() * 10);
        let mut cursor = 0;
        for (span, link) in spans.iter().zip(&links) {
            edited.push_str(&text[cursor..span.start]);
            let schemed = if has_scheme(link) {
                Some((*link).to_string())
            } else {
                let https = answers.next().unwrap_or(false);
                let http = answers.next().unwrap_or(false);
                if https {
                    Some(format!("https://{link}"))
                } else if http {
                    Some(format!("http://{link}"))
                } else {
                    debug!(link, "no scheme answered, leaving link as is");
                    None
                }
            };
            match schemed {
                Some(url) => {
                    edited.push('<');
                    edited.push_str(&url);
                    edited.push('>');
                },
                None => edited.push_str(link),
            }
            cursor = span.end;
        }
        edited.push_str(&text[cursor..]);

        let mut keys: Vec<&str> = keys.iter().copied().filter(|k| !k.is_empty()).collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()));
        for key in keys {
            edited = edited.replace(key, "");
        }

        Rewrite {
            edited: edited.trim().to_string(),
            original,
        }
    }
}

fn has_scheme(link: &str) -> bool {
    link.contains("://")
}

/// Byte ranges of `url` entities, ascending and non-overlapping.
fn url_spans(text: &str, entities: &[LinkEntity]) -> Vec<Range<usize>> {
    let mut urls: Vec<&LinkEntity> = entities
        .iter()
        .filter(|e| e.kind == EntityKind::Url)
        .collect();
    urls.sort_by_key(|e| e.offset);

    let mut spans = Vec::with_capacity(urls.len());
    let mut last_end = 0;
    for entity in urls {
        let start = utf16_to_byte(text, entity.offset);
        let end = utf16_to_byte(text, entity.offset.saturating_add(entity.length));
        if start >= end || start < last_end {
            continue;
        }
        spans.push(start..end);
        last_end = end;
    }
    spans
}

/// Byte index of the first char starting at or after `units` UTF-16 code
/// units into `text`, clamped to the text length.
fn utf16_to_byte(text: &str, units: usize) -> usize {
    let mut seen = 0;
    for (idx, ch) in text.char_indices() {
        if seen >= units {
            return idx;
        }
        seen += ch.len_utf16();
    }
    text.len()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::test_support::{CountingProber, StaticProber, silent_server},
        rstest::rstest,
    };

    fn rewriter(reachable: &[&str]) -> LinkRewriter {
        LinkRewriter::new(Arc::new(StaticProber::new(reachable)))
    }

    fn url(offset: usize, length: usize) -> LinkEntity {
        LinkEntity::url(offset, length)
    }

    #[rstest]
    #[case("hello", 0, 0)]
    #[case("hello", 3, 3)]
    #[case("hello", 99, 5)]
    #[case("😀check", 2, 4)]
    #[case("😀check", 1, 4)]
    #[case("é!", 1, 2)]
    fn utf16_offsets_map_to_char_boundaries(
        #[case] text: &str,
        #[case] units: usize,
        #[case] byte: usize,
    ) {
        assert_eq!(utf16_to_byte(text, units), byte);
        assert!(text.is_char_boundary(byte));
    }

    #[tokio::test]
    async fn bare_link_gets_https_and_brackets() {
        let out = rewriter(&["https://example.com"])
            .rewrite("Check example.com now", &[url(6, 11)], &[])
            .await;
        assert_eq!(out.edited, "Check <https://example.com> now");
        assert_eq!(out.original, "Check example.com now");
        assert!(out.changed());
    }

    #[tokio::test]
    async fn falls_back_to_http() {
        let out = rewriter(&["http://example.com"])
            .rewrite("Check example.com now", &[url(6, 11)], &[])
            .await;
        assert_eq!(out.edited, "Check <http://example.com> now");
    }

    #[tokio::test]
    async fn unreachable_link_left_unchanged() {
        let out = rewriter(&[])
            .rewrite("Check example.com now", &[url(6, 11)], &[])
            .await;
        assert_eq!(out.edited, "Check example.com now");
        assert!(!out.changed());
    }

    #[tokio::test]
    async fn utf16_offset_after_emoji() {
        let out = rewriter(&["https://site.com"])
            .rewrite("😀check site.com", &[url(8, 8)], &[])
            .await;
        assert_eq!(out.edited, "😀check <https://site.com>");
    }

    #[tokio::test]
    async fn schemed_link_is_wrapped_without_probing() {
        let prober = Arc::new(CountingProber::default());
        let out = LinkRewriter::new(prober.clone())
            .rewrite("see https://a.io", &[url(4, 12)], &[])
            .await;
        assert_eq!(out.edited, "see <https://a.io>");
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn routing_keys_are_stripped() {
        let out = rewriter(&[])
            .rewrite("XK9 weekly report", &[], &["XK9", "QQ1"])
            .await;
        assert_eq!(out.edited, "weekly report");
        assert_eq!(out.original, "XK9 weekly report");
        assert!(!out.is_empty_payload());
    }

    #[tokio::test]
    async fn overlapping_keys_are_removed_whole() {
        let out = rewriter(&[])
            .rewrite("XK9 weekly XK report", &[], &["XK", "XK9"])
            .await;
        assert_eq!(out.edited, "weekly  report");
    }

    #[tokio::test]
    async fn key_only_text_has_no_payload() {
        let out = rewriter(&[]).rewrite("XK9  \n", &[], &["XK9"]).await;
        assert_eq!(out.edited, "");
        assert_eq!(out.original, "XK9");
        assert!(out.is_empty_payload());

        let empty = rewriter(&[]).rewrite("", &[], &["XK9"]).await;
        assert!(!empty.is_empty_payload());
    }

    #[tokio::test]
    async fn out_of_range_entities_are_clamped_or_dropped() {
        let out = rewriter(&["https://a.io"])
            .rewrite("see a.io", &[url(4, 50), url(100, 3)], &[])
            .await;
        assert_eq!(out.edited, "see <https://a.io>");
    }

    #[tokio::test]
    async fn non_url_and_overlapping_entities_are_ignored() {
        let mention = LinkEntity {
            kind: EntityKind::Mention,
            offset: 0,
            length: 4,
        };
        let out = rewriter(&["https://b.io", "https://b.io/x"])
            .rewrite("@bob b.io/x", &[url(5, 4), mention, url(7, 4)], &[])
            .await;
        assert_eq!(out.edited, "@bob <https://b.io>/x");
    }

    #[tokio::test]
    async fn entities_are_processed_in_offset_order() {
        let out = rewriter(&["https://a.io", "http://b.io"])
            .rewrite("a.io and b.io", &[url(9, 4), url(0, 4)], &[])
            .await;
        assert_eq!(out.edited, "<https://a.io> and <http://b.io>");
    }

    #[tokio::test]
    async fn rewriting_edited_text_is_idempotent() {
        let rw = rewriter(&["https://example.com"]);
        let first = rw
            .rewrite("XK9 Check example.com now", &[url(10, 11)], &["XK9"])
            .await;
        let second = rw.rewrite(&first.edited, &[], &["nope"]).await;
        assert_eq!(second.edited, first.edited);
    }

    #[tokio::test(start_paused = true)]
    async fn probes_run_concurrently() {
        let prober = Arc::new(CountingProber::with_delay(Duration::from_secs(1)));
        let started = tokio::time::Instant::now();
        LinkRewriter::new(prober.clone())
            .rewrite("a.io b.io c.io", &[url(0, 4), url(5, 4), url(10, 4)], &[])
            .await;
        assert_eq!(prober.calls(), 6);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn http_prober_counts_any_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("HEAD", "/")
            .with_status(404)
            .create_async()
            .await;

        let prober = HttpProber::new(Duration::from_secs(2), "postrelay-test").unwrap();
        assert!(prober.reachable(&server.url()).await);
        assert!(!prober.reachable("http://127.0.0.1:1").await);
    }

    #[tokio::test]
    async fn http_prober_gives_up_on_silent_host() {
        let url = silent_server().await;
        let prober = HttpProber::new(Duration::from_millis(200), "postrelay-test").unwrap();

        let reachable = tokio::time::timeout(Duration::from_secs(3), prober.reachable(&url))
            .await
            .expect("probe should be bounded by the client timeout");
        assert!(!reachable);
    }
}
