//! Telegram side of the pipeline's collaborators.

use std::time::Duration;

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    postrelay_common::types::{Post, TextSource, UserId},
    postrelay_forward::{AttachmentFetcher, OwnerNotifier, PostEditor},
    teloxide::{
        payloads::EditMessageCaptionSetters,
        prelude::*,
        types::{ChatId, MessageId},
    },
    tracing::debug,
};

#[cfg(feature = "metrics")]
use postrelay_metrics::{counter, labels, telegram as tg_metrics};

/// Sends owner notices, edits live posts and downloads attachments.
#[derive(Clone)]
pub struct TelegramOutbound {
    bot: Bot,
    http: reqwest::Client,
}

impl TelegramOutbound {
    /// `download_timeout` bounds each attachment download.
    pub fn new(bot: Bot, download_timeout: Duration) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()?;
        Ok(Self { bot, http })
    }

    /// Download URL of a file: `<api>/file/bot<token>/<path>`.
    fn file_url(&self, path: &str) -> reqwest::Url {
        let mut url = self.bot.api_url();
        url.set_path(&format!("file/bot{}/{}", self.bot.token(), path));
        url
    }
}

#[async_trait]
impl OwnerNotifier for TelegramOutbound {
    async fn notify(&self, owner_id: UserId, text: &str) -> Result<()> {
        self.bot.send_message(ChatId(owner_id), text).await?;
        debug!(owner_id, "owner notified");
        Ok(())
    }
}

#[async_trait]
impl PostEditor for TelegramOutbound {
    async fn edit(&self, post: &Post, text: &str) -> Result<()> {
        let chat = ChatId(post.channel_id);
        let message = MessageId(post.message_id);
        let result = match post.text_source {
            TextSource::Text => self
                .bot
                .edit_message_text(chat, message, text)
                .await
                .map(drop),
            TextSource::Caption => self
                .bot
                .edit_message_caption(chat, message)
                .caption(text)
                .await
                .map(drop),
        };

        #[cfg(feature = "metrics")]
        counter!(
            tg_metrics::POST_EDITS_TOTAL,
            labels::RESULT => if result.is_ok() { "ok" } else { "failed" }
        )
        .increment(1);

        result?;
        debug!(channel_id = post.channel_id, message_id = post.message_id, "post edited");
        Ok(())
    }
}

#[async_trait]
impl AttachmentFetcher for TelegramOutbound {
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self.bot.get_file(file_id).await?;
        let response = self.http.get(self.file_url(&file.path)).send().await?;
        if !response.status().is_success() {
            bail!("failed to download file: HTTP {}", response.status());
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, serde_json::json, std::io::Write};

    fn bot_for(server: &mockito::Server) -> Bot {
        let api_url = reqwest::Url::parse(&format!("{}/", server.url())).unwrap();
        Bot::new("test-token").set_api_url(api_url)
    }

    fn outbound(server: &mockito::Server) -> TelegramOutbound {
        TelegramOutbound::new(bot_for(server), Duration::from_secs(5)).unwrap()
    }

    fn ok(result: serde_json::Value) -> String {
        json!({ "ok": true, "result": result }).to_string()
    }

    fn channel_message(id: i32, text: &str) -> serde_json::Value {
        json!({
            "message_id": id,
            "date": 1,
            "chat": { "id": -100123, "type": "channel", "title": "News" },
            "text": text
        })
    }

    #[tokio::test]
    async fn notify_sends_private_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex("/SendMessage$".into()))
            .match_body(Matcher::PartialJson(json!({ "chat_id": 501, "text": "hi" })))
            .with_header("content-type", "application/json")
            .with_body(ok(json!({
                "message_id": 1,
                "date": 1,
                "chat": { "id": 501, "type": "private", "first_name": "Owner" },
                "text": "hi"
            })))
            .expect(1)
            .create_async()
            .await;

        outbound(&server)
            .notify(501, "hi")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn edit_uses_text_or_caption() {
        let mut server = mockito::Server::new_async().await;
        let text = server
            .mock("POST", Matcher::Regex("/EditMessageText$".into()))
            .match_body(Matcher::PartialJson(json!({
                "chat_id": -100123,
                "message_id": 7,
                "text": "edited"
            })))
            .with_header("content-type", "application/json")
            .with_body(ok(channel_message(7, "edited")))
            .expect(1)
            .create_async()
            .await;
        let caption = server
            .mock("POST", Matcher::Regex("/EditMessageCaption$".into()))
            .match_body(Matcher::PartialJson(json!({
                "chat_id": -100123,
                "message_id": 8,
                "caption": "edited"
            })))
            .with_header("content-type", "application/json")
            .with_body(ok(channel_message(8, "edited")))
            .expect(1)
            .create_async()
            .await;

        let outbound = outbound(&server);
        outbound
            .edit(&Post::text(-100123, 7, "before"), "edited")
            .await
            .unwrap();
        let captioned = Post {
            text_source: TextSource::Caption,
            ..Post::text(-100123, 8, "before")
        };
        outbound.edit(&captioned, "edited").await.unwrap();

        text.assert_async().await;
        caption.assert_async().await;
    }

    #[tokio::test]
    async fn edit_failure_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Regex("/EditMessageText$".into()))
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "ok": false,
                    "error_code": 400,
                    "description": "Bad Request: message is not modified"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let outbound = outbound(&server);
        assert!(outbound.edit(&Post::text(-1, 1, "x"), "x").await.is_err());
    }

    #[tokio::test]
    async fn fetch_downloads_file_bytes() {
        let mut server = mockito::Server::new_async().await;
        let get_file = server
            .mock("POST", Matcher::Regex("/GetFile$".into()))
            .match_body(Matcher::PartialJson(json!({ "file_id": "large" })))
            .with_header("content-type", "application/json")
            .with_body(ok(json!({
                "file_id": "large",
                "file_unique_id": "l",
                "file_size": 4,
                "file_path": "photos/file_1.jpg"
            })))
            .expect(1)
            .create_async()
            .await;
        let download = server
            .mock("GET", "/file/bottest-token/photos/file_1.jpg")
            .with_body("JPEG")
            .expect(1)
            .create_async()
            .await;

        let bytes = outbound(&server)
            .fetch("large")
            .await
            .unwrap();
        assert_eq!(bytes, b"JPEG");
        get_file.assert_async().await;
        download.assert_async().await;
    }

    #[tokio::test]
    async fn stalled_download_fails_within_timeout() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", Matcher::Regex("/GetFile$".into()))
            .with_header("content-type", "application/json")
            .with_body(ok(json!({
                "file_id": "slow",
                "file_unique_id": "s",
                "file_size": 4,
                "file_path": "photos/slow.jpg"
            })))
            .create_async()
            .await;
        server
            .mock("GET", "/file/bottest-token/photos/slow.jpg")
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_secs(3));
                w.write_all(b"JPEG")
            })
            .create_async()
            .await;

        let outbound = TelegramOutbound::new(bot_for(&server), Duration::from_millis(200)).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), outbound.fetch("slow"))
            .await
            .expect("download should give up before the server answers");
        assert!(result.is_err());
    }
}
