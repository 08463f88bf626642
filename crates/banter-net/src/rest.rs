//! Request/response fallback for when the event channel is unavailable.
//!
//! Shapes mirror the event payloads: a successful submission returns the
//! same authoritative message copy the channel would have broadcast.

use std::path::Path;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use banter_shared::protocol::{MessagePayload, SubmitPayload};
use banter_shared::types::{ConversationKey, MessageId, UserId};

use crate::error::{NetError, Result};

#[derive(Debug, Deserialize)]
struct RejectionBody {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadRequest<'a> {
    room: &'a ConversationKey,
    user_id: &'a UserId,
    message_ids: &'a [MessageId],
}

/// Thin client for the REST fallback API.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// Submit a message. A policy rejection surfaces as
    /// [`NetError::Rejected`] with the server's reason, distinct from
    /// transport failures.
    pub async fn submit_message(&self, submit: &SubmitPayload) -> Result<MessagePayload> {
        let resp = self
            .http
            .post(format!("{}/api/messages", self.base_url))
            .json(submit)
            .send()
            .await?;

        if resp.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let reason = resp
                .json::<RejectionBody>()
                .await
                .map(|b| b.reason)
                .unwrap_or_else(|_| "content rejected".to_string());
            return Err(NetError::Rejected(reason));
        }

        let payload = resp.error_for_status()?.json::<MessagePayload>().await?;
        debug!(msg_id = %payload.id, "Message submitted over REST");
        Ok(payload)
    }

    /// List conversation history, newest entries last.
    pub async fn fetch_history(
        &self,
        room: &ConversationKey,
        limit: u32,
    ) -> Result<Vec<MessagePayload>> {
        let url = format!(
            "{}/api/conversations/{}/messages",
            self.base_url,
            room.room_name()
        );
        let history = self
            .http
            .get(url)
            .query(&[("limit", limit)])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<MessagePayload>>()
            .await?;

        debug!(room = %room, count = history.len(), "History fetched over REST");
        Ok(history)
    }

    /// Upload a media file in one request; returns the resolved URL.
    pub async fn upload_media(&self, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        let bytes = tokio::fs::read(path).await?;

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(format!("{}/api/media", self.base_url))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json::<UploadResponse>()
            .await?;

        Ok(resp.url)
    }

    /// Batched mark-read, mirroring the `mark-read` channel event.
    pub async fn mark_read(
        &self,
        room: &ConversationKey,
        user_id: &UserId,
        message_ids: &[MessageId],
    ) -> Result<()> {
        self.http
            .post(format!("{}/api/messages/read", self.base_url))
            .json(&MarkReadRequest {
                room,
                user_id,
                message_ids,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
