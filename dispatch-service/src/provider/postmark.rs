//! Postmark-compatible template mail client.
//!
//! Templates live with the provider; this client only sends the template alias
//! and its model. Reference: https://postmarkapp.com/developer/api/templates-api

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{ProviderClient, ProviderError, ProviderReceipt};
use crate::model::{NormalizedMessage, TemplatePayload};

const TOKEN_HEADER: &str = "X-Postmark-Server-Token";

/// Request body for `POST /email/withTemplate`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TemplateEmail<'a> {
    from: &'a str,
    to: &'a str,
    template_alias: &'static str,
    template_model: &'a TemplatePayload,
    message_stream: &'a str,
}

/// Success body of `POST /email/withTemplate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendResponse {
    #[serde(rename = "MessageID")]
    message_id: String,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    message: String,
}

/// HTTP client for a Postmark-compatible provider.
#[derive(Clone)]
pub struct PostmarkClient {
    client: Client,
    base_url: String,
    server_token: String,
    sender: String,
    message_stream: String,
}

impl PostmarkClient {
    /// Create a client. Per-call timeouts are applied by the worker pool; the
    /// connect timeout here only bounds connection setup.
    pub fn new(
        base_url: impl Into<String>,
        server_token: impl Into<String>,
        sender: impl Into<String>,
        message_stream: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(16)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            server_token: server_token.into(),
            sender: sender.into(),
            message_stream: message_stream.into(),
        })
    }

    fn body<'a>(&'a self, message: &'a NormalizedMessage) -> TemplateEmail<'a> {
        TemplateEmail {
            from: &self.sender,
            to: &message.address,
            template_alias: message.kind().template_alias(),
            template_model: &message.payload,
            message_stream: &self.message_stream,
        }
    }
}

#[async_trait]
impl ProviderClient for PostmarkClient {
    async fn send(&self, message: &NormalizedMessage) -> Result<ProviderReceipt, ProviderError> {
        let url = format!("{}/email/withTemplate", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header(TOKEN_HEADER, &self.server_token)
            .json(&self.body(message))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !(200..300).contains(&status) {
            let message = match serde_json::from_str::<ErrorResponse>(&text) {
                Ok(body) => format!("{} (code {})", body.message, body.error_code),
                Err(_) => text,
            };
            return Err(ProviderError::Status { status, message });
        }

        // The message was accepted even if the body is unreadable; retrying
        // would send a duplicate.
        let message_id = match serde_json::from_str::<SendResponse>(&text) {
            Ok(body) => body.message_id,
            Err(e) => {
                warn!(
                    to = %message.address,
                    error = %e,
                    body_length = text.len(),
                    "provider_response_unreadable"
                );
                "unknown".to_string()
            }
        };

        info!(
            to = %message.address,
            template = message.kind().template_alias(),
            message_id = %message_id,
            "provider_send_accepted"
        );

        Ok(ProviderReceipt { message_id })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let url = format!("{}/server", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header(TOKEN_HEADER, &self.server_token)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProviderError::Status {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unknown").to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Welcome;

    fn client() -> PostmarkClient {
        PostmarkClient::new(
            "https://api.postmarkapp.com/",
            "token",
            "noreply@example.com",
            "outbound",
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(client().base_url, "https://api.postmarkapp.com");
    }

    #[test]
    fn test_request_body_shape() {
        let client = client();
        let message = NormalizedMessage {
            address: "a@x.com".to_string(),
            payload: TemplatePayload::Welcome(Welcome {
                name: "A".to_string(),
                dashboard_link: "https://app.example.com/dashboard".to_string(),
            }),
        };

        let body = serde_json::to_value(client.body(&message)).unwrap();
        assert_eq!(body["From"], "noreply@example.com");
        assert_eq!(body["To"], "a@x.com");
        assert_eq!(body["TemplateAlias"], "welcome");
        assert_eq!(body["MessageStream"], "outbound");
        assert_eq!(body["TemplateModel"]["name"], "A");
        assert_eq!(
            body["TemplateModel"]["dashboardLink"],
            "https://app.example.com/dashboard"
        );
    }

    #[test]
    fn test_response_parsing() {
        let ok: SendResponse = serde_json::from_str(
            r#"{"To":"a@x.com","SubmittedAt":"2026-01-15T10:00:00Z","MessageID":"b7bc2f4a","ErrorCode":0,"Message":"OK"}"#,
        )
        .unwrap();
        assert_eq!(ok.message_id, "b7bc2f4a");

        let err: ErrorResponse =
            serde_json::from_str(r#"{"ErrorCode":406,"Message":"Inactive recipient"}"#).unwrap();
        assert_eq!(err.error_code, 406);
        assert_eq!(err.message, "Inactive recipient");
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transient() {
        let client = PostmarkClient::new("http://127.0.0.1:9", "token", "noreply@example.com", "outbound")
            .unwrap();

        let err = client.health_check().await.unwrap_err();
        assert!(err.is_transient());
    }
}
