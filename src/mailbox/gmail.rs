//! Gmail REST backend for [`MailboxClient`].
//!
//! Authenticates with an OAuth2 refresh token. Access tokens are cached until
//! shortly before they expire and dropped when the API answers 401.

use super::{FetchedMessage, Header, MailboxClient, MessagePage, MessageQuery};
use crate::config::GmailConfig;
use crate::decoder::{MessagePart, TransferEncoding};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
/// Assumed lifetime when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
/// Longest error body carried into [`Error::GmailApi`].
const MAX_ERROR_BODY: usize = 512;

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// A [`MailboxClient`] backed by the Gmail API.
pub struct GmailMailbox {
    config: GmailConfig,
    http: Client,
    token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for GmailMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailMailbox")
            .field("client_id", &self.config.client_id)
            .field("api_base", &self.config.api_base)
            .finish_non_exhaustive()
    }
}

impl GmailMailbox {
    /// Creates the backend. No request is made until first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(config: GmailConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| Error::Http {
                endpoint: "client".to_string(),
                source,
            })?;

        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    /// Returns a valid access token, refreshing it if needed.
    async fn access_token(&self) -> Result<String> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let token = self.refresh_token().await?;
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    #[instrument(name = "GmailMailbox::refresh_token", skip(self))]
    async fn refresh_token(&self) -> Result<AccessToken> {
        debug!("Refreshing Gmail access token");

        let request = self.http.post(&self.config.token_url).form(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret()),
            ("refresh_token", self.config.refresh_token()),
            ("grant_type", "refresh_token"),
        ]);
        let response: TokenResponse = send_json("oauth2.token", request).await?;

        let lifetime = response
            .expires_in
            .map_or(DEFAULT_TOKEN_LIFETIME, Duration::from_secs);
        Ok(AccessToken {
            value: response.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }

    /// Issues an authorized GET against the API.
    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self.access_token().await?;
        let url = format!("{}/{}", self.config.api_base, path);
        let request = self.http.get(url).bearer_auth(token).query(query);

        let result = send_json(endpoint, request).await;
        if let Err(Error::GmailApi { status: 401, .. }) = &result {
            warn!(endpoint, "Access token rejected, clearing cache");
            *self.token.lock().await = None;
        }
        result
    }
}

async fn send_json<T: DeserializeOwned>(endpoint: &str, request: RequestBuilder) -> Result<T> {
    let to_http = |source| Error::Http {
        endpoint: endpoint.to_string(),
        source,
    };

    let response = request.send().await.map_err(to_http)?;
    let status = response.status();
    if !status.is_success() {
        let mut message = response.text().await.unwrap_or_default();
        message.truncate(floor_char_boundary(&message, MAX_ERROR_BODY));
        return Err(Error::GmailApi {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        });
    }

    response.json::<T>().await.map_err(to_http)
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

#[async_trait]
impl MailboxClient for GmailMailbox {
    #[instrument(name = "GmailMailbox::list", skip_all, fields(after = %query.received_after))]
    async fn list_message_ids(
        &self,
        query: &MessageQuery,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let mut params = vec![
            ("q", format!("after:{}", query.after_epoch_seconds())),
            ("maxResults", self.config.list_page_size.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let response: ListResponse = self
            .get("messages.list", "users/me/messages", &params)
            .await?;

        Ok(MessagePage {
            ids: response.messages.into_iter().map(|m| m.id).collect(),
            next_page_token: response.next_page_token,
        })
    }

    #[instrument(name = "GmailMailbox::get", skip(self))]
    async fn get_message(&self, id: &str) -> Result<FetchedMessage> {
        let path = format!("users/me/messages/{id}");
        let result: Result<GmailMessage> = self
            .get("messages.get", &path, &[("format", "full".to_string())])
            .await;

        match result {
            Ok(message) => Ok(message.into_fetched()),
            Err(Error::GmailApi { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Err(Error::MessageNotFound {
                    message_id: id.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn probe(&self) -> Result<String> {
        let profile: Profile = self.get("users.getProfile", "users/me/profile", &[]).await?;
        Ok(profile.email_address)
    }

    fn backend(&self) -> &'static str {
        "gmail"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    /// Milliseconds since the epoch, as a decimal string.
    internal_date: Option<String>,
    payload: Option<GmailPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<GmailHeader>,
    body: Option<GmailBody>,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

impl GmailMessage {
    fn into_fetched(self) -> FetchedMessage {
        let internal_date = self.internal_date.as_deref().and_then(parse_internal_date);
        let payload = self.payload.unwrap_or_default();
        let headers = payload
            .headers
            .iter()
            .map(|h| Header::new(h.name.as_str(), h.value.as_str()))
            .collect();

        FetchedMessage {
            id: self.id,
            headers,
            body: payload.into_part(),
            internal_date,
        }
    }
}

impl GmailPart {
    /// Gmail delivers bodies already transfer-decoded and base64url wrapped,
    /// so leaves come out as identity-encoded bytes.
    fn into_part(self) -> MessagePart {
        let body = self
            .body
            .and_then(|b| b.data)
            .map(|data| decode_body_data(&data))
            .unwrap_or_default();

        if self.parts.is_empty() {
            return MessagePart::leaf(&self.mime_type, TransferEncoding::Identity, body);
        }

        let mut children = Vec::with_capacity(self.parts.len() + 1);
        if !body.is_empty() {
            children.push(MessagePart::leaf(&self.mime_type, TransferEncoding::Identity, body));
        }
        children.extend(self.parts.into_iter().map(GmailPart::into_part));
        MessagePart::container(&self.mime_type, children)
    }
}

fn decode_body_data(data: &str) -> Vec<u8> {
    let trimmed = data.trim_end_matches('=');
    URL_SAFE_NO_PAD.decode(trimmed).unwrap_or_else(|e| {
        warn!(error = %e, "Invalid base64url body data, using raw text");
        data.as_bytes().to_vec()
    })
}

fn parse_internal_date(raw: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = raw.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::record::header_value;

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    #[test]
    fn test_full_message_conversion() {
        let json = serde_json::json!({
            "id": "18c1f",
            "internalDate": "1700000000123",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "To", "value": "user@example.com"},
                    {"name": "Subject", "value": "Your code"}
                ],
                "body": {"size": 0},
                "parts": [
                    {"mimeType": "text/plain", "body": {"data": encode("Your code is 482913.")}},
                    {"mimeType": "text/html", "body": {"data": encode("<p>482913</p>")}}
                ]
            }
        });
        let message: GmailMessage = serde_json::from_value(json).unwrap();
        let fetched = message.into_fetched();

        assert_eq!(fetched.id, "18c1f");
        assert_eq!(
            fetched.internal_date.map(|d| d.timestamp_millis()),
            Some(1_700_000_000_123)
        );
        assert_eq!(header_value(&fetched.headers, "subject"), Some("Your code"));

        let decoded = decode(&fetched.body);
        assert!(decoded.text.contains("Your code is 482913."));
        assert_eq!(decoded.html, "<p>482913</p>");
    }

    #[test]
    fn test_single_part_message_and_padded_data() {
        let json = serde_json::json!({
            "id": "1",
            "payload": {
                "mimeType": "text/plain",
                "body": {"data": "Y29kZSAxMjM0NTY="}
            }
        });
        let fetched = serde_json::from_value::<GmailMessage>(json)
            .unwrap()
            .into_fetched();

        assert_eq!(fetched.internal_date, None);
        assert_eq!(decode(&fetched.body).text, "code 123456");
    }

    #[test]
    fn test_missing_payload_yields_empty_body() {
        let json = serde_json::json!({"id": "2"});
        let fetched = serde_json::from_value::<GmailMessage>(json)
            .unwrap()
            .into_fetched();

        assert!(fetched.headers.is_empty());
        assert!(decode(&fetched.body).is_empty());
    }

    #[test]
    fn test_list_response_without_messages() {
        let json = serde_json::json!({"resultSizeEstimate": 0});
        let list: ListResponse = serde_json::from_value(json).unwrap();
        assert!(list.messages.is_empty());
        assert_eq!(list.next_page_token, None);
    }

    #[test]
    fn test_parse_internal_date() {
        assert_eq!(
            parse_internal_date("1700000000000").map(|d| d.timestamp()),
            Some(1_700_000_000)
        );
        assert_eq!(parse_internal_date("soon"), None);
    }

    #[test]
    fn test_floor_char_boundary() {
        assert_eq!(floor_char_boundary("abc", 10), 3);
        assert_eq!(floor_char_boundary("ééé", 3), 2);
    }
}
