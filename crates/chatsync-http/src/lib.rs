use std::{sync::Arc, time::Duration};

use chatsync_core::{
    ConversationListEntry, ConversationTimeline, OutgoingMessage, RetryPolicy, SentMessage,
    SyncError, SyncErrorCategory, SyncGateway, User, classify_http_status,
};
use chatsync_platform::CredentialSource;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::RETRY_AFTER,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, trace, warn};

const API_PREFIX: &str = "api/v1";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_FETCH_RETRIES: u32 = 2;
const ERROR_BODY_LIMIT: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpGatewayConfig {
    pub user_service: String,
    pub chat_service: String,
    pub request_timeout: Duration,
    /// Extra attempts for idempotent GETs after a retryable failure.
    pub fetch_retries: u32,
}

impl HttpGatewayConfig {
    /// Config with default timeout and retry budget.
    pub fn new(user_service: impl Into<String>, chat_service: impl Into<String>) -> Self {
        Self {
            user_service: trim_base(user_service.into()),
            chat_service: trim_base(chat_service.into()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            fetch_retries: DEFAULT_FETCH_RETRIES,
        }
    }

    /// Per-request timeout.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Retries allowed for idempotent GETs.
    pub fn with_fetch_retries(mut self, fetch_retries: u32) -> Self {
        self.fetch_retries = fetch_retries;
        self
    }

    fn user_endpoint(&self, path: &str) -> String {
        format!("{}/{API_PREFIX}/{path}", self.user_service)
    }

    fn chat_endpoint(&self, path: &str) -> String {
        format!("{}/{API_PREFIX}/{path}", self.chat_service)
    }
}

fn trim_base(base: String) -> String {
    base.trim().trim_end_matches('/').to_owned()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest<'a> {
    user_id: &'a str,
    other_user_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatResponse {
    chat_id: String,
}

/// [`SyncGateway`] over the user and chat REST services.
pub struct HttpSyncGateway {
    client: Client,
    config: HttpGatewayConfig,
    credentials: Arc<dyn CredentialSource>,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for HttpSyncGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSyncGateway")
            .field("config", &self.config)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl HttpSyncGateway {
    /// Build the HTTP client; fails on blank service URLs or a client build error.
    pub fn new(
        config: HttpGatewayConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, SyncError> {
        if config.user_service.is_empty() || config.chat_service.is_empty() {
            return Err(SyncError::new(
                SyncErrorCategory::Config,
                "invalid_config",
                "user and chat service URLs are required",
            ));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| {
                SyncError::new(
                    SyncErrorCategory::Config,
                    "client_build_error",
                    err.to_string(),
                )
            })?;

        Ok(Self {
            client,
            retry_policy: RetryPolicy::default().with_max_retries(config.fetch_retries),
            config,
            credentials,
        })
    }

    /// Endpoint configuration in use.
    pub fn config(&self) -> &HttpGatewayConfig {
        &self.config
    }

    fn token(&self) -> Result<String, SyncError> {
        self.credentials
            .bearer_token()
            .ok_or_else(SyncError::no_session)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SyncError> {
        let token = self.token()?;
        let mut attempt: u32 = 0;
        loop {
            trace!(%url, attempt, "GET");
            let result = match self.client.get(url).bearer_auth(&token).send().await {
                Ok(response) => read_json(response).await,
                Err(err) => Err(map_reqwest_error(err)),
            };

            match result {
                Ok(body) => return Ok(body),
                Err(err) => {
                    let Some(delay) = self.retry_policy.next_delay(&err, attempt) else {
                        return Err(err);
                    };
                    warn!(%url, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying GET");
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn post<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SyncError> {
        let token = self.token()?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(response).await
    }
}

impl SyncGateway for HttpSyncGateway {
    fn has_credential(&self) -> bool {
        self.credentials.bearer_token().is_some()
    }

    async fn fetch_profile(&self) -> Result<User, SyncError> {
        self.get_json(&self.config.user_endpoint("profile")).await
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationListEntry>, SyncError> {
        let entries: Vec<ConversationListEntry> =
            self.get_json(&self.config.chat_endpoint("chat/all")).await?;
        debug!(count = entries.len(), "fetched conversations");
        Ok(entries)
    }

    async fn fetch_users(&self) -> Result<Vec<User>, SyncError> {
        self.get_json(&self.config.user_endpoint("user/all")).await
    }

    async fn fetch_timeline(&self, chat_id: &str) -> Result<ConversationTimeline, SyncError> {
        let timeline: ConversationTimeline = self
            .get_json(&self.config.chat_endpoint(&format!("message/{chat_id}")))
            .await?;
        debug!(%chat_id, count = timeline.messages.len(), "fetched timeline");
        Ok(timeline)
    }

    async fn create_conversation(
        &self,
        local_user_id: &str,
        other_user_id: &str,
    ) -> Result<String, SyncError> {
        let request = self
            .client
            .post(self.config.chat_endpoint("chat/new"))
            .json(&CreateChatRequest {
                user_id: local_user_id,
                other_user_id,
            });
        let created: CreateChatResponse = self.post(request).await?;
        Ok(created.chat_id)
    }

    async fn send_message(
        &self,
        chat_id: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, SyncError> {
        message.validate()?;
        let form = build_message_form(chat_id, message)?;
        let request = self
            .client
            .post(self.config.chat_endpoint("message"))
            .multipart(form);
        self.post(request).await
    }
}

fn build_message_form(chat_id: &str, message: &OutgoingMessage) -> Result<Form, SyncError> {
    let mut form = Form::new().text("chatId", chat_id.to_owned());
    if let Some(text) = message.sendable_text() {
        form = form.text("text", text.to_owned());
    }
    if let Some(attachment) = &message.attachment {
        let part = Part::bytes(attachment.data.clone())
            .file_name(attachment.file_name.clone())
            .mime_str(&attachment.content_type)
            .map_err(|err| {
                SyncError::new(
                    SyncErrorCategory::Validation,
                    "invalid_attachment",
                    format!("invalid content type '{}': {err}", attachment.content_type),
                )
            })?;
        form = form.part("image", part);
    }
    Ok(form)
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, SyncError> {
    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        return Err(map_status_error(status, &body, retry_after));
    }

    let bytes = response.bytes().await.map_err(map_reqwest_error)?;
    serde_json::from_slice(&bytes).map_err(|err| SyncError::invalid_response(err.to_string()))
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn map_status_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> SyncError {
    let detail: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let mut mapped = SyncError::new(
        classify_http_status(status.as_u16()),
        "http_error",
        format!("{status}: {detail}"),
    );
    if let Some(delay) = retry_after {
        mapped = mapped.with_retry_after(delay);
    }
    mapped
}

fn map_reqwest_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::new(
            SyncErrorCategory::RateLimited,
            "request_timeout",
            err.to_string(),
        )
    } else if err.is_decode() {
        SyncError::invalid_response(err.to_string())
    } else if err.is_builder() {
        SyncError::new(SyncErrorCategory::Config, "invalid_request", err.to_string())
    } else {
        SyncError::transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use chatsync_core::OutgoingAttachment;
    use chatsync_platform::StaticCredential;

    use super::*;

    fn gateway(token: Option<&str>) -> HttpSyncGateway {
        HttpSyncGateway::new(
            HttpGatewayConfig::new("http://127.0.0.1:9/", "http://127.0.0.1:9"),
            Arc::new(StaticCredential::new(token.map(str::to_owned))),
        )
        .expect("gateway should build")
    }

    #[test]
    fn endpoints_follow_service_layout() {
        let config = HttpGatewayConfig::new("http://users:5000/", " http://chats:5002 ");
        assert_eq!(
            config.user_endpoint("profile"),
            "http://users:5000/api/v1/profile"
        );
        assert_eq!(
            config.chat_endpoint("message/c1"),
            "http://chats:5002/api/v1/message/c1"
        );
    }

    #[test]
    fn rejects_missing_service_urls() {
        let err = HttpSyncGateway::new(
            HttpGatewayConfig::new("", "http://chats"),
            Arc::new(StaticCredential::default()),
        )
        .expect_err("empty user service must fail");
        assert_eq!(err.code, "invalid_config");
    }

    #[test]
    fn credential_presence_follows_source() {
        assert!(gateway(Some("t0k3n")).has_credential());
        assert!(!gateway(None).has_credential());
    }

    #[tokio::test]
    async fn calls_without_token_fail_before_network() {
        let gateway = gateway(None);
        let err = gateway
            .fetch_users()
            .await
            .expect_err("missing token must fail");
        assert_eq!(err.code, "no_session");

        let err = gateway
            .create_conversation("u1", "u2")
            .await
            .expect_err("missing token must fail");
        assert_eq!(err.code, "no_session");
    }

    #[tokio::test]
    async fn blank_send_is_rejected_locally() {
        let err = gateway(Some("t0k3n"))
            .send_message("c1", &OutgoingMessage::text("  "))
            .await
            .expect_err("blank message must fail");
        assert_eq!(err.code, "empty_message");
    }

    #[test]
    fn status_errors_keep_category_and_retry_hint() {
        let err = map_status_error(
            StatusCode::TOO_MANY_REQUESTS,
            "slow down",
            Some(Duration::from_secs(4)),
        );
        assert_eq!(err.category, SyncErrorCategory::RateLimited);
        assert_eq!(err.retry_after_ms, Some(4_000));
        assert!(err.message.contains("slow down"));

        let err = map_status_error(StatusCode::UNAUTHORIZED, "", None);
        assert_eq!(err.category, SyncErrorCategory::Auth);
        assert!(!err.is_retryable());
    }

    #[test]
    fn status_error_body_is_truncated() {
        let body = "x".repeat(ERROR_BODY_LIMIT * 4);
        let err = map_status_error(StatusCode::BAD_GATEWAY, &body, None);
        assert!(err.message.len() < ERROR_BODY_LIMIT + 32);
        assert!(err.is_retryable());
    }

    #[test]
    fn message_form_rejects_invalid_content_type() {
        let message = OutgoingMessage {
            text: None,
            attachment: Some(OutgoingAttachment {
                file_name: "cat.png".into(),
                content_type: "not a mime type".into(),
                data: vec![0x89, 0x50],
            }),
        };
        let err = build_message_form("c1", &message).expect_err("bad mime must fail");
        assert_eq!(err.code, "invalid_attachment");

        let message = OutgoingMessage {
            text: Some("caption".into()),
            attachment: Some(OutgoingAttachment {
                file_name: "cat.png".into(),
                content_type: "image/png".into(),
                data: vec![0x89, 0x50],
            }),
        };
        assert!(build_message_form("c1", &message).is_ok());
    }

    #[test]
    fn create_request_uses_camel_case_fields() {
        let body = serde_json::to_value(CreateChatRequest {
            user_id: "u1",
            other_user_id: "u2",
        })
        .expect("request should serialize");
        assert_eq!(body, serde_json::json!({ "userId": "u1", "otherUserId": "u2" }));
    }

    #[tokio::test]
    #[ignore = "runs against live chat services, requires env vars"]
    async fn live_profile_and_conversation_smoke() {
        let user_service =
            env::var("CHATSYNC_USER_SERVICE").expect("CHATSYNC_USER_SERVICE must be set");
        let chat_service =
            env::var("CHATSYNC_CHAT_SERVICE").expect("CHATSYNC_CHAT_SERVICE must be set");
        let token = env::var("CHATSYNC_TOKEN").expect("CHATSYNC_TOKEN must be set");

        let gateway = HttpSyncGateway::new(
            HttpGatewayConfig::new(user_service, chat_service),
            Arc::new(StaticCredential::new(Some(token))),
        )
        .expect("gateway init");
        let profile = gateway.fetch_profile().await.expect("profile");
        let conversations = gateway.fetch_conversations().await.expect("conversations");
        assert!(
            conversations
                .iter()
                .all(|entry| entry.user.id != profile.id)
        );
    }
}
