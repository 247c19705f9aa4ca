//! HTTP fallback: reconciliation polling, sends while the push channel is down, and the
//! session check used when restoring a stored session.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{MessageId, Scope, Watermark},
    error::ApiError,
    protocol::{
        RefreshMessagesQuery, RefreshMessagesResponse, SendMessageHttpRequest,
        SendMessageHttpResponse, SessionCheckResponse, REFRESH_MESSAGES_PATH,
        SEND_MESSAGE_PATH, SESSION_CHECK_PATH, SESSION_TOKEN_HEADER, USER_ID_HEADER,
    },
};
use tracing::debug;

use crate::{
    error::{AuthFailure, SyncError},
    types::SessionContext,
};

#[async_trait]
pub trait FallbackApi: Send + Sync {
    async fn refresh_messages(
        &self,
        session: &SessionContext,
        scope: Scope,
        last_update: Option<&Watermark>,
    ) -> Result<RefreshMessagesResponse, SyncError>;

    async fn send_message(
        &self,
        session: &SessionContext,
        scope: Scope,
        content: &str,
    ) -> Result<Option<MessageId>, SyncError>;

    /// `Ok(false)` means the server answered and the session is gone.
    async fn session_check(&self, session: &SessionContext) -> Result<bool, SyncError>;
}

pub struct HttpFallback {
    http: Client,
    server_url: String,
}

impl HttpFallback {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Generic fallback request. `401`/`403` map to an auth failure, any other non-2xx
    /// status to a request error carrying the server's message when it sent one.
    pub async fn request<Q, B, T>(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, String)],
        query: Option<&Q>,
        body: Option<&B>,
    ) -> Result<T, SyncError>
    where
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.server_url));
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        if let Some(query) = query {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| SyncError::Request(format!("{path}: {err}")))?;
        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            debug!(path, %status, "fallback: session rejected");
            return Err(SyncError::Auth(AuthFailure::SessionExpired));
        }
        if !status.is_success() {
            let detail = match response.json::<ApiError>().await {
                Ok(api_error) => api_error.message,
                Err(_) => status.to_string(),
            };
            return Err(SyncError::Request(format!("{path}: {detail}")));
        }
        response
            .json()
            .await
            .map_err(|err| SyncError::Request(format!("{path}: invalid response body: {err}")))
    }
}

fn session_headers(session: &SessionContext) -> [(&'static str, String); 2] {
    [
        (USER_ID_HEADER, session.user_id.0.to_string()),
        (SESSION_TOKEN_HEADER, session.session_token.clone()),
    ]
}

#[async_trait]
impl FallbackApi for HttpFallback {
    async fn refresh_messages(
        &self,
        session: &SessionContext,
        scope: Scope,
        last_update: Option<&Watermark>,
    ) -> Result<RefreshMessagesResponse, SyncError> {
        let query = RefreshMessagesQuery {
            scope: scope.as_query_value(),
            last_update: last_update.map(|watermark| watermark.as_str().to_string()),
        };
        self.request::<_, (), _>(
            Method::GET,
            REFRESH_MESSAGES_PATH,
            &session_headers(session),
            Some(&query),
            None,
        )
        .await
    }

    async fn send_message(
        &self,
        session: &SessionContext,
        scope: Scope,
        content: &str,
    ) -> Result<Option<MessageId>, SyncError> {
        let body = SendMessageHttpRequest {
            content: content.to_string(),
            scope,
        };
        let response: SendMessageHttpResponse = self
            .request::<(), _, _>(
                Method::POST,
                SEND_MESSAGE_PATH,
                &session_headers(session),
                None,
                Some(&body),
            )
            .await?;
        if !is_success_status(&response.status) {
            return Err(SyncError::Request(format!(
                "{SEND_MESSAGE_PATH}: server reported '{}'",
                response.status
            )));
        }
        Ok(response.message_id)
    }

    async fn session_check(&self, session: &SessionContext) -> Result<bool, SyncError> {
        let checked = self
            .request::<(), (), SessionCheckResponse>(
                Method::GET,
                SESSION_CHECK_PATH,
                &session_headers(session),
                None,
                None,
            )
            .await;
        match checked {
            Ok(response) => Ok(response.valid),
            Err(SyncError::Auth(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

pub fn is_success_status(status: &str) -> bool {
    status.eq_ignore_ascii_case("success") || status.eq_ignore_ascii_case("ok")
}

#[cfg(test)]
#[path = "tests/protocol_client_tests.rs"]
mod tests;
