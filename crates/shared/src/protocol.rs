use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        ContentKind, GroupId, GroupSummary, MessageBody, MessageId, Scope, Sequence, UserId,
        UserSummary, Watermark,
    },
    error::ApiError,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

pub const REFRESH_MESSAGES_PATH: &str = "/refresh-messages";
pub const SEND_MESSAGE_PATH: &str = "/api/send-message";
pub const SESSION_CHECK_PATH: &str = "/session-check";

/// Push-channel frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientRequest {
    /// Identity announcement, sent on every transition into `connected`.
    Identify {
        user_id: UserId,
        session_token: String,
    },
    Join {
        scope: Scope,
        session_token: String,
        cursor: Option<Sequence>,
        limit: u32,
    },
    Send {
        scope: Scope,
        content: String,
        session_token: String,
    },
    DeleteMessage {
        message_id: MessageId,
        user_id: UserId,
        session_token: String,
    },
    GetOnlineUsers,
}

impl ClientRequest {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientRequest::Identify { .. } => "identify",
            ClientRequest::Join { .. } => "join",
            ClientRequest::Send { .. } => "send",
            ClientRequest::DeleteMessage { .. } => "delete-message",
            ClientRequest::GetOnlineUsers => "get-online-users",
        }
    }
}

/// A message as it travels over the wire. Every field is optional so a malformed
/// entry can be skipped without failing the whole batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<Sequence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub sender_display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar_ref: Option<String>,
    #[serde(default)]
    pub content_kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessageBody>,
}

/// Push-channel frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Reply to `join`. Initial pages are newest-first; `load_more` pages are already
    /// in prepend order.
    History {
        messages: Vec<MessagePayload>,
        #[serde(default)]
        last_update: Option<Watermark>,
        #[serde(default)]
        load_more: bool,
    },
    MessageReceived {
        message: MessagePayload,
    },
    MessageDeleted {
        message_id: MessageId,
    },
    OnlineUsers {
        users: Vec<UserSummary>,
    },
    UsersUpdated {
        users: Vec<UserSummary>,
    },
    SessionExpired,
    AccountLoggedInElsewhere {
        #[serde(default)]
        message: String,
    },
    GroupCreated {
        group: GroupSummary,
    },
    GroupNameUpdated {
        group_id: GroupId,
        name: String,
    },
    MembersAdded {
        group_id: GroupId,
        members: Vec<UserId>,
    },
    MemberRemoved {
        group_id: GroupId,
        user_id: UserId,
    },
    GroupDissolved {
        group_id: GroupId,
    },
    AllGroupMessagesRecalled {
        group_id: GroupId,
    },
    Error(ApiError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshMessagesQuery {
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshMessagesResponse {
    pub status: String,
    #[serde(default)]
    pub has_new_messages: bool,
    #[serde(default)]
    pub messages: Vec<MessagePayload>,
    #[serde(default)]
    pub last_update: Option<Watermark>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageHttpRequest {
    pub content: String,
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageHttpResponse {
    pub status: String,
    #[serde(default)]
    pub message_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCheckResponse {
    pub valid: bool,
}
