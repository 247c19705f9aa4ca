//! Message builders shared by the unit tests.

use shared::{
    domain::{ContentKind, MessageBody, MessageId, Scope, Sequence, UserId},
    protocol::MessagePayload,
};

use crate::types::ChatMessage;

pub(crate) const LOCAL_USER: UserId = UserId(1);
pub(crate) const OTHER_USER: UserId = UserId(2);

pub(crate) fn message(scope: Scope, sequence: i64) -> ChatMessage {
    message_from(scope, sequence, OTHER_USER)
}

pub(crate) fn message_from(scope: Scope, sequence: i64, sender: UserId) -> ChatMessage {
    ChatMessage {
        id: message_id(scope, sequence),
        sequence: Sequence(sequence),
        timestamp: None,
        scope,
        sender_id: sender,
        sender_display_name: format!("user-{}", sender.0),
        sender_avatar_ref: None,
        content_kind: ContentKind::Text,
        body: MessageBody::Text(format!("message {sequence}")),
    }
}

pub(crate) fn message_id(scope: Scope, sequence: i64) -> MessageId {
    MessageId(format!("{scope}-{sequence}"))
}

pub(crate) fn payload(scope: Scope, sequence: i64) -> MessagePayload {
    payload_from(scope, sequence, OTHER_USER)
}

pub(crate) fn payload_from(scope: Scope, sequence: i64, sender: UserId) -> MessagePayload {
    MessagePayload {
        id: Some(message_id(scope, sequence)),
        sequence: Some(Sequence(sequence)),
        timestamp: None,
        scope: Some(scope),
        sender_id: Some(sender),
        sender_display_name: format!("user-{}", sender.0),
        sender_avatar_ref: None,
        content_kind: ContentKind::Text,
        payload: Some(MessageBody::Text(format!("message {sequence}"))),
    }
}

pub(crate) fn payloads(scope: Scope, sequences: impl IntoIterator<Item = i64>) -> Vec<MessagePayload> {
    sequences
        .into_iter()
        .map(|sequence| payload(scope, sequence))
        .collect()
}

pub(crate) fn seqs(range: impl IntoIterator<Item = i64>) -> Vec<Sequence> {
    range.into_iter().map(Sequence).collect()
}
