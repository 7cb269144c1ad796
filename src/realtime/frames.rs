// Realtime wire format.
// Every frame is a JSON object with a top-level `type`; domain events carry
// their payload under `data`, connection-level frames keep fields top-level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic identifier for a post's live updates
pub fn post_topic(post_id: Uuid) -> String {
    format!("post:{}", post_id)
}

/// Entry in the presence snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub is_online: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshotData {
    pub users: Vec<PresenceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChangedData {
    pub user_id: Uuid,
    pub is_online: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewPostData {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub author_display_name: String,
    pub author_username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostLikedData {
    pub post_id: Uuid,
    pub liked_by_user_id: Uuid,
    pub liked_by_display_name: String,
    pub liked_by_username: String,
    pub new_like_count: i32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageData {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_display_name: String,
    pub sender_username: String,
    pub content_preview: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadData {
    pub conversation_id: Uuid,
    pub read_by_user_id: Uuid,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecalledData {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub recalled_by_user_id: Uuid,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicatorData {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_typing: bool,
    pub timestamp: i64,
}

/// Server → client frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Connected { user_id: Uuid },
    PresenceSnapshot { data: PresenceSnapshotData },
    UserPresenceChanged { data: PresenceChangedData },
    #[serde(rename_all = "camelCase")]
    Subscribed { post_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Unsubscribed { post_id: Uuid },
    Pong,
    NewPost { data: NewPostData },
    PostLiked { data: PostLikedData },
    NewMessage { data: NewMessageData },
    MessagesRead { data: MessagesReadData },
    MessageRecalled { data: MessageRecalledData },
    TypingIndicator { data: TypingIndicatorData },
    AuthRevoked { message: String },
    Error { message: String },
}

/// Client → server frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    #[serde(rename_all = "camelCase")]
    SubscribePost { post_id: Uuid },
    #[serde(rename_all = "camelCase")]
    UnsubscribePost { post_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Typing { conversation_id: Uuid },
    #[serde(rename_all = "camelCase")]
    StopTyping { conversation_id: Uuid },
}
