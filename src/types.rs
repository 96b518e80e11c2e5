use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TelegramError};

/// Kind of content extracted from an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageType {
    /// Nothing we know how to read (stickers, polls, ...)
    #[default]
    NoData,
    Text,
    /// Button press on an inline keyboard
    Query,
    Location,
    Contact,
    Document,
    Reply,
    NewMember,
    LeftMember,
    Forwarded,
    ChannelPost,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::NoData => "no data",
            MessageType::Text => "text",
            MessageType::Query => "callback query",
            MessageType::Location => "location",
            MessageType::Contact => "contact",
            MessageType::Document => "document",
            MessageType::Reply => "reply",
            MessageType::NewMember => "new member",
            MessageType::LeftMember => "left member",
            MessageType::Forwarded => "forwarded",
            MessageType::ChannelPost => "channel post",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "user_id", default)]
    pub id: i64,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(rename = "vcard", default)]
    pub v_card: String,
}

/// A file attached to a message.
///
/// `file_path` and `file_exists` are not part of the update payload; they are
/// filled in by [`crate::AsyncTelegram::get_file`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_size: i64,
    #[serde(skip)]
    pub file_path: String,
    #[serde(skip)]
    pub file_exists: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Message object as sent by the Bot API
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiMessage {
    pub message_id: i64,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub location: Option<Location>,
    pub contact: Option<Contact>,
    pub document: Option<Document>,
    pub reply_to_message: Option<Box<ApiMessage>>,
    pub new_chat_members: Option<Vec<User>>,
    pub left_chat_member: Option<User>,
    pub forward_date: Option<i64>,
    pub forward_origin: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<ApiMessage>,
    pub chat_instance: Option<String>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Update {
    pub update_id: i64,
    pub message: Option<ApiMessage>,
    pub channel_post: Option<ApiMessage>,
    pub callback_query: Option<CallbackQuery>,
}

/// Result of `getFile`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TelegramFile {
    pub file_size: Option<i64>,
    pub file_path: Option<String>,
}

/// Envelope wrapping every Bot API reply
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> Result<T> {
        if !self.ok {
            return Err(TelegramError::Api {
                code: self.error_code,
                description: self
                    .description
                    .unwrap_or_else(|| "Telegram API error".to_string()),
            });
        }
        self.result.ok_or_else(|| TelegramError::Api {
            code: self.error_code,
            description: "Reply has no result".to_string(),
        })
    }
}

/// Flat view of one update: every field any update kind may carry, tagged
/// by `message_type`. Also used as the addressing/formatting argument of
/// outbound calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub is_html_enabled: bool,
    pub is_markdown_enabled: bool,
    pub disable_notification: bool,
    pub force_reply: bool,
    pub update_id: i64,
    pub date: i64,
    pub chat_instance: String,
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub message_id: i64,
    pub sender: User,
    /// User who joined or left a group
    pub member: User,
    pub location: Location,
    pub contact: Contact,
    pub document: Document,
    pub callback_query_id: String,
    pub callback_query_data: String,
    pub text: String,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            message_type: MessageType::NoData,
            is_html_enabled: true,
            is_markdown_enabled: false,
            disable_notification: false,
            force_reply: false,
            update_id: 0,
            date: 0,
            chat_instance: String::new(),
            chat_id: 0,
            chat_title: None,
            message_id: 0,
            sender: User::default(),
            member: User::default(),
            location: Location::default(),
            contact: Contact::default(),
            document: Document::default(),
            callback_query_id: String::new(),
            callback_query_data: String::new(),
            text: String::new(),
        }
    }
}

impl Message {
    /// Empty message addressed to a chat, for sending without a received message
    pub fn to_chat(chat_id: i64) -> Self {
        Self {
            chat_id,
            ..Default::default()
        }
    }

    /// Chat a reply should go to: the chat when known, otherwise the sender.
    ///
    /// The Arduino AsyncTelegram2 library answers `sender.id` first and only
    /// falls back to the chat id, so a group message gets a private reply.
    /// Here a group message is answered in the group.
    pub fn recipient(&self) -> i64 {
        if self.chat_id != 0 {
            self.chat_id
        } else {
            self.sender.id
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if self.date == 0 {
            return None;
        }
        DateTime::from_timestamp(self.date, 0)
    }

    pub(crate) fn from_update(update: Update) -> Self {
        let mut message = Message {
            update_id: update.update_id,
            ..Default::default()
        };

        if let Some(query) = update.callback_query {
            message.sender = query.from;
            message.callback_query_id = query.id;
            message.callback_query_data = query.data.unwrap_or_default();
            message.chat_instance = query.chat_instance.unwrap_or_default();
            if let Some(origin) = query.message {
                message.chat_id = origin.chat.id;
                message.chat_title = origin.chat.title;
                message.message_id = origin.message_id;
                message.date = origin.date;
                message.text = origin.text.unwrap_or_default();
            }
            message.message_type = MessageType::Query;
        } else if let Some(inner) = update.message {
            message.fill_from(inner);
        } else if let Some(post) = update.channel_post {
            message.message_id = post.message_id;
            message.chat_id = post.chat.id;
            message.chat_title = post.chat.title;
            message.date = post.date;
            message.sender = post.from.unwrap_or_default();
            message.text = post.text.or(post.caption).unwrap_or_default();
            message.message_type = MessageType::ChannelPost;
        }

        message
    }

    fn fill_from(&mut self, inner: ApiMessage) {
        self.message_id = inner.message_id;
        self.chat_id = inner.chat.id;
        self.chat_title = inner.chat.title;
        self.date = inner.date;
        self.sender = inner.from.unwrap_or_default();

        self.message_type = if let Some(location) = inner.location {
            self.location = location;
            MessageType::Location
        } else if let Some(contact) = inner.contact {
            self.contact = contact;
            MessageType::Contact
        } else if let Some(document) = inner.document {
            self.document = document;
            self.text = inner.caption.unwrap_or_default();
            MessageType::Document
        } else if let Some(member) = inner.new_chat_members.and_then(|m| m.into_iter().next()) {
            self.member = member;
            MessageType::NewMember
        } else if let Some(member) = inner.left_chat_member {
            self.member = member;
            MessageType::LeftMember
        } else if inner.reply_to_message.is_some() {
            self.text = inner.text.unwrap_or_default();
            MessageType::Reply
        } else if inner.forward_date.is_some() || inner.forward_origin.is_some() {
            self.text = inner.text.or(inner.caption).unwrap_or_default();
            MessageType::Forwarded
        } else if let Some(text) = inner.text {
            self.text = text;
            MessageType::Text
        } else {
            MessageType::NoData
        };
    }
}
