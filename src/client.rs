//! The Bot API client.
//!
//! Every command travels over one kept-alive stream and at most one reply is
//! outstanding at a time. Non-blocking commands leave their reply pending;
//! it is consumed by [`AsyncTelegram::get_new_message`] or just before the
//! next command is written.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{Result, TelegramError};
use crate::http::{self, mask_token, HttpResponse};
use crate::keyboard::{InlineKeyboard, ReplyMarkup};
use crate::multipart::{self, FileUpload, FormData};
use crate::transport::{Connection, Connector, TlsConnector};
use crate::types::{ApiResponse, Document, Message, MessageType, TelegramFile, Update, User};

/// Inline keyboards whose callbacks can be registered at once
pub const MAX_INLINE_KEYBOARDS: usize = 10;

const ALLOWED_UPDATES: [&str; 3] = ["message", "callback_query", "channel_post"];
const QUERY_CACHE_TIME: u32 = 30;
const UNPARSEABLE_NOTICE: &str =
    "Sorry, this message could not be processed and has been skipped.";

#[derive(Debug, Clone)]
struct PendingReply {
    method: String,
    sent_at: Instant,
}

impl PendingReply {
    fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            sent_at: Instant::now(),
        }
    }
}

pub struct AsyncTelegram {
    conn: Connection,
    token: String,
    bot_username: String,
    last_update_id: i64,
    update_interval: Duration,
    server_timeout: Duration,
    chunk_size: usize,
    last_poll: Option<Instant>,
    pending: Option<PendingReply>,
    keyboards: Vec<InlineKeyboard>,
    http: reqwest::Client,
}

impl AsyncTelegram {
    /// Client speaking TLS to the configured host, trusting either the
    /// webpki roots or the pinned `ca_cert_path`
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let connector: Arc<dyn Connector> = match &config.ca_cert_path {
            Some(path) => Arc::new(TlsConnector::with_pinned_file(path)?),
            None => Arc::new(TlsConnector::new()),
        };
        Ok(Self::with_connector(config, connector))
    }

    pub fn with_connector(config: &ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let fallback_ip = config.fallback_ip.clone().filter(|ip| !ip.is_empty());
        Self {
            conn: Connection::new(connector, config.host.clone(), fallback_ip, config.port),
            token: String::new(),
            bot_username: String::new(),
            last_update_id: 0,
            update_interval: config.update_interval(),
            server_timeout: config.server_timeout(),
            chunk_size: config.upload_chunk_size.max(1),
            last_poll: None,
            pending: None,
            keyboards: Vec::new(),
            http: reqwest::Client::new(),
        }
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
    }

    /// Minimum time between two polls
    pub fn set_update_time(&mut self, interval: Duration) {
        self.update_interval = interval;
    }

    /// Username reported by `getMe`, empty before [`AsyncTelegram::begin`]
    pub fn bot_name(&self) -> &str {
        &self.bot_username
    }

    /// Offset the next poll acknowledges
    pub fn last_update_id(&self) -> i64 {
        self.last_update_id
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Whether a reply to a non-blocking command is still outstanding
    pub fn is_waiting_reply(&self) -> bool {
        self.pending.is_some()
    }

    /// Connect and check the token with `getMe`
    pub async fn begin(&mut self) -> Result<()> {
        if self.token.is_empty() {
            return Err(TelegramError::MissingToken);
        }
        self.conn.ensure_connected().await?;
        let me = self.get_me().await?;
        info!("Bot @{} is online (id {})", me.username, me.id);
        Ok(())
    }

    pub async fn get_me(&mut self) -> Result<User> {
        let result = self.execute("getMe", &json!({})).await?;
        let me: User = serde_json::from_value(result)?;
        self.bot_username = me.username.clone();
        Ok(me)
    }

    /// Drop the stream and any outstanding reply, then reconnect
    pub async fn reset(&mut self) -> Result<()> {
        debug!("Restart connection to {}", self.conn.host());
        self.pending = None;
        self.conn.disconnect();
        self.conn.ensure_connected().await?;
        Ok(())
    }

    /// Poll for the next update without blocking on the network.
    ///
    /// A `getUpdates` request goes out when the update interval has elapsed
    /// and nothing else is pending. Its reply is only read once bytes are
    /// available, so most calls return `Ok(None)` immediately.
    pub async fn get_new_message(&mut self) -> Result<Option<Message>> {
        if let Some(pending) = &self.pending {
            if pending.sent_at.elapsed() > self.server_timeout {
                warn!(
                    "No reply to {} after {:?}, resetting connection",
                    pending.method, self.server_timeout
                );
                self.reset().await?;
            }
        }

        let due = self
            .last_poll
            .map_or(true, |at| at.elapsed() >= self.update_interval);
        if due && self.pending.is_none() {
            self.last_poll = Some(Instant::now());
            self.poll_updates().await?;
        }

        let Some(pending) = self.pending.clone() else {
            return Ok(None);
        };
        if !self.conn.has_data() {
            if !self.conn.is_connected() {
                warn!("Connection lost while waiting for reply to {}", pending.method);
                self.pending = None;
            }
            return Ok(None);
        }

        let response = self.read_reply().await?;
        if pending.method != "getUpdates" {
            log_reply(&pending.method, &response);
            return Ok(None);
        }
        self.handle_updates(&response.body).await
    }

    /// Ask for updates after the last one seen and report whether there are
    /// none. Blocks until the reply arrives.
    pub async fn no_new_message(&mut self) -> Result<bool> {
        let body = json!({
            "offset": self.last_update_id,
            "limit": 1,
            "timeout": 0,
        });
        let result = self.execute("getUpdates", &body).await?;
        Ok(result.as_array().map_or(true, |updates| updates.is_empty()))
    }

    pub async fn send_message(&mut self, msg: &Message, text: &str) -> Result<()> {
        self.send_text(msg, text, None).await
    }

    /// Send `text` with a reply markup: an [`InlineKeyboard`], a
    /// [`crate::ReplyKeyboard`] or raw JSON
    pub async fn send_message_with_keyboard<K>(
        &mut self,
        msg: &Message,
        text: &str,
        keyboard: &K,
    ) -> Result<()>
    where
        K: ReplyMarkup + ?Sized,
    {
        let markup = keyboard.reply_markup()?;
        self.send_text(msg, text, Some(markup)).await
    }

    pub async fn send_to(&mut self, user_id: i64, text: &str) -> Result<()> {
        self.send_message(&Message::to_chat(user_id), text).await
    }

    /// Post to a channel by `@username` or numeric id
    pub async fn send_to_channel(&mut self, channel: &str, text: &str, silent: bool) -> Result<()> {
        if text.is_empty() {
            return Err(TelegramError::EmptyText);
        }
        let mut body = json!({ "chat_id": channel, "text": text });
        if silent {
            body["disable_notification"] = json!(true);
        }
        self.post("sendMessage", &body).await
    }

    pub async fn send_photo_by_url(
        &mut self,
        chat_id: i64,
        url: &str,
        caption: &str,
    ) -> Result<()> {
        if url.is_empty() {
            return Err(TelegramError::InvalidArgument("photo URL is empty".to_string()));
        }
        let mut body = json!({ "chat_id": chat_id, "photo": url });
        if !caption.is_empty() {
            body["caption"] = json!(caption);
        }
        self.post("sendPhoto", &body).await
    }

    /// Upload `size` bytes from `source` as a JPEG photo
    pub async fn send_photo_by_file<R>(
        &mut self,
        chat_id: i64,
        source: &mut R,
        size: u64,
        file_name: &str,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.send_document(chat_id, &FileUpload::photo(file_name), source, size)
            .await
    }

    /// Stream a `multipart/form-data` upload in fixed-size chunks. The reply
    /// is left pending like any other non-blocking command.
    pub async fn send_document<R>(
        &mut self,
        chat_id: i64,
        upload: &FileUpload,
        source: &mut R,
        size: u64,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if self.token.is_empty() {
            return Err(TelegramError::MissingToken);
        }
        self.settle_pending().await;

        let form = FormData::new(chat_id, upload);
        let head = http::multipart_head(
            self.conn.host(),
            &self.token,
            &upload.method,
            &form.boundary,
            form.content_length(size),
        );
        let chunk_size = self.chunk_size;
        let stream = self.conn.ensure_connected().await?;

        info!(
            "Uploading {} ({} bytes) with {}",
            upload.file_name, size, upload.method
        );
        let started = Instant::now();
        let sent = async {
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(&form.preamble).await?;
            multipart::copy_chunked(&mut *source, &mut *stream, size, chunk_size).await?;
            stream.write_all(&form.epilogue).await?;
            stream.flush().await?;
            Ok::<(), TelegramError>(())
        }
        .await;

        if let Err(e) = sent {
            warn!("Upload of {} failed: {}", upload.file_name, e);
            self.conn.disconnect();
            return Err(e);
        }
        debug!(
            "Uploaded {} in {} ms",
            upload.file_name,
            started.elapsed().as_millis()
        );
        self.pending = Some(PendingReply::new(&upload.method));
        Ok(())
    }

    /// Replace the text (and optionally the inline keyboard) of a message
    /// the bot sent earlier
    pub async fn edit_message(
        &mut self,
        msg: &Message,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()> {
        if text.is_empty() {
            return Err(TelegramError::EmptyText);
        }
        let mut body = json!({
            "chat_id": msg.recipient(),
            "message_id": msg.message_id,
            "text": text,
        });
        if let Some(mode) = parse_mode(msg) {
            body["parse_mode"] = json!(mode);
        }
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = keyboard.reply_markup()?;
        }
        self.post("editMessageText", &body).await
    }

    pub async fn forward_message(&mut self, msg: &Message, to_chat_id: i64) -> Result<()> {
        let body = json!({
            "chat_id": to_chat_id,
            "from_chat_id": msg.chat_id,
            "message_id": msg.message_id,
        });
        self.post("forwardMessage", &body).await
    }

    /// Answer a callback query so the client stops its progress indicator.
    /// With `alert` the text is shown as a dialog instead of a toast.
    pub async fn end_query(&mut self, msg: &Message, text: &str, alert: bool) -> Result<()> {
        if msg.callback_query_id.is_empty() {
            return Err(TelegramError::MissingCallbackQuery);
        }
        let mut body = json!({
            "callback_query_id": msg.callback_query_id,
            "cache_time": QUERY_CACHE_TIME,
        });
        if !text.is_empty() {
            body["text"] = json!(text);
            body["show_alert"] = json!(alert);
        }
        self.execute("answerCallbackQuery", &body).await?;
        Ok(())
    }

    pub async fn remove_reply_keyboard(
        &mut self,
        msg: &Message,
        text: &str,
        selective: bool,
    ) -> Result<()> {
        let mut markup = json!({ "remove_keyboard": true });
        if selective {
            markup["selective"] = json!(true);
        }
        self.send_message_with_keyboard(msg, text, &markup).await
    }

    /// Resolve the download URL of a document. Sets `file_exists` on success.
    pub async fn get_file(&mut self, document: &mut Document) -> Result<()> {
        document.file_exists = false;
        let result = self
            .execute("getFile", &json!({ "file_id": document.file_id }))
            .await?;
        let file: TelegramFile = serde_json::from_value(result)?;
        let Some(path) = file.file_path else {
            return Err(TelegramError::Api {
                code: None,
                description: format!("{} is not available for download", document.file_name),
            });
        };

        document.file_path = format!(
            "https://{}/file/bot{}/{}",
            self.conn.host(),
            self.token,
            path
        );
        if let Some(size) = file.file_size {
            document.file_size = size;
        }
        document.file_exists = true;
        Ok(())
    }

    /// Fetch a document resolved by [`AsyncTelegram::get_file`]
    pub async fn download_file(&self, document: &Document) -> Result<Vec<u8>> {
        if !document.file_exists || document.file_path.is_empty() {
            return Err(TelegramError::InvalidArgument(format!(
                "{} has no download path",
                document.file_name
            )));
        }
        debug!("Downloading {}", document.file_name);
        // The URL embeds the token, keep it out of errors
        let response = self
            .http
            .get(&document.file_path)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(reqwest::Error::without_url)?;
        let bytes = response
            .bytes()
            .await
            .map_err(reqwest::Error::without_url)?;
        info!("Downloaded {} ({} bytes)", document.file_name, bytes.len());
        Ok(bytes.to_vec())
    }

    /// Register a keyboard so its callbacks run when a matching query
    /// arrives. Keyboards without callbacks are ignored.
    pub fn add_inline_keyboard(&mut self, keyboard: &InlineKeyboard) -> Result<()> {
        if !keyboard.has_callbacks() {
            debug!("Inline keyboard has no callbacks, not registering it");
            return Ok(());
        }
        if self.keyboards.len() >= MAX_INLINE_KEYBOARDS {
            return Err(TelegramError::KeyboardLimit(MAX_INLINE_KEYBOARDS));
        }
        self.keyboards.push(keyboard.clone());
        Ok(())
    }

    pub fn clear_inline_keyboards(&mut self) {
        self.keyboards.clear();
    }

    async fn send_text(&mut self, msg: &Message, text: &str, markup: Option<Value>) -> Result<()> {
        if text.is_empty() {
            return Err(TelegramError::EmptyText);
        }
        let mut body = json!({ "chat_id": msg.recipient(), "text": text });
        if let Some(mode) = parse_mode(msg) {
            body["parse_mode"] = json!(mode);
        }
        if msg.disable_notification {
            body["disable_notification"] = json!(true);
        }
        if let Some(markup) = with_force_reply(markup, msg.force_reply) {
            body["reply_markup"] = markup;
        }
        self.post("sendMessage", &body).await
    }

    async fn poll_updates(&mut self) -> Result<()> {
        let mut body = json!({
            "limit": 1,
            "timeout": 0,
            "allowed_updates": ALLOWED_UPDATES,
        });
        if self.last_update_id != 0 {
            body["offset"] = json!(self.last_update_id);
        }
        self.post("getUpdates", &body).await
    }

    async fn handle_updates(&mut self, body: &[u8]) -> Result<Option<Message>> {
        let reply: ApiResponse<Vec<Value>> = match serde_json::from_slice(body) {
            Ok(reply) => reply,
            Err(e) => {
                self.skip_bad_update(&String::from_utf8_lossy(body), &e).await;
                return Ok(None);
            }
        };
        let Some(raw) = reply.into_result()?.into_iter().next() else {
            return Ok(None);
        };
        let update: Update = match serde_json::from_value(raw.clone()) {
            Ok(update) => update,
            Err(e) => {
                self.skip_bad_update(&raw.to_string(), &e).await;
                return Ok(None);
            }
        };

        self.last_update_id = update.update_id + 1;
        let mut message = Message::from_update(update);
        debug!(
            "Update {} from chat {}: {}",
            message.update_id, message.chat_id, message.message_type
        );

        match message.message_type {
            MessageType::Document => {
                let mut document = std::mem::take(&mut message.document);
                if let Err(e) = self.get_file(&mut document).await {
                    warn!("getFile for {} failed: {}", document.file_name, e);
                }
                message.document = document;
            }
            MessageType::Query => {
                let handled: usize = self
                    .keyboards
                    .iter()
                    .map(|keyboard| keyboard.dispatch(&message))
                    .sum();
                debug!(
                    "Callback {:?} ran {} handler(s)",
                    message.callback_query_data, handled
                );
            }
            _ => {}
        }

        Ok(Some(message))
    }

    /// Step over an update that cannot be decoded so it is not delivered
    /// again, and tell its chat when the id can be recovered
    async fn skip_bad_update(&mut self, raw: &str, err: &serde_json::Error) {
        error!("Unable to parse update: {}", err);
        let Some(update_id) = find_update_id(raw) else {
            warn!("No update_id in unparseable reply, it will be fetched again");
            return;
        };
        self.last_update_id = update_id + 1;

        if let Some(chat_id) = find_chat_id(raw) {
            let notice = Message {
                is_html_enabled: false,
                ..Message::to_chat(chat_id)
            };
            if let Err(e) = self.send_message(&notice, UNPARSEABLE_NOTICE).await {
                warn!("Failed to notify chat {}: {}", chat_id, e);
            }
        }
    }

    /// Write a command and wait for its reply
    async fn execute(&mut self, method: &str, body: &Value) -> Result<Value> {
        self.write_command(method, body).await?;
        let response = self.read_reply().await?;
        let reply: ApiResponse<Value> = serde_json::from_slice(&response.body)?;
        let result = reply.into_result();
        if let Err(e) = &result {
            error!("{} failed: {}", method, e);
        }
        result
    }

    /// Write a command and leave its reply pending
    async fn post(&mut self, method: &str, body: &Value) -> Result<()> {
        self.write_command(method, body).await
    }

    async fn write_command(&mut self, method: &str, body: &Value) -> Result<()> {
        if self.token.is_empty() {
            return Err(TelegramError::MissingToken);
        }
        self.settle_pending().await;

        let payload = serde_json::to_vec(body)?;
        let request = http::json_request(self.conn.host(), &self.token, method, &payload);
        let stream = self.conn.ensure_connected().await?;
        let written = match stream.write_all(&request).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("Failed to send {}: {}", method, e);
            self.conn.disconnect();
            return Err(e.into());
        }

        debug!(
            "POST /bot{}/{} ({} bytes)",
            mask_token(&self.token),
            method,
            payload.len()
        );
        self.pending = Some(PendingReply::new(method));
        Ok(())
    }

    /// Consume the reply of an earlier non-blocking command so the next
    /// command does not mistake it for its own
    async fn settle_pending(&mut self) {
        let Some(pending) = self.pending.clone() else {
            return;
        };
        match self.read_reply().await {
            Ok(_) if pending.method == "getUpdates" => {
                debug!("Discarded getUpdates reply, updates will be fetched again")
            }
            Ok(response) => log_reply(&pending.method, &response),
            Err(e) => warn!("Lost reply to {}: {}", pending.method, e),
        }
    }

    async fn read_reply(&mut self) -> Result<HttpResponse> {
        let method = self
            .pending
            .take()
            .map(|pending| pending.method)
            .unwrap_or_default();
        let host = self.conn.host().to_string();
        let Some(stream) = self.conn.stream() else {
            return Err(TelegramError::NotConnected(host));
        };

        let read = tokio::time::timeout(self.server_timeout, http::read_response(stream)).await;
        match read {
            Ok(Ok(response)) => {
                if !response.keep_alive {
                    self.conn.disconnect();
                }
                if response.status != 200 {
                    debug!("{} answered with HTTP {}", method, response.status);
                }
                Ok(response)
            }
            Ok(Err(e)) => {
                self.conn.disconnect();
                Err(e)
            }
            Err(_) => {
                self.conn.disconnect();
                Err(TelegramError::Timeout { method })
            }
        }
    }
}

fn log_reply(method: &str, response: &HttpResponse) {
    match serde_json::from_slice::<ApiResponse<Value>>(&response.body) {
        Ok(reply) if reply.ok => debug!("{} ok", method),
        Ok(reply) => error!(
            "{} failed ({:?}): {}",
            method,
            reply.error_code,
            reply.description.unwrap_or_default()
        ),
        Err(e) => warn!("{} reply is not JSON: {}", method, e),
    }
}

/// `parse_mode` for outbound text. HTML wins when both flags are set.
fn parse_mode(msg: &Message) -> Option<&'static str> {
    if msg.is_html_enabled {
        Some("HTML")
    } else if msg.is_markdown_enabled {
        Some("MarkdownV2")
    } else {
        None
    }
}

fn with_force_reply(markup: Option<Value>, force_reply: bool) -> Option<Value> {
    if !force_reply {
        return markup;
    }
    let mut markup = match markup {
        Some(Value::Object(map)) => Value::Object(map),
        _ => json!({}),
    };
    markup["force_reply"] = json!(true);
    markup["selective"] = json!(true);
    Some(markup)
}

fn find_update_id(raw: &str) -> Option<i64> {
    integer_after(raw, "\"update_id\"")
}

fn find_chat_id(raw: &str) -> Option<i64> {
    let mut rest = raw;
    while let Some(at) = rest.find("\"chat\"") {
        rest = &rest[at + "\"chat\"".len()..];
        let value = rest.trim_start().strip_prefix(':').map(str::trim_start);
        if let Some(object) = value.and_then(|v| v.strip_prefix('{')) {
            return integer_after(object, "\"id\"");
        }
    }
    None
}

/// Integer value of the first `key` in a possibly truncated JSON text
fn integer_after(raw: &str, key: &str) -> Option<i64> {
    let rest = &raw[raw.find(key)? + key.len()..];
    let rest = rest.trim_start().strip_prefix(':')?.trim_start();
    let end = rest
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(rest.len(), |(i, _)| i);
    rest[..end].parse().ok()
}
