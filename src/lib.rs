//! Telegram Bot API client driven by a cooperative polling loop.
//!
//! ```no_run
//! # async fn run() -> async_telegram::Result<()> {
//! use async_telegram::{AsyncTelegram, ClientConfig, MessageType};
//!
//! let mut bot = AsyncTelegram::new(&ClientConfig::default())?;
//! bot.set_token("123456:ABC-DEF");
//! bot.begin().await?;
//! loop {
//!     if let Some(msg) = bot.get_new_message().await? {
//!         if msg.message_type == MessageType::Text {
//!             let text = msg.text.clone();
//!             bot.send_message(&msg, &text).await?;
//!         }
//!     }
//!     tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//! }
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod keyboard;
pub mod multipart;
pub mod transport;
pub mod types;

pub use client::{AsyncTelegram, MAX_INLINE_KEYBOARDS};
pub use config::{ClientConfig, Config};
pub use error::{Result, TelegramError};
pub use keyboard::{
    Callback, InlineButton, InlineButtonKind, InlineKeyboard, KeyboardButton, ReplyButtonKind,
    ReplyKeyboard, ReplyMarkup,
};
pub use multipart::FileUpload;
pub use transport::{BoxStream, Connector, TcpConnector, TlsConnector};
pub use types::{Chat, Contact, Document, Location, Message, MessageType, User};
