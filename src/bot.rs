use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use async_telegram::{
    AsyncTelegram, Config, InlineButtonKind, InlineKeyboard, Message, MessageType,
    ReplyButtonKind, ReplyKeyboard,
};

use crate::scheduler::tasks::Notification;

const LOOP_TICK: Duration = Duration::from_millis(50);
const MAX_MESSAGE_LEN: usize = 4000;
const MAX_DOWNLOAD_SIZE: i64 = 1024 * 1024;
const LIGHT_ON: &str = "LIGHT_ON";
const LIGHT_OFF: &str = "LIGHT_OFF";
const SAMPLE_PHOTO_URL: &str = "https://telegram.org/img/t_logo.png";

/// Shared application state
pub struct AppState {
    config: Config,
    lights_on: Arc<AtomicBool>,
    lights_keyboard: InlineKeyboard,
    main_keyboard: ReplyKeyboard,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let lights_on = Arc::new(AtomicBool::new(false));
        Self {
            config,
            lights_keyboard: lights_keyboard(lights_on.clone()),
            lights_on,
            main_keyboard: main_keyboard(),
        }
    }
}

/// Poll Telegram and deliver scheduled notifications until Ctrl-C
pub async fn run(
    mut client: AsyncTelegram,
    state: AppState,
    mut notifications: mpsc::UnboundedReceiver<Notification>,
) -> Result<()> {
    client.add_inline_keyboard(&state.lights_keyboard)?;

    let mut tick = tokio::time::interval(LOOP_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Polling for updates as @{}", client.bot_name());
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match client.get_new_message().await {
                    Ok(Some(msg)) => {
                        if let Err(e) = handle_message(&mut client, &state, &msg).await {
                            error!("Error handling {} from chat {}: {}", msg.message_type, msg.chat_id, e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Polling failed: {}", e),
                }
            }
            Some(note) = notifications.recv() => {
                info!("Sending scheduled notification to {}", note.chat_id);
                if let Err(e) = client.send_to(note.chat_id, &note.text).await {
                    error!("Scheduled notification to {} failed: {}", note.chat_id, e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_message(client: &mut AsyncTelegram, state: &AppState, msg: &Message) -> Result<()> {
    if msg.message_type != MessageType::ChannelPost && !state.config.is_allowed(msg.sender.id) {
        debug!("Ignoring {} from user {}", msg.message_type, msg.sender.id);
        return Ok(());
    }

    match msg.message_type {
        MessageType::Text => handle_text(client, state, msg).await?,
        MessageType::Query => {
            let on = state.lights_on.load(Ordering::SeqCst);
            let answer = if on { "Light on" } else { "Light off" };
            client.end_query(msg, answer, false).await?;
            client
                .edit_message(msg, &lights_status(on), Some(&state.lights_keyboard))
                .await?;
        }
        MessageType::Location => {
            let text = format!(
                "Location received:\nlatitude {}\nlongitude {}",
                msg.location.latitude, msg.location.longitude
            );
            client.send_message(&plain(msg), &text).await?;
        }
        MessageType::Contact => {
            let text = format!(
                "Contact received: {} {} ({})",
                msg.contact.first_name, msg.contact.last_name, msg.contact.phone_number
            );
            client.send_message(&plain(msg), &text).await?;
        }
        MessageType::Document => handle_document(client, msg).await?,
        MessageType::NewMember => {
            let text = format!("Welcome {}!", msg.member.first_name);
            client.send_message(&plain(msg), &text).await?;
        }
        MessageType::LeftMember => {
            let text = format!("Goodbye {}", msg.member.first_name);
            client.send_message(&plain(msg), &text).await?;
        }
        MessageType::Reply => {
            let text = format!("You replied: {}", msg.text);
            client.send_message(&plain(msg), &text).await?;
        }
        MessageType::Forwarded => {
            info!("Forwarded message in chat {}, sending it back to {}", msg.chat_id, msg.sender.id);
            client.forward_message(msg, msg.sender.id).await?;
        }
        MessageType::ChannelPost => {
            info!(
                "Post in {}: {}",
                msg.chat_title.as_deref().unwrap_or("channel"),
                msg.text
            );
        }
        MessageType::NoData => debug!("Update {} carries nothing to handle", msg.update_id),
    }

    Ok(())
}

async fn handle_text(client: &mut AsyncTelegram, state: &AppState, msg: &Message) -> Result<()> {
    info!("Message from user {}: {}", msg.sender.id, msg.text);

    match msg.text.trim() {
        "/start" => {
            let text = format!(
                "Hello {}! Commands:\n\
                 /lights - toggle the light\n\
                 /photo - get a picture\n\
                 /remove - hide the keyboard",
                msg.sender.first_name
            );
            client
                .send_message_with_keyboard(&plain(msg), &text, &state.main_keyboard)
                .await?;
        }
        "/lights" => {
            let on = state.lights_on.load(Ordering::SeqCst);
            client
                .send_message_with_keyboard(msg, &lights_status(on), &state.lights_keyboard)
                .await?;
        }
        "/remove" => {
            client
                .remove_reply_keyboard(msg, "Keyboard removed", true)
                .await?;
        }
        "/photo" => {
            client
                .send_photo_by_url(msg.recipient(), SAMPLE_PHOTO_URL, "Telegram logo")
                .await?;
        }
        text => {
            for chunk in split_message(text, MAX_MESSAGE_LEN) {
                client.send_message(&plain(msg), &chunk).await?;
            }
        }
    }

    Ok(())
}

async fn handle_document(client: &mut AsyncTelegram, msg: &Message) -> Result<()> {
    let document = &msg.document;
    if !document.file_exists {
        let text = format!("{} is not available for download", document.file_name);
        client.send_message(&plain(msg), &text).await?;
        return Ok(());
    }

    let text = if document.file_size <= MAX_DOWNLOAD_SIZE {
        let bytes = client.download_file(document).await?;
        format!("Received {} ({} bytes)", document.file_name, bytes.len())
    } else {
        format!(
            "{} is {} bytes, too large to fetch here",
            document.file_name, document.file_size
        )
    };
    client.send_message(&plain(msg), &text).await?;
    Ok(())
}

/// Reply to `msg` without a parse mode so user text is sent verbatim
fn plain(msg: &Message) -> Message {
    Message {
        is_html_enabled: false,
        is_markdown_enabled: false,
        ..msg.clone()
    }
}

fn lights_status(on: bool) -> String {
    format!("The light is <b>{}</b>", if on { "ON" } else { "OFF" })
}

fn lights_keyboard(lights_on: Arc<AtomicBool>) -> InlineKeyboard {
    let on = lights_on.clone();
    let off = lights_on;

    let mut kb = InlineKeyboard::new();
    kb.add_button_with_callback("Light ON", LIGHT_ON, move |msg| {
        info!("Light switched on by {}", msg.sender.id);
        on.store(true, Ordering::SeqCst);
    })
    .add_button_with_callback("Light OFF", LIGHT_OFF, move |msg| {
        info!("Light switched off by {}", msg.sender.id);
        off.store(false, Ordering::SeqCst);
    })
    .add_row()
    .add_button(
        "Bot API docs",
        "https://core.telegram.org/bots/api",
        InlineButtonKind::Url,
    );
    kb
}

fn main_keyboard() -> ReplyKeyboard {
    let mut kb = ReplyKeyboard::new();
    kb.add_button("/lights", ReplyButtonKind::Simple)
        .add_button("/photo", ReplyButtonKind::Simple)
        .add_row()
        .add_button("Share contact", ReplyButtonKind::Contact)
        .add_button("Share location", ReplyButtonKind::Location)
        .add_row()
        .add_button("/remove", ReplyButtonKind::Simple)
        .enable_resize()
        .enable_one_time();
    kb
}

fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }

        // Prefer splitting after a newline or space
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}
