use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ReplyMarkup;
use crate::error::Result;
use crate::types::Message;

/// Handler run when a button with matching callback data is pressed
pub type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineButtonKind {
    /// Opens a link
    Url,
    /// Sends a callback query carrying the button's data
    Query,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct InlineMarkup {
    inline_keyboard: Vec<Vec<InlineButton>>,
}

/// Builder for an `inline_keyboard` reply markup.
///
/// Buttons added with [`InlineKeyboard::add_button_with_callback`] carry a
/// handler; register the keyboard with
/// [`crate::AsyncTelegram::add_inline_keyboard`] and the client calls the
/// handler when the matching callback query arrives.
#[derive(Clone)]
pub struct InlineKeyboard {
    rows: Vec<Vec<InlineButton>>,
    callbacks: Vec<(String, Callback)>,
}

impl std::fmt::Debug for InlineKeyboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineKeyboard")
            .field("rows", &self.rows)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Default for InlineKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl InlineKeyboard {
    pub fn new() -> Self {
        Self {
            rows: vec![Vec::new()],
            callbacks: Vec::new(),
        }
    }

    /// Load buttons from an existing `{"inline_keyboard":[[...]]}` document
    pub fn from_json(json: &str) -> Result<Self> {
        let markup: InlineMarkup = serde_json::from_str(json)?;
        let mut rows = markup.inline_keyboard;
        if rows.is_empty() {
            rows.push(Vec::new());
        }
        Ok(Self {
            rows,
            callbacks: Vec::new(),
        })
    }

    /// Start a new row. Does nothing while the current row is empty.
    pub fn add_row(&mut self) -> &mut Self {
        if self.rows.last().is_some_and(|row| !row.is_empty()) {
            self.rows.push(Vec::new());
        }
        self
    }

    /// Add a button to the current row. `command` is the URL for
    /// [`InlineButtonKind::Url`] and the callback data for
    /// [`InlineButtonKind::Query`].
    pub fn add_button(&mut self, text: &str, command: &str, kind: InlineButtonKind) -> &mut Self {
        let button = match kind {
            InlineButtonKind::Url => InlineButton {
                text: text.to_string(),
                url: Some(command.to_string()),
                callback_data: None,
            },
            InlineButtonKind::Query => InlineButton {
                text: text.to_string(),
                url: None,
                callback_data: Some(command.to_string()),
            },
        };
        self.push(button);
        self
    }

    pub fn add_button_with_callback<F>(&mut self, text: &str, data: &str, on_click: F) -> &mut Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.add_button(text, data, InlineButtonKind::Query);
        self.callbacks.push((data.to_string(), Arc::new(on_click)));
        self
    }

    pub fn button_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn has_callbacks(&self) -> bool {
        !self.callbacks.is_empty()
    }

    pub fn rows(&self) -> &[Vec<InlineButton>] {
        &self.rows
    }

    /// Remove every button and handler
    pub fn clear(&mut self) {
        self.rows = vec![Vec::new()];
        self.callbacks.clear();
    }

    pub fn to_json(&self) -> String {
        self.markup().to_string()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.markup()).unwrap_or_default()
    }

    /// Run every handler registered for the query's callback data.
    /// Returns how many ran.
    pub(crate) fn dispatch(&self, message: &Message) -> usize {
        let mut called = 0;
        for (data, callback) in &self.callbacks {
            if *data == message.callback_query_data {
                callback(message);
                called += 1;
            }
        }
        called
    }

    fn push(&mut self, button: InlineButton) {
        match self.rows.last_mut() {
            Some(row) => row.push(button),
            None => self.rows.push(vec![button]),
        }
    }

    fn markup(&self) -> Value {
        serde_json::json!({ "inline_keyboard": self.rows })
    }
}

impl ReplyMarkup for InlineKeyboard {
    fn reply_markup(&self) -> Result<Value> {
        Ok(self.markup())
    }
}
