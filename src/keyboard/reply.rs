use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ReplyMarkup;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyButtonKind {
    #[default]
    Simple,
    /// Asks the user to share their phone number
    Contact,
    /// Asks the user to share their location
    Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub request_contact: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub request_location: bool,
}

/// Builder for a custom reply `keyboard` shown in place of the user's
/// regular keyboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyKeyboard {
    keyboard: Vec<Vec<KeyboardButton>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    resize_keyboard: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    one_time_keyboard: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    selective: bool,
}

impl Default for ReplyKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyKeyboard {
    pub fn new() -> Self {
        Self {
            keyboard: vec![Vec::new()],
            resize_keyboard: false,
            one_time_keyboard: false,
            selective: false,
        }
    }

    /// Start a new row. Does nothing while the current row is empty.
    pub fn add_row(&mut self) -> &mut Self {
        if self.keyboard.last().is_some_and(|row| !row.is_empty()) {
            self.keyboard.push(Vec::new());
        }
        self
    }

    pub fn add_button(&mut self, text: &str, kind: ReplyButtonKind) -> &mut Self {
        let button = KeyboardButton {
            text: text.to_string(),
            request_contact: kind == ReplyButtonKind::Contact,
            request_location: kind == ReplyButtonKind::Location,
        };
        match self.keyboard.last_mut() {
            Some(row) => row.push(button),
            None => self.keyboard.push(vec![button]),
        }
        self
    }

    /// Shrink the keyboard to fit its buttons
    pub fn enable_resize(&mut self) -> &mut Self {
        self.resize_keyboard = true;
        self
    }

    /// Hide the keyboard once a button was used
    pub fn enable_one_time(&mut self) -> &mut Self {
        self.one_time_keyboard = true;
        self
    }

    /// Show the keyboard only to users @mentioned in the message text, or to
    /// the sender of the message being replied to
    pub fn enable_selective(&mut self) -> &mut Self {
        self.selective = true;
        self
    }

    pub fn button_count(&self) -> usize {
        self.keyboard.iter().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl ReplyMarkup for ReplyKeyboard {
    fn reply_markup(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
