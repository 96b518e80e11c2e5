mod inline;
mod reply;

pub use inline::{Callback, InlineButton, InlineButtonKind, InlineKeyboard};
pub use reply::{KeyboardButton, ReplyButtonKind, ReplyKeyboard};

use serde_json::Value;

use crate::error::Result;

/// Anything that can be sent as a message's `reply_markup`
pub trait ReplyMarkup {
    fn reply_markup(&self) -> Result<Value>;
}

impl ReplyMarkup for Value {
    fn reply_markup(&self) -> Result<Value> {
        Ok(self.clone())
    }
}

/// Raw JSON, e.g. `{"remove_keyboard":true}`
impl ReplyMarkup for str {
    fn reply_markup(&self) -> Result<Value> {
        Ok(serde_json::from_str(self)?)
    }
}

impl ReplyMarkup for String {
    fn reply_markup(&self) -> Result<Value> {
        self.as_str().reply_markup()
    }
}
