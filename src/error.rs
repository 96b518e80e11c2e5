use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Bot token is not set")]
    MissingToken,

    #[error("Unable to connect to {0}")]
    NotConnected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Timed out waiting for reply to {method}")]
    Timeout { method: String },

    #[error("Malformed HTTP response: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Telegram API error ({code:?}): {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    #[error("Message text is empty")]
    EmptyText,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Message has no callback query id")]
    MissingCallbackQuery,

    #[error("Too many inline keyboards with callbacks (max {0})")]
    KeyboardLimit(usize),

    #[error("Upload source ended after {read} of {expected} bytes")]
    UploadSize { read: u64, expected: u64 },

    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),
}

impl TelegramError {
    /// True for failures that leave the connection unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TelegramError::NotConnected(_)
                | TelegramError::Io(_)
                | TelegramError::Tls(_)
                | TelegramError::Timeout { .. }
                | TelegramError::Http(_)
                | TelegramError::UploadSize { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TelegramError>;
