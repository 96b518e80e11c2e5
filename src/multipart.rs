//! `multipart/form-data` bodies for `sendPhoto` / `sendDocument`.
//!
//! Only the text parts are held in memory; the file part is copied from the
//! source in fixed-size chunks.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{Result, TelegramError};

/// What to upload and how the Bot API should file it
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    /// Bot API method, e.g. `sendPhoto`
    pub method: String,
    /// Form field holding the file, e.g. `photo`
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub caption: Option<String>,
}

impl FileUpload {
    pub fn photo(file_name: impl Into<String>) -> Self {
        Self {
            method: "sendPhoto".to_string(),
            field: "photo".to_string(),
            file_name: file_name.into(),
            content_type: "image/jpeg".to_string(),
            caption: None,
        }
    }

    pub fn document(file_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            method: "sendDocument".to_string(),
            field: "document".to_string(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

/// Everything of a form except the file bytes
#[derive(Debug, Clone)]
pub(crate) struct FormData {
    pub boundary: String,
    pub preamble: Vec<u8>,
    pub epilogue: Vec<u8>,
}

impl FormData {
    pub fn new(chat_id: i64, upload: &FileUpload) -> Self {
        let boundary = format!("----AsyncTelegramBoundary{}", Uuid::new_v4().simple());
        Self::with_boundary(boundary, chat_id, upload)
    }

    pub fn with_boundary(boundary: String, chat_id: i64, upload: &FileUpload) -> Self {
        let mut preamble = String::new();
        let mut push_field = |name: &str, value: &str| {
            preamble.push_str(&format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                boundary, name, value
            ));
        };
        push_field("chat_id", &chat_id.to_string());
        if let Some(caption) = upload.caption.as_deref() {
            push_field("caption", caption);
        }

        preamble.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            boundary,
            upload.field,
            upload.file_name.replace('"', "_"),
            upload.content_type
        ));
        let epilogue = format!("\r\n--{}--\r\n", boundary);

        Self {
            boundary,
            preamble: preamble.into_bytes(),
            epilogue: epilogue.into_bytes(),
        }
    }

    pub fn content_length(&self, file_size: u64) -> u64 {
        self.preamble.len() as u64 + file_size + self.epilogue.len() as u64
    }
}

/// Copy exactly `size` bytes from `source` to `sink`, one full chunk at a
/// time. A source that ends early is an error.
pub(crate) async fn copy_chunked<R, W>(
    source: &mut R,
    sink: &mut W,
    size: u64,
    chunk_size: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut sent = 0u64;

    while sent < size {
        let want = (size - sent).min(buf.len() as u64) as usize;
        let mut filled = 0;
        while filled < want {
            let n = source.read(&mut buf[filled..want]).await?;
            if n == 0 {
                return Err(TelegramError::UploadSize {
                    read: sent + filled as u64,
                    expected: size,
                });
            }
            filled += n;
        }
        sink.write_all(&buf[..filled]).await?;
        sent += filled as u64;
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_layout() {
        let upload = FileUpload::photo("cam.jpg").with_caption("front door");
        let form = FormData::with_boundary("BOUND".to_string(), 42, &upload);
        let preamble = String::from_utf8(form.preamble.clone()).unwrap();

        assert_eq!(
            preamble,
            "--BOUND\r\nContent-Disposition: form-data; name=\"chat_id\"\r\n\r\n42\r\n\
             --BOUND\r\nContent-Disposition: form-data; name=\"caption\"\r\n\r\nfront door\r\n\
             --BOUND\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"cam.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n"
        );
        assert_eq!(form.epilogue, b"\r\n--BOUND--\r\n");
        assert_eq!(
            form.content_length(1000),
            form.preamble.len() as u64 + 1000 + 13
        );
    }

    #[test]
    fn test_boundaries_are_unique() {
        let upload = FileUpload::document("log.txt", "text/plain");
        let a = FormData::new(1, &upload);
        let b = FormData::new(1, &upload);
        assert_ne!(a.boundary, b.boundary);
        assert_eq!(upload.method, "sendDocument");
    }

    #[tokio::test]
    async fn test_copy_chunked_writes_whole_chunks() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut source = &data[..];
        let mut sink = Vec::new();

        let sent = copy_chunked(&mut source, &mut sink, data.len() as u64, 4096)
            .await
            .unwrap();

        assert_eq!(sent, 10_000);
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn test_copy_stops_at_declared_size() {
        let data = vec![7u8; 100];
        let mut source = &data[..];
        let mut sink = Vec::new();

        copy_chunked(&mut source, &mut sink, 60, 16).await.unwrap();
        assert_eq!(sink.len(), 60);
    }

    #[tokio::test]
    async fn test_short_source_is_an_error() {
        let data = vec![1u8; 10];
        let mut source = &data[..];
        let mut sink = Vec::new();

        let err = copy_chunked(&mut source, &mut sink, 20, 8).await.unwrap_err();
        assert!(matches!(
            err,
            TelegramError::UploadSize {
                read: 10,
                expected: 20
            }
        ));
    }
}
