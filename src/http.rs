//! HTTP/1.0 framing over a raw stream.
//!
//! Requests are written as HTTP/1.0 so the Bot API answers with a plain
//! `Content-Length` body instead of chunked transfer coding. Chunked replies
//! are still decoded in case a proxy sits in between.

use std::borrow::Cow;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{Result, TelegramError};

const MAX_HEADER_LINES: usize = 64;
const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;
const MAX_LINE_LEN: u64 = 8 * 1024;

/// Mask a bot token for logging: first 7 chars + `***` + last 4 chars.
/// Tokens of 11 chars or less are fully masked.
pub fn mask_token(token: &str) -> String {
    let len = token.len();
    if len <= 11 || !token.is_char_boundary(7) || !token.is_char_boundary(len - 4) {
        "***".to_string()
    } else {
        format!("{}***{}", &token[..7], &token[len - 4..])
    }
}

/// Build a `POST /bot<token>/<method>` request carrying a JSON body
pub(crate) fn json_request(host: &str, token: &str, method: &str, body: &[u8]) -> Vec<u8> {
    let mut request = format!(
        "POST /bot{}/{} HTTP/1.0\r\n\
         Host: {}\r\n\
         Connection: keep-alive\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         \r\n",
        token,
        method,
        host,
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(body);
    request
}

/// Request head for a `multipart/form-data` upload. The body is streamed
/// separately.
pub(crate) fn multipart_head(
    host: &str,
    token: &str,
    method: &str,
    boundary: &str,
    content_length: u64,
) -> String {
    format!(
        "POST /bot{}/{} HTTP/1.0\r\n\
         Host: {}\r\n\
         Connection: keep-alive\r\n\
         Content-Type: multipart/form-data; boundary={}\r\n\
         Content-Length: {}\r\n\
         \r\n",
        token, method, host, boundary, content_length
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// False when the server closes the stream after this reply
    pub keep_alive: bool,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Read one complete response: status line, headers, then the body framed
/// by `Content-Length`, chunked coding, or end of stream.
pub(crate) async fn read_response<R>(reader: &mut R) -> Result<HttpResponse>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if read_line_limited(reader, &mut line).await? == 0 {
        return Err(TelegramError::Http(
            "connection closed before status line".to_string(),
        ));
    }
    let (version, status) = parse_status_line(line.trim_end())?;

    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    let mut connection: Option<String> = None;
    let mut header_lines = 0;

    loop {
        if read_line_limited(reader, &mut line).await? == 0 {
            return Err(TelegramError::Http(
                "connection closed inside headers".to_string(),
            ));
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }

        header_lines += 1;
        if header_lines > MAX_HEADER_LINES {
            return Err(TelegramError::Http("too many header lines".to_string()));
        }

        let Some((name, value)) = header.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => {
                let length = value.parse::<usize>().map_err(|_| {
                    TelegramError::Http(format!("invalid Content-Length: {}", value))
                })?;
                content_length = Some(length);
            }
            "transfer-encoding" => chunked = value.eq_ignore_ascii_case("chunked"),
            "connection" => connection = Some(value.to_ascii_lowercase()),
            _ => {}
        }
    }

    let mut keep_alive = match connection.as_deref() {
        Some(value) if value.contains("close") => false,
        Some(value) if value.contains("keep-alive") => true,
        _ => version == "HTTP/1.1",
    };

    let body = if chunked {
        read_chunked(reader).await?
    } else if let Some(length) = content_length {
        if length > MAX_BODY_SIZE {
            return Err(TelegramError::Http(format!("body too large: {}", length)));
        }
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        body
    } else {
        // No framing: the body runs until the server closes the stream
        keep_alive = false;
        let mut body = Vec::new();
        reader
            .take(MAX_BODY_SIZE as u64)
            .read_to_end(&mut body)
            .await?;
        body
    };

    Ok(HttpResponse {
        status,
        keep_alive,
        body,
    })
}

fn parse_status_line(line: &str) -> Result<(String, u16)> {
    let mut parts = line.split_whitespace();
    let version = parts
        .next()
        .filter(|v| v.starts_with("HTTP/"))
        .ok_or_else(|| TelegramError::Http(format!("bad status line: {:?}", line)))?;
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| TelegramError::Http(format!("bad status line: {:?}", line)))?;
    Ok((version.to_string(), status))
}

async fn read_chunked<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    let mut line = String::new();

    loop {
        if read_line_limited(reader, &mut line).await? == 0 {
            return Err(TelegramError::Http("truncated chunked body".to_string()));
        }
        let size_field = line.trim().split(';').next().unwrap_or_default();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| TelegramError::Http(format!("bad chunk size: {:?}", size_field)))?;

        if size == 0 {
            // Trailer section ends with an empty line
            loop {
                if read_line_limited(reader, &mut line).await? == 0 || line.trim().is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        if size > MAX_BODY_SIZE.saturating_sub(body.len()) {
            return Err(TelegramError::Http("body too large".to_string()));
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;

        read_line_limited(reader, &mut line).await?;
    }
}

/// Replace `line` with the next line, failing on lines longer than
/// `MAX_LINE_LEN` so a peer that never sends `\n` cannot grow it forever
async fn read_line_limited<R>(reader: &mut R, line: &mut String) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *reader).take(MAX_LINE_LEN).read_line(line).await?;
    if n as u64 >= MAX_LINE_LEN && !line.ends_with('\n') {
        return Err(TelegramError::Http(format!(
            "line longer than {} bytes",
            MAX_LINE_LEN
        )));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token(""), "***");
        assert_eq!(mask_token("123:abc"), "***");
        assert_eq!(
            mask_token("123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw"),
            "1234567***Dsaw"
        );
    }

    #[test]
    fn test_json_request_framing() {
        let body = br#"{"limit":1}"#;
        let request = json_request("api.telegram.org", "TOKEN", "getUpdates", body);
        let text = String::from_utf8(request).unwrap();

        assert!(text.starts_with("POST /botTOKEN/getUpdates HTTP/1.0\r\n"));
        assert!(text.contains("Host: api.telegram.org\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"limit\":1}"));
    }

    #[test]
    fn test_multipart_head() {
        let head = multipart_head("api.telegram.org", "T", "sendPhoto", "XYZ", 1234);
        assert!(head.starts_with("POST /botT/sendPhoto HTTP/1.0\r\n"));
        assert!(head.contains("Content-Type: multipart/form-data; boundary=XYZ\r\n"));
        assert!(head.contains("Content-Length: 1234\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_read_content_length_response() {
        let raw = b"HTTP/1.1 200 OK\r\n\
            Server: nginx\r\n\
            content-length: 11\r\n\
            Connection: keep-alive\r\n\
            \r\n\
            {\"ok\":true}trailing";
        let mut reader = &raw[..];
        let response = read_response(&mut reader).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(response.keep_alive);
        assert_eq!(response.body_text(), "{\"ok\":true}");
        // Bytes after the body stay in the stream for the next reply
        assert_eq!(reader, b"trailing");
    }

    #[tokio::test]
    async fn test_connection_close_header() {
        let raw = b"HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\nContent-Length: 2\r\n\r\nno";
        let response = read_response(&mut &raw[..]).await.unwrap();

        assert_eq!(response.status, 502);
        assert!(!response.keep_alive);
        assert_eq!(response.body, b"no");
    }

    #[tokio::test]
    async fn test_body_until_eof() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{\"ok\":false}";
        let response = read_response(&mut &raw[..]).await.unwrap();

        assert!(!response.keep_alive);
        assert_eq!(response.body_text(), "{\"ok\":false}");
    }

    #[tokio::test]
    async fn test_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
            5\r\n{\"ok\"\r\n\
            6;ext=1\r\n:true}\r\n\
            0\r\n\r\n";
        let response = read_response(&mut &raw[..]).await.unwrap();

        assert!(response.keep_alive);
        assert_eq!(response.body_text(), "{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_malformed_responses() {
        let empty: &[u8] = b"";
        assert!(matches!(
            read_response(&mut &empty[..]).await,
            Err(TelegramError::Http(_))
        ));

        let garbage = b"SSH-2.0-OpenSSH\r\n\r\n";
        assert!(matches!(
            read_response(&mut &garbage[..]).await,
            Err(TelegramError::Http(_))
        ));

        let bad_length = b"HTTP/1.1 200 OK\r\nContent-Length: ten\r\n\r\n";
        assert!(matches!(
            read_response(&mut &bad_length[..]).await,
            Err(TelegramError::Http(_))
        ));

        let truncated = b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\nshort";
        assert!(matches!(
            read_response(&mut &truncated[..]).await,
            Err(TelegramError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_chunk_is_rejected() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
            5\r\nhello\r\n\
            ffffffffffffffff\r\nxx\r\n\
            0\r\n\r\n";
        let err = read_response(&mut &raw[..]).await.unwrap_err();
        assert!(matches!(err, TelegramError::Http(ref msg) if msg.contains("too large")));
    }

    #[tokio::test]
    async fn test_endless_line_is_rejected() {
        let mut status = b"HTTP/1.1 200 OK\r\nX-Padding: ".to_vec();
        status.extend(std::iter::repeat(b'a').take(64 * 1024));
        let err = read_response(&mut &status[..]).await.unwrap_err();
        assert!(matches!(err, TelegramError::Http(ref msg) if msg.contains("line longer")));

        let endless_status = vec![b'H'; 20_000];
        assert!(matches!(
            read_response(&mut &endless_status[..]).await,
            Err(TelegramError::Http(_))
        ));
    }
}
