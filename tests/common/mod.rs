//! In-memory Bot API server for driving `AsyncTelegram` in tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_telegram::{AsyncTelegram, BoxStream, ClientConfig, Connector, Message, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{
    duplex, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream,
};
use tokio::sync::mpsc;

pub const TOKEN: &str = "123456:TEST-TOKEN-abcdef";

/// Hands the client side of a fresh duplex pipe to every `connect`
pub struct FakeConnector {
    streams: mpsc::UnboundedSender<DuplexStream>,
    pub connects: AtomicUsize,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _addr: &str, _port: u16, _server_name: &str) -> Result<BoxStream> {
        let (client, server) = duplex(64 * 1024);
        self.connects.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as the test
        let _ = self.streams.send(server);
        Ok(Box::new(client))
    }
}

#[derive(Debug)]
pub struct Request {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Bot API method from `POST /bot<token>/<method> HTTP/1.0`
    pub fn method(&self) -> &str {
        let path = self.request_line.split_whitespace().nth(1).unwrap_or("");
        path.rsplit('/').next().unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body is not JSON")
    }
}

pub struct FakeServer {
    streams: mpsc::UnboundedReceiver<DuplexStream>,
    current: Option<BufReader<DuplexStream>>,
    pub connector: Arc<FakeConnector>,
}

impl FakeServer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            streams: rx,
            current: None,
            connector: Arc::new(FakeConnector {
                streams: tx,
                connects: AtomicUsize::new(0),
            }),
        }
    }

    pub fn connects(&self) -> usize {
        self.connector.connects.load(Ordering::SeqCst)
    }

    /// Read the next request, following the client to a new connection
    /// when it reconnected
    pub async fn next_request(&mut self) -> Request {
        let mut request_line = String::new();
        loop {
            while let Ok(stream) = self.streams.try_recv() {
                self.current = Some(BufReader::new(stream));
            }
            if self.current.is_none() {
                let stream = tokio::time::timeout(Duration::from_secs(5), self.streams.recv())
                    .await
                    .expect("client never connected")
                    .expect("connector dropped");
                self.current = Some(BufReader::new(stream));
            }
            let reader = self.current.as_mut().unwrap();
            let n = tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut request_line))
                .await
                .expect("no request from client")
                .unwrap();
            if n > 0 {
                break;
            }
            // Client closed this connection
            self.current = None;
        }
        let reader = self.current.as_mut().unwrap();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').unwrap();
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let length: usize = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .map(|(_, v)| v.parse().unwrap())
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await.unwrap();

        Request {
            request_line: request_line.trim_end().to_string(),
            headers,
            body,
        }
    }

    pub async fn reply(&mut self, body: Value) {
        self.reply_with(body, true).await;
    }

    /// Reply, then close the connection like an HTTP/1.0 server would
    pub async fn reply_and_close(&mut self, body: Value) {
        self.reply_with(body, false).await;
        self.current = None;
    }

    pub async fn reply_raw(&mut self, body: &[u8]) {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let stream = self.current.as_mut().unwrap().get_mut();
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
    }

    async fn reply_with(&mut self, body: Value, keep_alive: bool) {
        let body = body.to_string();
        let head = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: {}\r\n\
             \r\n",
            body.len(),
            if keep_alive { "keep-alive" } else { "close" }
        );
        let stream = self.current.as_mut().unwrap().get_mut();
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(body.as_bytes()).await.unwrap();
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        update_interval_ms: 0,
        server_timeout_ms: 2000,
        fallback_ip: None,
        ..ClientConfig::default()
    }
}

pub fn client(server: &FakeServer, config: &ClientConfig) -> AsyncTelegram {
    let mut client = AsyncTelegram::with_connector(config, server.connector.clone());
    client.set_token(TOKEN);
    client
}

/// Call `get_new_message` until it yields a message
pub async fn next_message(client: &mut AsyncTelegram) -> Message {
    for _ in 0..400 {
        if let Some(msg) = client.get_new_message().await.unwrap() {
            return msg;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no message within 2s");
}

/// Call `get_new_message` until the outstanding reply has been consumed
pub async fn drain_reply(client: &mut AsyncTelegram) {
    for _ in 0..400 {
        if !client.is_waiting_reply() {
            return;
        }
        assert!(client.get_new_message().await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("reply never consumed");
}

pub fn ok(result: Value) -> Value {
    json!({ "ok": true, "result": result })
}

pub fn text_update(update_id: i64, chat_id: i64, text: &str) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": 10,
            "date": 1_700_000_000,
            "chat": {"id": chat_id, "type": "private"},
            "from": {"id": chat_id, "is_bot": false, "first_name": "Ada"},
            "text": text
        }
    })
}
