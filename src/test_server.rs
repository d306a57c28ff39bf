//! Canned-response Alpaca server for tests.  Speaks just enough HTTP/1.1 to
//! satisfy reqwest, records every request, and answers each API name with a
//! configured `Value` (or error) wrapped in the standard Alpaca envelope.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct MockAlpaca {
    port: u16,
    values: Arc<Mutex<HashMap<String, Value>>>,
    errors: Arc<Mutex<HashMap<String, (i32, String)>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockAlpaca {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mock = Self {
            port,
            values: Arc::new(Mutex::new(HashMap::new())),
            errors: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let server = mock.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let server = server.clone();
                tokio::spawn(async move {
                    server.handle(stream).await;
                });
            }
        });
        mock
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn set_value(&self, api: &str, value: Value) {
        self.values.lock().await.insert(api.to_string(), value);
    }

    pub async fn set_error(&self, api: &str, number: i32, message: &str) {
        self.errors
            .lock()
            .await
            .insert(api.to_string(), (number, message.to_string()));
    }

    /// Requests seen so far, oldest first, as `METHOD api params`.
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }

    async fn handle(&self, mut stream: TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            match stream.read(&mut chunk).await {
                Ok(0) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(_) => return,
            }
            if let Some(pos) = find_header_end(&buf) {
                break pos;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default();

        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target, ""),
        };
        let api = path.rsplit('/').next().unwrap_or_default().to_string();

        let content_length = lines
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buf[header_end + 4..].to_vec();
        while body.len() < content_length {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => body.extend_from_slice(&chunk[..n]),
                Err(_) => return,
            }
        }
        let body = String::from_utf8_lossy(&body).to_string();

        let params = if method == "GET" { query } else { body.as_str() };
        self.requests
            .lock()
            .await
            .push(format!("{} {} {}", method, api, params));

        let envelope = if let Some((number, message)) = self.errors.lock().await.get(&api) {
            json!({
                "Value": Value::Null,
                "ClientTransactionID": 0,
                "ServerTransactionID": 0,
                "ErrorNumber": number,
                "ErrorMessage": message,
            })
        } else {
            let value = self
                .values
                .lock()
                .await
                .get(&api)
                .cloned()
                .unwrap_or(Value::Null);
            json!({
                "Value": value,
                "ClientTransactionID": 0,
                "ServerTransactionID": 0,
                "ErrorNumber": 0,
                "ErrorMessage": "",
            })
        };

        let payload = envelope.to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            payload.len(),
            payload
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
