//! Minimal HTTP collector stub for integration tests.
//!
//! Serves one scripted response per connection and records every request.

#![allow(dead_code)]

use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Request as seen by the stub.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn event_count(&self) -> usize {
        self.body["events"].as_array().map(Vec::len).unwrap_or(0)
    }
}

pub struct StubCollector {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    server: Option<JoinHandle<()>>,
}

impl StubCollector {
    /// Start a stub that answers the given `(status, body)` pairs in order,
    /// one per request, then stops accepting.
    pub fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}/api", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        let server = thread::spawn(move || {
            for (status, body) in responses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                if let Some(request) = handle(stream, status, body) {
                    recorded.lock().unwrap().push(request);
                }
            }
        });

        Self {
            base_url,
            requests,
            server: Some(server),
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Wait until every scripted response was served.
    pub fn finish(mut self) -> Vec<Recorded> {
        if let Some(server) = self.server.take() {
            server.join().unwrap();
        }
        self.requests()
    }
}

fn handle(stream: TcpStream, status: u16, body: &str) -> Option<Recorded> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    let mut content_length = 0;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            let (key, value) = (key.trim().to_string(), value.trim().to_string());
            if key.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((key, value));
        }
    }

    let mut raw_body = vec![0u8; content_length];
    reader.read_exact(&mut raw_body).ok()?;

    let reason = match status {
        200 => "OK",
        401 => "Unauthorized",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    let mut stream = stream;
    stream.write_all(response.as_bytes()).ok()?;
    stream.flush().ok()?;

    Some(Recorded {
        method,
        path,
        headers,
        body: serde_json::from_slice(&raw_body).unwrap_or(Value::Null),
    })
}
