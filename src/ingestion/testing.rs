//! Test doubles shared by the ingestion tests

use crate::ingestion::error::Result;
use crate::ingestion::fetch::PageSource;
use crate::ingestion::types::{PageCursor, SearchPage, SearchQuery};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Replays canned pages in order and records which pages were asked for
pub struct ScriptedSource {
    responses: Mutex<Vec<Result<SearchPage>>>,
    requested: Mutex<Vec<u32>>,
}

impl ScriptedSource {
    pub fn new(mut responses: Vec<Result<SearchPage>>) -> Self {
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<u32> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(
        &self,
        _query: &SearchQuery,
        cursor: &PageCursor,
    ) -> Result<SearchPage> {
        self.requested.lock().unwrap().push(cursor.current_page);
        self.responses
            .lock()
            .unwrap()
            .pop()
            .expect("no scripted response left")
    }
}

/// A page of simple listings, one per zpid
pub fn page(zpids: &[&str], total_pages: u32) -> Result<SearchPage> {
    Ok(SearchPage {
        listings: zpids
            .iter()
            .map(|z| json!({ "zpid": z, "price": "$500,000", "statusType": "FOR_SALE" }))
            .collect(),
        total_pages,
    })
}

/// One response the fake server sends back
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CannedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// A request as the fake server received it; header names are lowercased
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Local HTTP/1.1 server answering one canned response per connection, in order
pub struct FakeServer {
    listener: Option<TcpListener>,
    url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FakeServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        Self {
            listener: Some(listener),
            url,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn serve(&mut self, responses: Vec<CannedResponse>) {
        let listener = self.listener.take().expect("server already started");
        let requests = self.requests.clone();

        tokio::spawn(async move {
            for response in responses {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);

                let Some(request) = read_request(&mut reader).await else {
                    return;
                };
                requests.lock().unwrap().push(request);

                let reason = StatusCode::from_u16(response.status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason);
                for (name, value) in &response.headers {
                    head.push_str(&format!("{}: {}\r\n", name, value));
                }
                head.push_str(&format!(
                    "content-length: {}\r\nconnection: close\r\n\r\n",
                    response.body.len()
                ));

                let _ = write_half.write_all(head.as_bytes()).await;
                let _ = write_half.write_all(&response.body).await;
                let _ = write_half.shutdown().await;
            }
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request<R>(reader: &mut BufReader<R>) -> Option<RecordedRequest>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        headers.push((name.trim().to_lowercase(), value.trim().to_string()));
    }

    let length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await.ok()?;

    Some(RecordedRequest {
        method,
        target,
        headers,
        body,
    })
}
