use crate::error::Result;
use crate::request::Request;

pub const DEFAULT_SERVER: &str = "http://localhost:9800";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct KoorClient {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl KoorClient {
    pub fn new(server: &str, token: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("koor-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: server.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, req: &Request) -> String {
        format!("{}{}", self.base_url, req.path_and_query())
    }

    /// Issues exactly one HTTP call. Non-2xx statuses are not errors here.
    pub fn send(&self, req: &Request) -> Result<Response> {
        let url = self.url(req);
        tracing::debug!(method = %req.method, %url, "sending request");

        let mut builder = self.client.request(req.method.into(), &url);
        if !self.token.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.token));
        }
        if let Some(body) = &req.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body.clone());
        }

        let resp = builder.send()?;
        let status = resp.status().as_u16();
        let body = resp.bytes()?.to_vec();
        tracing::debug!(status, bytes = body.len(), "received response");
        Ok(Response { status, body })
    }

    pub fn get(&self, path: &str) -> Result<Response> {
        self.send(&Request::get(path))
    }
}

/// Rewrites `http`/`https` to `ws`/`wss`; other schemes pass through.
pub fn websocket_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let rewritten = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{rewritten}{path}")
}
