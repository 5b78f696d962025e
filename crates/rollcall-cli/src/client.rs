//! Async HTTP client for the rollcalld JSON API.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

/// Client for one rollcalld instance.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

/// A reply from the daemon: HTTP status plus the JSON envelope.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    /// The envelope's `status` field (`success`, `exists`, `face_mismatch`, `error`).
    pub fn kind(&self) -> &str {
        self.body["status"].as_str().unwrap_or("unknown")
    }

    pub fn message(&self) -> Option<&str> {
        self.body["message"].as_str()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// `POST /api/mark_attendance` with the image read from `image_path`.
    pub async fn mark(
        &self,
        identity_id: &str,
        display_name: &str,
        image_path: &Path,
        confidence: Option<&str>,
    ) -> Result<Reply> {
        let bytes = tokio::fs::read(image_path)
            .await
            .with_context(|| format!("reading image {}", image_path.display()))?;
        let body = json!({
            "identity_id": identity_id,
            "display_name": display_name,
            "image": B64.encode(bytes),
            "confidence": confidence,
        });

        let resp = self
            .client
            .post(self.url("/mark_attendance"))
            .json(&body)
            .send()
            .await
            .context("POST /mark_attendance failed")?;
        read_reply(resp).await
    }

    /// `GET /api/attendance_list`
    pub async fn list(&self) -> Result<Reply> {
        let resp = self
            .client
            .get(self.url("/attendance_list"))
            .send()
            .await
            .context("GET /attendance_list failed")?;
        ensure_success(read_reply(resp).await?)
    }

    /// `GET /api/status`
    pub async fn status(&self) -> Result<Reply> {
        let resp = self
            .client
            .get(self.url("/status"))
            .send()
            .await
            .context("GET /status failed")?;
        ensure_success(read_reply(resp).await?)
    }
}

async fn read_reply(resp: reqwest::Response) -> Result<Reply> {
    let status = resp.status();
    let body = resp
        .json()
        .await
        .with_context(|| format!("daemon answered {status} without a JSON body"))?;
    Ok(Reply { status, body })
}

fn ensure_success(reply: Reply) -> Result<Reply> {
    if reply.status.is_success() {
        Ok(reply)
    } else {
        Err(anyhow!(
            "daemon answered {}: {}",
            reply.status,
            reply.message().unwrap_or("no message")
        ))
    }
}
