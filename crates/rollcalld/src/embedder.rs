//! HTTP client for the external face embedding service.
//!
//! The service takes raw image bytes and answers
//! `{"faces": [[f32, ...], ...], "model": "<name>"}`. An empty `faces` array
//! means no face was found; otherwise the first face is used.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use rollcall_core::{EmbedError, Embedder, Embedding};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    faces: Vec<Vec<f32>>,
    #[serde(default)]
    model: Option<String>,
}

/// [`Embedder`] backed by an HTTP embedding service.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
}

impl HttpEmbedder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Embedder for HttpEmbedder {
    async fn extract<'a>(&'a self, image: &'a [u8]) -> Result<Embedding, EmbedError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| EmbedError::Backend(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbedError::Backend(format!("embedder returned {status}")));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Backend(format!("invalid response body: {e}")))?;
        tracing::debug!(faces = body.faces.len(), bytes = image.len(), "embedder answered");

        first_face(body)
    }
}

fn first_face(body: EmbedResponse) -> Result<Embedding, EmbedError> {
    let values = body
        .faces
        .into_iter()
        .next()
        .ok_or(EmbedError::NoFaceFound)?;

    if values.is_empty() {
        return Err(EmbedError::Backend("embedder returned an empty vector".into()));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(EmbedError::Backend("embedder returned non-finite values".into()));
    }

    Ok(Embedding {
        values,
        model_version: body.model,
    })
}
