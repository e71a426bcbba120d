//! HTTP Generation Port.
//!
//! `POST {base}/debate/turn` streams NDJSON records for one agent turn;
//! `POST {base}/debate/decision` returns the raw decision text. The
//! scheduler owns per-turn timeouts, so the client only bounds connects.

use std::time::Duration;

use async_trait::async_trait;
use coordination::debate::{
    BoxChunkStream, ChunkStream, DecisionRequest, GenerationError, GenerationPort, TurnRequest,
};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on the one-shot decision call.
const DECISION_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HttpGenerationPort {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerationPort {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.post(url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn send_json<T: serde::Serialize + ?Sized>(
        &self,
        req: reqwest::RequestBuilder,
        body: &T,
    ) -> Result<reqwest::Response, GenerationError> {
        let response = req
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationPort for HttpGenerationPort {
    async fn open_turn(&self, request: TurnRequest) -> Result<BoxChunkStream, GenerationError> {
        debug!(agent = %request.agent_id, round = request.round, "opening turn stream");
        let response = self
            .send_json(
                self.post("/debate/turn")
                    .header(reqwest::header::ACCEPT, "application/x-ndjson"),
                &request,
            )
            .await?;
        Ok(Box::new(HttpChunkStream {
            response: Some(response),
        }))
    }

    async fn complete_decision(
        &self,
        request: DecisionRequest,
    ) -> Result<String, GenerationError> {
        let response = self
            .send_json(
                self.post("/debate/decision").timeout(DECISION_TIMEOUT),
                &request,
            )
            .await?;
        response
            .text()
            .await
            .map_err(|e| GenerationError::Stream(e.to_string()))
    }
}

/// Response body read frame by frame. Dropping the response releases the
/// connection.
struct HttpChunkStream {
    response: Option<reqwest::Response>,
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, GenerationError>> {
        let response = self.response.as_mut()?;
        match response.chunk().await {
            Ok(Some(bytes)) => Some(Ok(bytes.to_vec())),
            Ok(None) => {
                self.response = None;
                None
            }
            Err(e) => {
                self.response = None;
                Some(Err(GenerationError::Stream(e.to_string())))
            }
        }
    }

    async fn close(&mut self) {
        if self.response.take().is_some() {
            debug!("turn stream closed");
        }
    }
}
