//! Storage network client
//!
//! HTTP implementation of [`StorageNetwork`]. Discovery and submission go
//! through the indexer; segment reads go straight to the storage nodes.
//!
//! Routes:
//! - `GET  {indexer}/v1/nodes/{root}` node list, best first
//! - `POST {indexer}/v1/file` raw file body, answers a submission
//! - `GET  {node}/v1/file/{root}/info` file info
//! - `GET  {node}/v1/file/{root}/segment/{index}` segment with proof
//! - `GET  {node}/v1/file/{root}/entries?start=..&end=..` raw entry range

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use cyxshare_core::{CyxShareError, Result, RootDigest, SegmentProof};
use cyxshare_transfer::{
    FileInfo, SegmentPayload, SegmentResponse, StorageLocation, StorageNetwork, Submission,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Segment body returned by the rich route
#[derive(Debug, Deserialize)]
struct SegmentBody {
    /// Base64 segment bytes
    data: String,
    #[serde(default)]
    proof: Option<SegmentProof>,
}

/// HTTP storage network client
pub struct HttpStorageNetwork {
    client: Client,
    indexer_url: String,
    auth_token: Option<String>,
}

impl HttpStorageNetwork {
    pub fn new(indexer_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CyxShareError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            indexer_url: indexer_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    /// Add authorization header to a request if a token is configured
    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn node_url(node: &StorageLocation, path: &str) -> String {
        format!("{}{}", node.endpoint.trim_end_matches('/'), path)
    }

    async fn get(&self, url: &str) -> Result<Response> {
        debug!(url = %url, "GET");
        self.authorized(self.client.get(url))
            .send()
            .await
            .map_err(network_error)
    }

    /// Map node status codes to tagged segment responses
    async fn segment_response(
        response: Response,
        decode: impl FnOnce(Bytes) -> SegmentResponse,
    ) -> Result<SegmentResponse> {
        match response.status() {
            status if status.is_success() => {
                let body = response.bytes().await.map_err(network_error)?;
                Ok(decode(body))
            }
            StatusCode::NOT_FOUND => Ok(SegmentResponse::NotFound),
            StatusCode::CONFLICT => Ok(SegmentResponse::NotFinalized),
            status => Err(api_error(status, response).await),
        }
    }
}

fn network_error(err: reqwest::Error) -> CyxShareError {
    CyxShareError::Network(err.to_string())
}

async fn api_error(status: StatusCode, response: Response) -> CyxShareError {
    let message = response.text().await.unwrap_or_default();
    CyxShareError::Network(format!("{} - {}", status.as_u16(), message))
}

fn decode_segment(body: Bytes) -> SegmentResponse {
    let parsed: SegmentBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => return SegmentResponse::Malformed(format!("segment body: {}", e)),
    };
    match STANDARD.decode(parsed.data.as_bytes()) {
        Ok(data) => {
            let payload = SegmentPayload::new(Bytes::from(data));
            SegmentResponse::Segment(match parsed.proof {
                Some(proof) => payload.with_proof(proof),
                None => payload,
            })
        }
        Err(e) => SegmentResponse::Malformed(format!("segment data: {}", e)),
    }
}

#[async_trait]
impl StorageNetwork for HttpStorageNetwork {
    async fn discover_nodes(&self, root: &RootDigest) -> Result<Vec<StorageLocation>> {
        let url = format!("{}/v1/nodes/{}", self.indexer_url, root);
        let response = self.get(&url).await?;

        match response.status() {
            status if status.is_success() => response.json().await.map_err(network_error),
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status => Err(api_error(status, response).await),
        }
    }

    async fn file_info(
        &self,
        node: &StorageLocation,
        root: &RootDigest,
    ) -> Result<Option<FileInfo>> {
        let url = Self::node_url(node, &format!("/v1/file/{}/info", root));
        let response = self.get(&url).await?;

        match response.status() {
            status if status.is_success() => {
                let info = response.json().await.map_err(network_error)?;
                Ok(Some(info))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(api_error(status, response).await),
        }
    }

    async fn fetch_segment(
        &self,
        node: &StorageLocation,
        root: &RootDigest,
        segment_index: u64,
    ) -> Result<SegmentResponse> {
        let url = Self::node_url(node, &format!("/v1/file/{}/segment/{}", root, segment_index));
        let response = self.get(&url).await?;
        Self::segment_response(response, decode_segment).await
    }

    async fn download_segment_range(
        &self,
        node: &StorageLocation,
        root: &RootDigest,
        start_entry: u64,
        end_entry: u64,
    ) -> Result<SegmentResponse> {
        let url = Self::node_url(
            node,
            &format!("/v1/file/{}/entries?start={}&end={}", root, start_entry, end_entry),
        );
        let response = self.get(&url).await?;
        Self::segment_response(response, |body| {
            SegmentResponse::Segment(SegmentPayload::new(body))
        })
        .await
    }

    async fn submit_file(&self, data: Bytes) -> Result<Submission> {
        let url = format!("{}/v1/file", self.indexer_url);
        let response = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(network_error)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(CyxShareError::Submission(format!(
                "{} - {}",
                status.as_u16(),
                message
            )))
        }
    }
}
