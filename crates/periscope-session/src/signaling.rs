use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use url::Url;

use crate::error::{SessionError, SessionResult};

pub const SDP_CONTENT_TYPE: &str = "application/sdp";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingRequest {
    pub source_id: String,
    pub offer_sdp: String,
}

/// Offer/answer exchange with the media gateway. Returns the raw answer SDP.
#[async_trait]
pub trait SignalingBackend: Send + Sync {
    async fn exchange(&self, request: &SignalingRequest) -> SessionResult<String>;
}

/// `POST <base>/api/webrtc?src=<source>` with the offer as an `application/sdp`
/// body.
pub struct HttpSignaling {
    client: reqwest::Client,
    base: Url,
}

impl HttpSignaling {
    pub fn new(base: Url) -> SessionResult<Self> {
        Self::with_request_timeout(base, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(base: Url, timeout: Duration) -> SessionResult<Self> {
        if base.cannot_be_a_base() {
            return Err(SessionError::InvalidConfig(format!(
                "signaling url {base} cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|err| SessionError::Setup(format!("http client: {err}")))?;
        Ok(Self { client, base })
    }

    pub fn endpoint_for(&self, source_id: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.push("api");
            segments.push("webrtc");
        }
        url.set_query(None);
        url.query_pairs_mut().append_pair("src", source_id);
        url
    }
}

#[async_trait]
impl SignalingBackend for HttpSignaling {
    async fn exchange(&self, request: &SignalingRequest) -> SessionResult<String> {
        let endpoint = self.endpoint_for(&request.source_id);
        debug!(
            target = "periscope::signaling",
            source = %request.source_id,
            endpoint = %endpoint,
            offer_len = request.offer_sdp.len(),
            "posting offer"
        );
        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(request.offer_sdp.clone())
            .send()
            .await
            .map_err(|err| SessionError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                target = "periscope::signaling",
                source = %request.source_id,
                status = status.as_u16(),
                body = %body,
                "signaling endpoint rejected offer"
            );
            return Err(SessionError::Signaling {
                status: status.as_u16(),
                body,
            });
        }

        response
            .text()
            .await
            .map_err(|err| SessionError::Network(err.to_string()))
    }
}
