use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;

use crate::{BodyStream, RequestDescriptor, ResponseType, TransportError};

/// Raw result of one attempt, before classification.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: RawBody,
}

/// Buffered payload, or an unbuffered stream when the caller asked for
/// [`ResponseType::Stream`].
#[derive(Debug)]
pub enum RawBody {
    Buffered(Bytes),
    Stream(BodyStream),
}

/// Sends a single attempt.
///
/// Implementations should return [`TransportError::Cancelled`] promptly once
/// `cancel` fires. The executor stops waiting on a cancelled attempt either
/// way.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &RequestDescriptor,
        cancel: CancellationToken,
    ) -> Result<RawResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured `reqwest` client (proxies, TLS, pools).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        cancel: CancellationToken,
    ) -> Result<RawResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let work = async {
            let response = builder.send().await?;
            let status = response.status();
            let status_text = status.canonical_reason().unwrap_or_default().to_owned();
            let headers = response.headers().clone();

            // The body read belongs to the attempt, so it stays under the
            // same cancellation as the send.
            let body = match request.response_type {
                ResponseType::Stream => RawBody::Stream(BodyStream::new(
                    response
                        .bytes_stream()
                        .map(|chunk| chunk.map_err(TransportError::from)),
                )),
                _ => RawBody::Buffered(response.bytes().await?),
            };

            Ok::<_, TransportError>(RawResponse {
                status: status.as_u16(),
                status_text,
                headers,
                body,
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = work => result,
        }
    }
}
