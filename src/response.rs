use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::Stream;
use reqwest::header::HeaderMap;

use crate::{RequestDescriptor, StatusCategory, TransportError};

/// Body type the caller expects to receive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    #[default]
    Json,
    Text,
    Binary,
    Stream,
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Unbuffered response body.
// The mutex is only there to make the handle `Sync`; polling goes through
// `get_mut` and never locks.
pub struct BodyStream(Mutex<ByteStream>);

impl BodyStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, TransportError>> + Send + 'static,
    {
        Self(Mutex::new(Box::pin(stream)))
    }

    pub fn into_inner(self) -> ByteStream {
        self.0
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        match self.0.get_mut() {
            Ok(stream) => stream.as_mut().poll_next(cx),
            Err(poisoned) => poisoned.into_inner().as_mut().poll_next(cx),
        }
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyStream(..)")
    }
}

/// Decoded response body.
#[derive(Debug)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Text(String),
    Binary(Bytes),
    Stream(BodyStream),
    /// Expected JSON but the payload did not parse; holds the raw text.
    Mismatch(String),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::Mismatch(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

/// Classified response returned from an execution.
#[derive(Debug)]
pub struct ResponseEnvelope {
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase, empty when unknown.
    pub status_text: String,
    pub headers: HeaderMap,
    /// Body decoded according to the request's [`ResponseType`].
    pub body: ResponseBody,
    /// Class of `status`.
    pub category: StatusCategory,
    /// `true` when the envelope was reconstituted from the cache store.
    pub cached: bool,
    /// The request that produced this response.
    pub request: Arc<RequestDescriptor>,
}

impl ResponseEnvelope {
    /// Deserializes a JSON body into `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.body
            .as_json()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Decodes a buffered payload according to the expected body type.
///
/// Stream bodies never pass through here; the transport hands them over
/// unbuffered.
pub(crate) fn decode_buffered(expected: ResponseType, payload: Bytes) -> ResponseBody {
    match expected {
        ResponseType::Json => {
            let text = String::from_utf8_lossy(&payload).into_owned();
            match serde_json::from_str(&text) {
                Ok(value) => ResponseBody::Json(value),
                Err(_) => ResponseBody::Mismatch(text),
            }
        }
        ResponseType::Text => ResponseBody::Text(String::from_utf8_lossy(&payload).into_owned()),
        ResponseType::Binary | ResponseType::Stream => ResponseBody::Binary(payload),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::{decode_buffered, ResponseBody, ResponseType};

    #[test]
    fn json_payload_decodes() {
        let body = decode_buffered(ResponseType::Json, Bytes::from_static(br#"{"ok":true}"#));
        assert_eq!(body.as_json(), Some(&json!({"ok": true})));
    }

    #[test]
    fn json_null_is_a_valid_payload() {
        let body = decode_buffered(ResponseType::Json, Bytes::from_static(b"null"));
        assert_eq!(body.as_json(), Some(&serde_json::Value::Null));
    }

    #[test]
    fn invalid_json_keeps_raw_text() {
        let body = decode_buffered(ResponseType::Json, Bytes::from_static(b"<html>"));
        assert!(matches!(body, ResponseBody::Mismatch(ref raw) if raw == "<html>"));
    }

    #[test]
    fn text_is_never_parsed() {
        let body = decode_buffered(ResponseType::Text, Bytes::from_static(b"{not json"));
        assert_eq!(body.as_text(), Some("{not json"));
    }
}
