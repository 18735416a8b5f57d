use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};

use crate::{ExecutionError, ResponseType};

/// Encoding of an outgoing body.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    Json,
    UrlEncoded,
    Plain,
}

impl BodyType {
    fn content_type(self) -> Option<&'static str> {
        match self {
            Self::Json => Some("application/json; charset=utf-8"),
            Self::UrlEncoded => Some("application/x-www-form-urlencoded"),
            Self::Plain => None,
        }
    }
}

/// Request body before serialization.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    UrlEncoded(Vec<(String, String)>),
    /// Sent as-is, no `Content-Type` is added.
    Plain(String),
}

impl RequestBody {
    pub fn body_type(&self) -> BodyType {
        match self {
            Self::Json(_) => BodyType::Json,
            Self::UrlEncoded(_) => BodyType::UrlEncoded,
            Self::Plain(_) => BodyType::Plain,
        }
    }

    fn encode(&self) -> Result<String, ExecutionError> {
        match self {
            Self::Json(value) => Ok(value.to_string()),
            Self::UrlEncoded(pairs) => serde_urlencoded::to_string(pairs)
                .map_err(|err| ExecutionError::unknown(format!("invalid form body: {err}"))),
            Self::Plain(text) => Ok(text.clone()),
        }
    }
}

/// Per-call request data: query, body and headers.
#[derive(Clone, Debug, Default)]
pub struct RequestData {
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub headers: HeaderMap,
}

impl RequestData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn with_form<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Some(RequestBody::UrlEncoded(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        ));
        self
    }

    pub fn with_text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Plain(body.into()));
        self
    }

    /// Sets a per-call header; it overrides a client header of the same name.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Fully resolved, immutable request handed to the transport.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub body_type: Option<BodyType>,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
}

/// Joins the base and the given URL and appends the query string.
pub(crate) fn build_url(
    base: Option<&str>,
    url: &str,
    query: &[(String, String)],
) -> Result<String, ExecutionError> {
    let base = base.filter(|base| {
        Url::parse(base)
            .ok()
            .is_some_and(|parsed| parsed.host_str().is_some())
    });

    let mut full = match base {
        Some(_) if Url::parse(url).is_ok() => {
            return Err(ExecutionError::unknown(
                "cannot use absolute url with base url",
            ));
        }
        Some(base) => join_url(base, url),
        None => url.to_owned(),
    };

    if !query.is_empty() {
        let encoded = serde_urlencoded::to_string(query)
            .map_err(|err| ExecutionError::unknown(format!("invalid query: {err}")))?;
        full.push(if full.contains('?') { '&' } else { '?' });
        full.push_str(&encoded);
    }
    Ok(full)
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{path}")
    }
}

/// Builds the descriptor: URL, encoded body and merged headers.
///
/// Instance headers are overridden by request headers, and the body's
/// `Content-Type` wins over both.
pub(crate) fn build_descriptor(
    method: Method,
    base: Option<&str>,
    url: &str,
    default_headers: &HeaderMap,
    data: RequestData,
    response_type: ResponseType,
) -> Result<RequestDescriptor, ExecutionError> {
    let url = build_url(base, url, &data.query)?;

    let mut headers = default_headers.clone();
    for (name, value) in data.headers.iter() {
        headers.insert(name.clone(), value.clone());
    }

    let (body, body_type) = match &data.body {
        Some(body) => {
            let body_type = body.body_type();
            if let Some(content_type) = body_type.content_type() {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
            (Some(body.encode()?), Some(body_type))
        }
        None => (None, None),
    };

    Ok(RequestDescriptor {
        method,
        url,
        body,
        body_type,
        headers,
        response_type,
    })
}
