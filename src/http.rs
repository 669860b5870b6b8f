//! Blocking HTTP exchange used by both record sources.
//!
//! One call is one request/response round trip. Nothing here retries: a
//! non-success status or a transport failure (including timeout) is returned
//! as [`CycleError::Network`] and the scheduler decides what happens next.
//!
//! Every call carries a byte limit, normally the capacity of the store the
//! body is parsed into. A body larger than the limit is refused from its
//! `Content-Length` when the server sends one, and otherwise cut off after
//! `limit + 1` bytes, so no more than that is ever buffered.

use reqwest::blocking::{Client, RequestBuilder, Response};
use std::io::Read;
use std::time::{Duration, Instant};

use crate::config::HttpConfig;
use crate::error::{CycleError, CycleResult};

/// Outcome class of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    HttpError(u16),
    TransportError,
    /// The body exceeded `limit` bytes; `received` is what was announced or
    /// read before giving up.
    BodyTooLarge { limit: usize, received: usize },
}

/// Response body plus its status. Consumed by the parse step.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: ResponseStatus,
    pub text: String,
}

impl RawResponse {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            text: text.into(),
        }
    }

    /// Turn a non-success response into a [`CycleError::Network`].
    pub fn into_success(self, what: &str) -> CycleResult<String> {
        match self.status {
            ResponseStatus::Success => Ok(self.text),
            ResponseStatus::HttpError(code) => Err(CycleError::network(
                Some(code),
                format!("{} returned HTTP {}", what, code),
            )),
            ResponseStatus::TransportError => Err(CycleError::network(
                None,
                format!("{} failed: {}", what, self.text),
            )),
            ResponseStatus::BodyTooLarge { limit, received } => Err(CycleError::ParseOverflow {
                capacity: limit,
                required: received,
            }),
        }
    }
}

/// Performs single blocking exchanges with a shared connection pool.
#[derive(Debug, Clone)]
pub struct RemoteRecordClient {
    client: Client,
}

impl RemoteRecordClient {
    pub fn new(config: &HttpConfig) -> CycleResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| CycleError::network(None, format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// `GET url` with the given headers, reading at most `limit` body bytes.
    pub fn get(&self, url: &str, headers: &[(&str, String)], limit: usize) -> RawResponse {
        let mut builder = self.client.get(url);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        execute("GET", url, builder, limit)
    }

    /// `POST url` with a JSON body and the given headers, reading at most
    /// `limit` body bytes.
    pub fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
        limit: usize,
    ) -> RawResponse {
        let mut builder = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        execute("POST", url, builder, limit)
    }
}

/// Join `segments` onto `base`, percent-encoding each one as a single path
/// segment.
pub fn endpoint_url(base: &str, segments: &[&str]) -> CycleResult<reqwest::Url> {
    let mut url = reqwest::Url::parse(base.trim_end_matches('/'))
        .map_err(|e| CycleError::Configuration(format!("invalid base URL '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| CycleError::Configuration(format!("base URL '{}' cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

enum BodyError {
    TooLarge(usize),
    Read(String),
}

/// Read the body as UTF-8 text, refusing anything over `limit` bytes.
fn read_body(response: Response, limit: usize) -> Result<String, BodyError> {
    if let Some(announced) = response.content_length() {
        if announced > limit as u64 {
            return Err(BodyError::TooLarge(usize::try_from(announced).unwrap_or(usize::MAX)));
        }
    }
    let mut buf = Vec::new();
    response
        .take(limit as u64 + 1)
        .read_to_end(&mut buf)
        .map_err(|e| BodyError::Read(e.to_string()))?;
    if buf.len() > limit {
        return Err(BodyError::TooLarge(buf.len()));
    }
    String::from_utf8(buf).map_err(|e| BodyError::Read(format!("body is not valid UTF-8: {}", e)))
}

fn execute(method: &str, url: &str, builder: RequestBuilder, limit: usize) -> RawResponse {
    let started = Instant::now();
    tracing::debug!(method, url, limit, "sending request");

    let response = match builder.send() {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(method, url, error = %e, "request failed before a response");
            return RawResponse {
                status: ResponseStatus::TransportError,
                text: e.to_string(),
            };
        }
    };

    let code = response.status();
    let text = match read_body(response, limit) {
        Ok(t) => t,
        Err(BodyError::TooLarge(received)) if code.is_success() => {
            tracing::warn!(method, url, limit, received, "response body exceeds limit");
            return RawResponse {
                status: ResponseStatus::BodyTooLarge { limit, received },
                text: String::new(),
            };
        }
        // An oversized error page still reports its status.
        Err(BodyError::TooLarge(_)) => String::new(),
        Err(BodyError::Read(e)) => {
            tracing::warn!(method, url, error = %e, "failed to read response body");
            return RawResponse {
                status: ResponseStatus::TransportError,
                text: e,
            };
        }
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    if code.is_success() {
        tracing::info!(method, status = code.as_u16(), bytes = text.len(), elapsed_ms, "response received");
        RawResponse {
            status: ResponseStatus::Success,
            text,
        }
    } else {
        tracing::warn!(method, url, status = code.as_u16(), elapsed_ms, "request rejected");
        RawResponse {
            status: ResponseStatus::HttpError(code.as_u16()),
            text,
        }
    }
}
