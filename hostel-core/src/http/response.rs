use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;

use super::media::MediaType;
use crate::error::HttpError;

/// The typed result a handler (or a pipeline stage) produces.
///
/// A `Reply` is not yet wire-ready: the serializer stage negotiates the body
/// representation and renders it into an [`HttpResponse`].
#[derive(Debug)]
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    payload: Payload,
}

/// The body of a [`Reply`] before negotiation.
#[derive(Debug)]
pub enum Payload {
    Empty,
    /// Plain text, rendered as `text/plain; charset=utf-8`.
    Text(String),
    /// A structured value; the negotiated codec picks the representation.
    Value(serde_json::Value),
    /// Pre-encoded bytes with a fixed media type.
    Bytes { media: MediaType, data: Bytes },
    /// A redirect target; rendered with a `Location` header and no body.
    Redirect(String),
}

impl Reply {
    pub fn new(status: StatusCode, payload: Payload) -> Reply {
        Reply {
            status,
            headers: HeaderMap::new(),
            payload,
        }
    }

    /// `200 OK` with no body.
    pub fn ok() -> Reply {
        Reply::new(StatusCode::OK, Payload::Empty)
    }

    /// `204 No Content`.
    pub fn no_content() -> Reply {
        Reply::new(StatusCode::NO_CONTENT, Payload::Empty)
    }

    /// `200 OK` with a plain-text body.
    pub fn text(text: impl Into<String>) -> Reply {
        Reply::new(StatusCode::OK, Payload::Text(text.into()))
    }

    /// `200 OK` carrying a structured value for content negotiation.
    ///
    /// Serialization failures surface as internal errors rather than
    /// panicking inside a handler.
    pub fn value<T: Serialize>(value: &T) -> Result<Reply, HttpError> {
        let value = serde_json::to_value(value)
            .map_err(|e| HttpError::Internal(format!("unserializable reply: {e}")))?;
        Ok(Reply::new(StatusCode::OK, Payload::Value(value)))
    }

    /// `200 OK` with pre-encoded bytes of a fixed media type.
    pub fn bytes(media: MediaType, data: impl Into<Bytes>) -> Reply {
        Reply::new(
            StatusCode::OK,
            Payload::Bytes {
                media,
                data: data.into(),
            },
        )
    }

    /// `303 See Other` to the given location.
    pub fn see_other(location: impl Into<String>) -> Reply {
        Reply::new(StatusCode::SEE_OTHER, Payload::Redirect(location.into()))
    }

    /// `302 Found` to the given location.
    pub fn redirect(location: impl Into<String>) -> Reply {
        Reply::new(StatusCode::FOUND, Payload::Redirect(location.into()))
    }

    /// `202 Accepted` with a `Location` pointing at a feedback URL.
    pub fn accepted_at(location: impl Into<String>) -> Reply {
        Reply::new(StatusCode::ACCEPTED, Payload::Redirect(location.into()))
    }

    /// Replace the status while keeping the payload.
    pub fn with_status(mut self, status: StatusCode) -> Reply {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Reply {
        if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), HeaderValue::from_str(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Payload) {
        (self.status, self.headers, self.payload)
    }

    /// Whether this reply is a redirect (or a URL-shaped result).
    pub fn is_redirect(&self) -> bool {
        matches!(self.payload, Payload::Redirect(_))
    }
}

/// A wire-ready response: status, headers, and a fully rendered body.
///
/// Always carries `Content-Type`, `Content-Length` and `Date`; `Location`
/// when redirecting; `WWW-Authenticate` on 401.
#[derive(Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, mut headers: HeaderMap, body: Bytes) -> HttpResponse {
        let length = HeaderValue::from_str(&body.len().to_string())
            .unwrap_or(HeaderValue::from_static("0"));
        headers.insert(http::header::CONTENT_LENGTH, length);
        if !headers.contains_key(http::header::DATE) {
            if let Ok(date) = HeaderValue::from_str(&http_date_now()) {
                headers.insert(http::header::DATE, date);
            }
        }
        HttpResponse {
            status,
            headers,
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// The current time in IMF-fixdate form, e.g. `Sat, 01 Aug 2026 12:00:00 GMT`.
pub fn http_date_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
