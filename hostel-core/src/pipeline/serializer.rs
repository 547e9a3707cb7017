//! The outermost pipeline stage: wraps the inner result into an
//! [`HttpResponse`], negotiating the body representation and translating
//! every raised [`HttpError`] into a wire response. Nothing else in the
//! engine maps errors to statuses.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use tracing::{debug, error, warn};

use super::{Exchange, Next, Responder};
use crate::codec::SerializerRegistry;
use crate::error::HttpError;
use crate::http::{HttpResponse, MediaType, Payload, Reply, TEXT_PLAIN};

/// Run the chain and produce the final response for a request.
pub async fn respond(
    exchange: &mut Exchange,
    stages: &[Arc<dyn Responder>],
    codecs: &SerializerRegistry,
) -> HttpResponse {
    let result = Next::new(stages).run(exchange).await;
    let accept = exchange.request.accept().to_vec();
    let response = match result {
        Ok(reply) => match render_reply(reply, &accept, codecs) {
            Ok(response) => response,
            Err(err) => render_error(&err, &accept, codecs),
        },
        Err(err) => render_error(&err, &accept, codecs),
    };

    let status = response.status;
    let method = exchange.request.method().as_str();
    let path = exchange.request.path();
    if status.is_server_error() {
        error!(%status, method, path, "request failed");
    } else if status.is_client_error() {
        warn!(%status, method, path, "request rejected");
    } else {
        debug!(%status, method, path, "request handled");
    }
    response
}

/// Render a typed reply, negotiating structured payloads against the Accept
/// list.
pub fn render_reply(
    reply: Reply,
    accept: &[MediaType],
    codecs: &SerializerRegistry,
) -> Result<HttpResponse, HttpError> {
    let (status, mut headers, payload) = reply.into_parts();
    let (media, body) = match payload {
        Payload::Empty => (MediaType::essence_only(TEXT_PLAIN), Bytes::new()),
        Payload::Text(text) => (MediaType::essence_only(TEXT_PLAIN), Bytes::from(text)),
        Payload::Value(value) => {
            let (media, bytes) = codecs.produce(accept, &value)?;
            (media, bytes)
        }
        Payload::Bytes { media, data } => (media, data),
        Payload::Redirect(location) => {
            if let Ok(value) = HeaderValue::from_str(&location) {
                headers.insert(http::header::LOCATION, value);
            }
            (MediaType::essence_only(TEXT_PLAIN), Bytes::new())
        }
    };
    if let Ok(value) = HeaderValue::from_str(&media.to_string()) {
        headers.insert(http::header::CONTENT_TYPE, value);
    }
    Ok(HttpResponse::new(status, headers, body))
}

/// Render an error into its wire form.
pub fn render_error(
    err: &HttpError,
    accept: &[MediaType],
    codecs: &SerializerRegistry,
) -> HttpResponse {
    let status = err.status();
    let mut headers = HeaderMap::new();
    let mut content_type = TEXT_PLAIN.to_string();

    let body = match err {
        HttpError::Validation(errors) => {
            // The error set negotiates like any structured value; JSON is the
            // last resort when the Accept list excludes every codec.
            match codecs.produce(accept, &errors.to_body()) {
                Ok((media, bytes)) => {
                    content_type = media.to_string();
                    bytes
                }
                Err(_) => {
                    content_type = "application/json".to_string();
                    Bytes::from(errors.to_body().to_string())
                }
            }
        }
        HttpError::MethodNotAllowed(allowed) => {
            let verbs: Vec<&str> = allowed.iter().map(|m| m.as_str()).collect();
            if let Ok(value) = HeaderValue::from_str(&verbs.join(", ")) {
                headers.insert(http::header::ALLOW, value);
            }
            Bytes::new()
        }
        HttpError::Unauthorized => {
            headers.insert(
                http::header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer"),
            );
            Bytes::new()
        }
        HttpError::NotFound | HttpError::NotAcceptable => Bytes::new(),
        other => Bytes::from(other.to_string()),
    };

    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(http::header::CONTENT_TYPE, value);
    }
    HttpResponse::new(status, headers, body)
}
