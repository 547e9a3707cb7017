use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use super::media::{parse_accept, parse_accept_language, MediaType};

/// Transport-level facts about the connection a request arrived on.
#[derive(Clone, Debug, Default)]
pub struct ConnectionInfo {
    pub remote_addr: Option<SocketAddr>,
    pub secure: bool,
    pub local_port: u16,
    pub host: String,
}

/// An immutable, already-parsed HTTP/1.1 request.
///
/// The TCP listener and wire parser live outside the engine; they hand over
/// one of these records. Accept lists and the content type are parsed once at
/// construction so the pipeline never re-reads raw header text.
#[derive(Clone)]
pub struct HttpRequest {
    method: Method,
    path: String,
    query: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    content_type: Option<MediaType>,
    content_length: Option<u64>,
    accept: Vec<MediaType>,
    accept_language: Vec<String>,
    connection: ConnectionInfo,
}

impl HttpRequest {
    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::new()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A single header value as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn content_type(&self) -> Option<&MediaType> {
        self.content_type.as_ref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Acceptable response media types, ordered by descending q-value.
    /// Empty means the client did not constrain the response type.
    pub fn accept(&self) -> &[MediaType] {
        &self.accept
    }

    /// Acceptable response languages, ordered by descending q-value.
    pub fn accept_language(&self) -> &[String] {
        &self.accept_language
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    /// The decoded query string as a name → values multimap.
    ///
    /// Repeated names accumulate in declaration order.
    pub fn query_params(&self) -> HashMap<String, Vec<String>> {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in form_urlencoded::parse(self.query.as_bytes()) {
            params
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        params
    }
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// Builder for [`HttpRequest`] records, used by the boundary adapter and by
/// tests.
pub struct HttpRequestBuilder {
    method: Method,
    path: String,
    query: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    connection: ConnectionInfo,
}

impl HttpRequestBuilder {
    fn new() -> Self {
        Self {
            method: Method::GET,
            path: "/".to_string(),
            query: String::new(),
            headers: HeaderMap::new(),
            body: None,
            connection: ConnectionInfo::default(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the request target. A `?query` suffix is split off into the
    /// query-string field.
    pub fn path(mut self, target: &str) -> Self {
        match target.split_once('?') {
            Some((path, query)) => {
                self.path = path.to_string();
                self.query = query.to_string();
            }
            None => self.path = target.to_string(),
        }
        self
    }

    pub fn query(mut self, query: &str) -> Self {
        self.query = query.to_string();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn connection(mut self, connection: ConnectionInfo) -> Self {
        self.connection = connection;
        self
    }

    pub fn build(self) -> HttpRequest {
        let text = |name: &str| {
            self.headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = text("content-type").and_then(|v| MediaType::parse(&v));
        let content_length = text("content-length")
            .and_then(|v| v.parse().ok())
            .or_else(|| self.body.as_ref().map(|b| b.len() as u64));
        let accept = text("accept").map(|v| parse_accept(&v)).unwrap_or_default();
        let accept_language = text("accept-language")
            .map(|v| parse_accept_language(&v))
            .unwrap_or_default();
        HttpRequest {
            method: self.method,
            path: self.path,
            query: self.query,
            headers: self.headers,
            body: self.body,
            content_type,
            content_length,
            accept,
            accept_language,
            connection: self.connection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_and_query_split() {
        let req = HttpRequest::builder().path("/books/7?full=true&tag=a&tag=b").build();
        assert_eq!(req.path(), "/books/7");
        assert_eq!(req.query(), "full=true&tag=a&tag=b");
        let params = req.query_params();
        assert_eq!(params["full"], vec!["true"]);
        assert_eq!(params["tag"], vec!["a", "b"]);
    }

    #[test]
    fn content_type_parsed_once() {
        let req = HttpRequest::builder()
            .method(Method::POST)
            .path("/books")
            .header("content-type", "application/json; charset=utf-8")
            .body(&b"{}"[..])
            .build();
        assert_eq!(req.content_type().unwrap().essence(), "application/json");
        assert_eq!(req.content_length(), Some(2));
    }

    #[test]
    fn accept_order_preserved() {
        let req = HttpRequest::builder()
            .header("accept", "application/xml;q=0.5, application/json")
            .build();
        let essences: Vec<String> = req.accept().iter().map(|m| m.essence()).collect();
        assert_eq!(essences, vec!["application/json", "application/xml"]);
    }

    #[test]
    fn body_length_used_when_header_absent() {
        let req = HttpRequest::builder()
            .method(Method::POST)
            .body(&b"abcde"[..])
            .build();
        assert_eq!(req.content_length(), Some(5));
    }

    #[test]
    fn multi_valued_headers_accumulate() {
        let req = HttpRequest::builder()
            .header("x-tag", "one")
            .header("x-tag", "two")
            .build();
        let values: Vec<&HeaderValue> = req.headers().get_all("x-tag").iter().collect();
        assert_eq!(values.len(), 2);
    }
}
