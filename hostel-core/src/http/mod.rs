//! The engine's HTTP data model: immutable request records, typed replies,
//! wire-ready responses, and media-type handling.

pub mod media;
pub mod request;
pub mod response;

pub use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
pub use media::{
    parse_accept, parse_accept_language, MediaType, APPLICATION_FORM, APPLICATION_JSON,
    APPLICATION_XML, MULTIPART_FORM_DATA, MULTIPART_MIXED, TEXT_PLAIN,
};
pub use request::{ConnectionInfo, HttpRequest, HttpRequestBuilder};
pub use response::{http_date_now, HttpResponse, Payload, Reply};
