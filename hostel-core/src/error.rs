use http::{Method, StatusCode};

use crate::validate::ErrorSet;

/// The engine's error vocabulary, named by meaning.
///
/// Every failure raised inside the responder pipeline is expressed as one of
/// these variants. The serializer stage is the sole place where an `HttpError`
/// is translated into an [`HttpResponse`](crate::http::HttpResponse); all
/// other stages and handlers simply propagate with `?`.
pub enum HttpError {
    /// Parameter conversion failure, missing multipart field, malformed body.
    BadRequest(String),
    /// Constraint violations collected by the validation engine.
    Validation(ErrorSet),
    /// Identity required but absent, or the bearer token did not validate.
    Unauthorized,
    /// Identity present but denied by a role or policy check.
    Forbidden(String),
    /// No route matches the path, or an unknown deferred-job id.
    NotFound,
    /// The path matches but not the verb. Carries the verbs that would match.
    MethodNotAllowed(Vec<Method>),
    /// No codec satisfies the request's Accept list.
    NotAcceptable,
    /// A body-bearing request without a Content-Length header.
    LengthRequired,
    /// The request body exceeds the configured limit.
    PayloadTooLarge,
    /// The request content type has no registered codec.
    UnsupportedMediaType(String),
    /// Rejected by a deferred-request matcher.
    TooManyRequests,
    /// The handler signalled that the operation is not implemented.
    NotImplemented,
    /// The deferred-request queue is saturated.
    ServiceUnavailable,
    /// Any other unhandled failure.
    Internal(String),
}

impl HttpError {
    /// The HTTP status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::BadRequest(_) | HttpError::Validation(_) => StatusCode::BAD_REQUEST,
            HttpError::Unauthorized => StatusCode::UNAUTHORIZED,
            HttpError::Forbidden(_) => StatusCode::FORBIDDEN,
            HttpError::NotFound => StatusCode::NOT_FOUND,
            HttpError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            HttpError::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            HttpError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            HttpError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            HttpError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            HttpError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            HttpError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            HttpError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the serializer stage should log this as a server failure.
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            HttpError::Validation(errors) => {
                write!(f, "Bad Request: {} constraint violation(s)", errors.len())
            }
            HttpError::Unauthorized => write!(f, "Unauthorized"),
            HttpError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            HttpError::NotFound => write!(f, "Not Found"),
            HttpError::MethodNotAllowed(allowed) => {
                let verbs: Vec<&str> = allowed.iter().map(|m| m.as_str()).collect();
                write!(f, "Method Not Allowed (allowed: {})", verbs.join(", "))
            }
            HttpError::NotAcceptable => write!(f, "Not Acceptable"),
            HttpError::LengthRequired => write!(f, "Length Required"),
            HttpError::PayloadTooLarge => write!(f, "Payload Too Large"),
            HttpError::UnsupportedMediaType(ty) => {
                write!(f, "Unsupported Media Type: {ty}")
            }
            HttpError::TooManyRequests => write!(f, "Too Many Requests"),
            HttpError::NotImplemented => write!(f, "Not Implemented"),
            HttpError::ServiceUnavailable => write!(f, "Service Unavailable"),
            HttpError::Internal(msg) => write!(f, "Internal Error: {msg}"),
        }
    }
}

impl std::fmt::Debug for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for HttpError {}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        HttpError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        HttpError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            HttpError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(HttpError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(HttpError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            HttpError::MethodNotAllowed(vec![Method::GET]).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            HttpError::NotImplemented.status(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            HttpError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn display_formatting() {
        assert_eq!(
            HttpError::BadRequest("bad i".into()).to_string(),
            "Bad Request: bad i"
        );
        assert_eq!(
            HttpError::MethodNotAllowed(vec![Method::GET, Method::POST]).to_string(),
            "Method Not Allowed (allowed: GET, POST)"
        );
        assert_eq!(
            HttpError::UnsupportedMediaType("text/csv".into()).to_string(),
            "Unsupported Media Type: text/csv"
        );
    }

    #[test]
    fn io_error_maps_to_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: HttpError = io.into();
        assert!(err.is_server_error());
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn server_error_classification() {
        assert!(!HttpError::NotFound.is_server_error());
        assert!(HttpError::ServiceUnavailable.is_server_error());
    }
}
