//! The favicon stage: when the inner pipeline has nothing for a browser's
//! `GET /favicon.ico` probe, serves the bundled icon instead of a 404.

use http::Method;

use super::{Exchange, Next, Responder, RespondFuture};
use crate::error::HttpError;
use crate::http::{MediaType, Reply};

static FAVICON: &[u8] = include_bytes!("../../assets/favicon.ico");

pub struct FaviconStage;

impl Responder for FaviconStage {
    fn respond<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> RespondFuture<'a> {
        Box::pin(async move {
            let candidate = exchange.request.method() == Method::GET
                && exchange.request.path().ends_with("/favicon.ico");
            match next.run(exchange).await {
                Err(HttpError::NotFound) | Err(HttpError::MethodNotAllowed(_)) if candidate => {
                    Ok(Reply::bytes(
                        MediaType::essence_only("image/x-icon"),
                        FAVICON,
                    ))
                }
                other => other,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpRequest, Payload};
    use crate::routing::RouteTable;
    use crate::services::{Scope, ServiceRegistry};
    use std::sync::Arc;

    async fn run(method: Method, path: &str) -> Result<Reply, HttpError> {
        let request = HttpRequest::builder().method(method).path(path).build();
        let scope = Scope::new(Arc::new(ServiceRegistry::new()));
        let mut ex = Exchange::new(request, scope, Arc::new(RouteTable::new()));
        let stages: Vec<Arc<dyn Responder>> = Vec::new();
        FaviconStage.respond(&mut ex, Next::new(&stages)).await
    }

    #[tokio::test]
    async fn unrouted_favicon_gets_the_bundled_icon() {
        let reply = run(Method::GET, "/favicon.ico").await.unwrap();
        match reply.payload() {
            Payload::Bytes { media, data } => {
                assert_eq!(media.essence(), "image/x-icon");
                assert!(!data.is_empty());
            }
            _ => panic!("expected icon bytes"),
        }
    }

    #[tokio::test]
    async fn non_get_still_fails() {
        let err = run(Method::POST, "/favicon.ico").await.unwrap_err();
        assert!(matches!(err, HttpError::NotFound));
    }

    #[tokio::test]
    async fn other_paths_untouched() {
        let err = run(Method::GET, "/else").await.unwrap_err();
        assert!(matches!(err, HttpError::NotFound));
    }
}
