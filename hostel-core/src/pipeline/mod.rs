//! The responder pipeline: an ordered chain of stages sharing a per-request
//! scope. Each stage either short-circuits with a reply or delegates to the
//! rest of the chain through its [`Next`] continuation, at most once.

pub mod async_stage;
pub mod favicon;
pub mod health;
pub mod identity;
pub mod invoke;
pub mod serializer;
pub mod static_files;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::HttpError;
use crate::http::{HttpRequest, HttpResponse, MediaType, Payload, Reply};
use crate::routing::{RouteMatch, RouteTable};
use crate::services::Scope;

pub use async_stage::AsyncStage;
pub use favicon::FaviconStage;
pub use health::{derive_health_key, HealthProbe, HealthStage, HealthStatus};
pub use identity::IdentityStage;
pub use invoke::InvokeStage;
pub use static_files::StaticFilesStage;

/// The per-request state threaded through the chain: the request, its scope,
/// and the lazily computed route match.
pub struct Exchange {
    pub request: HttpRequest,
    pub scope: Scope,
    table: Arc<RouteTable>,
    matched: Option<RouteMatch>,
}

impl Exchange {
    pub fn new(request: HttpRequest, scope: Scope, table: Arc<RouteTable>) -> Exchange {
        Exchange {
            request,
            scope,
            table,
            matched: None,
        }
    }

    /// The route match for this request, computed once and cached.
    pub fn route_match(&mut self) -> &RouteMatch {
        if self.matched.is_none() {
            self.matched = Some(self.table.matches(&self.request));
        }
        self.matched.as_ref().expect("route match just computed")
    }

    /// Take ownership of the match; the consuming terminal stage calls this.
    pub fn take_match(&mut self) -> RouteMatch {
        self.route_match();
        self.matched.take().expect("route match just computed")
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }
}

pub type RespondFuture<'a> = Pin<Box<dyn Future<Output = Result<Reply, HttpError>> + Send + 'a>>;

/// One stage of the pipeline.
///
/// Custom stages registered through the options implement this trait; the
/// engine composes them with the built-in stages in a fixed order.
pub trait Responder: Send + Sync + 'static {
    fn respond<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> RespondFuture<'a>;
}

/// The continuation into the remaining stages. Calling [`run`](Next::run)
/// consumes it, so a stage can delegate at most once.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Responder>],
}

impl<'a> Next<'a> {
    pub fn new(stages: &'a [Arc<dyn Responder>]) -> Next<'a> {
        Next { stages }
    }

    /// Run the rest of the chain. An exhausted chain means nothing handled
    /// the request.
    pub async fn run(self, exchange: &mut Exchange) -> Result<Reply, HttpError> {
        match self.stages.split_first() {
            Some((head, rest)) => head.respond(exchange, Next { stages: rest }).await,
            None => Err(HttpError::NotFound),
        }
    }
}

/// Rebuild a [`Reply`] from an already-rendered response, preserving status,
/// headers and body bytes. Used when a stored deferred result re-enters the
/// pipeline.
pub fn reply_from_response(response: HttpResponse) -> Reply {
    let media = response
        .header("content-type")
        .and_then(MediaType::parse)
        .unwrap_or_else(|| MediaType::essence_only("application/octet-stream"));
    let mut reply = Reply::new(
        response.status,
        Payload::Bytes {
            media,
            data: response.body,
        },
    );
    for (name, value) in response.headers.iter() {
        // Content-Type travels in the payload; length and date are restamped
        // at render time.
        if *name == http::header::CONTENT_LENGTH
            || *name == http::header::DATE
            || *name == http::header::CONTENT_TYPE
        {
            continue;
        }
        if let Ok(text) = value.to_str() {
            reply = reply.with_header(name.as_str(), text);
        }
    }
    reply
}
