//! The deferred-execution stage: intercepts the feedback path for polling
//! and cancellation, and turns invocations of deferred methods into queued
//! jobs answered with `202 Accepted`.

use std::sync::Arc;

use http::{Method, StatusCode};
use uuid::Uuid;

use super::invoke::invoke_binding;
use super::serializer::{render_error, render_reply};
use super::{reply_from_response, Exchange, Next, Responder, RespondFuture};
use crate::codec::SerializerRegistry;
use crate::error::HttpError;
use crate::http::{Payload, Reply};
use crate::jobs::{fingerprint_of, JobManager, JobOutcome, PollOutcome, Rejection};
use crate::routing::RouteMatch;
use crate::services::{Scope, ServiceRegistry};
use crate::validate::Validator;

pub struct AsyncStage {
    manager: Arc<JobManager>,
    feedback_path: String,
    default_rule: Rejection,
    services: Arc<ServiceRegistry>,
    codecs: Arc<SerializerRegistry>,
    validator: Arc<Validator>,
    max_body: Option<usize>,
}

impl AsyncStage {
    pub fn new(
        manager: Arc<JobManager>,
        feedback_path: String,
        default_rule: Rejection,
        services: Arc<ServiceRegistry>,
        codecs: Arc<SerializerRegistry>,
        validator: Arc<Validator>,
        max_body: Option<usize>,
    ) -> AsyncStage {
        AsyncStage {
            manager,
            feedback_path,
            default_rule,
            services,
            codecs,
            validator,
            max_body,
        }
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    /// The id addressed under the feedback path, if this request targets it.
    fn feedback_id(&self, path: &str) -> Option<Result<Uuid, ()>> {
        let rest = path.strip_prefix(&self.feedback_path)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Some(Err(()));
        }
        Some(rest.parse::<Uuid>().map_err(|_| ()))
    }

    fn handle_feedback(&self, verb: &Method, id: Result<Uuid, ()>) -> Result<Reply, HttpError> {
        if verb == Method::GET {
            let id = id.map_err(|_| HttpError::NotFound)?;
            match self.manager.poll(id) {
                PollOutcome::Pending => Ok(Reply::new(StatusCode::ACCEPTED, Payload::Empty)),
                PollOutcome::Terminal(response) => Ok(reply_from_response(response)),
                PollOutcome::Unknown => Err(HttpError::NotFound),
            }
        } else if verb == Method::DELETE {
            let id = id.map_err(|_| HttpError::NotFound)?;
            match self.manager.cancel(id) {
                Some(response) => Ok(reply_from_response(response)),
                None => Err(HttpError::NotFound),
            }
        } else {
            Err(HttpError::MethodNotAllowed(vec![
                Method::DELETE,
                Method::GET,
            ]))
        }
    }
}

impl Responder for AsyncStage {
    fn respond<'a>(&'a self, exchange: &'a mut Exchange, next: Next<'a>) -> RespondFuture<'a> {
        Box::pin(async move {
            if let Some(id) = self.feedback_id(exchange.request.path()) {
                return self.handle_feedback(exchange.request.method(), id);
            }

            let rule = match exchange.route_match() {
                RouteMatch::Success(binding) => binding.endpoint.method().deferred.clone(),
                _ => None,
            };
            let Some(mut rule) = rule else {
                return next.run(exchange).await;
            };
            if matches!(rule, Rejection::Default) {
                rule = self.default_rule.clone();
            }

            let identity = exchange.scope.identity();
            let identity_key = identity.as_ref().map(|i| i.key().to_string());
            let fingerprint =
                fingerprint_of(&rule, &exchange.request, identity_key.as_deref())?;

            let RouteMatch::Success(binding) = exchange.take_match() else {
                return Err(HttpError::Internal(
                    "deferred dispatch lost its route match".to_string(),
                ));
            };

            let request = exchange.request.clone();
            let services = self.services.clone();
            let codecs = self.codecs.clone();
            let validator = self.validator.clone();
            let max_body = self.max_body;

            let id = self
                .manager
                .submit(&exchange.request, &rule, fingerprint, move |token| {
                    let scope = Scope::with_token(services, token);
                    if let Some(identity) = identity {
                        scope.set_identity(identity);
                    }
                    Box::pin(async move {
                        let accept = request.accept().to_vec();
                        let result = invoke_binding(
                            binding, &request, &scope, &codecs, &validator, max_body,
                        )
                        .await;
                        scope.clear();
                        match result {
                            Ok(mut reply) => {
                                // Deferred URL-shaped results deliver as 303.
                                if reply.is_redirect() {
                                    reply = reply.with_status(StatusCode::SEE_OTHER);
                                }
                                match render_reply(reply, &accept, &codecs) {
                                    Ok(response) => JobOutcome {
                                        response,
                                        failed: false,
                                    },
                                    Err(err) => JobOutcome {
                                        response: render_error(&err, &accept, &codecs),
                                        failed: true,
                                    },
                                }
                            }
                            Err(err) => JobOutcome {
                                response: render_error(&err, &accept, &codecs),
                                failed: true,
                            },
                        }
                    })
                })?;

            Ok(Reply::accepted_at(format!("{}/{id}", self.feedback_path)))
        })
    }
}
