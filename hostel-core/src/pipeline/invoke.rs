//! The terminal pipeline stage: consumes the route match, decodes and
//! validates inputs, calls the bound method, and validates its return value.

use std::sync::Arc;

use http::Method;

use super::{Exchange, Next, Responder, RespondFuture};
use crate::codec::SerializerRegistry;
use crate::error::HttpError;
use crate::http::{HttpRequest, Reply};
use crate::routing::{ArgValue, Binding, CallArgs, ParamKind};
use crate::services::Scope;
use crate::validate::{ErrorSet, Validator};

pub struct InvokeStage {
    codecs: Arc<SerializerRegistry>,
    validator: Arc<Validator>,
    max_body: Option<usize>,
}

impl InvokeStage {
    pub fn new(
        codecs: Arc<SerializerRegistry>,
        validator: Arc<Validator>,
        max_body: Option<usize>,
    ) -> InvokeStage {
        InvokeStage {
            codecs,
            validator,
            max_body,
        }
    }
}

impl Responder for InvokeStage {
    fn respond<'a>(&'a self, exchange: &'a mut Exchange, _next: Next<'a>) -> RespondFuture<'a> {
        Box::pin(async move {
            match exchange.take_match() {
                crate::routing::RouteMatch::Success(binding) => {
                    let request = exchange.request.clone();
                    let scope = exchange.scope.clone();
                    invoke_binding(
                        binding,
                        &request,
                        &scope,
                        &self.codecs,
                        &self.validator,
                        self.max_body,
                    )
                    .await
                }
                crate::routing::RouteMatch::NotFound => Err(HttpError::NotFound),
                crate::routing::RouteMatch::MethodNotAllowed(allowed) => {
                    if exchange.request.method() == Method::OPTIONS {
                        // No explicit options method: answer with the verbs
                        // the path does serve.
                        let verbs: Vec<&str> = allowed.iter().map(|m| m.as_str()).collect();
                        return Ok(Reply::no_content().with_header("allow", &verbs.join(", ")));
                    }
                    Err(HttpError::MethodNotAllowed(allowed))
                }
                crate::routing::RouteMatch::BadRequest(message) => {
                    Err(HttpError::BadRequest(message))
                }
            }
        })
    }
}

/// Execute a bound endpoint: decode the content body, run validation, call
/// the handler, validate the result. Shared between the invoke stage and
/// deferred job execution.
pub async fn invoke_binding(
    mut binding: Binding,
    request: &HttpRequest,
    scope: &Scope,
    codecs: &SerializerRegistry,
    validator: &Validator,
    max_body: Option<usize>,
) -> Result<Reply, HttpError> {
    let method = binding.endpoint.method().clone();
    let locales = request.accept_language().to_vec();

    if let Some(spec) = method.body_spec() {
        let body = read_body(request, max_body)?;
        let value = if spec.is_raw() {
            Box::new(body.clone()) as crate::routing::BodyValue
        } else {
            let media = request
                .content_type()
                .ok_or_else(|| HttpError::UnsupportedMediaType("none".to_string()))?;
            let decoded = codecs.read(media, &body)?;
            spec.decode(decoded)?
        };

        // Parameter validation runs before invocation; the body's declared
        // schema walks its serde representation.
        if let Some(schema) = &spec.schema {
            if let Some(snapshot) = spec.snapshot(&value) {
                let errors = validator.validate(spec.name, &snapshot, schema, &locales);
                if !errors.is_empty() {
                    return Err(HttpError::Validation(errors));
                }
            }
        }

        let params = binding.endpoint.resource.combined_params(&method);
        let slot = params
            .iter()
            .position(|p| matches!(p.kind, ParamKind::Body(_)))
            .ok_or_else(|| HttpError::Internal("body spec without a body slot".to_string()))?;
        binding.args[slot] = ArgValue::Body(value);
    }

    let args = CallArgs::new(binding.args, scope.clone());

    // Cross-parameter rules, still before invocation.
    let mut violations = ErrorSet::new();
    for check in &method.cross_checks {
        if let Some(violation) = check(&args) {
            violations.push(violation);
        }
    }
    if !violations.is_empty() {
        return Err(HttpError::Validation(violations));
    }

    let reply = (method.handler)(args).await?;

    // Return-value validation runs after.
    if let Some(schema) = &method.return_schema {
        if let crate::http::Payload::Value(value) = reply.payload() {
            let errors = validator.validate("return", value, schema, &locales);
            if !errors.is_empty() {
                return Err(HttpError::Validation(errors));
            }
        }
    }

    Ok(reply)
}

/// Body acquisition guards: 411 when a body is expected but absent, 413 over
/// the configured limit.
fn read_body(request: &HttpRequest, max_body: Option<usize>) -> Result<bytes::Bytes, HttpError> {
    let body = match request.body() {
        Some(body) => body.clone(),
        None => return Err(HttpError::LengthRequired),
    };
    if let Some(limit) = max_body {
        if body.len() > limit {
            return Err(HttpError::PayloadTooLarge);
        }
    }
    Ok(body)
}
