//! Core runtime of the hostel service-hosting engine.
//!
//! The engine accepts already-parsed [`HttpRequest`](crate::http::HttpRequest)
//! records, dispatches them through a responder pipeline to declaratively
//! registered resources, negotiates content, validates inputs, and supports
//! deferred execution with deduplication. The TCP listener and HTTP/1.1
//! parser live outside; an optional hyper adapter ships behind the `server`
//! feature.

pub mod app;
pub mod codec;
pub mod error;
pub mod http;
pub mod identity;
pub mod jobs;
pub mod logging;
pub mod options;
pub mod pipeline;
pub mod prelude;
pub mod routing;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
pub mod validate;

pub use crate::app::{BuildError, Engine};
pub use crate::codec::{
    Codec, Decoded, Fields, FieldsError, FileStream, FromFields, SerializerRegistry,
};
pub use crate::error::HttpError;
pub use crate::http::{HttpRequest, HttpResponse, MediaType, Payload, Reply};
pub use crate::identity::{AuthRule, BasicIdentity, Identity, Policy, PolicyMap, TokenManager};
pub use crate::jobs::{JobManager, JobState, MatcherVerdict, Rejection};
pub use crate::logging::init_logging;
pub use crate::options::{AppOptions, AppOptionsBuilder, AsyncOptions, OptionsError};
pub use crate::pipeline::{Exchange, HealthProbe, HealthStatus, Next, Responder, RespondFuture};
pub use crate::routing::{
    ArgValue, BodySpec, CallArgs, FromArg, MethodDef, ParamSpec, ResourceDef, RouteEntry,
    RouteMatch, RouteTable,
};
pub use crate::services::{Dependency, Injectable, Lifetime, Scope, ServiceError, ServiceRegistry};
pub use crate::validate::{Constraint, ErrorSet, FieldRule, Schema, Validate, Validator, Violation};
