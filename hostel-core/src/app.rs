//! Engine assembly: compiles the frozen options into the route table and the
//! responder chain, and drives one request at a time through them.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::codec::SerializerRegistry;
use crate::http::{HttpRequest, HttpResponse};
use crate::jobs::JobManager;
use crate::options::AppOptions;
use crate::pipeline::{
    self, AsyncStage, Exchange, FaviconStage, HealthStage, IdentityStage, InvokeStage, Responder,
    StaticFilesStage,
};
use crate::routing::{ReverseError, RouteEntry, RouteTable};
use crate::services::{Scope, ServiceError, ServiceRegistry};
use crate::validate::Validator;

/// Failures assembling an engine from its options.
pub enum BuildError {
    Service(ServiceError),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Service(err) => write!(f, "{err}"),
        }
    }
}

impl fmt::Debug for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for BuildError {}

impl From<ServiceError> for BuildError {
    fn from(err: ServiceError) -> Self {
        BuildError::Service(err)
    }
}

struct EngineShared {
    table: Arc<RouteTable>,
    services: Arc<ServiceRegistry>,
    codecs: Arc<SerializerRegistry>,
    stages: Vec<Arc<dyn Responder>>,
    jobs: Option<Arc<JobManager>>,
    routes: Vec<RouteEntry>,
}

/// The service-hosting engine: owns the route table, the service container,
/// the serializer registry and the stage chain, and turns each
/// [`HttpRequest`] into an [`HttpResponse`].
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    /// Assemble an engine. Verifies the service graph, compiles every
    /// registered resource, and builds the stage chain in pipeline order.
    ///
    /// Route-compilation failures accumulate in [`routes`](Engine::routes)
    /// (and are logged) without aborting unrelated registrations. Must run
    /// inside a tokio runtime when deferred execution is enabled.
    pub fn new(options: AppOptions) -> Result<Engine, BuildError> {
        options.services.verify()?;
        let started = Instant::now();

        let services = Arc::new(options.services);
        let codecs = Arc::new(SerializerRegistry::with_defaults(options.xml));
        let validator = Arc::new(Validator::with_bundles(options.bundles));

        let mut table = RouteTable::new();
        let mut routes = Vec::new();
        for (def, explicit_area) in options.resources {
            let area = explicit_area.or_else(|| {
                options
                    .areas
                    .iter()
                    .find(|a| def.type_name.contains(&a.matcher))
                    .map(|a| a.path.clone())
            });
            let rooted = options.areas.iter().find(|a| {
                Some(a.path.as_str()) == area.as_deref()
                    && a.default_resource.as_deref() == Some(def.name.as_str())
            });
            if let Some(area_def) = rooted {
                routes.extend(table.register_at(def.clone(), &area_def.path));
            }
            routes.extend(table.register(def, area.as_deref()));
        }
        for entry in &routes {
            if let Err(err) = &entry.outcome {
                warn!(route = %entry.route, verb = %entry.verb, %err, "route not registered");
            }
        }
        let table = Arc::new(table);

        // The chain in pipeline order; the serializer wraps it from the
        // outside in `handle`.
        let mut stages: Vec<Arc<dyn Responder>> = Vec::new();
        if let Some(path) = options.health_path {
            stages.push(Arc::new(HealthStage::new(
                path,
                options.app_name.clone(),
                options.probes,
                started,
            )));
        }
        if let Some((prefix, root)) = options.static_files {
            stages.push(Arc::new(StaticFilesStage::new(prefix, root)));
        }
        stages.push(Arc::new(FaviconStage));
        stages.extend(options.custom_stages);
        if let Some(manager) = options.token_manager {
            stages.push(Arc::new(IdentityStage::new(
                manager,
                Arc::new(options.policies),
            )));
        }
        let jobs = match options.async_options {
            Some(async_options) => {
                let manager = JobManager::start(async_options.workers, async_options.queue);
                stages.push(Arc::new(AsyncStage::new(
                    manager.clone(),
                    async_options.feedback_path,
                    async_options.default_rule,
                    services.clone(),
                    codecs.clone(),
                    validator.clone(),
                    options.max_body,
                )));
                Some(manager)
            }
            None => None,
        };
        stages.push(Arc::new(InvokeStage::new(
            codecs.clone(),
            validator,
            options.max_body,
        )));

        Ok(Engine {
            shared: Arc::new(EngineShared {
                table,
                services,
                codecs,
                stages,
                jobs,
                routes,
            }),
        })
    }

    /// Handle one request. Never fails: the serializer stage translates every
    /// raised error into a response.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let scope = Scope::new(self.shared.services.clone());
        let mut exchange = Exchange::new(request, scope, self.shared.table.clone());
        let response =
            pipeline::serializer::respond(&mut exchange, &self.shared.stages, &self.shared.codecs)
                .await;
        exchange.scope.cancellation().cancel();
        exchange.scope.clear();
        response
    }

    /// The outcome of every route registration, in registration order.
    pub fn routes(&self) -> &[RouteEntry] {
        &self.shared.routes
    }

    /// Reverse lookup: the URL for a `(resource, method)` pair.
    pub fn url_for(
        &self,
        resource: &str,
        method: &str,
        args: &[&str],
    ) -> Result<String, ReverseError> {
        self.shared.table.url_for(resource, method, args)
    }

    /// Cancel all live deferred jobs and stop the worker pool.
    pub fn shutdown(&self) {
        if let Some(jobs) = &self.shared.jobs {
            jobs.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Reply;
    use crate::routing::{CallArgs, MethodDef, ParamSpec, ResourceDef};
    use http::{Method, StatusCode};

    fn engine_with(resource: ResourceDef) -> Engine {
        let options = AppOptions::builder().use_resource(resource).unwrap().build();
        Engine::new(options).unwrap()
    }

    fn test_resource() -> ResourceDef {
        ResourceDef::new("test").method(
            MethodDef::get(|args: CallArgs| async move {
                let i: i64 = args.arg(0)?;
                Ok(Reply::text(format!("GET/{i}")))
            })
            .param(ParamSpec::int("i")),
        )
    }

    #[tokio::test]
    async fn round_trip_through_the_engine() {
        let engine = engine_with(test_resource());
        let request = HttpRequest::builder()
            .method(Method::GET)
            .path("/test/7")
            .build();
        let response = engine.handle(request).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body_text(), "GET/7");
        assert_eq!(response.header("content-type"), Some("text/plain"));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let engine = engine_with(test_resource());
        let request = HttpRequest::builder().method(Method::GET).path("/nope").build();
        let response = engine.handle(request).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn engine_reports_route_outcomes() {
        let engine = engine_with(test_resource());
        assert_eq!(engine.routes().len(), 1);
        assert!(engine.routes()[0].outcome.is_ok());
    }

    #[tokio::test]
    async fn reverse_lookup_through_the_engine() {
        let engine = engine_with(test_resource());
        assert_eq!(engine.url_for("test", "get", &["9"]).unwrap(), "/test/9");
    }

    #[tokio::test]
    async fn area_matcher_prefixes_resources() {
        let options = AppOptions::builder()
            .use_route_area("/api", "test", None)
            .unwrap()
            .use_resource(test_resource())
            .unwrap()
            .build();
        let engine = Engine::new(options).unwrap();
        let request = HttpRequest::builder()
            .method(Method::GET)
            .path("/api/test/3")
            .build();
        assert_eq!(engine.handle(request).await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn options_fallback_lists_allowed_verbs() {
        let engine = engine_with(test_resource());
        let request = HttpRequest::builder()
            .method(Method::OPTIONS)
            .path("/test/7")
            .build();
        let response = engine.handle(request).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(response.header("allow"), Some("GET"));
    }
}
