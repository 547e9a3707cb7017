//! Application options: a builder accepting every registration the engine
//! understands, frozen into an immutable [`AppOptions`] when the engine is
//! built. There are no process-global settings; everything the pipeline
//! consumes lives here.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;

use crate::identity::{PolicyMap, TokenManager};
use crate::jobs::Rejection;
use crate::pipeline::{derive_health_key, HealthProbe, Responder};
use crate::routing::ResourceDef;
use crate::services::{Injectable, Lifetime, ServiceError, ServiceRegistry};
use crate::validate::MessageBundles;

// ── Errors ──────────────────────────────────────────────────────────────────

pub enum OptionsError {
    /// An option that may only be set once was set again.
    Conflict(&'static str),
    /// A path failed the `(/[A-Za-z0-9.\-_]+)+` shape.
    BadPath(String),
    Service(ServiceError),
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionsError::Conflict(what) => write!(f, "{what} is already configured"),
            OptionsError::BadPath(path) => write!(f, "'{path}' is not a valid path"),
            OptionsError::Service(err) => write!(f, "{err}"),
        }
    }
}

impl fmt::Debug for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for OptionsError {}

impl From<ServiceError> for OptionsError {
    fn from(err: ServiceError) -> Self {
        OptionsError::Service(err)
    }
}

// ── Option records ──────────────────────────────────────────────────────────

/// Deferred-execution settings.
#[derive(Clone)]
pub struct AsyncOptions {
    pub feedback_path: String,
    pub default_rule: Rejection,
    pub workers: usize,
    pub queue: usize,
}

impl Default for AsyncOptions {
    fn default() -> Self {
        AsyncOptions {
            feedback_path: "/feedback".to_string(),
            default_rule: Rejection::Never,
            workers: 4,
            queue: 64,
        }
    }
}

/// A namespace prefix applied to resources whose type path matches.
#[derive(Clone)]
pub struct Area {
    pub path: String,
    pub matcher: String,
    pub default_resource: Option<String>,
}

/// The frozen configuration the engine is assembled from.
pub struct AppOptions {
    pub app_name: String,
    pub services: ServiceRegistry,
    pub resources: Vec<(ResourceDef, Option<String>)>,
    pub areas: Vec<Area>,
    pub custom_stages: Vec<Arc<dyn Responder>>,
    pub token_manager: Option<Arc<dyn TokenManager>>,
    pub policies: PolicyMap,
    pub health_path: Option<String>,
    pub probes: Vec<(String, Arc<dyn HealthProbe>)>,
    pub static_files: Option<(String, PathBuf)>,
    pub async_options: Option<AsyncOptions>,
    pub xml: bool,
    pub max_body: Option<usize>,
    pub bundles: MessageBundles,
}

impl AppOptions {
    pub fn builder() -> AppOptionsBuilder {
        AppOptionsBuilder::new()
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Collects registrations during startup. Consumed by
/// [`build`](AppOptionsBuilder::build); after that nothing can be
/// reconfigured.
pub struct AppOptionsBuilder {
    app_name: Option<String>,
    services: ServiceRegistry,
    resources: Vec<(ResourceDef, Option<String>)>,
    areas: Vec<Area>,
    custom_stages: Vec<Arc<dyn Responder>>,
    token_manager: Option<Arc<dyn TokenManager>>,
    policies: PolicyMap,
    health_path: Option<String>,
    probes: Vec<(String, Arc<dyn HealthProbe>)>,
    static_files: Option<(String, PathBuf)>,
    async_options: Option<AsyncOptions>,
    xml: Option<bool>,
    max_body: Option<usize>,
    bundles: MessageBundles,
}

impl fmt::Debug for AppOptionsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppOptionsBuilder").finish_non_exhaustive()
    }
}

impl AppOptionsBuilder {
    fn new() -> AppOptionsBuilder {
        AppOptionsBuilder {
            app_name: None,
            services: ServiceRegistry::new(),
            resources: Vec::new(),
            areas: Vec::new(),
            custom_stages: Vec::new(),
            token_manager: None,
            policies: PolicyMap::new(),
            health_path: None,
            probes: Vec::new(),
            static_files: None,
            async_options: None,
            xml: None,
            max_body: None,
            bundles: MessageBundles::builtin(),
        }
    }

    /// The application name reported by the health endpoint.
    pub fn app_name(mut self, name: impl Into<String>) -> Result<Self, OptionsError> {
        if self.app_name.is_some() {
            return Err(OptionsError::Conflict("application name"));
        }
        self.app_name = Some(name.into());
        Ok(self)
    }

    /// Register a concrete service type with constructor injection.
    pub fn use_service<T: Injectable>(mut self, lifetime: Lifetime) -> Result<Self, OptionsError> {
        self.services.register::<T>(lifetime)?;
        Ok(self)
    }

    /// Register a factory-provided service.
    pub fn use_service_factory<T, F>(
        mut self,
        lifetime: Lifetime,
        factory: F,
    ) -> Result<Self, OptionsError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&crate::services::Scope) -> Result<T, ServiceError> + Send + Sync + 'static,
    {
        self.services.register_factory(lifetime, factory)?;
        Ok(self)
    }

    /// Register a prebuilt, process-wide service instance.
    pub fn use_service_instance<T: Clone + Send + Sync + 'static>(
        mut self,
        value: T,
    ) -> Result<Self, OptionsError> {
        self.services.register_instance(value)?;
        Ok(self)
    }

    /// Register a resource at its derived route.
    pub fn use_resource(mut self, def: ResourceDef) -> Result<Self, OptionsError> {
        self.resources.push((def, None));
        Ok(self)
    }

    /// Register a resource under an explicit area path.
    pub fn use_resource_in(
        mut self,
        def: ResourceDef,
        area: &str,
    ) -> Result<Self, OptionsError> {
        let area = normalize_path(area)?;
        self.resources.push((def, Some(area)));
        Ok(self)
    }

    /// Declare a route area: resources whose type path contains `matcher`
    /// register under `path`. The optional default resource also answers at
    /// the bare area path.
    pub fn use_route_area(
        mut self,
        path: &str,
        matcher: impl Into<String>,
        default_resource: Option<&str>,
    ) -> Result<Self, OptionsError> {
        let path = normalize_path(path)?;
        self.areas.push(Area {
            path,
            matcher: matcher.into(),
            default_resource: default_resource.map(str::to_string),
        });
        Ok(self)
    }

    /// Append a custom responder stage, run in declaration order between the
    /// built-in stages.
    pub fn use_responder(mut self, stage: impl Responder) -> Result<Self, OptionsError> {
        self.custom_stages.push(Arc::new(stage));
        Ok(self)
    }

    /// Enable deferred execution with the default feedback path and rule.
    pub fn use_async(self) -> Result<Self, OptionsError> {
        self.use_async_with(AsyncOptions::default())
    }

    /// Enable deferred execution with explicit settings.
    pub fn use_async_with(mut self, options: AsyncOptions) -> Result<Self, OptionsError> {
        if self.async_options.is_some() {
            return Err(OptionsError::Conflict("the feedback path"));
        }
        let mut options = options;
        options.feedback_path = normalize_path(&options.feedback_path)?;
        self.async_options = Some(options);
        Ok(self)
    }

    /// Serve files under `prefix` from the directory `root`.
    pub fn use_static_files(
        mut self,
        prefix: &str,
        root: impl Into<PathBuf>,
    ) -> Result<Self, OptionsError> {
        if self.static_files.is_some() {
            return Err(OptionsError::Conflict("the static files prefix"));
        }
        self.static_files = Some((normalize_path(prefix)?, root.into()));
        Ok(self)
    }

    /// Expose the health report at the given path.
    pub fn use_health(mut self, path: &str) -> Result<Self, OptionsError> {
        if self.health_path.is_some() {
            return Err(OptionsError::Conflict("the health path"));
        }
        self.health_path = Some(normalize_path(path)?);
        Ok(self)
    }

    /// Register a health probe; the report key derives from the probe type.
    pub fn use_probe<P: HealthProbe + 'static>(self, probe: P) -> Result<Self, OptionsError> {
        let key = derive_health_key(std::any::type_name::<P>());
        self.use_probe_named(&key, probe)
    }

    /// Register a health probe under an explicit report key.
    pub fn use_probe_named<P: HealthProbe + 'static>(
        mut self,
        name: &str,
        probe: P,
    ) -> Result<Self, OptionsError> {
        self.probes.push((name.to_string(), Arc::new(probe)));
        Ok(self)
    }

    /// Validate bearer tokens with `manager` and enforce the named policies.
    pub fn use_identity(
        mut self,
        manager: Arc<dyn TokenManager>,
        policies: PolicyMap,
    ) -> Result<Self, OptionsError> {
        if self.token_manager.is_some() {
            return Err(OptionsError::Conflict("the token manager"));
        }
        self.token_manager = Some(manager);
        self.policies = policies;
        Ok(self)
    }

    /// Toggle the XML codec.
    pub fn use_xml(mut self, enabled: bool) -> Result<Self, OptionsError> {
        if self.xml.is_some() {
            return Err(OptionsError::Conflict("the XML toggle"));
        }
        self.xml = Some(enabled);
        Ok(self)
    }

    /// Reject request bodies over this many bytes with 413.
    pub fn max_body_size(mut self, bytes: usize) -> Result<Self, OptionsError> {
        if self.max_body.is_some() {
            return Err(OptionsError::Conflict("the body size limit"));
        }
        self.max_body = Some(bytes);
        Ok(self)
    }

    /// Add a validation message for a locale.
    pub fn use_message(
        mut self,
        locale: &str,
        key: &str,
        message: &str,
    ) -> Result<Self, OptionsError> {
        self.bundles.insert(locale, key, message);
        Ok(self)
    }

    /// Freeze the options. The builder is consumed; later reconfiguration is
    /// impossible by construction.
    pub fn build(self) -> AppOptions {
        AppOptions {
            app_name: self.app_name.unwrap_or_else(|| "hostel".to_string()),
            services: self.services,
            resources: self.resources,
            areas: self.areas,
            custom_stages: self.custom_stages,
            token_manager: self.token_manager,
            policies: self.policies,
            health_path: self.health_path,
            probes: self.probes,
            static_files: self.static_files,
            async_options: self.async_options,
            xml: self.xml.unwrap_or(false),
            max_body: self.max_body,
            bundles: self.bundles,
        }
    }
}

/// Check a configured path against the accepted shape, normalizing the
/// leading slash and trimming a trailing one.
fn normalize_path(path: &str) -> Result<String, OptionsError> {
    let mut normalized = path.trim().to_string();
    if !normalized.starts_with('/') {
        normalized.insert(0, '/');
    }
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    let shape = Regex::new(r"^(/[A-Za-z0-9.\-_]+)+$").expect("static path shape");
    if !shape.is_match(&normalized) {
        return Err(OptionsError::BadPath(path.to_string()));
    }
    Ok(normalized)
}
