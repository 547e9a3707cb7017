use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::identity::Identity;

// ── Lifetimes ───────────────────────────────────────────────────────────────

/// How long a resolved service instance lives.
///
/// The partial order is `Process > PerRequest > PerCall`: a service may only
/// depend on services that live at least as long as itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifetime {
    /// One instance per container, built on first resolve.
    Process,
    /// One instance per request scope.
    PerRequest,
    /// A fresh instance on every resolution.
    PerCall,
}

impl Lifetime {
    fn rank(self) -> u8 {
        match self {
            Lifetime::Process => 2,
            Lifetime::PerRequest => 1,
            Lifetime::PerCall => 0,
        }
    }

    /// Whether a dependency with this lifetime may be injected into a
    /// service with lifetime `consumer`.
    pub fn outlives(self, consumer: Lifetime) -> bool {
        self.rank() >= consumer.rank()
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Process => write!(f, "process"),
            Lifetime::PerRequest => write!(f, "per-request"),
            Lifetime::PerCall => write!(f, "per-call"),
        }
    }
}

// ── Injectable trait ────────────────────────────────────────────────────────

/// A dependency declared by an [`Injectable`] type.
#[derive(Clone, Copy, Debug)]
pub struct Dependency {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl Dependency {
    pub fn of<T: 'static>() -> Dependency {
        Dependency {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

/// A concrete type the container can construct by resolving its declared
/// dependencies — the "single public constructor" of a registered service.
pub trait Injectable: Clone + Send + Sync + 'static {
    /// The services this type's constructor needs.
    fn dependencies() -> Vec<Dependency>;

    /// Construct the instance from a resolved scope.
    fn construct(scope: &Scope) -> Result<Self, ServiceError>;
}

// ── Errors ──────────────────────────────────────────────────────────────────

/// Failures raised during service registration or resolution.
#[derive(Clone)]
pub enum ServiceError {
    /// The same advertised type was registered more than once.
    DuplicateService { type_name: String },
    /// A declared dependency is not registered.
    MissingDependency { service: String, dependency: String },
    /// A service would depend on something shorter-lived than itself.
    LifetimeViolation {
        service: String,
        service_lifetime: Lifetime,
        dependency: String,
        dependency_lifetime: Lifetime,
    },
    /// The dependency graph contains a cycle.
    CyclicDependency { cycle: Vec<String> },
    /// Resolution was asked for a type that was never registered.
    NotRegistered { type_name: String },
    /// An instance registration with a non-process lifetime.
    InstanceLifetime { type_name: String },
    /// A factory or constructor failed.
    Construction { type_name: String, message: String },
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::DuplicateService { type_name } => {
                write!(f, "service '{type_name}' registered twice")
            }
            ServiceError::MissingDependency {
                service,
                dependency,
            } => write!(
                f,
                "service '{service}' depends on '{dependency}', which is not registered"
            ),
            ServiceError::LifetimeViolation {
                service,
                service_lifetime,
                dependency,
                dependency_lifetime,
            } => write!(
                f,
                "{service_lifetime} service '{service}' cannot depend on \
                 {dependency_lifetime} service '{dependency}'"
            ),
            ServiceError::CyclicDependency { cycle } => {
                write!(f, "cyclic service dependency: {}", cycle.join(" -> "))
            }
            ServiceError::NotRegistered { type_name } => {
                write!(f, "service '{type_name}' is not registered")
            }
            ServiceError::InstanceLifetime { type_name } => write!(
                f,
                "instance registration for '{type_name}' must use the process lifetime"
            ),
            ServiceError::Construction { type_name, message } => {
                write!(f, "failed to construct '{type_name}': {message}")
            }
        }
    }
}

impl fmt::Debug for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for ServiceError {}

impl From<ServiceError> for crate::error::HttpError {
    fn from(err: ServiceError) -> Self {
        crate::error::HttpError::Internal(err.to_string())
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

type Builder = Arc<dyn Fn(&Scope) -> Result<Box<dyn Any + Send + Sync>, ServiceError> + Send + Sync>;

struct ServiceEntry {
    type_name: &'static str,
    lifetime: Lifetime,
    dependencies: Vec<Dependency>,
    build: Builder,
}

/// The service container: registrations made during startup, read-only while
/// serving. Process-wide singletons are built on first resolve and cached.
pub struct ServiceRegistry {
    entries: HashMap<TypeId, ServiceEntry>,
    singletons: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> ServiceRegistry {
        ServiceRegistry {
            entries: HashMap::new(),
            singletons: DashMap::new(),
        }
    }

    /// Register a concrete type; its constructor arguments are resolved from
    /// the container at resolution time.
    pub fn register<T: Injectable>(&mut self, lifetime: Lifetime) -> Result<(), ServiceError> {
        let dependencies = T::dependencies();
        self.insert_entry(
            TypeId::of::<T>(),
            ServiceEntry {
                type_name: type_name::<T>(),
                lifetime,
                dependencies,
                build: Arc::new(|scope| {
                    let value = T::construct(scope)?;
                    Ok(Box::new(value) as Box<dyn Any + Send + Sync>)
                }),
            },
        )
    }

    /// Register a factory closure for the advertised type.
    pub fn register_factory<T, F>(
        &mut self,
        lifetime: Lifetime,
        factory: F,
    ) -> Result<(), ServiceError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&Scope) -> Result<T, ServiceError> + Send + Sync + 'static,
    {
        self.insert_entry(
            TypeId::of::<T>(),
            ServiceEntry {
                type_name: type_name::<T>(),
                lifetime,
                dependencies: Vec::new(),
                build: Arc::new(move |scope| {
                    let value = factory(scope)?;
                    Ok(Box::new(value) as Box<dyn Any + Send + Sync>)
                }),
            },
        )
    }

    /// Register a prebuilt instance. Instances are process-wide by
    /// definition; clones are handed out on resolution.
    pub fn register_instance<T: Clone + Send + Sync + 'static>(
        &mut self,
        value: T,
    ) -> Result<(), ServiceError> {
        self.insert_entry(
            TypeId::of::<T>(),
            ServiceEntry {
                type_name: type_name::<T>(),
                lifetime: Lifetime::Process,
                dependencies: Vec::new(),
                build: Arc::new(move |_| Ok(Box::new(value.clone()) as Box<dyn Any + Send + Sync>)),
            },
        )
    }

    fn insert_entry(&mut self, id: TypeId, entry: ServiceEntry) -> Result<(), ServiceError> {
        if self.entries.contains_key(&id) {
            return Err(ServiceError::DuplicateService {
                type_name: entry.type_name.to_string(),
            });
        }
        // Lifetime safety against the dependencies registered so far; the
        // full graph (including registration order gaps) is re-checked by
        // `verify` before the container is frozen.
        for dep in &entry.dependencies {
            if let Some(existing) = self.entries.get(&dep.type_id) {
                if !existing.lifetime.outlives(entry.lifetime) {
                    return Err(ServiceError::LifetimeViolation {
                        service: entry.type_name.to_string(),
                        service_lifetime: entry.lifetime,
                        dependency: existing.type_name.to_string(),
                        dependency_lifetime: existing.lifetime,
                    });
                }
            }
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    pub fn contains(&self, id: TypeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn lifetime_of(&self, id: TypeId) -> Option<Lifetime> {
        self.entries.get(&id).map(|e| e.lifetime)
    }

    /// Registered type names and lifetimes, for the health report.
    pub fn registered(&self) -> Vec<(&'static str, Lifetime)> {
        self.entries
            .values()
            .map(|e| (e.type_name, e.lifetime))
            .collect()
    }

    /// Validate the whole dependency graph: every declared dependency must be
    /// registered, lifetime-compatible, and acyclic. Called once when the
    /// options are frozen.
    pub fn verify(&self) -> Result<(), ServiceError> {
        for entry in self.entries.values() {
            for dep in &entry.dependencies {
                match self.entries.get(&dep.type_id) {
                    None => {
                        return Err(ServiceError::MissingDependency {
                            service: entry.type_name.to_string(),
                            dependency: dep.type_name.to_string(),
                        })
                    }
                    Some(existing) => {
                        if !existing.lifetime.outlives(entry.lifetime) {
                            return Err(ServiceError::LifetimeViolation {
                                service: entry.type_name.to_string(),
                                service_lifetime: entry.lifetime,
                                dependency: existing.type_name.to_string(),
                                dependency_lifetime: existing.lifetime,
                            });
                        }
                    }
                }
            }
        }
        self.check_cycles()
    }

    /// Kahn-style topological check over the registered graph.
    fn check_cycles(&self) -> Result<(), ServiceError> {
        let ids: Vec<TypeId> = self.entries.keys().copied().collect();
        let index: HashMap<TypeId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut in_degree = vec![0usize; ids.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
        for (i, id) in ids.iter().enumerate() {
            for dep in &self.entries[id].dependencies {
                if let Some(&dep_idx) = index.get(&dep.type_id) {
                    in_degree[i] += 1;
                    dependents[dep_idx].push(i);
                }
            }
        }

        let mut queue: Vec<usize> = (0..ids.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0usize;
        while let Some(idx) = queue.pop() {
            visited += 1;
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if visited != ids.len() {
            let cycle: Vec<String> = (0..ids.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.entries[&ids[i]].type_name.to_string())
                .collect();
            return Err(ServiceError::CyclicDependency { cycle });
        }
        Ok(())
    }

    fn resolve_erased(
        &self,
        id: TypeId,
        requested: &'static str,
        scope: &Scope,
    ) -> Result<ResolvedSlot, ServiceError> {
        let entry = self
            .entries
            .get(&id)
            .ok_or_else(|| ServiceError::NotRegistered {
                type_name: requested.to_string(),
            })?;
        match entry.lifetime {
            Lifetime::Process => {
                if !self.singletons.contains_key(&id) {
                    // Build outside the map lock: construction may recurse
                    // into the registry for dependencies.
                    let built = (entry.build)(scope)?;
                    self.singletons.entry(id).or_insert(built);
                }
                Ok(ResolvedSlot::Singleton(id))
            }
            Lifetime::PerRequest => {
                let cached = {
                    let cache = scope.inner.per_request.lock().unwrap();
                    cache.contains_key(&id)
                };
                if !cached {
                    let built = (entry.build)(scope)?;
                    let mut cache = scope.inner.per_request.lock().unwrap();
                    cache.entry(id).or_insert(built);
                }
                Ok(ResolvedSlot::Scoped(id))
            }
            Lifetime::PerCall => Ok(ResolvedSlot::Fresh((entry.build)(scope)?)),
        }
    }
}

enum ResolvedSlot {
    Singleton(TypeId),
    Scoped(TypeId),
    Fresh(Box<dyn Any + Send + Sync>),
}

// ── Scope ───────────────────────────────────────────────────────────────────

/// Per-request storage attached to the container: cached per-request
/// instances, the request's cancellation token, and the caller identity.
///
/// Cheap to clone; clones share the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    registry: Arc<ServiceRegistry>,
    per_request: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    cancellation: CancellationToken,
    identity: RwLock<Option<Arc<dyn Identity>>>,
}

impl Scope {
    pub fn new(registry: Arc<ServiceRegistry>) -> Scope {
        Scope::with_token(registry, CancellationToken::new())
    }

    pub fn with_token(registry: Arc<ServiceRegistry>, token: CancellationToken) -> Scope {
        Scope {
            inner: Arc::new(ScopeInner {
                registry,
                per_request: Mutex::new(HashMap::new()),
                cancellation: token,
                identity: RwLock::new(None),
            }),
        }
    }

    /// Resolve a service by type, honoring its registered lifetime.
    pub fn resolve<T: Clone + Send + Sync + 'static>(&self) -> Result<T, ServiceError> {
        let id = TypeId::of::<T>();
        let slot = self
            .inner
            .registry
            .resolve_erased(id, type_name::<T>(), self)?;
        let clone_out = |boxed: &Box<dyn Any + Send + Sync>| {
            boxed
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| ServiceError::Construction {
                    type_name: type_name::<T>().to_string(),
                    message: "resolved value has an unexpected type".to_string(),
                })
        };
        match slot {
            ResolvedSlot::Singleton(id) => {
                let entry = self.inner.registry.singletons.get(&id).ok_or_else(|| {
                    ServiceError::NotRegistered {
                        type_name: type_name::<T>().to_string(),
                    }
                })?;
                clone_out(entry.value())
            }
            ResolvedSlot::Scoped(id) => {
                let cache = self.inner.per_request.lock().unwrap();
                let boxed = cache.get(&id).ok_or_else(|| ServiceError::NotRegistered {
                    type_name: type_name::<T>().to_string(),
                })?;
                clone_out(boxed)
            }
            ResolvedSlot::Fresh(boxed) => clone_out(&boxed),
        }
    }

    /// Whether the requested type is registered at all.
    pub fn knows(&self, id: TypeId) -> bool {
        self.inner.registry.contains(id)
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.inner.registry
    }

    /// The request's cancellation token. Cancelled on client disconnect
    /// (best-effort) and on engine shutdown.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    pub fn identity(&self) -> Option<Arc<dyn Identity>> {
        self.inner.identity.read().unwrap().clone()
    }

    pub fn set_identity(&self, identity: Arc<dyn Identity>) {
        *self.inner.identity.write().unwrap() = Some(identity);
    }

    /// Drop all per-request instances. Called at pipeline exit.
    pub fn clear(&self) {
        self.inner.per_request.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Store {
        label: &'static str,
    }

    #[derive(Clone)]
    struct Catalog {
        store: Store,
    }

    impl Injectable for Catalog {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::of::<Store>()]
        }
        fn construct(scope: &Scope) -> Result<Self, ServiceError> {
            Ok(Catalog {
                store: scope.resolve::<Store>()?,
            })
        }
    }

    fn scope_with(registry: ServiceRegistry) -> Scope {
        Scope::new(Arc::new(registry))
    }

    #[test]
    fn resolves_concrete_with_dependencies() {
        let mut registry = ServiceRegistry::new();
        registry.register_instance(Store { label: "disk" }).unwrap();
        registry.register::<Catalog>(Lifetime::Process).unwrap();
        registry.verify().unwrap();

        let scope = scope_with(registry);
        let catalog = scope.resolve::<Catalog>().unwrap();
        assert_eq!(catalog.store.label, "disk");
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = ServiceRegistry::new();
        registry.register_instance(Store { label: "a" }).unwrap();
        let err = registry.register_instance(Store { label: "b" }).unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateService { .. }));
    }

    #[test]
    fn missing_dependency_caught_by_verify() {
        let mut registry = ServiceRegistry::new();
        registry.register::<Catalog>(Lifetime::Process).unwrap();
        let err = registry.verify().unwrap_err();
        match err {
            ServiceError::MissingDependency { dependency, .. } => {
                assert!(dependency.contains("Store"))
            }
            other => panic!("expected MissingDependency, got {other}"),
        }
    }

    #[test]
    fn process_cannot_depend_on_per_request() {
        let mut registry = ServiceRegistry::new();
        registry
            .register_factory(Lifetime::PerRequest, |_| Ok(Store { label: "scoped" }))
            .unwrap();
        let err = registry.register::<Catalog>(Lifetime::Process).unwrap_err();
        assert!(matches!(err, ServiceError::LifetimeViolation { .. }));
    }

    #[test]
    fn per_request_may_depend_on_process() {
        let mut registry = ServiceRegistry::new();
        registry.register_instance(Store { label: "wide" }).unwrap();
        registry.register::<Catalog>(Lifetime::PerRequest).unwrap();
        registry.verify().unwrap();
    }

    #[derive(Clone)]
    struct Left;
    #[derive(Clone)]
    struct Right;

    impl Injectable for Left {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::of::<Right>()]
        }
        fn construct(_: &Scope) -> Result<Self, ServiceError> {
            Ok(Left)
        }
    }

    impl Injectable for Right {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::of::<Left>()]
        }
        fn construct(_: &Scope) -> Result<Self, ServiceError> {
            Ok(Right)
        }
    }

    #[test]
    fn cycle_detected() {
        let mut registry = ServiceRegistry::new();
        registry.register::<Left>(Lifetime::Process).unwrap();
        registry.register::<Right>(Lifetime::Process).unwrap();
        let err = registry.verify().unwrap_err();
        assert!(matches!(err, ServiceError::CyclicDependency { .. }));
    }

    #[test]
    fn per_request_cached_within_scope() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Clone)]
        struct Counted(usize);

        let mut registry = ServiceRegistry::new();
        registry
            .register_factory(Lifetime::PerRequest, |_| {
                Ok(Counted(BUILDS.fetch_add(1, Ordering::SeqCst)))
            })
            .unwrap();

        let registry = Arc::new(registry);
        let scope = Scope::new(registry.clone());
        let first = scope.resolve::<Counted>().unwrap();
        let second = scope.resolve::<Counted>().unwrap();
        assert_eq!(first.0, second.0);

        let other_scope = Scope::new(registry);
        let third = other_scope.resolve::<Counted>().unwrap();
        assert_ne!(first.0, third.0);
    }

    #[test]
    fn per_call_always_fresh() {
        static BUILDS: AtomicUsize = AtomicUsize::new(100);

        #[derive(Clone)]
        struct Fresh(usize);

        let mut registry = ServiceRegistry::new();
        registry
            .register_factory(Lifetime::PerCall, |_| {
                Ok(Fresh(BUILDS.fetch_add(1, Ordering::SeqCst)))
            })
            .unwrap();

        let scope = scope_with(registry);
        let a = scope.resolve::<Fresh>().unwrap();
        let b = scope.resolve::<Fresh>().unwrap();
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn unregistered_resolution_fails() {
        let scope = scope_with(ServiceRegistry::new());
        let err = scope.resolve::<Store>().unwrap_err();
        assert!(matches!(err, ServiceError::NotRegistered { .. }));
    }
}
